//! Adapter Controller
//!
//! Tracks radio power and the scan session. Advertisements are filtered to
//! the tracker service and deduplicated per device within one session. Each
//! accepted advertisement mints a fresh [`PeripheralId`].

use crate::domain::connection::ConnectionMachine;
use crate::domain::error::LinkError;
use crate::domain::models::{
    DeviceAddress, LinkEvent, MessageSeverity, PeripheralId, StatusMessage,
};
use crate::domain::radio::{Advertisement, RadioPort, RadioPowerState};
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct AdapterController {
    service_uuid: Uuid,
    power: RadioPowerState,
    scanning: bool,
    seen: HashSet<DeviceAddress>,
    generation: u64,
    event_sender: mpsc::UnboundedSender<LinkEvent>,
}

impl AdapterController {
    pub fn new(service_uuid: Uuid, event_sender: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            service_uuid,
            power: RadioPowerState::Unknown,
            scanning: false,
            seen: HashSet::new(),
            generation: 0,
            event_sender,
        }
    }

    pub fn power_state(&self) -> RadioPowerState {
        self.power
    }

    pub fn is_ready(&self) -> bool {
        self.power.is_ready()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Record a new power state. Losing readiness cancels the scan and
    /// collapses the connection machine to idle.
    pub fn power_state_changed<R: RadioPort>(
        &mut self,
        state: RadioPowerState,
        machine: &mut ConnectionMachine,
        radio: &mut R,
    ) {
        let was_ready = self.is_ready();
        self.power = state;

        match state {
            RadioPowerState::PoweredOn => info!("Bluetooth is switched on"),
            RadioPowerState::PoweredOff => info!("Bluetooth is switched off"),
            RadioPowerState::Unsupported => warn!("Bluetooth is not supported"),
            RadioPowerState::Unauthorized => warn!("Bluetooth access is not authorized"),
            RadioPowerState::Resetting | RadioPowerState::Unknown => {
                info!("Bluetooth state: {:?}", state)
            }
        }

        if was_ready && !self.is_ready() {
            if self.scanning {
                self.scanning = false;
                self.seen.clear();
                radio.stop_scan();
            }
            machine.force_idle("Bluetooth adapter is no longer available");
            self.send_log("Bluetooth unavailable", MessageSeverity::Warning);
        }
    }

    /// Start (or restart) scanning for the tracker service
    pub fn start_scan<R: RadioPort>(&mut self, radio: &mut R) -> Result<(), LinkError> {
        if !self.is_ready() {
            warn!("Cannot scan, Bluetooth is not available ({:?})", self.power);
            return Err(LinkError::AdapterNotReady);
        }

        if self.scanning {
            debug!("Scan already running, re-issuing filter");
            radio.stop_scan();
        }

        info!("Scanning for peripherals advertising {}", self.service_uuid);
        self.seen.clear();
        self.scanning = true;
        radio.start_scan(self.service_uuid);
        self.send_log("Scanning for tracker...", MessageSeverity::Info);
        Ok(())
    }

    pub fn stop_scan<R: RadioPort>(&mut self, radio: &mut R) {
        if !self.scanning {
            return;
        }

        info!("Stopping scan");
        self.scanning = false;
        self.seen.clear();
        radio.stop_scan();
    }

    /// Returns a new handle when the advertisement is a new match for the
    /// current scan session
    pub fn on_advertisement(&mut self, adv: &Advertisement) -> Option<PeripheralId> {
        if !self.scanning {
            debug!(address = %adv.address, "Advertisement outside of a scan, dropping");
            return None;
        }

        if !adv.services.contains(&self.service_uuid) {
            debug!(address = %adv.address, "Advertisement without tracker service, dropping");
            return None;
        }

        if !self.seen.insert(adv.address) {
            return None;
        }

        self.generation += 1;
        let peripheral = PeripheralId {
            address: adv.address,
            generation: self.generation,
        };
        info!(
            "Discovered {} ({}), rssi {:?}",
            adv.name.as_deref().unwrap_or("Unknown"),
            peripheral,
            adv.rssi
        );
        let _ = self.event_sender.send(LinkEvent::PeripheralDiscovered {
            peripheral,
            name: adv.name.clone(),
        });
        Some(peripheral)
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(LinkEvent::Log(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}
