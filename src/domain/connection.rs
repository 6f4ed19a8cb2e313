//! Connection State Machine
//!
//! Drives exactly one peripheral through connect, service discovery,
//! characteristic discovery and binding. Every hardware completion is checked
//! against the tracked peripheral; completions for any other handle are stale
//! and dropped.
//!
//! ```text
//! Idle/Scanning ──discovered──▶ Connecting ──connected──▶ DiscoveringServices
//!      ▲                            │                          │ services
//!      │                            │ failed                   ▼
//!      ├────────────────────────────┴─────── DiscoveringCharacteristics
//!      │         (any error or disconnect)                     │ both bound
//!      │                                                       ▼
//!      └──────────── disconnected ◀── Disconnecting ◀─────── Ready
//! ```

use crate::domain::adapter::AdapterController;
use crate::domain::error::LinkError;
use crate::domain::identifiers::{CharacteristicRole, ServiceIdentity};
use crate::domain::models::{
    BoundCharacteristics, CharacteristicRef, ConnectionState, DiscoveredCharacteristic,
    LinkEvent, MessageSeverity, PeripheralId, StatusMessage,
};
use crate::domain::radio::RadioPort;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Internal phase. Bindings only exist inside `Ready`, so a half-bound
/// peripheral can never be observed as ready.
#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Idle,
    Scanning,
    Connecting {
        peripheral: PeripheralId,
    },
    DiscoveringServices {
        peripheral: PeripheralId,
    },
    DiscoveringCharacteristics {
        peripheral: PeripheralId,
        pending: HashSet<Uuid>,
        command: Option<CharacteristicRef>,
        telemetry: Option<CharacteristicRef>,
    },
    Ready {
        peripheral: PeripheralId,
        bound: BoundCharacteristics,
    },
    Disconnecting {
        peripheral: PeripheralId,
    },
}

impl Phase {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Idle,
            Self::Scanning => ConnectionState::Scanning,
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::DiscoveringServices { .. } => ConnectionState::DiscoveringServices,
            Self::DiscoveringCharacteristics { .. } => ConnectionState::DiscoveringCharacteristics,
            Self::Ready { .. } => ConnectionState::Ready,
            Self::Disconnecting { .. } => ConnectionState::Disconnecting,
        }
    }

    fn peripheral(&self) -> Option<PeripheralId> {
        match self {
            Self::Idle | Self::Scanning => None,
            Self::Connecting { peripheral }
            | Self::DiscoveringServices { peripheral }
            | Self::DiscoveringCharacteristics { peripheral, .. }
            | Self::Ready { peripheral, .. }
            | Self::Disconnecting { peripheral } => Some(*peripheral),
        }
    }
}

pub struct ConnectionMachine {
    identity: ServiceIdentity,
    phase: Phase,
    event_sender: mpsc::UnboundedSender<LinkEvent>,
}

impl ConnectionMachine {
    pub fn new(identity: ServiceIdentity, event_sender: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            identity,
            phase: Phase::Idle,
            event_sender,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.phase.state()
    }

    /// The tracked peripheral, if any
    pub fn peripheral(&self) -> Option<PeripheralId> {
        self.phase.peripheral()
    }

    /// Peripheral and bindings, only while ready
    pub fn binding(&self) -> Option<(PeripheralId, &BoundCharacteristics)> {
        match &self.phase {
            Phase::Ready { peripheral, bound } => Some((*peripheral, bound)),
            _ => None,
        }
    }

    pub fn on_scan_started(&mut self) {
        if self.phase == Phase::Idle {
            self.transition(Phase::Scanning);
        }
    }

    pub fn on_scan_stopped(&mut self) {
        if self.phase == Phase::Scanning {
            self.transition(Phase::Idle);
        }
    }

    /// Start a connection attempt. Returns false when a peripheral is
    /// already tracked; the new one is dropped, not queued.
    pub fn on_peripheral_discovered<R: RadioPort>(
        &mut self,
        peripheral: PeripheralId,
        adapter: &mut AdapterController,
        radio: &mut R,
    ) -> bool {
        if let Some(current) = self.peripheral() {
            debug!(
                "Ignoring {} while {} is tracked ({})",
                peripheral,
                current,
                self.state()
            );
            return false;
        }

        adapter.stop_scan(radio);
        info!("Connecting to {}", peripheral);
        radio.connect(peripheral);
        self.transition(Phase::Connecting { peripheral });
        self.send_log("Connecting to tracker...", MessageSeverity::Info);
        true
    }

    pub fn on_connected<R: RadioPort>(&mut self, peripheral: PeripheralId, radio: &mut R) {
        if !self.expect(peripheral, ConnectionState::Connecting, "connect") {
            return;
        }

        info!("Connected to {}, discovering services", peripheral);
        radio.discover_services(peripheral, &[self.identity.service]);
        self.transition(Phase::DiscoveringServices { peripheral });
    }

    pub fn on_connect_failed(&mut self, peripheral: PeripheralId, reason: String) {
        if !self.expect(peripheral, ConnectionState::Connecting, "connect failure") {
            return;
        }

        warn!("Failed to connect to {}: {}", peripheral, reason);
        self.abort(LinkError::ConnectFailed(reason));
    }

    /// `services` must already be restricted to the tracker service
    pub fn on_services_discovered<R: RadioPort>(
        &mut self,
        peripheral: PeripheralId,
        result: Result<Vec<Uuid>, String>,
        radio: &mut R,
    ) {
        if !self.expect(
            peripheral,
            ConnectionState::DiscoveringServices,
            "service discovery",
        ) {
            return;
        }

        let services = match result {
            Ok(services) => services,
            Err(reason) => {
                warn!("Error discovering services on {}: {}", peripheral, reason);
                radio.cancel_connection(peripheral);
                self.abort(LinkError::NoMatchingService);
                return;
            }
        };

        let pending: HashSet<Uuid> = services.into_iter().collect();
        if pending.is_empty() {
            warn!("No tracker service found on {}", peripheral);
            radio.cancel_connection(peripheral);
            self.abort(LinkError::NoMatchingService);
            return;
        }

        let filter = self.identity.characteristic_filter();
        for service in &pending {
            debug!("Discovering characteristics of {}", service);
            radio.discover_characteristics(peripheral, *service, &filter);
        }

        self.transition(Phase::DiscoveringCharacteristics {
            peripheral,
            pending,
            command: None,
            telemetry: None,
        });
    }

    /// `characteristics` must already be restricted to the tracker ones
    pub fn on_characteristics_discovered<R: RadioPort>(
        &mut self,
        peripheral: PeripheralId,
        service: Uuid,
        result: Result<Vec<DiscoveredCharacteristic>, String>,
        radio: &mut R,
    ) {
        if !self.expect(
            peripheral,
            ConnectionState::DiscoveringCharacteristics,
            "characteristic discovery",
        ) {
            return;
        }

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(reason) => {
                warn!(
                    "Error discovering characteristics of {} on {}: {}",
                    service, peripheral, reason
                );
                radio.cancel_connection(peripheral);
                self.abort(LinkError::NoMatchingCharacteristic);
                return;
            }
        };

        let Phase::DiscoveringCharacteristics {
            pending,
            command,
            telemetry,
            ..
        } = &mut self.phase
        else {
            return;
        };

        if !pending.remove(&service) {
            debug!("Characteristics for unrequested service {}, dropping", service);
            return;
        }

        for characteristic in characteristics {
            let reference = CharacteristicRef {
                service,
                uuid: characteristic.uuid,
            };
            match self.identity.role_of(&characteristic.uuid) {
                Some(CharacteristicRole::Command) => {
                    if !characteristic.properties.write {
                        warn!("Command characteristic does not advertise write-with-response");
                    }
                    info!("Found command characteristic {}", characteristic.uuid);
                    command.get_or_insert(reference);
                }
                Some(CharacteristicRole::Telemetry) => {
                    if !characteristic.properties.read {
                        warn!("Telemetry characteristic does not advertise read");
                    }
                    info!("Found telemetry characteristic {}", characteristic.uuid);
                    telemetry.get_or_insert(reference);
                }
                None => debug!("Skipping characteristic {}", characteristic.uuid),
            }
        }

        match (*command, *telemetry) {
            (Some(command), Some(telemetry)) => {
                info!("Tracker {} ready", peripheral);
                self.transition(Phase::Ready {
                    peripheral,
                    bound: BoundCharacteristics { command, telemetry },
                });
                self.send_log("Tracker connected", MessageSeverity::Success);
            }
            _ if pending.is_empty() => {
                warn!("Tracker characteristics incomplete on {}", peripheral);
                radio.cancel_connection(peripheral);
                self.abort(LinkError::NoMatchingCharacteristic);
            }
            _ => debug!("Awaiting {} more service(s)", pending.len()),
        }
    }

    /// Caller-initiated disconnect. Mid-flight attempts are dropped at once;
    /// an established link waits for the radio to confirm.
    pub fn request_disconnect<R: RadioPort>(&mut self, radio: &mut R) {
        match self.phase {
            Phase::Idle | Phase::Scanning | Phase::Disconnecting { .. } => {
                debug!("Disconnect requested while {}, nothing to do", self.state());
            }
            Phase::Connecting { peripheral }
            | Phase::DiscoveringServices { peripheral }
            | Phase::DiscoveringCharacteristics { peripheral, .. } => {
                info!("Cancelling connection attempt to {}", peripheral);
                radio.cancel_connection(peripheral);
                self.transition(Phase::Idle);
                self.send_log("Connection cancelled", MessageSeverity::Info);
            }
            Phase::Ready { peripheral, .. } => {
                info!("Disconnecting from {}", peripheral);
                radio.cancel_connection(peripheral);
                self.transition(Phase::Disconnecting { peripheral });
            }
        }
    }

    /// The single reset path for a tracked peripheral
    pub fn on_disconnected(&mut self, peripheral: PeripheralId, reason: Option<String>) {
        if self.peripheral() != Some(peripheral) {
            debug!("Disconnect from untracked {}, dropping", peripheral);
            return;
        }

        match (&self.phase, reason) {
            (Phase::Disconnecting { .. }, _) => {
                info!("Disconnected from {}", peripheral);
                self.send_log("Disconnected from tracker", MessageSeverity::Info);
            }
            (_, Some(reason)) => {
                warn!("Lost connection to {}: {}", peripheral, reason);
                self.send_log("Connection lost", MessageSeverity::Warning);
            }
            (_, None) => {
                warn!("Lost connection to {}", peripheral);
                self.send_log("Connection lost", MessageSeverity::Warning);
            }
        }
        self.transition(Phase::Idle);
    }

    /// Drop everything without talking to the radio
    pub fn force_idle(&mut self, reason: &str) {
        if self.phase != Phase::Idle {
            info!("Resetting link: {}", reason);
            self.transition(Phase::Idle);
        }
    }

    /// Checks that a completion belongs to the tracked peripheral and
    /// arrives in the phase that requested it
    fn expect(&self, peripheral: PeripheralId, state: ConnectionState, what: &str) -> bool {
        if self.peripheral() != Some(peripheral) {
            debug!("Stale {} completion from {}, dropping", what, peripheral);
            return false;
        }
        if self.state() != state {
            debug!(
                "Unexpected {} completion while {}, dropping",
                what,
                self.state()
            );
            return false;
        }
        true
    }

    fn abort(&mut self, error: LinkError) {
        self.send_log(&error.to_string(), MessageSeverity::Error);
        let _ = self.event_sender.send(LinkEvent::Error(error));
        self.transition(Phase::Idle);
    }

    fn transition(&mut self, next: Phase) {
        let before = self.phase.state();
        self.phase = next;
        let after = self.phase.state();
        if before != after {
            debug!("Link state {} -> {}", before, after);
            let _ = self.event_sender.send(LinkEvent::StateChanged(after));
        }
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(LinkEvent::Log(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}
