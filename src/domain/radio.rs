//! Radio collaborator boundary
//!
//! [`RadioPort`] is the request side: every method is fire-and-forget and the
//! outcome comes back later as a [`HardwareEvent`] on the link context. A
//! platform backend implements the trait and forwards its callbacks as events.

use crate::domain::models::{
    CharacteristicRef, DeviceAddress, DiscoveredCharacteristic, PeripheralId,
};
use uuid::Uuid;

/// Requests a link can make of the radio and GATT layers
pub trait RadioPort {
    /// Start scanning, reporting only peripherals that advertise `service`.
    /// Replaces any scan already running.
    fn start_scan(&mut self, service: Uuid);

    fn stop_scan(&mut self);

    /// Connect to `peripheral.address`. Every event about this attempt
    /// must carry `peripheral` unchanged.
    fn connect(&mut self, peripheral: PeripheralId);

    /// Cancel a pending or established connection
    fn cancel_connection(&mut self, peripheral: PeripheralId);

    fn discover_services(&mut self, peripheral: PeripheralId, services: &[Uuid]);

    fn discover_characteristics(
        &mut self,
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    );

    fn write_with_response(
        &mut self,
        peripheral: PeripheralId,
        characteristic: CharacteristicRef,
        value: &[u8],
    );

    fn read(&mut self, peripheral: PeripheralId, characteristic: CharacteristicRef);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioPowerState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioPowerState {
    pub fn is_ready(&self) -> bool {
        *self == Self::PoweredOn
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub services: Vec<Uuid>,
    pub rssi: Option<i16>,
}

/// Everything the radio and GATT layers report back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEvent {
    PowerStateChanged(RadioPowerState),
    AdvertisementReceived(Advertisement),
    Connected {
        peripheral: PeripheralId,
    },
    ConnectFailed {
        peripheral: PeripheralId,
        reason: String,
    },
    /// Unsolicited link loss or confirmation of a requested disconnect
    Disconnected {
        peripheral: PeripheralId,
        reason: Option<String>,
    },
    ServicesDiscovered {
        peripheral: PeripheralId,
        result: Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        result: Result<Vec<DiscoveredCharacteristic>, String>,
    },
    /// Completion of a read (or an unsolicited notification)
    ValueUpdated {
        peripheral: PeripheralId,
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
    },
    WriteCompleted {
        peripheral: PeripheralId,
        characteristic: Uuid,
        result: Result<(), String>,
    },
}

impl HardwareEvent {
    /// The peripheral handle the event is addressed to. Advertisements
    /// predate any handle.
    pub fn peripheral(&self) -> Option<PeripheralId> {
        match self {
            Self::PowerStateChanged(_) | Self::AdvertisementReceived(_) => None,
            Self::Connected { peripheral }
            | Self::ConnectFailed { peripheral, .. }
            | Self::Disconnected { peripheral, .. }
            | Self::ServicesDiscovered { peripheral, .. }
            | Self::CharacteristicsDiscovered { peripheral, .. }
            | Self::ValueUpdated { peripheral, .. }
            | Self::WriteCompleted { peripheral, .. } => Some(*peripheral),
        }
    }
}
