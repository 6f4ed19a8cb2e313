use crate::domain::error::LinkError;
use std::borrow::Cow;
use std::fmt;
use uuid::Uuid;

/// Radio address of a device. Stable across discoveries of the same device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress(pub u64);

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#014X}", self.0)
    }
}

/// Handle of one discovery of a device. Every discovery mints a new
/// generation, so completions addressed to an earlier attempt on the same
/// device never match the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeripheralId {
    pub address: DeviceAddress,
    pub generation: u64,
}

impl PeripheralId {
    pub const fn new(address: u64, generation: u64) -> Self {
        Self {
            address: DeviceAddress(address),
            generation,
        }
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
    Disconnecting,
}

/// Which controls a front-end should offer in a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlAvailability {
    pub can_scan: bool,
    pub can_disconnect: bool,
    pub can_exchange: bool,
}

impl ConnectionState {
    /// True while a peripheral handle is tracked
    pub fn has_peripheral(&self) -> bool {
        !matches!(self, Self::Idle | Self::Scanning)
    }

    pub fn controls(&self) -> ControlAvailability {
        ControlAvailability {
            can_scan: !self.has_peripheral(),
            can_disconnect: self.has_peripheral() && *self != Self::Disconnecting,
            can_exchange: *self == Self::Ready,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::DiscoveringServices => "discovering services",
            Self::DiscoveringCharacteristics => "discovering characteristics",
            Self::Ready => "ready",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// A characteristic addressed by its owning service and its own UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub uuid: Uuid,
}

/// Both tracker characteristics. Only exists while the link is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundCharacteristics {
    pub command: CharacteristicRef,
    pub telemetry: CharacteristicRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// Raw telemetry as read from the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telemetry {
    pub bytes: Vec<u8>,
}

impl Telemetry {
    /// Telemetry decoded as text; invalid sequences become U+FFFD
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Events published to observers of the link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged(ConnectionState),
    PeripheralDiscovered {
        peripheral: PeripheralId,
        name: Option<String>,
    },
    CommandAcknowledged(Result<(), LinkError>),
    TelemetryReceived(Telemetry),
    TelemetryReadFailed(LinkError),
    /// A connection attempt ended with a hardware-layer error
    Error(LinkError),
    Log(StatusMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controls_follow_state() {
        let idle = ConnectionState::Idle.controls();
        assert!(idle.can_scan && !idle.can_disconnect && !idle.can_exchange);

        let connecting = ConnectionState::Connecting.controls();
        assert!(!connecting.can_scan && connecting.can_disconnect && !connecting.can_exchange);

        let ready = ConnectionState::Ready.controls();
        assert!(!ready.can_scan && ready.can_disconnect && ready.can_exchange);

        let closing = ConnectionState::Disconnecting.controls();
        assert!(!closing.can_scan && !closing.can_disconnect && !closing.can_exchange);
    }

    #[test]
    fn test_telemetry_text_is_lossy() {
        let telemetry = Telemetry {
            bytes: vec![b'o', b'k', 0xFF],
        };
        assert_eq!(telemetry.text(), "ok\u{FFFD}");
    }

    #[test]
    fn test_peripheral_id_display() {
        assert_eq!(DeviceAddress(0xAABBCCDDEEFF).to_string(), "0xAABBCCDDEEFF");
        assert_eq!(
            PeripheralId::new(0xAABBCCDDEEFF, 3).to_string(),
            "0xAABBCCDDEEFF/3"
        );
    }

    #[test]
    fn test_rediscovery_is_a_different_handle() {
        let first = PeripheralId::new(0xA1, 1);
        let second = PeripheralId::new(0xA1, 2);
        assert_eq!(first.address, second.address);
        assert_ne!(first, second);
    }
}
