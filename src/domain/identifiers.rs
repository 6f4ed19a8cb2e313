//! Tracker GATT identifiers
//!
//! These must match the tracker firmware bit-for-bit. They are configuration
//! constants, never discovered at runtime.

use crate::domain::settings::BleSettings;
use anyhow::{Context, Result};
use uuid::{uuid, Uuid};

/// Tracker service UUID, the only service advertised and discovered
pub const SERVICE_UUID: Uuid = uuid!("ab0828b1-198e-4351-b779-901fa0e0371e");

/// Peripheral identifier of the reference tracker. Informational only,
/// platforms assign their own per-host peripheral ids.
pub const PERIPHERAL_UUID: Uuid = uuid!("24517ce4-2dc1-6489-39a4-672bbe4344df");

/// Command characteristic - written with response
pub const COMMAND_CHAR_UUID: Uuid = uuid!("4ac8a682-9736-4e5d-932b-e9b31405049c");

/// Telemetry characteristic - read on request
pub const TELEMETRY_CHAR_UUID: Uuid = uuid!("9db335aa-0c19-4a29-93c9-2dabeb1dd044");

/// Which characteristic of the tracker service a UUID refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicRole {
    Command,
    Telemetry,
}

/// The fixed GATT identity of the tracker. Built once at startup and shared
/// read-only by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub service: Uuid,
    pub peripheral: Uuid,
    pub command: Uuid,
    pub telemetry: Uuid,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            service: SERVICE_UUID,
            peripheral: PERIPHERAL_UUID,
            command: COMMAND_CHAR_UUID,
            telemetry: TELEMETRY_CHAR_UUID,
        }
    }
}

impl ServiceIdentity {
    /// Parse the identity from the BLE section of the settings file
    pub fn from_settings(settings: &BleSettings) -> Result<Self> {
        Ok(Self {
            service: parse_uuid("service", &settings.service_uuid)?,
            peripheral: parse_uuid("peripheral", &settings.peripheral_uuid)?,
            command: parse_uuid("command characteristic", &settings.command_char_uuid)?,
            telemetry: parse_uuid("telemetry characteristic", &settings.telemetry_char_uuid)?,
        })
    }

    pub fn is_target_service(&self, uuid: &Uuid) -> bool {
        self.service == *uuid
    }

    /// Classify a characteristic UUID, `None` for anything foreign
    pub fn role_of(&self, uuid: &Uuid) -> Option<CharacteristicRole> {
        if *uuid == self.command {
            Some(CharacteristicRole::Command)
        } else if *uuid == self.telemetry {
            Some(CharacteristicRole::Telemetry)
        } else {
            None
        }
    }

    /// Characteristic filter handed to the platform on discovery
    pub fn characteristic_filter(&self) -> [Uuid; 2] {
        [self.command, self.telemetry]
    }
}

fn parse_uuid(what: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim()).with_context(|| format!("Invalid {what} UUID: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_match_constants() {
        let identity = ServiceIdentity::from_settings(&BleSettings::default()).unwrap();
        assert_eq!(identity, ServiceIdentity::default());
    }

    #[test]
    fn test_uppercase_uuid_is_accepted() {
        let settings = BleSettings {
            command_char_uuid: "4AC8A682-9736-4E5D-932B-E9B31405049C".to_string(),
            ..BleSettings::default()
        };
        let identity = ServiceIdentity::from_settings(&settings).unwrap();
        assert_eq!(identity.command, COMMAND_CHAR_UUID);
    }

    #[test]
    fn test_malformed_uuid_is_rejected() {
        let settings = BleSettings {
            service_uuid: "not-a-uuid".to_string(),
            ..BleSettings::default()
        };
        assert!(ServiceIdentity::from_settings(&settings).is_err());
    }

    #[test]
    fn test_role_of() {
        let identity = ServiceIdentity::default();
        assert_eq!(
            identity.role_of(&COMMAND_CHAR_UUID),
            Some(CharacteristicRole::Command)
        );
        assert_eq!(
            identity.role_of(&TELEMETRY_CHAR_UUID),
            Some(CharacteristicRole::Telemetry)
        );
        assert_eq!(identity.role_of(&SERVICE_UUID), None);
    }
}
