//! WinRT conversions
//!
//! Translates between the platform-neutral link types and their WinRT
//! counterparts.

use crate::domain::models::CharacteristicProperties;
use crate::domain::radio::RadioPowerState;
use anyhow::Result;
use tracing::trace;
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristicProperties, GattCommunicationStatus,
};
use windows::Devices::Radios::RadioState;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

pub fn to_guid(uuid: &Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

pub fn from_guid(guid: &GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

pub fn power_state(state: RadioState) -> RadioPowerState {
    match state {
        RadioState::On => RadioPowerState::PoweredOn,
        RadioState::Off => RadioPowerState::PoweredOff,
        RadioState::Disabled => RadioPowerState::Unauthorized,
        _ => RadioPowerState::Unknown,
    }
}

pub fn properties(props: GattCharacteristicProperties) -> CharacteristicProperties {
    CharacteristicProperties {
        read: props.contains(GattCharacteristicProperties::Read),
        write: props.contains(GattCharacteristicProperties::Write),
        write_without_response: props.contains(GattCharacteristicProperties::WriteWithoutResponse),
        notify: props.contains(GattCharacteristicProperties::Notify),
    }
}

/// Map a GATT status to the failure reason carried in hardware events
pub fn status_result(status: GattCommunicationStatus) -> Result<(), String> {
    if status == GattCommunicationStatus::Success {
        Ok(())
    } else {
        Err(format!("GATT status {:?}", status))
    }
}

pub fn to_buffer(bytes: &[u8]) -> Result<IBuffer> {
    let writer = DataWriter::new()?;
    writer.WriteBytes(bytes)?;
    Ok(writer.DetachBuffer()?)
}

pub fn read_buffer(buffer: &IBuffer) -> Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    trace!("Raw value: {:02X?}", &bytes);
    Ok(bytes)
}
