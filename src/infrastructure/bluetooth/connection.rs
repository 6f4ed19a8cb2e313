//! BLE Connection Module
//!
//! Device sessions and GATT access. Opened devices, services and
//! characteristics are cached per peripheral handle, so a device reopened
//! under a new handle never shares state with the old attempt.

use crate::domain::models::{CharacteristicRef, DiscoveredCharacteristic, PeripheralId};
use crate::domain::radio::HardwareEvent;
use crate::infrastructure::bluetooth::protocol;
use anyhow::{anyhow, bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCommunicationStatus, GattDeviceService, GattSession, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;

struct DeviceEntry {
    device: BluetoothLEDevice,
    session: Option<GattSession>,
    status_token: i64,
}

#[derive(Default)]
struct Registry {
    /// Connects requested and not yet cancelled
    pending: HashSet<PeripheralId>,
    devices: HashMap<PeripheralId, DeviceEntry>,
    services: HashMap<(PeripheralId, Uuid), GattDeviceService>,
    characteristics: HashMap<(PeripheralId, CharacteristicRef), GattCharacteristic>,
}

#[derive(Clone)]
pub struct BleConnection {
    registry: Arc<Mutex<Registry>>,
    event_sender: mpsc::UnboundedSender<HardwareEvent>,
}

impl BleConnection {
    pub fn new(event_sender: mpsc::UnboundedSender<HardwareEvent>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            event_sender,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mark_pending(&self, peripheral: PeripheralId) {
        self.registry().pending.insert(peripheral);
    }

    /// Open the device and keep a GATT session alive for it
    pub async fn connect(&self, peripheral: PeripheralId) -> Result<()> {
        info!("Connecting to Bluetooth device: {}", peripheral);
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(peripheral.address.0)?.await?;
        info!("Device opened: {:?}", device.Name()?);

        let session = match self.create_gatt_session(&device).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Failed to create GattSession, continuing anyway: {}", e);
                None
            }
        };

        let sender = self.event_sender.clone();
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        let _ = sender.send(HardwareEvent::Disconnected {
                            peripheral,
                            reason: Some("connection lost".to_string()),
                        });
                    }
                }
                Ok(())
            });
        let status_token = device.ConnectionStatusChanged(&status_handler)?;

        let entry = DeviceEntry {
            device,
            session,
            status_token,
        };

        let mut registry = self.registry();
        if !registry.pending.remove(&peripheral) {
            drop(registry);
            debug!("Connect to {} was cancelled meanwhile, closing", peripheral);
            Self::close_entry(entry);
            bail!("Connection cancelled");
        }
        registry.devices.insert(peripheral, entry);
        Ok(())
    }

    async fn create_gatt_session(&self, device: &BluetoothLEDevice) -> Result<GattSession> {
        let device_id = device.BluetoothDeviceId()?;
        let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        Ok(session)
    }

    /// Drop the device and everything cached for it. Returns true if
    /// anything was open or pending.
    pub fn close(&self, peripheral: PeripheralId) -> bool {
        let (was_pending, entry) = {
            let mut registry = self.registry();
            registry.services.retain(|(p, _), _| *p != peripheral);
            registry.characteristics.retain(|(p, _), _| *p != peripheral);
            (
                registry.pending.remove(&peripheral),
                registry.devices.remove(&peripheral),
            )
        };

        match entry {
            Some(entry) => {
                Self::close_entry(entry);
                info!("Closed device {}", peripheral);
                true
            }
            None => was_pending,
        }
    }

    fn close_entry(entry: DeviceEntry) {
        let _ = entry
            .device
            .RemoveConnectionStatusChanged(entry.status_token);
        if let Some(session) = entry.session {
            let _ = session.Close();
        }
        let _ = entry.device.Close();
    }

    fn device(&self, peripheral: PeripheralId) -> Result<BluetoothLEDevice> {
        self.registry()
            .devices
            .get(&peripheral)
            .map(|entry| entry.device.clone())
            .ok_or_else(|| anyhow!("Device {} is not open", peripheral))
    }

    pub async fn discover_services(
        &self,
        peripheral: PeripheralId,
        filter: &[Uuid],
    ) -> Result<Vec<Uuid>> {
        let device = self.device(peripheral)?;
        let mut found = Vec::new();

        for uuid in filter {
            let result = device
                .GetGattServicesForUuidWithCacheModeAsync(
                    protocol::to_guid(uuid),
                    BluetoothCacheMode::Uncached,
                )?
                .await?;

            if result.Status()? != GattCommunicationStatus::Success {
                bail!("Failed to get GATT services: {:?}", result.Status()?);
            }

            let services = result.Services()?;
            info!("Found {} services matching {}", services.Size()?, uuid);
            for i in 0..services.Size()? {
                let service = services.GetAt(i)?;
                let service_uuid = protocol::from_guid(&service.Uuid()?);
                self.registry()
                    .services
                    .insert((peripheral, service_uuid), service);
                if !found.contains(&service_uuid) {
                    found.push(service_uuid);
                }
            }
        }

        Ok(found)
    }

    pub async fn discover_characteristics(
        &self,
        peripheral: PeripheralId,
        service_uuid: Uuid,
        filter: &[Uuid],
    ) -> Result<Vec<DiscoveredCharacteristic>> {
        let service = self
            .registry()
            .services
            .get(&(peripheral, service_uuid))
            .cloned()
            .ok_or_else(|| anyhow!("Service {} was not discovered", service_uuid))?;

        let access_status = service.RequestAccessAsync()?.await?;
        debug!("Service access status: {:?}", access_status);

        let result = service
            .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        if result.Status()? != GattCommunicationStatus::Success {
            bail!("Failed to get characteristics: {:?}", result.Status()?);
        }

        let characteristics = result.Characteristics()?;
        info!("Found {} characteristics", characteristics.Size()?);

        let mut found = Vec::new();
        for i in 0..characteristics.Size()? {
            let characteristic = characteristics.GetAt(i)?;
            let uuid = protocol::from_guid(&characteristic.Uuid()?);
            if !filter.is_empty() && !filter.contains(&uuid) {
                continue;
            }

            found.push(DiscoveredCharacteristic {
                uuid,
                properties: protocol::properties(characteristic.CharacteristicProperties()?),
            });
            let reference = CharacteristicRef {
                service: service_uuid,
                uuid,
            };
            self.registry()
                .characteristics
                .insert((peripheral, reference), characteristic);
        }

        Ok(found)
    }

    fn characteristic(
        &self,
        peripheral: PeripheralId,
        reference: CharacteristicRef,
    ) -> Result<GattCharacteristic> {
        self.registry()
            .characteristics
            .get(&(peripheral, reference))
            .cloned()
            .ok_or_else(|| anyhow!("Characteristic {} is not bound", reference.uuid))
    }

    pub async fn write(
        &self,
        peripheral: PeripheralId,
        reference: CharacteristicRef,
        value: &[u8],
    ) -> Result<()> {
        let characteristic = self.characteristic(peripheral, reference)?;
        let buffer = protocol::to_buffer(value)?;
        let status = characteristic
            .WriteValueWithOptionAsync(&buffer, GattWriteOption::WriteWithResponse)?
            .await?;
        protocol::status_result(status).map_err(|reason| anyhow!(reason))
    }

    pub async fn read(&self, peripheral: PeripheralId, reference: CharacteristicRef) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(peripheral, reference)?;
        let result = characteristic
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        protocol::status_result(result.Status()?).map_err(|reason| anyhow!(reason))?;
        protocol::read_buffer(&result.Value()?)
    }
}
