//! BLE Scanner Module
//!
//! Advertisement watcher filtered to one service UUID. Every matching
//! advertisement is forwarded as a hardware event.

use crate::domain::models::DeviceAddress;
use crate::domain::radio::{Advertisement, HardwareEvent};
use crate::infrastructure::bluetooth::protocol;
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

pub struct BleScanner {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    event_sender: mpsc::UnboundedSender<HardwareEvent>,
}

impl BleScanner {
    pub fn new(event_sender: mpsc::UnboundedSender<HardwareEvent>) -> Self {
        Self {
            watcher: None,
            event_sender,
        }
    }

    /// Start scanning for advertisements listing `service_uuid`
    pub fn start(&mut self, service_uuid: Uuid) -> Result<()> {
        self.stop()?;

        info!("Starting BLE scan for service UUID: {}", service_uuid);

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let target = protocol::to_guid(&service_uuid);
        watcher
            .AdvertisementFilter()?
            .Advertisement()?
            .ServiceUuids()?
            .Append(target)?;

        let sender = self.event_sender.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let service_uuids = adv.ServiceUuids()?;

                    let mut services = Vec::new();
                    for i in 0..service_uuids.Size()? {
                        services.push(protocol::from_guid(&service_uuids.GetAt(i)?));
                    }

                    let name = adv.LocalName()?.to_string();
                    let advertisement = Advertisement {
                        address: DeviceAddress(args.BluetoothAddress()?),
                        name: if name.is_empty() { None } else { Some(name) },
                        services,
                        rssi: Some(args.RawSignalStrengthInDBm()?),
                    };

                    let _ = sender.send(HardwareEvent::AdvertisementReceived(advertisement));
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        self.watcher = Some(watcher);

        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping BLE scan...");
            watcher.Stop()?;
        }
        Ok(())
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
