//! Bluetooth Service Module
//!
//! WinRT implementation of [`RadioPort`]. Requests are started on the tokio
//! runtime and their outcomes are reported back as [`HardwareEvent`]s.

use crate::domain::models::{CharacteristicRef, PeripheralId};
use crate::domain::radio::{HardwareEvent, RadioPort, RadioPowerState};
use crate::infrastructure::bluetooth::{connection::BleConnection, protocol, scanner::BleScanner};
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;
use windows::Devices::Bluetooth::BluetoothAdapter;
use windows::Devices::Radios::Radio;
use windows::Foundation::TypedEventHandler;

pub struct WinRtRadio {
    scanner: BleScanner,
    connection: BleConnection,
    event_sender: mpsc::UnboundedSender<HardwareEvent>,
    // Kept alive so power notifications keep flowing
    radio: Option<Radio>,
}

impl WinRtRadio {
    /// Open the default adapter and start reporting its power state
    pub async fn open(event_sender: mpsc::UnboundedSender<HardwareEvent>) -> Result<Self> {
        let radio = match Self::watch_power(event_sender.clone()).await {
            Ok(radio) => Some(radio),
            Err(e) => {
                warn!("No usable Bluetooth adapter: {}", e);
                let _ = event_sender.send(HardwareEvent::PowerStateChanged(
                    RadioPowerState::Unsupported,
                ));
                None
            }
        };

        Ok(Self {
            scanner: BleScanner::new(event_sender.clone()),
            connection: BleConnection::new(event_sender.clone()),
            event_sender,
            radio,
        })
    }

    async fn watch_power(sender: mpsc::UnboundedSender<HardwareEvent>) -> Result<Radio> {
        let adapter = BluetoothAdapter::GetDefaultAsync()?.await?;
        if !adapter.IsLowEnergySupported()? {
            anyhow::bail!("Adapter does not support Bluetooth LE");
        }

        let radio = adapter.GetRadioAsync()?.await?;
        let initial = protocol::power_state(radio.State()?);
        info!("Bluetooth radio state: {:?}", initial);
        let _ = sender.send(HardwareEvent::PowerStateChanged(initial));

        radio.StateChanged(&TypedEventHandler::new(
            move |radio: windows::core::Ref<Radio>, _| {
                if let Some(radio) = radio.as_ref() {
                    let state = protocol::power_state(radio.State()?);
                    let _ = sender.send(HardwareEvent::PowerStateChanged(state));
                }
                Ok(())
            },
        ))?;

        Ok(radio)
    }

    pub fn is_available(&self) -> bool {
        self.radio.is_some()
    }
}

impl RadioPort for WinRtRadio {
    fn start_scan(&mut self, service: Uuid) {
        if let Err(e) = self.scanner.start(service) {
            error!("Failed to start scan: {}", e);
        }
    }

    fn stop_scan(&mut self) {
        if let Err(e) = self.scanner.stop() {
            error!("Failed to stop scan: {}", e);
        }
    }

    fn connect(&mut self, peripheral: PeripheralId) {
        self.connection.mark_pending(peripheral);
        let connection = self.connection.clone();
        let sender = self.event_sender.clone();
        tokio::spawn(async move {
            let event = match connection.connect(peripheral).await {
                Ok(()) => HardwareEvent::Connected { peripheral },
                Err(e) => HardwareEvent::ConnectFailed {
                    peripheral,
                    reason: e.to_string(),
                },
            };
            let _ = sender.send(event);
        });
    }

    fn cancel_connection(&mut self, peripheral: PeripheralId) {
        // Closing a WinRT device raises no status change, so confirm here
        if self.connection.close(peripheral) {
            let _ = self.event_sender.send(HardwareEvent::Disconnected {
                peripheral,
                reason: None,
            });
        }
    }

    fn discover_services(&mut self, peripheral: PeripheralId, services: &[Uuid]) {
        let connection = self.connection.clone();
        let sender = self.event_sender.clone();
        let filter = services.to_vec();
        tokio::spawn(async move {
            let result = connection
                .discover_services(peripheral, &filter)
                .await
                .map_err(|e| e.to_string());
            let _ = sender.send(HardwareEvent::ServicesDiscovered { peripheral, result });
        });
    }

    fn discover_characteristics(
        &mut self,
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) {
        let connection = self.connection.clone();
        let sender = self.event_sender.clone();
        let filter = characteristics.to_vec();
        tokio::spawn(async move {
            let result = connection
                .discover_characteristics(peripheral, service, &filter)
                .await
                .map_err(|e| e.to_string());
            let _ = sender.send(HardwareEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            });
        });
    }

    fn write_with_response(
        &mut self,
        peripheral: PeripheralId,
        characteristic: CharacteristicRef,
        value: &[u8],
    ) {
        let connection = self.connection.clone();
        let sender = self.event_sender.clone();
        let value = value.to_vec();
        tokio::spawn(async move {
            let result = connection
                .write(peripheral, characteristic, &value)
                .await
                .map_err(|e| e.to_string());
            let _ = sender.send(HardwareEvent::WriteCompleted {
                peripheral,
                characteristic: characteristic.uuid,
                result,
            });
        });
    }

    fn read(&mut self, peripheral: PeripheralId, characteristic: CharacteristicRef) {
        let connection = self.connection.clone();
        let sender = self.event_sender.clone();
        tokio::spawn(async move {
            let result = connection
                .read(peripheral, characteristic)
                .await
                .map_err(|e| e.to_string());
            let _ = sender.send(HardwareEvent::ValueUpdated {
                peripheral,
                characteristic: characteristic.uuid,
                result,
            });
        });
    }
}
