//! Event Dispatcher
//!
//! Single entry point for caller commands and hardware events. Owns the
//! adapter controller, the connection machine, the exchange channel and the
//! radio, and is only ever driven from one context.

use crate::domain::adapter::AdapterController;
use crate::domain::connection::ConnectionMachine;
use crate::domain::error::LinkError;
use crate::domain::exchange::ExchangeChannel;
use crate::domain::identifiers::{CharacteristicRole, ServiceIdentity};
use crate::domain::models::{BoundCharacteristics, ConnectionState, LinkEvent, PeripheralId};
use crate::domain::radio::{HardwareEvent, RadioPort, RadioPowerState};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Caller-issued operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    StartScan,
    StopScan,
    SendCommand(Vec<u8>),
    RequestTelemetry,
    Disconnect,
}

pub struct EventDispatcher<R: RadioPort> {
    identity: ServiceIdentity,
    adapter: AdapterController,
    machine: ConnectionMachine,
    exchange: ExchangeChannel,
    radio: R,
}

impl<R: RadioPort> EventDispatcher<R> {
    pub fn new(
        identity: ServiceIdentity,
        radio: R,
        event_sender: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            identity,
            adapter: AdapterController::new(identity.service, event_sender.clone()),
            machine: ConnectionMachine::new(identity, event_sender.clone()),
            exchange: ExchangeChannel::new(event_sender),
            radio,
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn peripheral(&self) -> Option<PeripheralId> {
        self.machine.peripheral()
    }

    pub fn bound(&self) -> Option<&BoundCharacteristics> {
        self.machine.binding().map(|(_, bound)| bound)
    }

    pub fn power_state(&self) -> RadioPowerState {
        self.adapter.power_state()
    }

    pub fn is_scanning(&self) -> bool {
        self.adapter.is_scanning()
    }

    pub fn execute(&mut self, command: LinkCommand) -> Result<(), LinkError> {
        debug!("Command {:?} while {}", command, self.state());
        let result = match command {
            LinkCommand::StartScan if self.state().has_peripheral() => {
                warn!("Cannot scan while {}", self.state());
                Err(LinkError::NotReady {
                    state: self.state(),
                })
            }
            LinkCommand::StartScan => {
                self.adapter.start_scan(&mut self.radio)?;
                self.machine.on_scan_started();
                Ok(())
            }
            LinkCommand::StopScan => {
                self.adapter.stop_scan(&mut self.radio);
                self.machine.on_scan_stopped();
                Ok(())
            }
            LinkCommand::SendCommand(payload) => {
                self.exchange
                    .send_command(&self.machine, &payload, &mut self.radio)
            }
            LinkCommand::RequestTelemetry => self
                .exchange
                .request_telemetry(&self.machine, &mut self.radio),
            LinkCommand::Disconnect => {
                if self.state() == ConnectionState::Scanning {
                    self.adapter.stop_scan(&mut self.radio);
                    self.machine.on_scan_stopped();
                } else {
                    self.machine.request_disconnect(&mut self.radio);
                }
                Ok(())
            }
        };
        self.sync_exchange();
        result
    }

    pub fn dispatch(&mut self, event: HardwareEvent) {
        if let Some(peripheral) = event.peripheral() {
            if self.machine.peripheral() != Some(peripheral) {
                debug!("Dropping event for untracked {}: {:?}", peripheral, event);
                return;
            }
        }

        match event {
            HardwareEvent::PowerStateChanged(state) => {
                self.adapter
                    .power_state_changed(state, &mut self.machine, &mut self.radio);
            }
            HardwareEvent::AdvertisementReceived(adv) => {
                if let Some(peripheral) = self.adapter.on_advertisement(&adv) {
                    self.machine.on_peripheral_discovered(
                        peripheral,
                        &mut self.adapter,
                        &mut self.radio,
                    );
                }
            }
            HardwareEvent::Connected { peripheral } => {
                self.machine.on_connected(peripheral, &mut self.radio);
            }
            HardwareEvent::ConnectFailed { peripheral, reason } => {
                self.machine.on_connect_failed(peripheral, reason);
            }
            HardwareEvent::Disconnected { peripheral, reason } => {
                self.machine.on_disconnected(peripheral, reason);
            }
            HardwareEvent::ServicesDiscovered { peripheral, result } => {
                let result = result.map(|services| {
                    services
                        .into_iter()
                        .filter(|service| {
                            let known = self.identity.is_target_service(service);
                            if !known {
                                warn!("Ignoring unrelated service {}", service);
                            }
                            known
                        })
                        .collect()
                });
                self.machine
                    .on_services_discovered(peripheral, result, &mut self.radio);
            }
            HardwareEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => {
                if !self.identity.is_target_service(&service) {
                    warn!("Ignoring characteristics of unrelated service {}", service);
                    return;
                }
                let result = result.map(|characteristics| {
                    characteristics
                        .into_iter()
                        .filter(|c| {
                            let known = self.identity.role_of(&c.uuid).is_some();
                            if !known {
                                warn!("Ignoring unrelated characteristic {}", c.uuid);
                            }
                            known
                        })
                        .collect()
                });
                self.machine.on_characteristics_discovered(
                    peripheral,
                    service,
                    result,
                    &mut self.radio,
                );
            }
            HardwareEvent::ValueUpdated {
                characteristic,
                result,
                ..
            } => match self.identity.role_of(&characteristic) {
                Some(CharacteristicRole::Telemetry) if self.bound().is_some() => {
                    self.exchange.on_telemetry(result);
                }
                Some(_) => debug!("Value update for {} outside of an exchange", characteristic),
                None => warn!("Value update for unrelated characteristic {}", characteristic),
            },
            HardwareEvent::WriteCompleted {
                characteristic,
                result,
                ..
            } => match self.identity.role_of(&characteristic) {
                Some(CharacteristicRole::Command) if self.bound().is_some() => {
                    self.exchange.on_write_completed(result);
                }
                Some(_) => debug!("Write completion for {} outside of an exchange", characteristic),
                None => warn!("Write completion for unrelated characteristic {}", characteristic),
            },
        }

        self.sync_exchange();
    }

    /// In-flight exchange requests die with the binding
    fn sync_exchange(&mut self) {
        if self.machine.binding().is_none() {
            self.exchange.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identifiers::{COMMAND_CHAR_UUID, SERVICE_UUID, TELEMETRY_CHAR_UUID};
    use crate::domain::models::{CharacteristicRef, DeviceAddress, Telemetry};
    use crate::domain::radio::testing::{characteristic, RadioRequest, RecordingRadio};
    use crate::domain::radio::Advertisement;
    use uuid::Uuid;

    // Handles minted by the first discovery of a fresh dispatcher
    const P: PeripheralId = PeripheralId::new(0xA1, 1);
    const Q: PeripheralId = PeripheralId::new(0xB2, 1);

    fn setup() -> (
        EventDispatcher<RecordingRadio>,
        RecordingRadio,
        mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let radio = RecordingRadio::default();
        let dispatcher = EventDispatcher::new(ServiceIdentity::default(), radio.clone(), tx);
        (dispatcher, radio, rx)
    }

    fn advert(address: DeviceAddress) -> HardwareEvent {
        HardwareEvent::AdvertisementReceived(Advertisement {
            address,
            name: None,
            services: vec![SERVICE_UUID],
            rssi: None,
        })
    }

    fn drive_to_ready(d: &mut EventDispatcher<RecordingRadio>) {
        d.dispatch(HardwareEvent::PowerStateChanged(RadioPowerState::PoweredOn));
        d.execute(LinkCommand::StartScan).unwrap();
        d.dispatch(advert(P.address));
        d.dispatch(HardwareEvent::Connected { peripheral: P });
        d.dispatch(HardwareEvent::ServicesDiscovered {
            peripheral: P,
            result: Ok(vec![SERVICE_UUID]),
        });
        d.dispatch(HardwareEvent::CharacteristicsDiscovered {
            peripheral: P,
            service: SERVICE_UUID,
            result: Ok(vec![
                characteristic(COMMAND_CHAR_UUID),
                characteristic(TELEMETRY_CHAR_UUID),
            ]),
        });
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_scenario_power_on_to_ready_and_back() {
        let (mut d, _radio, mut rx) = setup();

        d.dispatch(HardwareEvent::PowerStateChanged(RadioPowerState::PoweredOn));
        d.execute(LinkCommand::StartScan).unwrap();
        assert_eq!(d.state(), ConnectionState::Scanning);

        d.dispatch(advert(P.address));
        assert_eq!(d.state(), ConnectionState::Connecting);
        assert_eq!(d.peripheral(), Some(P));

        d.dispatch(HardwareEvent::Connected { peripheral: P });
        assert_eq!(d.state(), ConnectionState::DiscoveringServices);

        d.dispatch(HardwareEvent::ServicesDiscovered {
            peripheral: P,
            result: Ok(vec![SERVICE_UUID]),
        });
        assert_eq!(d.state(), ConnectionState::DiscoveringCharacteristics);

        d.dispatch(HardwareEvent::CharacteristicsDiscovered {
            peripheral: P,
            service: SERVICE_UUID,
            result: Ok(vec![
                characteristic(COMMAND_CHAR_UUID),
                characteristic(TELEMETRY_CHAR_UUID),
            ]),
        });
        assert_eq!(d.state(), ConnectionState::Ready);
        assert!(d.bound().is_some());

        d.dispatch(HardwareEvent::Disconnected {
            peripheral: P,
            reason: None,
        });
        assert_eq!(d.state(), ConnectionState::Idle);
        assert_eq!(d.peripheral(), None);
        assert!(d.bound().is_none());

        let states: Vec<ConnectionState> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                LinkEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Scanning,
                ConnectionState::Connecting,
                ConnectionState::DiscoveringServices,
                ConnectionState::DiscoveringCharacteristics,
                ConnectionState::Ready,
                ConnectionState::Idle,
            ]
        );
    }

    #[test]
    fn test_scenario_no_matching_service() {
        let (mut d, _radio, mut rx) = setup();
        d.dispatch(HardwareEvent::PowerStateChanged(RadioPowerState::PoweredOn));
        d.execute(LinkCommand::StartScan).unwrap();
        d.dispatch(advert(P.address));
        d.dispatch(HardwareEvent::Connected { peripheral: P });
        d.dispatch(HardwareEvent::ServicesDiscovered {
            peripheral: P,
            result: Ok(vec![]),
        });

        assert_eq!(d.state(), ConnectionState::Idle);
        assert_eq!(d.peripheral(), None);
        assert!(drain(&mut rx).contains(&LinkEvent::Error(LinkError::NoMatchingService)));
    }

    #[test]
    fn test_unrelated_services_never_reach_the_machine() {
        let (mut d, radio, _rx) = setup();
        d.dispatch(HardwareEvent::PowerStateChanged(RadioPowerState::PoweredOn));
        d.execute(LinkCommand::StartScan).unwrap();
        d.dispatch(advert(P.address));
        d.dispatch(HardwareEvent::Connected { peripheral: P });
        d.dispatch(HardwareEvent::ServicesDiscovered {
            peripheral: P,
            result: Ok(vec![Uuid::from_u128(0x180F), SERVICE_UUID]),
        });

        let discoveries: Vec<RadioRequest> = radio
            .requests()
            .into_iter()
            .filter(|r| matches!(r, RadioRequest::DiscoverCharacteristics(..)))
            .collect();
        assert_eq!(
            discoveries,
            vec![RadioRequest::DiscoverCharacteristics(
                P,
                SERVICE_UUID,
                vec![COMMAND_CHAR_UUID, TELEMETRY_CHAR_UUID]
            )]
        );

        // Characteristics of a foreign service are dropped outright
        d.dispatch(HardwareEvent::CharacteristicsDiscovered {
            peripheral: P,
            service: Uuid::from_u128(0x180F),
            result: Err("boom".to_string()),
        });
        assert_eq!(d.state(), ConnectionState::DiscoveringCharacteristics);
    }

    #[test]
    fn test_unrelated_characteristics_are_filtered() {
        let (mut d, _radio, _rx) = setup();
        d.dispatch(HardwareEvent::PowerStateChanged(RadioPowerState::PoweredOn));
        d.execute(LinkCommand::StartScan).unwrap();
        d.dispatch(advert(P.address));
        d.dispatch(HardwareEvent::Connected { peripheral: P });
        d.dispatch(HardwareEvent::ServicesDiscovered {
            peripheral: P,
            result: Ok(vec![SERVICE_UUID]),
        });
        d.dispatch(HardwareEvent::CharacteristicsDiscovered {
            peripheral: P,
            service: SERVICE_UUID,
            result: Ok(vec![
                characteristic(Uuid::from_u128(0x2A19)),
                characteristic(COMMAND_CHAR_UUID),
            ]),
        });
        assert_eq!(d.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_second_advertisement_is_ignored() {
        let (mut d, radio, _rx) = setup();
        d.dispatch(HardwareEvent::PowerStateChanged(RadioPowerState::PoweredOn));
        d.execute(LinkCommand::StartScan).unwrap();
        d.dispatch(advert(P.address));
        d.dispatch(advert(Q.address));
        assert_eq!(d.peripheral(), Some(P));
        let connects = radio
            .requests()
            .into_iter()
            .filter(|r| matches!(r, RadioRequest::Connect(..)))
            .count();
        assert_eq!(connects, 1);
    }

    #[test]
    fn test_start_scan_needs_power() {
        let (mut d, radio, _rx) = setup();
        assert_eq!(
            d.execute(LinkCommand::StartScan),
            Err(LinkError::AdapterNotReady)
        );
        assert_eq!(d.state(), ConnectionState::Idle);
        assert!(radio.requests().is_empty());
    }

    #[test]
    fn test_send_command_outside_ready_issues_no_write() {
        let (mut d, radio, _rx) = setup();
        d.dispatch(HardwareEvent::PowerStateChanged(RadioPowerState::PoweredOn));
        d.execute(LinkCommand::StartScan).unwrap();
        d.dispatch(advert(P.address));

        let result = d.execute(LinkCommand::SendCommand(b"Foobar".to_vec()));
        assert_eq!(
            result,
            Err(LinkError::NotReady {
                state: ConnectionState::Connecting
            })
        );
        assert!(!radio
            .requests()
            .iter()
            .any(|r| matches!(r, RadioRequest::Write(..))));
    }

    #[test]
    fn test_exchange_round_trip() {
        let (mut d, radio, mut rx) = setup();
        drive_to_ready(&mut d);
        radio.take();
        drain(&mut rx);

        d.execute(LinkCommand::SendCommand(b"Foobar".to_vec()))
            .unwrap();
        d.execute(LinkCommand::RequestTelemetry).unwrap();
        assert_eq!(
            radio.requests(),
            vec![
                RadioRequest::Write(
                    P,
                    CharacteristicRef {
                        service: SERVICE_UUID,
                        uuid: COMMAND_CHAR_UUID
                    },
                    b"Foobar".to_vec()
                ),
                RadioRequest::Read(
                    P,
                    CharacteristicRef {
                        service: SERVICE_UUID,
                        uuid: TELEMETRY_CHAR_UUID
                    }
                ),
            ]
        );

        d.dispatch(HardwareEvent::WriteCompleted {
            peripheral: P,
            characteristic: COMMAND_CHAR_UUID,
            result: Err("unlikely error".to_string()),
        });
        d.dispatch(HardwareEvent::ValueUpdated {
            peripheral: P,
            characteristic: TELEMETRY_CHAR_UUID,
            result: Ok(b"hello".to_vec()),
        });

        assert_eq!(
            drain(&mut rx),
            vec![
                LinkEvent::CommandAcknowledged(Err(LinkError::WriteFailed(
                    "unlikely error".to_string()
                ))),
                LinkEvent::TelemetryReceived(Telemetry {
                    bytes: b"hello".to_vec()
                }),
            ]
        );
        assert_eq!(d.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_values_for_unknown_characteristics_are_dropped() {
        let (mut d, _radio, mut rx) = setup();
        drive_to_ready(&mut d);
        drain(&mut rx);

        d.dispatch(HardwareEvent::ValueUpdated {
            peripheral: P,
            characteristic: Uuid::from_u128(0x2A19),
            result: Ok(vec![100]),
        });
        d.dispatch(HardwareEvent::ValueUpdated {
            peripheral: Q,
            characteristic: TELEMETRY_CHAR_UUID,
            result: Ok(vec![1]),
        });
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_disconnect_while_scanning_stops_scan() {
        let (mut d, radio, _rx) = setup();
        d.dispatch(HardwareEvent::PowerStateChanged(RadioPowerState::PoweredOn));
        d.execute(LinkCommand::StartScan).unwrap();
        d.execute(LinkCommand::Disconnect).unwrap();
        assert_eq!(d.state(), ConnectionState::Idle);
        assert!(!d.is_scanning());
        assert_eq!(radio.requests().last(), Some(&RadioRequest::StopScan));
    }

    #[test]
    fn test_power_off_while_ready_resets() {
        let (mut d, _radio, _rx) = setup();
        drive_to_ready(&mut d);
        d.dispatch(HardwareEvent::PowerStateChanged(RadioPowerState::PoweredOff));
        assert_eq!(d.state(), ConnectionState::Idle);
        assert!(d.bound().is_none());

        // The radio's own disconnect report for the old handle is stale now
        d.dispatch(HardwareEvent::Disconnected {
            peripheral: P,
            reason: Some("powered off".to_string()),
        });
        assert_eq!(d.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_late_write_completion_after_disconnect_is_dropped() {
        let (mut d, _radio, mut rx) = setup();
        drive_to_ready(&mut d);
        d.execute(LinkCommand::SendCommand(b"x".to_vec())).unwrap();
        d.execute(LinkCommand::Disconnect).unwrap();
        d.dispatch(HardwareEvent::Disconnected {
            peripheral: P,
            reason: None,
        });
        drain(&mut rx);

        d.dispatch(HardwareEvent::WriteCompleted {
            peripheral: P,
            characteristic: COMMAND_CHAR_UUID,
            result: Ok(()),
        });
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_late_completion_from_cancelled_attempt_on_same_device() {
        let (mut d, _radio, _rx) = setup();
        d.dispatch(HardwareEvent::PowerStateChanged(RadioPowerState::PoweredOn));
        d.execute(LinkCommand::StartScan).unwrap();
        d.dispatch(advert(P.address));
        let first = d.peripheral().unwrap();
        d.dispatch(HardwareEvent::Connected { peripheral: first });
        d.execute(LinkCommand::Disconnect).unwrap();
        assert_eq!(d.state(), ConnectionState::Idle);

        d.execute(LinkCommand::StartScan).unwrap();
        d.dispatch(advert(P.address));
        let second = d.peripheral().unwrap();
        assert_eq!(second.address, first.address);
        assert_ne!(second, first);

        d.dispatch(HardwareEvent::Connected { peripheral: second });
        assert_eq!(d.state(), ConnectionState::DiscoveringServices);

        d.dispatch(HardwareEvent::ServicesDiscovered {
            peripheral: first,
            result: Err("cancelled".to_string()),
        });
        d.dispatch(HardwareEvent::Disconnected {
            peripheral: first,
            reason: None,
        });
        assert_eq!(d.state(), ConnectionState::DiscoveringServices);
        assert_eq!(d.peripheral(), Some(second));

        d.dispatch(HardwareEvent::ServicesDiscovered {
            peripheral: second,
            result: Ok(vec![SERVICE_UUID]),
        });
        assert_eq!(d.state(), ConnectionState::DiscoveringCharacteristics);
    }

    #[test]
    fn test_start_scan_refused_while_tracking() {
        let (mut d, radio, _rx) = setup();
        drive_to_ready(&mut d);
        radio.take();

        assert_eq!(
            d.execute(LinkCommand::StartScan),
            Err(LinkError::NotReady {
                state: ConnectionState::Ready
            })
        );
        assert!(!d.is_scanning());
        assert!(radio.requests().is_empty());

        d.dispatch(advert(P.address));
        d.dispatch(HardwareEvent::Disconnected {
            peripheral: P,
            reason: Some("out of range".to_string()),
        });
        assert_eq!(d.state(), ConnectionState::Idle);
        assert!(!d.is_scanning());

        // The same device is found again by the next scan
        d.execute(LinkCommand::StartScan).unwrap();
        d.dispatch(advert(P.address));
        assert_eq!(d.state(), ConnectionState::Connecting);
        assert_eq!(d.peripheral().map(|p| p.address), Some(P.address));
    }
}
