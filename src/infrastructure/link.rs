//! Link Service
//!
//! Runs the [`EventDispatcher`] on one tokio task. Caller commands and radio
//! events are both funnelled into that task, so link state has exactly one
//! writer. Front-ends talk to it through a cloneable [`LinkHandle`] and read
//! state snapshots from a `watch` channel.

use crate::domain::dispatcher::{EventDispatcher, LinkCommand};
use crate::domain::error::LinkError;
use crate::domain::identifiers::ServiceIdentity;
use crate::domain::models::{ConnectionState, LinkEvent, PeripheralId};
use crate::domain::position::{PositionSample, PositionStore};
use crate::domain::radio::{HardwareEvent, RadioPort, RadioPowerState};
use crate::domain::settings::Settings;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Request = (LinkCommand, oneshot::Sender<Result<(), LinkError>>);

/// Runtime options taken from the settings file
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Start scanning whenever the radio becomes ready, including after a
    /// power cycle
    pub scan_on_power_on: bool,
    pub preset_command: String,
}

impl From<&Settings> for LinkConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            scan_on_power_on: settings.scan_on_power_on,
            preset_command: settings.preset_command.clone(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// What a renderer needs to draw the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub state: ConnectionState,
    pub peripheral: Option<PeripheralId>,
    pub power: RadioPowerState,
    pub scanning: bool,
}

impl Default for LinkSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            peripheral: None,
            power: RadioPowerState::Unknown,
            scanning: false,
        }
    }
}

#[derive(Clone)]
pub struct LinkHandle {
    requests: mpsc::UnboundedSender<Request>,
    snapshot: watch::Receiver<LinkSnapshot>,
    positions: PositionStore,
    preset_command: String,
}

impl LinkHandle {
    pub async fn start_scan(&self) -> Result<(), LinkError> {
        self.request(LinkCommand::StartScan).await
    }

    pub async fn stop_scan(&self) -> Result<(), LinkError> {
        self.request(LinkCommand::StopScan).await
    }

    /// Queue a command write. `Ok` means the write was issued; the
    /// acknowledgement arrives as [`LinkEvent::CommandAcknowledged`].
    pub async fn send_command(&self, payload: impl Into<Vec<u8>>) -> Result<(), LinkError> {
        self.request(LinkCommand::SendCommand(payload.into())).await
    }

    /// Send the configured quick command
    pub async fn send_preset(&self) -> Result<(), LinkError> {
        self.send_command(self.preset_command.clone()).await
    }

    /// Queue a telemetry read; the value arrives as
    /// [`LinkEvent::TelemetryReceived`]
    pub async fn request_telemetry(&self) -> Result<(), LinkError> {
        self.request(LinkCommand::RequestTelemetry).await
    }

    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.request(LinkCommand::Disconnect).await
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        *self.snapshot.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot().state
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkSnapshot> {
        self.snapshot.clone()
    }

    pub fn positions(&self) -> &PositionStore {
        &self.positions
    }

    pub fn current_sample(&self) -> PositionSample {
        self.positions.current_sample()
    }

    async fn request(&self, command: LinkCommand) -> Result<(), LinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send((command, reply_tx))
            .map_err(|_| LinkError::Closed)?;
        reply_rx.await.map_err(|_| LinkError::Closed)?
    }
}

pub struct LinkService<R: RadioPort> {
    dispatcher: EventDispatcher<R>,
    config: LinkConfig,
    auto_scan_done: bool,
    snapshot: watch::Sender<LinkSnapshot>,
}

impl<R: RadioPort + Send + 'static> LinkService<R> {
    /// Start the link task. `hardware` must carry the events of the same
    /// backend that `radio` drives.
    pub fn spawn(
        identity: ServiceIdentity,
        config: LinkConfig,
        radio: R,
        hardware: mpsc::UnboundedReceiver<HardwareEvent>,
        event_sender: mpsc::UnboundedSender<LinkEvent>,
        positions: PositionStore,
    ) -> (LinkHandle, JoinHandle<()>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(LinkSnapshot::default());

        let handle = LinkHandle {
            requests: request_tx,
            snapshot: snapshot_rx,
            positions,
            preset_command: config.preset_command.clone(),
        };

        let service = Self {
            dispatcher: EventDispatcher::new(identity, radio, event_sender),
            config,
            auto_scan_done: false,
            snapshot: snapshot_tx,
        };

        info!("Starting link for service {}", identity.service);
        let task = tokio::spawn(service.run(request_rx, hardware));
        (handle, task)
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut hardware: mpsc::UnboundedReceiver<HardwareEvent>,
    ) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some((command, reply)) => {
                        let result = self.dispatcher.execute(command);
                        if let Err(e) = &result {
                            debug!("Command rejected: {}", e);
                        }
                        // Snapshot first, so the caller never observes stale state
                        self.publish();
                        let _ = reply.send(result);
                    }
                    None => {
                        debug!("All link handles dropped");
                        break;
                    }
                },
                event = hardware.recv() => match event {
                    Some(event) => {
                        self.handle_event(event);
                        self.publish();
                    }
                    None => {
                        warn!("Radio event stream closed");
                        break;
                    }
                },
            }
        }

        if self.dispatcher.state().has_peripheral() {
            let _ = self.dispatcher.execute(LinkCommand::Disconnect);
        }
        let _ = self.dispatcher.execute(LinkCommand::StopScan);
        self.publish();
        info!("Link stopped");
    }

    fn handle_event(&mut self, event: HardwareEvent) {
        self.dispatcher.dispatch(event);

        if !self.dispatcher.power_state().is_ready() {
            // Re-arm so a power cycle scans again
            self.auto_scan_done = false;
        } else if self.config.scan_on_power_on && !self.auto_scan_done {
            self.auto_scan_done = true;
            info!("Radio powered on, starting scan");
            if let Err(e) = self.dispatcher.execute(LinkCommand::StartScan) {
                error!("Failed to start scan: {}", e);
            }
        }
    }

    fn publish(&self) {
        let next = LinkSnapshot {
            state: self.dispatcher.state(),
            peripheral: self.dispatcher.peripheral(),
            power: self.dispatcher.power_state(),
            scanning: self.dispatcher.is_scanning(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
