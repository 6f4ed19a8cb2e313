//! Exchange Channel
//!
//! Command writes and telemetry reads against the bound characteristics.
//! Both are fire-and-forget; completions arrive as hardware events and are
//! surfaced to observers as [`LinkEvent`]s. Failures here never change the
//! connection state.

use crate::domain::connection::ConnectionMachine;
use crate::domain::error::LinkError;
use crate::domain::models::{LinkEvent, Telemetry};
use crate::domain::radio::RadioPort;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct ExchangeChannel {
    writes_in_flight: usize,
    reads_in_flight: usize,
    event_sender: mpsc::UnboundedSender<LinkEvent>,
}

impl ExchangeChannel {
    pub fn new(event_sender: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            writes_in_flight: 0,
            reads_in_flight: 0,
            event_sender,
        }
    }

    /// Write `payload` to the command characteristic with acknowledgement
    pub fn send_command<R: RadioPort>(
        &mut self,
        machine: &ConnectionMachine,
        payload: &[u8],
        radio: &mut R,
    ) -> Result<(), LinkError> {
        let Some((peripheral, bound)) = machine.binding() else {
            return Err(LinkError::NotReady {
                state: machine.state(),
            });
        };

        let text = std::str::from_utf8(payload)?;
        if self.writes_in_flight > 0 {
            debug!("{} command write(s) still in flight", self.writes_in_flight);
        }

        info!("Sending command {:?}", text);
        radio.write_with_response(peripheral, bound.command, text.as_bytes());
        self.writes_in_flight += 1;
        Ok(())
    }

    /// Ask the tracker for its current telemetry value
    pub fn request_telemetry<R: RadioPort>(
        &mut self,
        machine: &ConnectionMachine,
        radio: &mut R,
    ) -> Result<(), LinkError> {
        let Some((peripheral, bound)) = machine.binding() else {
            return Err(LinkError::NotReady {
                state: machine.state(),
            });
        };

        if self.reads_in_flight > 0 {
            debug!("{} telemetry read(s) still in flight", self.reads_in_flight);
        }

        info!("Reading telemetry from {}", bound.telemetry.uuid);
        radio.read(peripheral, bound.telemetry);
        self.reads_in_flight += 1;
        Ok(())
    }

    pub fn on_write_completed(&mut self, result: Result<(), String>) {
        self.writes_in_flight = self.writes_in_flight.saturating_sub(1);
        let result = match result {
            Ok(()) => {
                debug!("Command acknowledged");
                Ok(())
            }
            Err(reason) => {
                warn!("Command write failed: {}", reason);
                Err(LinkError::WriteFailed(reason))
            }
        };
        let _ = self
            .event_sender
            .send(LinkEvent::CommandAcknowledged(result));
    }

    /// Completion of a read, or a notification the tracker pushed
    pub fn on_telemetry(&mut self, result: Result<Vec<u8>, String>) {
        self.reads_in_flight = self.reads_in_flight.saturating_sub(1);
        let event = match result {
            Ok(bytes) => {
                let telemetry = Telemetry { bytes };
                info!("Read value: {}", telemetry.text());
                LinkEvent::TelemetryReceived(telemetry)
            }
            Err(reason) => {
                warn!("Telemetry read failed: {}", reason);
                LinkEvent::TelemetryReadFailed(LinkError::ReadFailed(reason))
            }
        };
        let _ = self.event_sender.send(event);
    }

    /// Forget outstanding requests once the binding is gone
    pub fn reset(&mut self) {
        if self.writes_in_flight + self.reads_in_flight > 0 {
            debug!(
                writes = self.writes_in_flight,
                reads = self.reads_in_flight,
                "Dropping in-flight exchange requests"
            );
        }
        self.writes_in_flight = 0;
        self.reads_in_flight = 0;
    }
}
