//! Line-oriented console front-end
//!
//! Stands in for the touch UI: each line maps to one of the app's controls,
//! observer events are echoed as they arrive.

use crate::domain::identifiers::ServiceIdentity;
use crate::domain::models::{LinkEvent, MessageSeverity};
use crate::domain::position::{PositionSample, PositionStore, PositionUpdate};
use crate::domain::radio::{HardwareEvent, RadioPort};
use crate::domain::settings::Settings;
use crate::infrastructure::link::{LinkConfig, LinkHandle, LinkService, LinkSnapshot};
use anyhow::{anyhow, bail, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const HELP: &str = "commands: scan | stop | send <text> | preset | read | disconnect | status | loc <lat> <lon> <alt> | heading <deg> | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Scan,
    StopScan,
    Send(String),
    SendPreset,
    Read,
    Disconnect,
    Status,
    Position(PositionUpdate),
    Help,
    Quit,
}

pub fn parse_line(line: &str) -> Result<ConsoleCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match word.to_lowercase().as_str() {
        "scan" | "connect" => ConsoleCommand::Scan,
        "stop" => ConsoleCommand::StopScan,
        "send" => {
            if rest.is_empty() {
                bail!("send needs a payload");
            }
            ConsoleCommand::Send(rest.to_string())
        }
        "preset" | "foobar" => ConsoleCommand::SendPreset,
        "read" => ConsoleCommand::Read,
        "disconnect" => ConsoleCommand::Disconnect,
        "status" => ConsoleCommand::Status,
        "loc" => {
            let values = parse_numbers(rest)?;
            let &[latitude, longitude, altitude] = values.as_slice() else {
                bail!("loc needs <lat> <lon> <alt>");
            };
            ConsoleCommand::Position(PositionUpdate::Location {
                latitude,
                longitude,
                altitude,
            })
        }
        "heading" => {
            let values = parse_numbers(rest)?;
            let &[degrees] = values.as_slice() else {
                bail!("heading needs <deg>");
            };
            ConsoleCommand::Position(PositionUpdate::Heading(degrees))
        }
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        "" => bail!("empty command"),
        other => bail!("unknown command {:?}", other),
    };
    Ok(command)
}

fn parse_numbers(text: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .map(|v| v.parse::<f64>().map_err(|e| anyhow!("{:?}: {}", v, e)))
        .collect()
}

pub fn describe(snapshot: &LinkSnapshot, sample: &PositionSample) -> String {
    let controls = snapshot.state.controls();
    let peripheral = snapshot
        .peripheral
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "link: {} (peripheral {}, radio {:?}, scanning {})\ncontrols: scan={} disconnect={} exchange={}\nLat: {}\nLong: {}\nAltitude: {} meters\nHeading: {}°",
        snapshot.state,
        peripheral,
        snapshot.power,
        snapshot.scanning,
        controls.can_scan,
        controls.can_disconnect,
        controls.can_exchange,
        sample.latitude.unwrap_or(0.0),
        sample.longitude.unwrap_or(0.0),
        sample.altitude.unwrap_or(0.0),
        sample.heading_degrees.unwrap_or(0.0),
    )
}

fn report(event: LinkEvent) {
    match event {
        LinkEvent::StateChanged(state) => println!("[link] {}", state),
        LinkEvent::PeripheralDiscovered { peripheral, name } => println!(
            "[link] discovered {} ({})",
            name.as_deref().unwrap_or("Unknown"),
            peripheral
        ),
        LinkEvent::CommandAcknowledged(Ok(())) => println!("[link] command acknowledged"),
        LinkEvent::CommandAcknowledged(Err(e)) => println!("[link] {}", e),
        LinkEvent::TelemetryReceived(telemetry) => {
            println!("[link] telemetry: {}", telemetry.text())
        }
        LinkEvent::TelemetryReadFailed(e) | LinkEvent::Error(e) => println!("[link] {}", e),
        LinkEvent::Log(status) => match status.severity {
            MessageSeverity::Error => error!("{}", status.message),
            MessageSeverity::Warning => warn!("{}", status.message),
            MessageSeverity::Info | MessageSeverity::Success => info!("{}", status.message),
        },
    }
}

async fn execute(link: &LinkHandle, command: ConsoleCommand) -> Result<bool> {
    match command {
        ConsoleCommand::Scan => link.start_scan().await?,
        ConsoleCommand::StopScan => link.stop_scan().await?,
        ConsoleCommand::Send(text) => link.send_command(text).await?,
        ConsoleCommand::SendPreset => link.send_preset().await?,
        ConsoleCommand::Read => link.request_telemetry().await?,
        ConsoleCommand::Disconnect => link.disconnect().await?,
        ConsoleCommand::Status => {
            println!("{}", describe(&link.snapshot(), &link.current_sample()))
        }
        ConsoleCommand::Position(update) => link.positions().apply(update),
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

/// Run the link with `radio` and drive it from stdin until `quit` or EOF
pub async fn run<R: RadioPort + Send + 'static>(
    settings: &Settings,
    identity: ServiceIdentity,
    radio: R,
    hardware: mpsc::UnboundedReceiver<HardwareEvent>,
) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (link, task) = LinkService::spawn(
        identity,
        LinkConfig::from(settings),
        radio,
        hardware,
        event_tx,
        PositionStore::new(),
    );

    let reporter = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            report(event);
        }
    });

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        match execute(&link, command).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("{}", e),
        }
    }

    drop(link);
    task.await?;
    reporter.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ConnectionState;
    use crate::domain::radio::RadioPowerState;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("scan").unwrap(), ConsoleCommand::Scan);
        assert_eq!(parse_line("  READ ").unwrap(), ConsoleCommand::Read);
        assert_eq!(
            parse_line("send hello world").unwrap(),
            ConsoleCommand::Send("hello world".to_string())
        );
        assert_eq!(parse_line("foobar").unwrap(), ConsoleCommand::SendPreset);
        assert_eq!(
            parse_line("loc 10 20 5").unwrap(),
            ConsoleCommand::Position(PositionUpdate::Location {
                latitude: 10.0,
                longitude: 20.0,
                altitude: 5.0
            })
        );
        assert_eq!(
            parse_line("heading 90").unwrap(),
            ConsoleCommand::Position(PositionUpdate::Heading(90.0))
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_line("").is_err());
        assert!(parse_line("send").is_err());
        assert!(parse_line("loc 1 2").is_err());
        assert!(parse_line("heading north").is_err());
        assert!(parse_line("launch").is_err());
    }

    #[test]
    fn test_describe_defaults_missing_fields_to_zero() {
        let snapshot = LinkSnapshot {
            state: ConnectionState::Ready,
            peripheral: None,
            power: RadioPowerState::PoweredOn,
            scanning: false,
        };
        let sample = PositionSample {
            latitude: Some(41.7),
            ..PositionSample::default()
        };
        let text = describe(&snapshot, &sample);
        assert!(text.contains("link: ready"));
        assert!(text.contains("exchange=true"));
        assert!(text.contains("Lat: 41.7"));
        assert!(text.contains("Heading: 0°"));
    }
}
