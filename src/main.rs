use gps_tracker_link::domain::identifiers::ServiceIdentity;
use gps_tracker_link::domain::settings::{Settings, SettingsService};
use gps_tracker_link::infrastructure::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    tracing::info!(
        "Starting GPS tracker link (settings: {})",
        settings_service.path().display()
    );

    let identity = ServiceIdentity::from_settings(&settings.ble)?;
    run(&settings, identity).await
}

#[cfg(windows)]
async fn run(settings: &Settings, identity: ServiceIdentity) -> anyhow::Result<()> {
    use gps_tracker_link::infrastructure::bluetooth::WinRtRadio;
    use gps_tracker_link::presentation::console;

    let (hardware_tx, hardware_rx) = tokio::sync::mpsc::unbounded_channel();
    let radio = WinRtRadio::open(hardware_tx).await?;
    if !radio.is_available() {
        tracing::warn!("Bluetooth LE is unavailable, scanning will be refused");
    }
    console::run(settings, identity, radio, hardware_rx).await
}

#[cfg(not(windows))]
async fn run(_settings: &Settings, identity: ServiceIdentity) -> anyhow::Result<()> {
    anyhow::bail!(
        "No Bluetooth backend for this platform (service {})",
        identity.service
    )
}
