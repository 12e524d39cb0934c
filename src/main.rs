mod domain;
mod infrastructure;
mod presentation;

use domain::settings::SettingsService;
use eframe::egui;
use presentation::app::BleSerialApp;

fn main() -> anyhow::Result<()> {
    let settings = SettingsService::new()?;

    let logging_guard = infrastructure::logging::init_logger(&settings.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    tracing::info!(
        "Starting BLE Serial Console ({:?} backend)",
        settings.get().backend
    );

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([720.0, 640.0])
            .with_min_inner_size([420.0, 360.0])
            .with_title("BLE Serial Console"),
        ..Default::default()
    };

    eframe::run_native(
        "BLE Serial Console",
        options,
        Box::new(move |cc| Ok(Box::new(BleSerialApp::new(cc, settings, logging_guard)))),
    )
    .map_err(|e| anyhow::anyhow!("UI failed: {}", e))
}
