use crate::domain::models::{MessageSeverity, StatusMessage};
use crate::domain::settings::{BackendKind, Settings};
use crate::presentation::app::BleSerialApp;
use crate::presentation::components::Components;
use eframe::egui;
use uuid::Uuid;

/// Editable text for the UART UUID overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidDraft {
    pub service: String,
    pub rx: String,
    pub tx: String,
}

impl UuidDraft {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            service: settings.uart_service_uuid.to_string(),
            rx: settings.uart_rx_char_uuid.to_string(),
            tx: settings.uart_tx_char_uuid.to_string(),
        }
    }

    /// Write the UUIDs into `settings` only if all three parse.
    pub fn apply(&self, settings: &mut Settings) -> Result<(), uuid::Error> {
        let service = Uuid::parse_str(self.service.trim())?;
        let rx = Uuid::parse_str(self.rx.trim())?;
        let tx = Uuid::parse_str(self.tx.trim())?;
        settings.uart_service_uuid = service;
        settings.uart_rx_char_uuid = rx;
        settings.uart_tx_char_uuid = tx;
        Ok(())
    }
}

pub fn render(app: &mut BleSerialApp, ui: &mut egui::Ui) {
    let mut save = false;
    let mut reset_uuids = false;

    egui::ScrollArea::vertical()
        .id_salt("settings_scroll")
        .show(ui, |ui| {
            let settings_mut = app.settings.get_mut();

            Components::card(ui, "Bluetooth", |ui| {
                ui.horizontal(|ui| {
                    ui.label("Backend:");
                    egui::ComboBox::from_id_salt("backend")
                        .selected_text(match settings_mut.backend {
                            BackendKind::Simulated => "Simulated",
                            BackendKind::Native => "Native",
                        })
                        .show_ui(ui, |ui| {
                            ui.selectable_value(
                                &mut settings_mut.backend,
                                BackendKind::Simulated,
                                "Simulated",
                            );
                            ui.selectable_value(
                                &mut settings_mut.backend,
                                BackendKind::Native,
                                "Native",
                            );
                        });
                });

                ui.horizontal(|ui| {
                    ui.label("Scan timeout (ms):");
                    ui.add(
                        egui::DragValue::new(&mut settings_mut.scan_timeout_ms)
                            .range(1_000..=60_000)
                            .speed(100),
                    );
                });

                ui.horizontal(|ui| {
                    ui.label("Preferred MTU:");
                    ui.add(egui::DragValue::new(&mut settings_mut.preferred_mtu).range(23..=517));
                });

                ui.horizontal(|ui| {
                    ui.label("Splash time (ms):");
                    ui.add(
                        egui::DragValue::new(&mut settings_mut.splash_duration_ms)
                            .range(0..=10_000)
                            .speed(50),
                    );
                });

                ui.collapsing("Override UART UUIDs", |ui| {
                    ui.label(
                        egui::RichText::new("⚠ Devices without these services cannot be used.")
                            .color(egui::Color32::from_rgb(230, 160, 0)),
                    );

                    egui::Grid::new("uart_uuids")
                        .spacing([10.0, 8.0])
                        .show(ui, |ui| {
                            ui.label("Service:");
                            ui.text_edit_singleline(&mut app.uuid_draft.service);
                            ui.end_row();
                            ui.label("RX (write):");
                            ui.text_edit_singleline(&mut app.uuid_draft.rx);
                            ui.end_row();
                            ui.label("TX (notify):");
                            ui.text_edit_singleline(&mut app.uuid_draft.tx);
                            ui.end_row();
                        });

                    if ui.button("Nordic UART defaults").clicked() {
                        reset_uuids = true;
                    }
                });
            });

            ui.add_space(10.0);

            Components::card(ui, "Logging", |ui| {
                ui.horizontal(|ui| {
                    ui.label("Verbosity Level:");
                    egui::ComboBox::from_id_salt("log_level")
                        .selected_text(&settings_mut.log_settings.level)
                        .show_ui(ui, |ui| {
                            for level in &["trace", "debug", "info", "warn", "error"] {
                                ui.selectable_value(
                                    &mut settings_mut.log_settings.level,
                                    level.to_string(),
                                    *level,
                                );
                            }
                        });
                });

                ui.checkbox(
                    &mut settings_mut.log_settings.console_logging_enabled,
                    "Console Logs",
                );
                ui.checkbox(
                    &mut settings_mut.log_settings.file_logging_enabled,
                    "File Logs",
                );

                if settings_mut.log_settings.file_logging_enabled {
                    ui.indent("file_logs", |ui| {
                        ui.horizontal(|ui| {
                            ui.label("Save Path:");
                            ui.text_edit_singleline(&mut settings_mut.log_settings.log_dir);
                        });
                        ui.horizontal(|ui| {
                            ui.label("Rotation:");
                            egui::ComboBox::from_id_salt("log_rot")
                                .selected_text(&settings_mut.log_settings.rotation)
                                .show_ui(ui, |ui| {
                                    for rot in &["daily", "hourly", "minutely", "never"] {
                                        ui.selectable_value(
                                            &mut settings_mut.log_settings.rotation,
                                            rot.to_string(),
                                            *rot,
                                        );
                                    }
                                });
                        });
                    });
                }
            });

            ui.add_space(10.0);
            ui.label(
                egui::RichText::new("Backend and logging changes apply after a restart.")
                    .italics()
                    .size(12.0),
            );
            if ui.button("Save").clicked() {
                save = true;
            }
        });

    if reset_uuids {
        app.uuid_draft = UuidDraft::from_settings(&Settings::default());
    }

    if save {
        app.status_message = Some(save_settings(app));
    }
}

fn save_settings(app: &mut BleSerialApp) -> StatusMessage {
    if let Err(e) = app.uuid_draft.apply(app.settings.get_mut()) {
        return StatusMessage::new(format!("Invalid UUID: {}", e), MessageSeverity::Error);
    }
    match app.settings.save() {
        Ok(()) => {
            tracing::info!("Settings saved");
            StatusMessage::new("Settings saved", MessageSeverity::Success)
        }
        Err(e) => {
            tracing::error!("Failed to save settings: {}", e);
            StatusMessage::new(format!("Failed to save settings: {}", e), MessageSeverity::Error)
        }
    }
}
