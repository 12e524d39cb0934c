use crate::domain::models::DeviceAddress;
use crate::presentation::app::BleSerialApp;
use crate::presentation::components::Components;
use crate::presentation::theme::ConsolePalette;
use eframe::egui;

pub fn render(app: &mut BleSerialApp, ui: &mut egui::Ui) {
    Components::heading(ui, "Devices");
    ui.add_space(15.0);

    ui_scan_panel(app, ui);
    ui.add_space(10.0);

    if let Some((address, name)) = ui_device_list(app, ui) {
        app.open_console(address, name);
        return;
    }

    if !app.settings.get().known_devices.is_empty() {
        ui.add_space(10.0);
        if let Some((address, name)) = ui_recent_devices(app, ui) {
            app.open_console(address, name);
        }
    }
}

fn ui_scan_panel(app: &mut BleSerialApp, ui: &mut egui::Ui) {
    let palette = ConsolePalette::new(app.is_dark_mode);

    Components::card(ui, "Scan", |ui| {
        ui.horizontal(|ui| {
            let label = if app.is_scanning {
                "Stop scanning"
            } else {
                "Find devices"
            };
            if ui.button(label).clicked() {
                app.toggle_scan();
            }

            if app.is_scanning {
                ui.spinner();
                ui.label("Scanning...");
            } else {
                ui.label(
                    egui::RichText::new(format!(
                        "Scans stop after {} s",
                        app.settings.get().scan_timeout().as_secs()
                    ))
                    .color(palette.muted),
                );
            }
        });
    });
}

fn ui_device_list(
    app: &BleSerialApp,
    ui: &mut egui::Ui,
) -> Option<(DeviceAddress, Option<String>)> {
    let palette = ConsolePalette::new(app.is_dark_mode);
    let mut selected = None;

    Components::card(ui, &format!("Nearby ({})", app.devices.len()), |ui| {
        if app.devices.is_empty() {
            ui.label(egui::RichText::new("No devices found yet.").color(palette.muted));
            return;
        }

        egui::ScrollArea::vertical()
            .id_salt("device_list")
            .max_height(360.0)
            .show(ui, |ui| {
                for device in app.devices.iter() {
                    let response = ui
                        .horizontal(|ui| {
                            let name = ui.add(
                                egui::Label::new(
                                    egui::RichText::new(device.display_name()).strong(),
                                )
                                .sense(egui::Sense::click()),
                            );
                            ui.label(
                                egui::RichText::new(device.address.as_str())
                                    .monospace()
                                    .color(palette.muted),
                            );
                            ui.with_layout(
                                egui::Layout::right_to_left(egui::Align::Center),
                                |ui| {
                                    ui.label(format!(
                                        "{} {} dBm",
                                        Components::signal_bars(device.rssi),
                                        device.rssi
                                    ));
                                },
                            );
                            name
                        })
                        .inner;

                    if response.on_hover_text("Open console").clicked() {
                        selected = Some((device.address.clone(), device.name.clone()));
                    }
                    ui.separator();
                }
            });
    });

    selected
}

fn ui_recent_devices(
    app: &BleSerialApp,
    ui: &mut egui::Ui,
) -> Option<(DeviceAddress, Option<String>)> {
    let settings = app.settings.get();
    let mut selected = None;

    Components::card(ui, "Recent", |ui| {
        for known in settings.known_devices.iter().rev() {
            ui.horizontal(|ui| {
                let last = settings.last_connected_address.as_ref() == Some(&known.address);
                let label = format!(
                    "{}  [{}]{}",
                    known.name.as_deref().unwrap_or("No name..."),
                    known.address,
                    if last { "  (last)" } else { "" }
                );
                if ui.button(label).clicked() {
                    selected = Some((known.address.clone(), known.name.clone()));
                }
            });
        }
    });

    selected
}
