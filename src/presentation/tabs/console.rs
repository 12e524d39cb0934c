use crate::domain::console::Direction;
use crate::presentation::app::BleSerialApp;
use crate::presentation::components::Components;
use crate::presentation::theme::ConsolePalette;
use eframe::egui;

enum Action {
    ToggleConnection,
    Send,
    Back,
}

pub fn render(app: &mut BleSerialApp, ui: &mut egui::Ui) {
    let palette = ConsolePalette::new(app.is_dark_mode);
    let mut action = None;

    let Some(console) = app.console.as_mut() else {
        return;
    };

    ui.horizontal(|ui| {
        if ui.button("← Back").clicked() {
            action = Some(Action::Back);
        }
        Components::heading(ui, &console.title());
    });
    ui.add_space(10.0);

    Components::card(ui, "Connection", |ui| {
        let (text, bg) = if console.notifications_enabled() {
            ("LISTENING", palette.success)
        } else if console.is_connected() {
            ("CONNECTED", palette.accent)
        } else if console.is_connecting() {
            ("CONNECTING...", palette.warning)
        } else {
            ("NOT CONNECTED", palette.muted)
        };
        Components::status_banner(ui, text, bg, egui::Color32::WHITE);
        ui.add_space(8.0);

        ui.horizontal(|ui| {
            let label = if console.is_connected() {
                "Disconnect"
            } else {
                "Connect"
            };
            if ui
                .add_enabled(!console.is_connecting(), egui::Button::new(label))
                .clicked()
            {
                action = Some(Action::ToggleConnection);
            }
            Components::status_line(ui, &palette, console.status());
        });
    });
    ui.add_space(10.0);

    Components::card(ui, "Send", |ui| {
        ui.horizontal(|ui| {
            let input = ui.add(
                egui::TextEdit::singleline(&mut console.input)
                    .hint_text("ASCII text")
                    .desired_width(ui.available_width() - 80.0),
            );
            let submitted = input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button("Send").clicked() || submitted {
                action = Some(Action::Send);
            }
        });
    });
    ui.add_space(10.0);

    Components::card(ui, "Received", |ui| {
        let received = if console.received().is_empty() {
            egui::RichText::new("(nothing yet)").color(palette.muted)
        } else {
            egui::RichText::new(console.received()).monospace()
        };
        ui.label(received);

        ui.separator();
        egui::ScrollArea::vertical()
            .id_salt("transcript")
            .max_height(260.0)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                for line in console.transcript() {
                    let (prefix, color) = match line.direction {
                        Direction::Sent => ("→", palette.accent),
                        Direction::Received => ("←", palette.success),
                    };
                    ui.label(
                        egui::RichText::new(format!("{} {}", prefix, line.text))
                            .monospace()
                            .color(color),
                    );
                }
            });
    });

    match action {
        Some(Action::ToggleConnection) => app.connect_pressed(),
        Some(Action::Send) => app.send_pressed(),
        Some(Action::Back) => app.back_pressed(),
        None => {}
    }
}
