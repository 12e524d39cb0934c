use crate::domain::models::{MessageSeverity, StatusMessage};
use crate::presentation::theme::ConsolePalette;
use eframe::egui;

pub struct Components;

impl Components {
    pub fn heading(ui: &mut egui::Ui, text: &str) {
        ui.label(egui::RichText::new(text).heading().strong());
    }

    pub fn sub_heading(ui: &mut egui::Ui, text: &str) {
        ui.label(egui::RichText::new(text).strong().size(16.0));
    }

    pub fn card<R>(
        ui: &mut egui::Ui,
        title: &str,
        add_contents: impl FnOnce(&mut egui::Ui) -> R,
    ) -> R {
        let stroke = ui.style().visuals.widgets.noninteractive.bg_stroke;
        let bg = ui.style().visuals.widgets.noninteractive.bg_fill;

        egui::Frame::none()
            .inner_margin(egui::Margin::same(12.0))
            .rounding(egui::Rounding::same(6.0))
            .stroke(stroke)
            .fill(bg)
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                ui.vertical(|ui| {
                    Self::sub_heading(ui, title);
                    ui.add_space(6.0);
                    add_contents(ui)
                })
                .inner
            })
            .inner
    }

    pub fn status_banner(
        ui: &mut egui::Ui,
        text: &str,
        bg_color: egui::Color32,
        text_color: egui::Color32,
    ) {
        ui.add_sized(
            [ui.available_width(), 30.0],
            egui::Label::new(
                egui::RichText::new(text)
                    .color(text_color)
                    .background_color(bg_color)
                    .size(15.0)
                    .strong(),
            )
            .wrap_mode(egui::TextWrapMode::Extend),
        );
    }

    pub fn severity_color(palette: &ConsolePalette, severity: MessageSeverity) -> egui::Color32 {
        match severity {
            MessageSeverity::Info => palette.accent,
            MessageSeverity::Success => palette.success,
            MessageSeverity::Warning => palette.warning,
            MessageSeverity::Error => palette.danger,
        }
    }

    /// One-line status readout
    pub fn status_line(ui: &mut egui::Ui, palette: &ConsolePalette, message: &StatusMessage) {
        ui.label(
            egui::RichText::new(&message.message)
                .color(Self::severity_color(palette, message.severity))
                .strong(),
        );
    }

    /// Rough signal strength bars for an RSSI reading
    pub fn signal_bars(rssi: i16) -> &'static str {
        match rssi {
            r if r >= -55 => "▂▄▆█",
            r if r >= -67 => "▂▄▆_",
            r if r >= -80 => "▂▄__",
            _ => "▂___",
        }
    }
}
