use eframe::egui;

pub struct ConsolePalette {
    pub bg: egui::Color32,
    pub surface: egui::Color32,
    pub fg: egui::Color32,
    pub muted: egui::Color32,
    pub stroke: egui::Color32,
    pub accent: egui::Color32,
    pub success: egui::Color32,
    pub warning: egui::Color32,
    pub danger: egui::Color32,
}

impl ConsolePalette {
    pub fn new(is_dark: bool) -> Self {
        if is_dark {
            Self {
                bg: egui::Color32::from_rgb(22, 24, 28),
                surface: egui::Color32::from_rgb(32, 35, 41),
                fg: egui::Color32::from_rgb(225, 228, 232),
                muted: egui::Color32::from_rgb(140, 146, 156),
                stroke: egui::Color32::from_rgb(60, 65, 74),
                accent: egui::Color32::from_rgb(0, 169, 224),
                success: egui::Color32::from_rgb(64, 200, 120),
                warning: egui::Color32::from_rgb(240, 180, 40),
                danger: egui::Color32::from_rgb(235, 87, 87),
            }
        } else {
            Self {
                bg: egui::Color32::from_rgb(244, 246, 248),
                surface: egui::Color32::WHITE,
                fg: egui::Color32::from_rgb(30, 33, 38),
                muted: egui::Color32::from_rgb(110, 116, 126),
                stroke: egui::Color32::from_rgb(210, 214, 220),
                accent: egui::Color32::from_rgb(0, 122, 184),
                success: egui::Color32::from_rgb(30, 150, 80),
                warning: egui::Color32::from_rgb(200, 140, 0),
                danger: egui::Color32::from_rgb(200, 50, 50),
            }
        }
    }
}

pub fn configure_theme(ctx: &egui::Context, is_dark: bool) {
    let mut style = (*ctx.style()).clone();
    let palette = ConsolePalette::new(is_dark);

    style.visuals = if is_dark {
        egui::Visuals::dark()
    } else {
        egui::Visuals::light()
    };

    style
        .text_styles
        .iter_mut()
        .for_each(|(text_style, font_id)| {
            font_id.size = match text_style {
                egui::TextStyle::Heading => 24.0,
                egui::TextStyle::Body | egui::TextStyle::Button => 15.0,
                egui::TextStyle::Monospace => 14.0,
                _ => font_id.size,
            };
        });

    style.spacing.item_spacing = egui::vec2(10.0, 8.0);
    style.spacing.button_padding = egui::vec2(14.0, 8.0);

    let rounding = egui::Rounding::same(6.0);
    style.visuals.widgets.noninteractive.bg_stroke = egui::Stroke::new(1.0, palette.stroke);
    style.visuals.widgets.noninteractive.bg_fill = palette.surface;
    style.visuals.widgets.noninteractive.fg_stroke = egui::Stroke::new(1.0, palette.fg);
    style.visuals.widgets.noninteractive.rounding = rounding;

    style.visuals.widgets.inactive.bg_fill = palette.surface;
    style.visuals.widgets.inactive.bg_stroke = egui::Stroke::new(1.0, palette.stroke);
    style.visuals.widgets.inactive.rounding = rounding;

    style.visuals.widgets.hovered.bg_stroke = egui::Stroke::new(1.5, palette.accent);
    style.visuals.widgets.hovered.rounding = rounding;

    style.visuals.widgets.active.bg_fill = palette.accent;
    style.visuals.widgets.active.fg_stroke = egui::Stroke::new(1.0, egui::Color32::WHITE);
    style.visuals.widgets.active.rounding = rounding;

    style.visuals.selection.bg_fill = palette.accent;
    style.visuals.selection.stroke = egui::Stroke::new(1.0, egui::Color32::WHITE);

    style.visuals.window_rounding = egui::Rounding::same(8.0);
    style.visuals.window_fill = palette.surface;
    style.visuals.panel_fill = palette.bg;
    style.visuals.extreme_bg_color = palette.bg;

    ctx.set_style(style);
}
