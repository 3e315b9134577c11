use eframe::egui;
use eframe::egui::Color32;

use crate::app_logger::Severity;

pub const PANEL_BG: Color32 = Color32::from_rgb(17, 20, 28);
pub const CARD_BG: Color32 = Color32::from_rgb(26, 30, 41);
pub const CARD_STROKE: Color32 = Color32::from_rgb(42, 48, 64);
pub const ACCENT: Color32 = Color32::from_rgb(255, 78, 69);
pub const TEXT: Color32 = Color32::from_rgb(228, 231, 238);
pub const MUTED: Color32 = Color32::from_rgb(136, 144, 162);
pub const CURRENT_ROW: Color32 = Color32::from_rgb(40, 52, 76);

pub fn apply_theme(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();
    style.visuals = egui::Visuals::dark();
    style.visuals.window_fill = PANEL_BG;
    style.visuals.panel_fill = PANEL_BG;
    style.visuals.extreme_bg_color = Color32::from_rgb(12, 14, 20);
    style.visuals.widgets.noninteractive.bg_fill = CARD_BG;
    style.visuals.widgets.inactive.bg_fill = Color32::from_rgb(34, 39, 52);
    style.visuals.widgets.hovered.bg_fill = Color32::from_rgb(46, 52, 70);
    style.visuals.widgets.active.bg_fill = Color32::from_rgb(58, 66, 88);
    for widget in [
        &mut style.visuals.widgets.inactive,
        &mut style.visuals.widgets.hovered,
        &mut style.visuals.widgets.active,
    ] {
        widget.corner_radius = egui::CornerRadius::same(8);
    }
    style.visuals.selection.bg_fill = ACCENT;
    style.visuals.hyperlink_color = ACCENT;
    style.spacing.item_spacing = egui::vec2(10.0, 8.0);
    style.spacing.button_padding = egui::vec2(12.0, 6.0);
    ctx.set_style(style);
}

pub fn severity_color(severity: Severity) -> Color32 {
    match severity {
        Severity::Info => Color32::from_rgb(125, 180, 255),
        Severity::Plain => Color32::from_rgb(200, 204, 214),
        Severity::Success => Color32::from_rgb(110, 220, 140),
        Severity::Warning => Color32::from_rgb(250, 200, 90),
        Severity::Error => Color32::from_rgb(255, 110, 110),
    }
}

/// Rounded card used for every panel section.
pub fn card() -> egui::Frame {
    egui::Frame::NONE
        .fill(CARD_BG)
        .stroke(egui::Stroke::new(1.0, CARD_STROKE))
        .corner_radius(egui::CornerRadius::same(12))
        .inner_margin(egui::Margin::symmetric(12, 10))
}
