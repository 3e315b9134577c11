use eframe::egui;

use crate::app::DownloaderApp;
use crate::download::{FORMAT_PRESETS, preset_label};
use crate::post_queue::PostQueueAction;
use crate::queue::{Direction, QueueState};
use crate::settings_ui;
use crate::theme::{self, ACCENT, CURRENT_ROW, MUTED, TEXT};

enum RowAction {
    Move(usize, Direction),
    Remove(usize),
}

pub fn render(app: &mut DownloaderApp, ctx: &egui::Context) {
    settings_ui::handle_shortcuts(app, ctx);
    let panel_frame = egui::Frame::NONE
        .fill(theme::PANEL_BG)
        .inner_margin(egui::Margin::symmetric(14, 12));

    egui::TopBottomPanel::bottom("status_bar")
        .frame(panel_frame.clone())
        .show(ctx, |ui| render_status_bar(ui, app));

    egui::SidePanel::left("queue_panel")
        .resizable(true)
        .default_width(460.0)
        .min_width(360.0)
        .frame(panel_frame.clone())
        .show(ctx, |ui| {
            render_input_section(ui, app);
            ui.add_space(10.0);
            render_controls(ui, app);
            ui.add_space(10.0);
            render_queue_list(ui, app);
        });

    egui::CentralPanel::default()
        .frame(panel_frame)
        .show(ctx, |ui| render_log_view(ui, app));

    render_alert(app, ctx);
    settings_ui::render_windows(app, ctx);
}

fn section_title(ui: &mut egui::Ui, text: &str) {
    ui.label(egui::RichText::new(text).size(13.0).strong().color(TEXT));
}

fn render_input_section(ui: &mut egui::Ui, app: &mut DownloaderApp) {
    theme::card().show(ui, |ui| {
        section_title(ui, "Add URL");
        ui.add_space(4.0);
        let mut submit = false;
        ui.horizontal(|ui| {
            let width = (ui.available_width() - 130.0).max(120.0);
            let response = ui.add_sized(
                [width, 28.0],
                egui::TextEdit::singleline(&mut app.url_input)
                    .hint_text("https://www.youtube.com/watch?v=...")
                    .vertical_align(egui::Align::Center),
            );
            if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                submit = true;
            }
            if ui.button("Paste").clicked() {
                app.paste_from_clipboard();
            }
            let add = egui::Button::new(egui::RichText::new("Add").color(egui::Color32::WHITE)).fill(ACCENT);
            if ui.add(add).clicked() {
                submit = true;
            }
        });

        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("Format").color(MUTED));
            egui::ComboBox::from_id_salt("format_preset")
                .width(200.0)
                .selected_text(FORMAT_PRESETS[app.format_index.min(FORMAT_PRESETS.len() - 1)].label)
                .show_ui(ui, |ui| {
                    for (idx, preset) in FORMAT_PRESETS.iter().enumerate() {
                        ui.selectable_value(&mut app.format_index, idx, preset.label);
                    }
                });
            if app.pending_lookups > 0 {
                ui.add(egui::Spinner::new().size(14.0));
                ui.label(
                    egui::RichText::new(format!("{} lookup(s)", app.pending_lookups))
                        .size(11.5)
                        .color(MUTED),
                );
            }
        });

        if submit {
            app.add_url_from_input();
        }
    });
}

fn render_controls(ui: &mut egui::Ui, app: &mut DownloaderApp) {
    ui.horizontal(|ui| {
        let running = app.queue.state() == QueueState::Running;
        let start = egui::Button::new(egui::RichText::new("Start").color(egui::Color32::WHITE)).fill(ACCENT);
        if ui.add_enabled(!running, start).clicked() {
            app.start_queue();
        }
        if ui
            .add_enabled(running || app.is_downloading(), egui::Button::new("Pause"))
            .clicked()
        {
            app.pause_queue();
        }
        ui.separator();
        if ui.button("Save queue").clicked() {
            app.save_queue_dialog();
        }
        if ui
            .add_enabled(!app.is_downloading(), egui::Button::new("Load queue"))
            .clicked()
        {
            app.load_queue_dialog();
        }
    });

    ui.horizontal(|ui| {
        ui.label(egui::RichText::new("When finished").color(MUTED));
        egui::ComboBox::from_id_salt("post_queue_action")
            .selected_text(app.post_action.label())
            .show_ui(ui, |ui| {
                for action in PostQueueAction::ALL {
                    ui.selectable_value(&mut app.post_action, action, action.label());
                }
            });
        if ui.button("Preferences").clicked() {
            app.settings_ui.open_settings(&app.settings);
        }
    });
}

fn render_queue_list(ui: &mut egui::Ui, app: &mut DownloaderApp) {
    section_title(ui, &format!("Queue ({})", app.queue.len()));
    ui.add_space(4.0);

    let mut action = None;
    let height = ui.available_height();
    theme::card().show(ui, |ui| {
        ui.set_min_height(height - 24.0);
        egui::ScrollArea::vertical()
            .id_salt("queue_scroll")
            .auto_shrink([false, false])
            .show(ui, |ui| {
                if app.queue.is_empty() {
                    ui.label(egui::RichText::new("Nothing queued.").color(MUTED));
                    return;
                }
                let last = app.queue.len() - 1;
                for (idx, item) in app.queue.items().iter().enumerate() {
                    let current = app.queue.is_current(item.id);
                    let fill = if current { CURRENT_ROW } else { egui::Color32::TRANSPARENT };
                    egui::Frame::NONE
                        .fill(fill)
                        .corner_radius(egui::CornerRadius::same(6))
                        .inner_margin(egui::Margin::symmetric(6, 4))
                        .show(ui, |ui| {
                            ui.horizontal(|ui| {
                                ui.label(egui::RichText::new(format!("{}.", idx + 1)).color(MUTED));
                                ui.vertical(|ui| {
                                    let title = if current {
                                        egui::RichText::new(&item.title).strong().color(ACCENT)
                                    } else {
                                        egui::RichText::new(&item.title).color(TEXT)
                                    };
                                    ui.add(egui::Label::new(title).truncate());
                                    ui.label(
                                        egui::RichText::new(preset_label(&item.format_code))
                                            .size(11.0)
                                            .color(MUTED),
                                    )
                                    .on_hover_text(item.url.as_str());
                                });
                                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                                    if ui.add_enabled(!current, egui::Button::new("✕")).clicked() {
                                        action = Some(RowAction::Remove(idx));
                                    }
                                    if ui.add_enabled(!current && idx < last, egui::Button::new("▼")).clicked() {
                                        action = Some(RowAction::Move(idx, Direction::Down));
                                    }
                                    if ui.add_enabled(!current && idx > 0, egui::Button::new("▲")).clicked() {
                                        action = Some(RowAction::Move(idx, Direction::Up));
                                    }
                                });
                            });
                        });
                }
            });
    });

    match action {
        Some(RowAction::Move(idx, direction)) => app.move_item(idx, direction),
        Some(RowAction::Remove(idx)) => app.remove_item(idx),
        None => {}
    }
}

fn render_log_view(ui: &mut egui::Ui, app: &mut DownloaderApp) {
    ui.horizontal(|ui| {
        section_title(ui, "Log");
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            if ui.add_enabled(!app.logger.is_empty(), egui::Button::new("Clear")).clicked() {
                app.logger.clear();
            }
            if ui.button("Copy").clicked() {
                ui.ctx().copy_text(app.logger.snapshot_text());
            }
        });
    });
    ui.add_space(4.0);

    theme::card().show(ui, |ui| {
        egui::ScrollArea::vertical()
            .id_salt("log_scroll")
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for entry in app.logger.entries() {
                    ui.label(
                        egui::RichText::new(&entry.line)
                            .monospace()
                            .size(12.0)
                            .color(theme::severity_color(entry.severity)),
                    );
                }
            });
    });
}

fn render_status_bar(ui: &mut egui::Ui, app: &DownloaderApp) {
    ui.horizontal(|ui| {
        if app.is_downloading() {
            ui.add(egui::Spinner::new().size(14.0));
        }
        ui.label(egui::RichText::new(&app.status_text).color(TEXT));
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            let state = match app.queue.state() {
                QueueState::Running => "Running",
                QueueState::Paused => "Paused",
                QueueState::Drained => "Done",
            };
            ui.label(egui::RichText::new(state).size(11.5).color(MUTED));
            if app.covers_busy {
                ui.label(egui::RichText::new("Cropping covers...").size(11.5).color(MUTED));
            }
        });
    });
}

fn render_alert(app: &mut DownloaderApp, ctx: &egui::Context) {
    let Some(message) = app.alert.clone() else {
        return;
    };
    let mut open = true;
    let mut dismissed = false;
    egui::Window::new("Notice")
        .collapsible(false)
        .resizable(false)
        .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
        .open(&mut open)
        .show(ctx, |ui| {
            ui.label(message);
            ui.add_space(8.0);
            if ui.button("OK").clicked() {
                dismissed = true;
            }
        });
    if !open || dismissed {
        app.alert = None;
    }
}
