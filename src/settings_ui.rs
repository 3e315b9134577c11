use eframe::egui;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use crate::app::DownloaderApp;
use crate::download::{ReleaseCheck, ToolPaths, check_yt_dlp_release, read_tool_version, update_yt_dlp};
use crate::fs_utils::ensure_dir;
use crate::settings::{
    COOKIE_BROWSERS, ChaptersMode, MIN_WINDOW_HEIGHT, MIN_WINDOW_WIDTH, SettingsData,
    SponsorCategory, THUMBNAIL_FORMATS, VIDEO_CONTAINERS,
};
use crate::theme::{self, MUTED, TEXT};

enum ToolMessage {
    Versions { yt_dlp: String, ffmpeg: String },
    Updated(Result<String, String>),
    ReleaseChecked(Result<ReleaseCheck, String>),
}

#[derive(Clone, Debug)]
struct ToolState {
    yt_dlp_version: String,
    ffmpeg_version: String,
    status: String,
    // worker threads that have not reported back yet
    jobs: usize,
}

pub struct SettingsUiState {
    pub show_settings: bool,
    form: SettingsData,
    error: Option<String>,
    tools: ToolState,
    tool_tx: mpsc::Sender<ToolMessage>,
    tool_rx: mpsc::Receiver<ToolMessage>,
}

impl SettingsUiState {
    pub fn new(settings: &SettingsData) -> Self {
        let (tool_tx, tool_rx) = mpsc::channel();
        Self {
            show_settings: false,
            form: settings.clone(),
            error: None,
            tools: ToolState {
                yt_dlp_version: "-".to_string(),
                ffmpeg_version: "-".to_string(),
                status: String::new(),
                jobs: 0,
            },
            tool_tx,
            tool_rx,
        }
    }

    pub fn open_settings(&mut self, settings: &SettingsData) {
        self.form = settings.clone();
        self.error = None;
        self.show_settings = true;
        self.refresh_versions();
    }

    pub fn is_busy(&self) -> bool {
        self.tools.jobs > 0
    }

    pub fn poll_tool_updates(&mut self) {
        while let Ok(message) = self.tool_rx.try_recv() {
            self.tools.jobs = self.tools.jobs.saturating_sub(1);
            match message {
                ToolMessage::Versions { yt_dlp, ffmpeg } => {
                    self.tools.yt_dlp_version = yt_dlp;
                    self.tools.ffmpeg_version = ffmpeg;
                }
                ToolMessage::Updated(Ok(version)) => {
                    self.tools.yt_dlp_version = version;
                    self.tools.status = "yt-dlp is up to date.".to_string();
                }
                ToolMessage::Updated(Err(err)) => {
                    tracing::error!("yt-dlp update failed: {err}");
                    self.tools.status = format!("Update failed: {err}");
                }
                ToolMessage::ReleaseChecked(Ok(check)) => {
                    self.tools.status = if check.update_available() {
                        format!("yt-dlp {} is available (installed {}).", check.latest, check.installed)
                    } else {
                        format!("yt-dlp {} is the latest release.", check.installed)
                    };
                }
                ToolMessage::ReleaseChecked(Err(err)) => {
                    tracing::warn!("release check failed: {err}");
                    self.tools.status = format!("Release check failed: {err}");
                }
            }
        }
    }

    fn refresh_versions(&mut self) {
        self.tools.jobs += 1;
        let tools = ToolPaths::resolve(&self.form.options);
        let tx = self.tool_tx.clone();
        thread::spawn(move || {
            let yt_dlp = read_tool_version(&tools.yt_dlp, "yt-dlp", "--version")
                .unwrap_or_else(|_| "not found".to_string());
            let ffmpeg = read_tool_version(&tools.ffmpeg, "ffmpeg", "-version")
                .map(|line| short_ffmpeg_version(&line))
                .unwrap_or_else(|_| "not found".to_string());
            let _ = tx.send(ToolMessage::Versions { yt_dlp, ffmpeg });
        });
    }

    fn start_update(&mut self) {
        self.tools.jobs += 1;
        self.tools.status = "Downloading yt-dlp...".to_string();
        let tx = self.tool_tx.clone();
        thread::spawn(move || {
            let result = update_yt_dlp()
                .and_then(|path| read_tool_version(&path, "yt-dlp", "--version"))
                .map_err(|err| err.to_string());
            let _ = tx.send(ToolMessage::Updated(result));
        });
    }

    fn start_release_check(&mut self) {
        self.tools.jobs += 1;
        self.tools.status = "Checking for a newer yt-dlp...".to_string();
        let tools = ToolPaths::resolve(&self.form.options);
        let tx = self.tool_tx.clone();
        thread::spawn(move || {
            let result = check_yt_dlp_release(&tools.yt_dlp).map_err(|err| err.to_string());
            let _ = tx.send(ToolMessage::ReleaseChecked(result));
        });
    }
}

// "ffmpeg version 7.0.1-static https://..." -> "7.0.1-static"
fn short_ffmpeg_version(line: &str) -> String {
    line.split_whitespace()
        .skip_while(|word| *word != "version")
        .nth(1)
        .unwrap_or(line)
        .to_string()
}

pub fn handle_shortcuts(app: &mut DownloaderApp, ctx: &egui::Context) {
    if ctx.input(|i| i.modifiers.command && i.key_pressed(egui::Key::Comma)) {
        app.settings_ui.open_settings(&app.settings);
    }
}

pub fn render_windows(app: &mut DownloaderApp, ctx: &egui::Context) {
    if !app.settings_ui.show_settings {
        return;
    }

    let mut open = true;
    let mut close_requested = false;
    egui::Window::new("Preferences")
        .collapsible(false)
        .resizable(true)
        .default_width(560.0)
        .default_height(620.0)
        .open(&mut open)
        .show(ctx, |ui| {
            render_settings_contents(ui, app, &mut close_requested);
        });

    if !open || close_requested {
        app.settings_ui.show_settings = false;
    }
}

fn render_settings_contents(ui: &mut egui::Ui, app: &mut DownloaderApp, should_close: &mut bool) {
    egui::ScrollArea::vertical()
        .id_salt("settings_scroll")
        .max_height(ui.available_height() - 48.0)
        .show(ui, |ui| {
            let state = &mut app.settings_ui;
            render_output_section(ui, &mut state.form);
            render_tools_section(ui, state);
            render_network_section(ui, &mut state.form);
            render_playlist_section(ui, &mut state.form);
            render_post_section(ui, &mut state.form);
            render_subtitle_section(ui, &mut state.form);
            render_window_section(ui, &mut state.form);
        });

    if let Some(err) = app.settings_ui.error.as_ref() {
        ui.label(egui::RichText::new(err).color(theme::severity_color(crate::app_logger::Severity::Error)));
    }

    ui.separator();
    ui.horizontal(|ui| {
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            let save = egui::Button::new(egui::RichText::new("Save").color(egui::Color32::WHITE))
                .fill(theme::ACCENT);
            if ui.add(save).clicked() {
                match validate_form(&app.settings_ui.form) {
                    Ok(data) => match data.save() {
                        Ok(()) => {
                            app.logger.success("Preferences saved.");
                            app.settings_ui.form = data.clone();
                            app.settings_ui.error = None;
                            app.apply_settings(data);
                            *should_close = true;
                        }
                        Err(err) => app.settings_ui.error = Some(format!("Could not save preferences: {err}")),
                    },
                    Err(err) => app.settings_ui.error = Some(err),
                }
            }
            if ui.button("Cancel").clicked() {
                *should_close = true;
            }
        });
    });
}

fn validate_form(form: &SettingsData) -> Result<SettingsData, String> {
    let mut data = form.clone();
    data.options.validate().map_err(|err| err.to_string())?;
    data.window_width = data.window_width.max(MIN_WINDOW_WIDTH);
    data.window_height = data.window_height.max(MIN_WINDOW_HEIGHT);
    ensure_dir(&data.options.download_dir)
        .map_err(|err| format!("Cannot create {}: {err}", data.options.download_dir.display()))?;
    data.options.video_container = data.options.video_container.trim().to_lowercase();
    Ok(data)
}

fn section(ui: &mut egui::Ui, title: &str, add_contents: impl FnOnce(&mut egui::Ui)) {
    ui.add_space(6.0);
    theme::card().show(ui, |ui| {
        ui.set_width(ui.available_width());
        ui.label(egui::RichText::new(title).size(13.0).strong().color(TEXT));
        ui.add_space(4.0);
        add_contents(ui);
    });
}

fn text_row(ui: &mut egui::Ui, label: &str, value: &mut String, hint: &str) {
    ui.horizontal(|ui| {
        ui.add_sized([150.0, 22.0], egui::Label::new(egui::RichText::new(label).color(MUTED)));
        ui.add(
            egui::TextEdit::singleline(value)
                .hint_text(hint)
                .desired_width(ui.available_width() - 8.0),
        );
    });
}

fn path_row(ui: &mut egui::Ui, label: &str, value: &mut String, pick: impl FnOnce() -> Option<PathBuf>) {
    ui.horizontal(|ui| {
        ui.add_sized([150.0, 22.0], egui::Label::new(egui::RichText::new(label).color(MUTED)));
        ui.add(egui::TextEdit::singleline(value).desired_width(ui.available_width() - 80.0));
        if ui.button("Browse").clicked() {
            if let Some(path) = pick() {
                *value = path.to_string_lossy().to_string();
            }
        }
    });
}

fn render_output_section(ui: &mut egui::Ui, form: &mut SettingsData) {
    section(ui, "Output", |ui| {
        let mut dir = form.options.download_dir.to_string_lossy().to_string();
        path_row(ui, "Download folder", &mut dir, || rfd::FileDialog::new().pick_folder());
        form.options.download_dir = PathBuf::from(dir.trim());

        ui.checkbox(&mut form.options.organize_by_uploader, "Organize by uploader");
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("Video container").color(MUTED));
            egui::ComboBox::from_id_salt("video_container")
                .selected_text(form.options.video_container.clone())
                .show_ui(ui, |ui| {
                    for container in VIDEO_CONTAINERS {
                        ui.selectable_value(&mut form.options.video_container, container.to_string(), container);
                    }
                });
        });
    });
}

fn render_tools_section(ui: &mut egui::Ui, state: &mut SettingsUiState) {
    section(ui, "Tools", |ui| {
        path_row(ui, "yt-dlp path", &mut state.form.options.yt_dlp_path, || {
            rfd::FileDialog::new().pick_file()
        });
        path_row(ui, "ffmpeg path", &mut state.form.options.ffmpeg_path, || {
            rfd::FileDialog::new().pick_file()
        });
        ui.label(
            egui::RichText::new("Leave empty to use the app folder or PATH.")
                .size(11.5)
                .color(MUTED),
        );
        ui.add_space(4.0);
        ui.horizontal(|ui| {
            ui.label(format!("yt-dlp: {}", state.tools.yt_dlp_version));
            ui.separator();
            ui.label(format!("ffmpeg: {}", state.tools.ffmpeg_version));
            if state.is_busy() {
                ui.add(egui::Spinner::new().size(14.0));
            }
        });
        ui.horizontal(|ui| {
            let busy = state.is_busy();
            if ui.add_enabled(!busy, egui::Button::new("Install / update yt-dlp")).clicked() {
                state.start_update();
            }
            if ui.add_enabled(!busy, egui::Button::new("Check for updates")).clicked() {
                state.start_release_check();
            }
            if ui.add_enabled(!busy, egui::Button::new("Refresh")).clicked() {
                state.refresh_versions();
            }
        });
        if !state.tools.status.is_empty() {
            ui.label(egui::RichText::new(&state.tools.status).size(11.5).color(MUTED));
        }
    });
}

fn render_network_section(ui: &mut egui::Ui, form: &mut SettingsData) {
    section(ui, "Network", |ui| {
        text_row(ui, "Proxy", &mut form.options.proxy_url, "http://host:port or socks5://host:port");
        text_row(ui, "Rate limit", &mut form.options.limit_rate, "e.g. 2M");
        ui.horizontal(|ui| {
            ui.add_sized([150.0, 22.0], egui::Label::new(egui::RichText::new("Retries").color(MUTED)));
            ui.add(egui::DragValue::new(&mut form.options.retries).range(0..=100));
        });
        path_row(ui, "Cookies file", &mut form.options.cookies_file, || {
            rfd::FileDialog::new().add_filter("Cookies", &["txt"]).pick_file()
        });
        ui.horizontal(|ui| {
            ui.add_sized(
                [150.0, 22.0],
                egui::Label::new(egui::RichText::new("Cookies from browser").color(MUTED)),
            );
            let selected = if form.options.cookies_browser.is_empty() {
                "None".to_string()
            } else {
                form.options.cookies_browser.clone()
            };
            egui::ComboBox::from_id_salt("cookies_browser")
                .selected_text(selected)
                .show_ui(ui, |ui| {
                    for browser in COOKIE_BROWSERS {
                        let label = if browser.is_empty() { "None" } else { browser };
                        ui.selectable_value(&mut form.options.cookies_browser, browser.to_string(), label);
                    }
                });
        });
        ui.label(
            egui::RichText::new("A browser takes precedence over the cookies file.")
                .size(11.5)
                .color(MUTED),
        );
    });
}

fn render_playlist_section(ui: &mut egui::Ui, form: &mut SettingsData) {
    section(ui, "Filters and playlists", |ui| {
        text_row(ui, "Uploaded after", &mut form.options.date_after, "YYYYMMDD");
        ui.checkbox(&mut form.options.live_from_start, "Record live streams from the start");
        ui.checkbox(&mut form.options.enable_archive, "Skip videos already in the archive");
        if form.options.enable_archive {
            let mut archive = form.options.archive_path.to_string_lossy().to_string();
            path_row(ui, "Archive file", &mut archive, || {
                rfd::FileDialog::new().add_filter("Archive", &["txt"]).save_file()
            });
            form.options.archive_path = PathBuf::from(archive.trim());
        }
        ui.checkbox(&mut form.options.playlist_reverse, "Download playlists in reverse order");
        text_row(ui, "Playlist items", &mut form.options.playlist_items, "e.g. 1-5,8");
        text_row(ui, "Clip start", &mut form.options.clip_start, "00:01:30");
        text_row(ui, "Clip end", &mut form.options.clip_end, "00:02:45");
    });
}

fn render_post_section(ui: &mut egui::Ui, form: &mut SettingsData) {
    section(ui, "Post-processing", |ui| {
        ui.checkbox(&mut form.options.add_metadata, "Add metadata");
        ui.checkbox(&mut form.options.music_metadata, "Enhanced music metadata (artist - title)");
        ui.checkbox(&mut form.options.normalize_audio, "Normalize audio loudness");
        ui.checkbox(&mut form.options.crop_covers, "Crop MP3 covers to square when the queue finishes");
        ui.checkbox(&mut form.options.write_thumbnail, "Save thumbnail file");
        ui.horizontal(|ui| {
            ui.checkbox(&mut form.options.embed_thumbnail, "Embed thumbnail in videos");
            egui::ComboBox::from_id_salt("thumbnail_format")
                .selected_text(form.options.thumbnail_format.clone())
                .show_ui(ui, |ui| {
                    for format in THUMBNAIL_FORMATS {
                        ui.selectable_value(&mut form.options.thumbnail_format, format.to_string(), format);
                    }
                });
        });
        text_row(ui, "Custom ffmpeg args", &mut form.options.custom_ffmpeg_args, "-ar 44100");

        ui.add_space(6.0);
        ui.label(egui::RichText::new("SponsorBlock: remove segments").color(MUTED));
        egui::Grid::new("sponsorblock_grid").num_columns(2).show(ui, |ui| {
            for (idx, category) in SponsorCategory::ALL.into_iter().enumerate() {
                let mut enabled = form.options.has_sponsor_category(category);
                if ui.checkbox(&mut enabled, category.label()).changed() {
                    form.options.set_sponsor_category(category, enabled);
                }
                if idx % 2 == 1 {
                    ui.end_row();
                }
            }
        });

        ui.add_space(6.0);
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("Chapters").color(MUTED));
            ui.radio_value(&mut form.options.chapters, ChaptersMode::None, "Keep as is");
            ui.radio_value(&mut form.options.chapters, ChaptersMode::Embed, "Embed");
            ui.radio_value(&mut form.options.chapters, ChaptersMode::Split, "Split into files");
        });
    });
}

fn render_subtitle_section(ui: &mut egui::Ui, form: &mut SettingsData) {
    section(ui, "Subtitles", |ui| {
        ui.checkbox(&mut form.options.write_subs, "Download subtitles");
        ui.add_enabled_ui(form.options.write_subs, |ui| {
            text_row(ui, "Languages", &mut form.options.sub_langs, "en,es");
            ui.checkbox(&mut form.options.auto_subs, "Include auto-generated subtitles");
            ui.checkbox(&mut form.options.convert_subs_srt, "Convert to SRT");
        });
    });
}

fn render_window_section(ui: &mut egui::Ui, form: &mut SettingsData) {
    section(ui, "Window and logging", |ui| {
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("Size").color(MUTED));
            ui.add(egui::DragValue::new(&mut form.window_width).range(MIN_WINDOW_WIDTH..=4096.0));
            ui.label("x");
            ui.add(egui::DragValue::new(&mut form.window_height).range(MIN_WINDOW_HEIGHT..=4096.0));
        });
        ui.checkbox(&mut form.file_logging, "Write a log file");
    });
}

#[cfg(test)]
mod tests {
    use super::{SettingsUiState, ToolMessage, short_ffmpeg_version, validate_form};
    use crate::settings::SettingsData;

    #[test]
    fn ffmpeg_banner_is_shortened() {
        assert_eq!(
            short_ffmpeg_version("ffmpeg version 7.0.1-static https://johnvansickle.com"),
            "7.0.1-static"
        );
        assert_eq!(short_ffmpeg_version("weird"), "weird");
    }

    #[test]
    fn form_with_empty_subtitle_languages_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut form = SettingsData::default();
        form.options.download_dir = dir.path().join("out");
        form.options.write_subs = true;
        assert!(validate_form(&form).is_err());

        form.options.sub_langs = "en".to_string();
        form.window_width = 10.0;
        let data = validate_form(&form).expect("valid");
        assert!(data.window_width >= super::MIN_WINDOW_WIDTH);
        assert!(dir.path().join("out").is_dir());
    }

    #[test]
    fn busy_until_every_tool_job_reports() {
        let mut state = SettingsUiState::new(&SettingsData::default());
        state.tools.jobs = 2;
        let _ = state.tool_tx.send(ToolMessage::Versions {
            yt_dlp: "2024.08.06".to_string(),
            ffmpeg: "7.0".to_string(),
        });
        state.poll_tool_updates();
        assert!(state.is_busy());
        assert_eq!(state.tools.yt_dlp_version, "2024.08.06");

        let _ = state.tool_tx.send(ToolMessage::Updated(Err("offline".to_string())));
        state.poll_tool_updates();
        assert!(!state.is_busy());
        assert_eq!(state.tools.status, "Update failed: offline");
    }
}
