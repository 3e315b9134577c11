use eframe::egui;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::app_logger::AppLogger;
use crate::download::{
    DownloadEvent, DownloadRun, FORMAT_PRESETS, LogLine, RunRequest, SHUTDOWN_TIMEOUT, ToolPaths,
    read_clipboard_text,
};
use crate::error::MetadataError;
use crate::fs_utils::ensure_dir;
use crate::logging;
use crate::metadata::{fetch_title, is_youtube_url};
use crate::paths::default_queue_file_path;
use crate::post_queue::{CropSummary, PostQueueAction, crop_covers, perform_machine_action};
use crate::queue::{
    Direction, FinishOutcome, PauseOutcome, QueueDriver, QueueItem, RunOutcome, StartOutcome,
    load_queue, restore_session, save_queue, save_session,
};
use crate::settings::{MIN_WINDOW_HEIGHT, MIN_WINDOW_WIDTH, SettingsData};
use crate::settings_ui;
use crate::theme::apply_theme;
use crate::ui;

const IDLE_STATUS: &str = "Idle";

pub fn run() -> eframe::Result<()> {
    let settings = SettingsData::load();
    logging::init(settings.file_logging);
    tracing::info!("starting TubeQueue");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([settings.window_width, settings.window_height])
            .with_min_inner_size([MIN_WINDOW_WIDTH, MIN_WINDOW_HEIGHT]),
        ..Default::default()
    };

    eframe::run_native(
        "TubeQueue",
        options,
        Box::new(|cc| Ok(Box::new(DownloaderApp::new(cc, settings)))),
    )
}

/// Results from helper threads other than the download itself.
pub(crate) enum AppEvent {
    TitleResolved {
        url: String,
        format_code: String,
        result: Result<String, MetadataError>,
    },
    CoversCropped {
        lines: Vec<LogLine>,
        summary: CropSummary,
    },
}

struct ActiveRun {
    run: DownloadRun,
    rx: mpsc::Receiver<DownloadEvent>,
}

pub struct DownloaderApp {
    pub(crate) settings: SettingsData,
    pub(crate) queue: QueueDriver,
    pub(crate) logger: AppLogger,
    pub(crate) status_text: String,
    pub(crate) url_input: String,
    pub(crate) format_index: usize,
    pub(crate) post_action: PostQueueAction,
    pub(crate) queue_file: PathBuf,
    pub(crate) pending_lookups: usize,
    pub(crate) covers_busy: bool,
    pub(crate) alert: Option<String>,
    pub(crate) settings_ui: settings_ui::SettingsUiState,
    pub(crate) pending_window_resize: Option<egui::Vec2>,
    active: Option<ActiveRun>,
    events_tx: mpsc::Sender<AppEvent>,
    events_rx: mpsc::Receiver<AppEvent>,
    close_requested: bool,
    current_window_size: Option<egui::Vec2>,
}

impl DownloaderApp {
    fn new(cc: &eframe::CreationContext<'_>, settings: SettingsData) -> Self {
        apply_theme(&cc.egui_ctx);
        let (events_tx, events_rx) = mpsc::channel();
        let settings_ui = settings_ui::SettingsUiState::new(&settings);

        let mut app = Self {
            settings,
            queue: QueueDriver::new(),
            logger: AppLogger::new(),
            status_text: IDLE_STATUS.to_string(),
            url_input: String::new(),
            format_index: 0,
            post_action: PostQueueAction::Keep,
            queue_file: default_queue_file_path(),
            pending_lookups: 0,
            covers_busy: false,
            alert: None,
            settings_ui,
            pending_window_resize: None,
            active: None,
            events_tx,
            events_rx,
            close_requested: false,
            current_window_size: None,
        };

        app.restore_queue();
        app.log_startup();
        app
    }

    fn log_startup(&mut self) {
        let tools = ToolPaths::resolve(&self.settings.options);
        for (label, path) in tools.missing() {
            let hint = if label == "yt-dlp" {
                " Install it from Preferences."
            } else {
                ""
            };
            self.logger
                .warn(format!("{label} was not found ({}).{hint}", path.display()));
        }
        let features = self.settings.options.active_features();
        if !features.is_empty() {
            self.logger.info(format!("Active options: {}", features.join("; ")));
        }
        self.logger.info(format!(
            "Saving to {}",
            self.settings.options.download_dir.display()
        ));
    }

    // Brings back whatever was left queued when the app last closed.
    fn restore_queue(&mut self) {
        let path = default_queue_file_path();
        match restore_session(&path) {
            Ok(items) if items.is_empty() => {}
            Ok(items) => {
                let count = items.len();
                match self.queue.replace_all(items) {
                    Ok(()) => self
                        .logger
                        .info(format!("Restored {count} item(s) from the last session.")),
                    Err(err) => self.logger.error(err.to_string()),
                }
            }
            Err(err) => self
                .logger
                .warn(format!("Could not restore the last queue: {err}")),
        }
    }

    pub(crate) fn is_downloading(&self) -> bool {
        self.active.is_some()
    }

    pub(crate) fn selected_format_code(&self) -> &'static str {
        FORMAT_PRESETS
            .get(self.format_index)
            .map(|preset| preset.code)
            .unwrap_or(FORMAT_PRESETS[0].code)
    }

    pub(crate) fn paste_from_clipboard(&mut self) {
        match read_clipboard_text() {
            Some(text) => self.url_input = text,
            None => self.logger.warn("Clipboard is empty."),
        }
    }

    // Resolves the title off-thread; the item is queued once it arrives.
    pub(crate) fn add_url_from_input(&mut self) {
        let url = self.url_input.trim().to_string();
        if url.is_empty() {
            return;
        }
        if !is_youtube_url(&url) {
            self.logger.error(format!("Invalid YouTube URL: {url}"));
            return;
        }

        let format_code = self.selected_format_code().to_string();
        let options = self.settings.options.clone();
        let tx = self.events_tx.clone();
        self.pending_lookups += 1;
        self.url_input.clear();
        self.logger.info(format!("Fetching title for {url}"));

        thread::spawn(move || {
            let tools = ToolPaths::resolve(&options);
            let result = fetch_title(&url, &options, &tools);
            let _ = tx.send(AppEvent::TitleResolved {
                url,
                format_code,
                result,
            });
        });
    }

    pub(crate) fn start_queue(&mut self) {
        if let Err(err) = self.settings.options.validate() {
            self.alert = Some(format!("Fix the download options before starting: {err}"));
            return;
        }
        match self.queue.start() {
            StartOutcome::Launch(item) => {
                self.logger.info("Queue started.");
                self.launch(item);
            }
            StartOutcome::AlreadyRunning => {}
            StartOutcome::Deferred => {
                self.logger.info("Resuming once the current download has stopped.");
            }
            StartOutcome::Empty => {
                self.logger.warn("The queue is empty.");
            }
        }
    }

    pub(crate) fn pause_queue(&mut self) {
        match self.queue.pause() {
            PauseOutcome::CancelCurrent(id) => {
                if let Some(active) = self.active.as_ref().filter(|active| active.run.item_id() == id) {
                    if active.run.cancel() {
                        self.logger.warn("Pausing: stopping the current download...");
                        self.status_text = "Stopping...".to_string();
                    }
                }
            }
            PauseOutcome::NotRunning => {
                self.logger.info("Queue paused.");
            }
        }
    }

    pub(crate) fn remove_item(&mut self, index: usize) {
        match self.queue.remove(index) {
            Ok(item) => self.logger.info(format!("Removed: {}", item.title)),
            Err(err) => self.alert = Some(err.to_string()),
        }
    }

    pub(crate) fn move_item(&mut self, index: usize, direction: Direction) {
        if let Err(err) = self.queue.move_item(index, direction) {
            self.alert = Some(err.to_string());
        }
    }

    pub(crate) fn save_queue_dialog(&mut self) {
        let Some(path) = queue_file_dialog(&self.queue_file).save_file() else {
            return;
        };
        match save_queue(&path, self.queue.items()) {
            Ok(()) => {
                self.logger
                    .success(format!("Saved {} item(s) to {}", self.queue.len(), path.display()));
                self.queue_file = path;
            }
            Err(err) => self.logger.error(err.to_string()),
        }
    }

    pub(crate) fn load_queue_dialog(&mut self) {
        if self.is_downloading() || self.queue.current().is_some() {
            self.alert = Some("Pause the queue before loading another one.".to_string());
            return;
        }
        let Some(path) = queue_file_dialog(&self.queue_file).pick_file() else {
            return;
        };
        let items = match load_queue(&path) {
            Ok(items) => items,
            Err(err) => {
                self.logger.error(err.to_string());
                return;
            }
        };
        let count = items.len();
        match self.queue.replace_all(items) {
            Ok(()) => {
                self.logger
                    .success(format!("Loaded {count} item(s) from {}", path.display()));
                self.queue_file = path;
            }
            Err(err) => self.alert = Some(err.to_string()),
        }
    }

    /// Applies saved preferences. In-flight downloads keep their snapshot.
    pub(crate) fn apply_settings(&mut self, data: SettingsData) {
        if data.file_logging != self.settings.file_logging {
            logging::set_file_logging_enabled(data.file_logging);
        }
        if (data.window_width, data.window_height)
            != (self.settings.window_width, self.settings.window_height)
        {
            self.pending_window_resize = Some(egui::vec2(data.window_width, data.window_height));
        }
        self.settings = data;
    }

    fn launch(&mut self, item: QueueItem) {
        let options = self.settings.options.clone();
        if let Err(err) = ensure_dir(&options.download_dir) {
            self.logger.error(format!(
                "Cannot create {}: {err}",
                options.download_dir.display()
            ));
        }
        let tools = ToolPaths::resolve(&options);
        self.status_text = format!("Downloading: {}", item.title);
        let request = RunRequest::prepare(item, &options, &tools);
        let (run, rx) = DownloadRun::start(request);
        self.active = Some(ActiveRun { run, rx });
    }

    fn poll_download_events(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let mut finished = None;
        let events: Vec<DownloadEvent> = active.rx.try_iter().collect();
        for event in events {
            match event {
                DownloadEvent::Logs(lines) => {
                    for line in lines {
                        self.logger.push(line.severity, line.text);
                    }
                }
                DownloadEvent::Status(status) => self.status_text = status,
                DownloadEvent::Finished(outcome) => finished = Some(outcome),
            }
        }

        let Some(outcome) = finished else {
            return;
        };
        let Some(active) = self.active.take() else {
            return;
        };
        let id = active.run.item_id();
        let title = self
            .queue
            .current_item()
            .map(|item| item.title.clone())
            .unwrap_or_default();
        self.report_outcome(&title, &outcome);

        match self.queue.finish(id, &outcome) {
            FinishOutcome::Launch(next) => self.launch(next),
            FinishOutcome::Halted => self.status_text = "Paused".to_string(),
            FinishOutcome::Drained => self.on_queue_drained(),
            FinishOutcome::Ignored => {}
        }
    }

    fn report_outcome(&mut self, title: &str, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Succeeded => self.logger.success(format!("Finished: {title}")),
            RunOutcome::Cancelled => self.logger.warn(format!("Stopped: {title}")),
            RunOutcome::Failed { .. } | RunOutcome::StartupFailed(_) => {
                self.logger.error(format!("Download of {title} {outcome}. Queue paused."));
            }
        }
    }

    fn on_queue_drained(&mut self) {
        self.status_text = IDLE_STATUS.to_string();
        self.logger.success("All downloads finished.");

        if !self.settings.options.crop_covers {
            self.run_end_action();
            return;
        }
        self.covers_busy = true;
        self.logger.info("Cropping cover art...");
        let options = self.settings.options.clone();
        let tx = self.events_tx.clone();
        thread::spawn(move || {
            let tools = ToolPaths::resolve(&options);
            let mut lines = Vec::new();
            let summary = crop_covers(&options.download_dir, &tools, &mut |line| lines.push(line));
            let _ = tx.send(AppEvent::CoversCropped { lines, summary });
        });
    }

    fn run_end_action(&mut self) {
        match self.post_action {
            PostQueueAction::Keep => {}
            PostQueueAction::Close => self.close_requested = true,
            action => match perform_machine_action(action) {
                Ok(()) => self
                    .logger
                    .warn(format!("{} scheduled in 60 seconds.", action.label())),
                Err(err) => self.logger.warn(err.to_string()),
            },
        }
    }

    fn poll_app_events(&mut self) {
        let events: Vec<AppEvent> = self.events_rx.try_iter().collect();
        for event in events {
            match event {
                AppEvent::TitleResolved {
                    url,
                    format_code,
                    result,
                } => {
                    self.pending_lookups = self.pending_lookups.saturating_sub(1);
                    match result {
                        Ok(title) => {
                            self.logger.info(format!("Added: {title}"));
                            self.queue.add(QueueItem::new(url, title, format_code));
                        }
                        Err(err) => self.logger.error(format!("Could not add {url}: {err}")),
                    }
                }
                AppEvent::CoversCropped { lines, summary } => {
                    self.covers_busy = false;
                    for line in lines {
                        self.logger.push(line.severity, line.text);
                    }
                    self.logger.info(format!(
                        "Cover crop: {} processed, {} updated",
                        summary.processed, summary.updated
                    ));
                    self.run_end_action();
                }
            }
        }
    }
}

fn queue_file_dialog(current: &Path) -> rfd::FileDialog {
    let mut dialog = rfd::FileDialog::new().add_filter("Queue", &["json"]);
    if let Some(dir) = current.parent() {
        dialog = dialog.set_directory(dir);
    }
    if let Some(name) = current.file_name() {
        dialog = dialog.set_file_name(name.to_string_lossy());
    }
    dialog
}

impl eframe::App for DownloaderApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.current_window_size = ctx.input(|i| i.viewport().inner_rect.map(|rect| rect.size()));
        if let Some(size) = self.pending_window_resize.take() {
            ctx.send_viewport_cmd(egui::ViewportCommand::InnerSize(size));
        }

        self.settings_ui.poll_tool_updates();
        self.poll_download_events();
        self.poll_app_events();
        ui::render(self, ctx);

        if self.close_requested {
            self.close_requested = false;
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
        if self.is_downloading() || self.pending_lookups > 0 || self.covers_busy || self.settings_ui.is_busy() {
            ctx.request_repaint_after(Duration::from_millis(200));
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if let Some(active) = self.active.as_mut() {
            if !active.run.cancel_and_wait(SHUTDOWN_TIMEOUT) {
                tracing::warn!("download process may still be running after exit");
            }
        }
        if let Err(err) = save_session(&default_queue_file_path(), self.queue.items()) {
            tracing::warn!("failed to save the queue: {err}");
        }
        if let Some(size) = self.current_window_size {
            let mut data = SettingsData::load();
            data.window_width = size.x.max(MIN_WINDOW_WIDTH);
            data.window_height = size.y.max(MIN_WINDOW_HEIGHT);
            if let Err(err) = data.save() {
                tracing::warn!("failed to save window size: {err}");
            }
        }
    }
}
