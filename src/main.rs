mod app;
mod app_logger;
mod download;
mod error;
mod fs_utils;
mod logging;
mod metadata;
mod paths;
mod post_queue;
mod queue;
mod settings;
mod settings_ui;
mod theme;
mod ui;

fn main() -> eframe::Result<()> {
    app::run()
}
