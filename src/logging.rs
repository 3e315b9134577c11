use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::paths::log_dir;

const LOG_FILE_PREFIX: &str = "app.log";
const KEEP_LOG_FILES: usize = 10;

static FILE_FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn file_filter(enabled: bool) -> EnvFilter {
    EnvFilter::new(if enabled { "info" } else { "off" })
}

/// Installs the global subscriber: console at INFO, plus a daily rolling file
/// whose level can be switched later. Call once, before the window opens.
pub fn init(file_enabled: bool) {
    let dir = log_dir();
    let _ = fs::create_dir_all(&dir);

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);

    let (filter, handle) = reload::Layer::new(file_filter(file_enabled));
    let _ = FILE_FILTER.set(handle);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);
    let console_layer = fmt::layer().with_target(false).with_line_number(true);

    // the reloadable filter must sit directly on the registry
    let result = tracing_subscriber::registry()
        .with(file_layer.with_filter(filter))
        .with(console_layer.with_filter(LevelFilter::INFO))
        .try_init();
    if let Err(err) = result {
        eprintln!("logging already initialised: {err}");
    }

    prune_old_logs(&dir, KEEP_LOG_FILES);
}

pub fn set_file_logging_enabled(enabled: bool) {
    if let Some(handle) = FILE_FILTER.get() {
        let _ = handle.modify(|filter| *filter = file_filter(enabled));
    }
}

// Removes all but the newest `keep` rotated log files.
fn prune_old_logs(dir: &Path, keep: usize) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut files: Vec<_> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
        .collect();
    if files.len() <= keep {
        return;
    }
    files.sort_by_key(|entry| entry.metadata().and_then(|meta| meta.modified()).ok());
    let excess = files.len() - keep;
    for entry in files.iter().take(excess) {
        let _ = fs::remove_file(entry.path());
    }
}

#[cfg(test)]
mod tests {
    use super::prune_old_logs;
    use std::fs;

    #[test]
    fn prune_keeps_requested_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        for day in 1..=5 {
            fs::write(dir.path().join(format!("app.log.2025-01-0{day}")), b"x").expect("write");
        }
        fs::write(dir.path().join("other.txt"), b"x").expect("write");

        prune_old_logs(dir.path(), 3);

        let remaining = fs::read_dir(dir.path()).expect("dir").count();
        assert_eq!(remaining, 4);
        assert!(dir.path().join("other.txt").exists());
    }
}
