use std::collections::VecDeque;

use time::OffsetDateTime;
use time::macros::format_description;

const MAX_ENTRIES: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Plain,
    Success,
    Warning,
    Error,
}

pub struct LogEntry {
    pub line: String,
    pub severity: Severity,
}

/// Lines shown in the log panel. Everything pushed here is also sent to `tracing`.
pub struct AppLogger {
    entries: VecDeque<LogEntry>,
}

impl AppLogger {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(MAX_ENTRIES),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Severity::Info, message);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(Severity::Success, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }

    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        if message.is_empty() {
            return;
        }

        match severity {
            Severity::Error => tracing::error!(target: "ui", "{message}"),
            Severity::Warning => tracing::warn!(target: "ui", "{message}"),
            Severity::Plain => tracing::debug!(target: "ui", "{message}"),
            Severity::Info | Severity::Success => tracing::info!(target: "ui", "{message}"),
        }

        let timestamp = current_time_text();
        self.entries.push_back(LogEntry {
            line: format!("[{timestamp}] {message}"),
            severity,
        });

        while self.entries.len() > MAX_ENTRIES {
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn snapshot_text(&self) -> String {
        self.entries
            .iter()
            .map(|entry| entry.line.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for AppLogger {
    fn default() -> Self {
        Self::new()
    }
}

fn current_time_text() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "00:00:00".to_string())
}

#[cfg(test)]
mod tests {
    use super::{AppLogger, MAX_ENTRIES, Severity};

    #[test]
    fn keeps_newest_entries_only() {
        let mut logger = AppLogger::new();
        for idx in 0..(MAX_ENTRIES + 5) {
            logger.info(format!("line {idx}"));
        }
        let first = logger.entries().next().expect("entry");
        assert!(first.line.ends_with("line 5"));
        assert_eq!(logger.entries().count(), MAX_ENTRIES);
    }

    #[test]
    fn empty_messages_are_ignored_and_severity_kept() {
        let mut logger = AppLogger::new();
        logger.warn("");
        assert!(logger.is_empty());
        logger.error("boom");
        let entry = logger.entries().next().expect("entry");
        assert_eq!(entry.severity, Severity::Error);
        assert!(entry.line.starts_with('['));
    }
}
