use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Proxy URL must start with http:// or socks5:// (got {0})")]
    InvalidProxy(String),

    #[error("Subtitles are enabled but no language code is set")]
    MissingSubtitleLanguages,

    #[error("Language codes should be 2-3 letters (got {0:?})")]
    InvalidSubtitleLanguage(String),

    #[error("Date must be in YYYYMMDD format (got {0})")]
    InvalidDate(String),

    #[error("Unknown SponsorBlock category: {0}")]
    UnknownSponsorCategory(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Cannot change an active download. Pause the queue first.")]
    ItemActive,

    #[error("No queue entry at position {0}")]
    OutOfRange(usize),
}

#[derive(Debug, Error)]
pub enum QueueFileError {
    #[error("Failed to access queue file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Queue file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid queue file format: top level must be an array")]
    NotAnArray,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Invalid YouTube URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to start yt-dlp: {0}")]
    Spawn(#[source] io::Error),

    #[error("Timeout while fetching metadata ({0} seconds)")]
    Timeout(u64),

    #[error("{0}")]
    Exit(String),

    #[error("No metadata received from yt-dlp")]
    Empty,

    #[error("Failed to parse metadata: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{label} is not installed")]
    Missing { label: &'static str },

    #[error("Failed to run {label}: {source}")]
    Launch {
        label: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{label} exited with {status}")]
    Status { label: &'static str, status: String },

    #[error("{label} printed no version")]
    NoVersion { label: &'static str },

    #[error("Filesystem error on {path}: {source}")]
    Fs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Release feed returned no tag_name")]
    MissingTag,

    #[error("Release feed is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Update of {label} failed and the previous binary could not be restored: {restore} (update error: {update})")]
    Rollback {
        label: &'static str,
        restore: io::Error,
        update: Box<ToolError>,
    },
}

#[derive(Debug, Error)]
pub enum PostQueueError {
    #[error("'{0}' is only supported on Windows")]
    Unsupported(&'static str),

    #[error("Failed to run {action}: {source}")]
    Command {
        action: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{tool} failed on {file}: {detail}")]
    Media {
        tool: &'static str,
        file: String,
        detail: String,
    },
}
