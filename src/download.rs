mod cleanup;
pub mod command;
mod process;
pub mod tools;

use arboard::Clipboard;

pub use command::{FORMAT_PRESETS, cookie_args, preset_label};
pub use process::{DownloadEvent, DownloadRun, LogLine, RunRequest, SHUTDOWN_TIMEOUT};
pub use tools::{ReleaseCheck, ToolPaths, check_yt_dlp_release, read_tool_version, update_yt_dlp};

// Reads the clipboard; None when empty or unavailable.
pub fn read_clipboard_text() -> Option<String> {
    let mut clipboard = Clipboard::new().ok()?;
    let text = clipboard.get_text().ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
