use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::app_logger::Severity;
use crate::download::{LogLine, ToolPaths};
use crate::error::PostQueueError;
use crate::fs_utils::files_with_extensions;

/// What happens once the queue drains.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PostQueueAction {
    #[default]
    Keep,
    Shutdown,
    Sleep,
    Restart,
    Close,
}

impl PostQueueAction {
    pub const ALL: [PostQueueAction; 5] = [
        PostQueueAction::Keep,
        PostQueueAction::Shutdown,
        PostQueueAction::Sleep,
        PostQueueAction::Restart,
        PostQueueAction::Close,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PostQueueAction::Keep => "Do nothing",
            PostQueueAction::Shutdown => "Shut down",
            PostQueueAction::Sleep => "Sleep",
            PostQueueAction::Restart => "Restart",
            PostQueueAction::Close => "Close app",
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CropSummary {
    pub processed: usize,
    pub updated: usize,
}

/// Centre-crops non-square embedded covers of every mp3 below `dir`.
/// Per-file problems are reported through `log` and skipped.
pub fn crop_covers(dir: &Path, tools: &ToolPaths, log: &mut dyn FnMut(LogLine)) -> CropSummary {
    let mut summary = CropSummary::default();
    for file in files_with_extensions(dir, &["mp3"]) {
        summary.processed += 1;
        match crop_cover(&file, tools) {
            Ok(true) => {
                summary.updated += 1;
                log(LogLine {
                    text: format!("Cropped cover: {}", display_name(&file)),
                    severity: Severity::Info,
                });
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!("{err}");
                log(LogLine {
                    text: err.to_string(),
                    severity: Severity::Warning,
                });
            }
        }
    }
    summary
}

fn crop_cover(file: &Path, tools: &ToolPaths) -> Result<bool, PostQueueError> {
    let media_err = |tool: &'static str, detail: String| PostQueueError::Media {
        tool,
        file: display_name(file),
        detail,
    };

    let probe = Command::new(&tools.ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(file)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| PostQueueError::Command {
            action: "ffprobe",
            source,
        })?;
    if !probe.status.success() {
        return Err(media_err("ffprobe", String::from_utf8_lossy(&probe.stderr).trim().to_string()));
    }
    let Some((width, height)) = parse_dimensions(&String::from_utf8_lossy(&probe.stdout)) else {
        // no attached picture
        return Ok(false);
    };
    if width == height {
        return Ok(false);
    }

    let temp = file.with_extension("cover-crop.mp3");
    let output = Command::new(&tools.ffmpeg)
        .args(["-y", "-v", "error", "-i"])
        .arg(file)
        .args([
            "-map",
            "0:a",
            "-map",
            "0:v:0",
            "-c:a",
            "copy",
            "-c:v",
            "mjpeg",
            "-q:v",
            "2",
            "-vf",
            "crop='min(iw,ih)':'min(iw,ih)'",
            "-disposition:v:0",
            "attached_pic",
            "-id3v2_version",
            "3",
            "-map_metadata",
            "0",
        ])
        .arg(&temp)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| PostQueueError::Command {
            action: "ffmpeg",
            source,
        })?;
    if !output.status.success() {
        let _ = fs::remove_file(&temp);
        return Err(media_err("ffmpeg", String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }
    fs::rename(&temp, file).map_err(|err| {
        let _ = fs::remove_file(&temp);
        media_err("rename", err.to_string())
    })?;
    Ok(true)
}

/// Parses ffprobe's `WIDTHxHEIGHT` line.
pub fn parse_dimensions(raw: &str) -> Option<(u32, u32)> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let (width, height) = line.split_once('x')?;
    let width = width.trim().parse().ok()?;
    let height = height.trim().trim_end_matches('x').parse().ok()?;
    Some((width, height))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Runs a machine-level action. `Keep` and `Close` are handled by the caller.
pub fn perform_machine_action(action: PostQueueAction) -> Result<(), PostQueueError> {
    let (label, program, args): (&'static str, &str, &[&str]) = match action {
        PostQueueAction::Keep | PostQueueAction::Close => return Ok(()),
        PostQueueAction::Shutdown => ("shutdown", "shutdown", &["/s", "/t", "60"]),
        PostQueueAction::Restart => ("restart", "shutdown", &["/r", "/t", "60"]),
        PostQueueAction::Sleep => (
            "sleep",
            "powershell",
            &[
                "-NoProfile",
                "-Command",
                "Start-Sleep -Seconds 60; Add-Type -AssemblyName System.Windows.Forms; [System.Windows.Forms.Application]::SetSuspendState('Suspend', $false, $false)",
            ],
        ),
    };
    if !cfg!(windows) {
        return Err(PostQueueError::Unsupported(label));
    }
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|source| PostQueueError::Command {
            action: label,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::{PostQueueAction, parse_dimensions, perform_machine_action};

    #[test]
    fn dimensions_parse_from_probe_output() {
        assert_eq!(parse_dimensions("600x338\n"), Some((600, 338)));
        assert_eq!(parse_dimensions("\n500x500x\n"), Some((500, 500)));
        assert_eq!(parse_dimensions(""), None);
        assert_eq!(parse_dimensions("N/A"), None);
    }

    #[test]
    fn keep_and_close_are_no_ops() {
        assert!(perform_machine_action(PostQueueAction::Keep).is_ok());
        assert!(perform_machine_action(PostQueueAction::Close).is_ok());
    }

    #[cfg(not(windows))]
    #[test]
    fn machine_actions_unsupported_off_windows() {
        assert!(perform_machine_action(PostQueueAction::Shutdown).is_err());
        assert!(perform_machine_action(PostQueueAction::Sleep).is_err());
    }
}
