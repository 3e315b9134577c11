use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::ToolError;
use crate::fs_utils::{ensure_dir, is_executable};
use crate::paths::{bin_dir, bundled_tool_path};
use crate::settings::DownloadOptions;

const YT_DLP_LABEL: &str = "yt-dlp";
const RELEASE_FEED: &str = "https://api.github.com/repos/yt-dlp/yt-dlp/releases/latest";

/// Executables one download needs, resolved once per launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolPaths {
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    pub fn resolve(options: &DownloadOptions) -> Self {
        let yt_dlp = resolve_tool(&options.yt_dlp_path, "yt-dlp");
        let ffmpeg = resolve_tool(&options.ffmpeg_path, "ffmpeg");
        // ffprobe ships next to ffmpeg in every distribution we look at.
        let ffprobe = ffmpeg
            .parent()
            .map(|dir| dir.join(format!("ffprobe{}", std::env::consts::EXE_SUFFIX)))
            .filter(|candidate| candidate.is_file())
            .unwrap_or_else(|| resolve_tool("", "ffprobe"));
        Self {
            yt_dlp,
            ffmpeg,
            ffprobe,
        }
    }

    /// Labels and paths of the tools that are not on disk.
    pub fn missing(&self) -> Vec<(&'static str, &Path)> {
        [
            ("yt-dlp", self.yt_dlp.as_path()),
            ("ffmpeg", self.ffmpeg.as_path()),
            ("ffprobe", self.ffprobe.as_path()),
        ]
        .into_iter()
        .filter(|(_, path)| !path.is_file())
        .collect()
    }

    /// Directory handed to `--ffmpeg-location`.
    pub fn ffmpeg_dir(&self) -> PathBuf {
        match self.ffmpeg.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => self.ffmpeg.clone(),
        }
    }

    /// Directories to prepend to PATH for the child process.
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        let bin = bin_dir();
        let mut dirs = Vec::new();
        for dir in [self.yt_dlp.parent(), self.ffmpeg.parent(), Some(bin.as_path())]
            .into_iter()
            .flatten()
        {
            if dir.as_os_str().is_empty() || !dir.is_dir() {
                continue;
            }
            let dir = dir.to_path_buf();
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }
}

// explicit path > app bin dir > PATH > app bin dir (reported missing at launch)
fn resolve_tool(explicit: &str, name: &str) -> PathBuf {
    let explicit = explicit.trim();
    if !explicit.is_empty() {
        return PathBuf::from(explicit);
    }
    let bundled = bundled_tool_path(name);
    if bundled.is_file() {
        return bundled;
    }
    which::which(name).unwrap_or(bundled)
}

/// Runs `<tool> --version` and returns the first non-empty line.
pub fn read_tool_version(path: &Path, label: &'static str, version_flag: &str) -> Result<String, ToolError> {
    let output = Command::new(path)
        .arg(version_flag)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ToolError::Launch { label, source })?;
    if !output.status.success() {
        return Err(ToolError::Status {
            label,
            status: output.status.to_string(),
        });
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or(ToolError::NoVersion { label })
}

// Installs yt-dlp into the app bin dir when it is missing there.
pub fn ensure_yt_dlp() -> Result<PathBuf, ToolError> {
    let yt_dlp = bundled_tool_path("yt-dlp");
    if yt_dlp.exists() {
        ensure_executable(&yt_dlp)?;
        return Ok(yt_dlp);
    }

    let bin = bin_dir();
    ensure_dir(&bin).map_err(|source| ToolError::Fs {
        path: bin.clone(),
        source,
    })?;
    tracing::info!("yt-dlp not found in {}, downloading", bin.display());

    let url = format!(
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/{}",
        release_asset_name()
    );
    curl_download(&url, &yt_dlp, YT_DLP_LABEL)?;
    ensure_executable(&yt_dlp)?;
    tracing::info!("yt-dlp installed at {}", yt_dlp.display());
    Ok(yt_dlp)
}

// Replaces the installed yt-dlp, restoring the previous binary on failure.
pub fn update_yt_dlp() -> Result<PathBuf, ToolError> {
    let yt_dlp = bundled_tool_path("yt-dlp");
    update_tool_with_rollback(&yt_dlp, YT_DLP_LABEL, ensure_yt_dlp)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseCheck {
    pub installed: String,
    pub latest: String,
}

impl ReleaseCheck {
    pub fn update_available(&self) -> bool {
        compare_versions(&self.latest, &self.installed) == std::cmp::Ordering::Greater
    }
}

/// Compares the installed yt-dlp against the newest published release tag.
pub fn check_yt_dlp_release(yt_dlp: &Path) -> Result<ReleaseCheck, ToolError> {
    let installed = read_tool_version(yt_dlp, YT_DLP_LABEL, "--version")?;
    let output = Command::new("curl")
        .arg("-sL")
        .arg("-H")
        .arg("Accept: application/vnd.github+json")
        .arg(RELEASE_FEED)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ToolError::Launch {
            label: "curl",
            source,
        })?;
    if !output.status.success() {
        return Err(ToolError::Status {
            label: "curl",
            status: output.status.to_string(),
        });
    }
    let latest = parse_release_tag(&output.stdout)?;
    Ok(ReleaseCheck { installed, latest })
}

fn parse_release_tag(body: &[u8]) -> Result<String, ToolError> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    value
        .get("tag_name")
        .and_then(|tag| tag.as_str())
        .map(|tag| tag.trim().trim_start_matches('v').to_string())
        .filter(|tag| !tag.is_empty())
        .ok_or(ToolError::MissingTag)
}

/// Dotted numeric comparison; non-numeric parts count as 0.
pub fn compare_versions(left: &str, right: &str) -> std::cmp::Ordering {
    let parse = |raw: &str| -> Vec<u64> {
        raw.trim()
            .trim_start_matches('v')
            .split(['.', '-'])
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(left), parse(right));
    let len = a.len().max(b.len());
    for idx in 0..len {
        let x = a.get(idx).copied().unwrap_or(0);
        let y = b.get(idx).copied().unwrap_or(0);
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

fn release_asset_name() -> &'static str {
    if cfg!(windows) {
        "yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "yt-dlp_macos"
    } else {
        "yt-dlp_linux"
    }
}

fn update_tool_with_rollback<F>(path: &Path, label: &'static str, installer: F) -> Result<PathBuf, ToolError>
where
    F: FnOnce() -> Result<PathBuf, ToolError>,
{
    if !path.exists() {
        return installer();
    }

    let backup_path = next_backup_path(path);
    fs::rename(path, &backup_path).map_err(|source| ToolError::Fs {
        path: path.to_path_buf(),
        source,
    })?;

    match installer() {
        Ok(updated_path) => {
            let _ = fs::remove_file(&backup_path);
            Ok(updated_path)
        }
        Err(err) => {
            if path.exists() {
                let _ = fs::remove_file(path);
            }
            match fs::rename(&backup_path, path) {
                Ok(()) => Err(err),
                Err(restore) => Err(ToolError::Rollback {
                    label,
                    restore,
                    update: Box::new(err),
                }),
            }
        }
    }
}

fn next_backup_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("tool");
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let pid = std::process::id();

    (0..1000)
        .map(|idx| {
            let suffix = if idx == 0 {
                pid.to_string()
            } else {
                format!("{pid}.{idx}")
            };
            parent.join(format!("{file_name}.update-backup.{suffix}"))
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| parent.join(format!("{file_name}.update-backup.fallback")))
}

#[cfg(unix)]
fn ensure_executable(path: &Path) -> Result<(), ToolError> {
    use std::os::unix::fs::PermissionsExt;

    if is_executable(path) {
        return Ok(());
    }
    let fs_err = |source| ToolError::Fs {
        path: path.to_path_buf(),
        source,
    };
    let mut perms = fs::metadata(path).map_err(fs_err)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(path, perms).map_err(fs_err)
}

#[cfg(not(unix))]
fn ensure_executable(path: &Path) -> Result<(), ToolError> {
    if is_executable(path) {
        Ok(())
    } else {
        Err(ToolError::Missing { label: YT_DLP_LABEL })
    }
}

fn curl_download(url: &str, output_path: &Path, label: &'static str) -> Result<(), ToolError> {
    let status = Command::new("curl")
        .arg("-fL")
        .arg("-o")
        .arg(output_path)
        .arg(url)
        .stdin(Stdio::null())
        .status()
        .map_err(|source| ToolError::Launch {
            label: "curl",
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(ToolError::Status {
            label,
            status: status.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ToolPaths, compare_versions, parse_release_tag, update_tool_with_rollback};
    use crate::error::ToolError;
    use std::cmp::Ordering;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn versions_compare_numerically() {
        assert_eq!(compare_versions("2024.12.13", "2024.3.30"), Ordering::Greater);
        assert_eq!(compare_versions("2024.03.30", "2024.3.30"), Ordering::Equal);
        assert_eq!(compare_versions("v1.2", "1.2.1"), Ordering::Less);
    }

    #[test]
    fn release_tag_is_read_from_feed() {
        let body = br#"{"tag_name":"2025.01.15","name":"yt-dlp 2025.01.15"}"#;
        assert_eq!(parse_release_tag(body).expect("tag"), "2025.01.15");
        assert!(matches!(parse_release_tag(b"{}"), Err(ToolError::MissingTag)));
    }

    #[test]
    fn explicit_ffmpeg_path_sets_location_dir() {
        let tools = ToolPaths {
            yt_dlp: PathBuf::from("/opt/tools/yt-dlp"),
            ffmpeg: PathBuf::from("/opt/ffmpeg/bin/ffmpeg"),
            ffprobe: PathBuf::from("/opt/ffmpeg/bin/ffprobe"),
        };
        assert_eq!(tools.ffmpeg_dir(), PathBuf::from("/opt/ffmpeg/bin"));
    }

    #[test]
    fn failed_update_restores_previous_binary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = dir.path().join("yt-dlp");
        fs::write(&tool, b"old").expect("write");

        let result = update_tool_with_rollback(&tool, "yt-dlp", || {
            Err(ToolError::Status {
                label: "yt-dlp",
                status: "exit status: 22".to_string(),
            })
        });
        assert!(matches!(result, Err(ToolError::Status { .. })));
        assert_eq!(fs::read(&tool).expect("read"), b"old");

        let updated = update_tool_with_rollback(&tool, "yt-dlp", || {
            fs::write(&tool, b"new").expect("write");
            Ok(tool.clone())
        })
        .expect("update");
        assert_eq!(fs::read(updated).expect("read"), b"new");
        assert_eq!(fs::read_dir(dir.path()).expect("dir").count(), 1);
    }

    #[test]
    fn missing_lists_every_absent_tool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ffmpeg = dir.path().join("ffmpeg");
        fs::write(&ffmpeg, b"bin").expect("write");
        let tools = ToolPaths {
            yt_dlp: dir.path().join("yt-dlp"),
            ffmpeg,
            ffprobe: dir.path().join("ffprobe"),
        };
        let labels: Vec<&str> = tools.missing().into_iter().map(|(label, _)| label).collect();
        assert_eq!(labels, vec!["yt-dlp", "ffprobe"]);
    }
}
