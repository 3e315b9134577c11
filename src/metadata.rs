use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use url::Url;

use crate::download::{ToolPaths, cookie_args};
use crate::error::MetadataError;
use crate::settings::DownloadOptions;

pub const FETCH_TIMEOUT_SECS: u64 = 120;
pub const UNKNOWN_TITLE: &str = "Unknown Title";

const YOUTUBE_HOSTS: [&str; 5] = [
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
];

pub fn is_youtube_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw.trim()) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    url.host_str()
        .map(|host| YOUTUBE_HOSTS.contains(&host.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Title from the first JSON object yt-dlp prints for a URL.
pub fn parse_title(first_line: &str) -> Result<String, MetadataError> {
    let value: serde_json::Value = serde_json::from_str(first_line.trim())?;
    let text = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    if let Some(playlist) = text("playlist_title") {
        return Ok(format!("{playlist} [Playlist]"));
    }
    Ok(text("title").unwrap_or_else(|| UNKNOWN_TITLE.to_string()))
}

/// Resolves a display title by asking yt-dlp for metadata only. Blocks for
/// at most `FETCH_TIMEOUT_SECS`; run it off the UI thread.
pub fn fetch_title(url: &str, options: &DownloadOptions, tools: &ToolPaths) -> Result<String, MetadataError> {
    fetch_title_within(url, options, tools, Duration::from_secs(FETCH_TIMEOUT_SECS))
}

fn fetch_title_within(
    url: &str,
    options: &DownloadOptions,
    tools: &ToolPaths,
    timeout: Duration,
) -> Result<String, MetadataError> {
    let url = url.trim();
    if !is_youtube_url(url) {
        return Err(MetadataError::InvalidUrl(url.to_string()));
    }

    let mut command = Command::new(&tools.yt_dlp);
    command
        .arg("--ffmpeg-location")
        .arg(tools.ffmpeg_dir())
        .args(["--skip-download", "--print-json", "--ignore-errors", "--flat-playlist"])
        .args(cookie_args(options));
    let proxy = options.proxy_url.trim();
    if !proxy.is_empty() {
        command.arg("--proxy").arg(proxy);
    }
    command
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(MetadataError::Spawn)?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // only the first line matters; the rest is drained so the child never blocks
    let (line_tx, line_rx) = mpsc::channel();
    if let Some(stdout) = stdout {
        thread::spawn(move || {
            let mut first = None;
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if first.is_none() && !line.trim().is_empty() {
                    first = Some(line);
                }
            }
            let _ = line_tx.send(first);
        });
    }
    let (err_tx, err_rx) = mpsc::channel();
    if let Some(mut stderr) = stderr {
        thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            let _ = err_tx.send(text);
        });
    }

    let first_line = match line_rx.recv_timeout(timeout) {
        Ok(line) => line,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(MetadataError::Timeout(timeout.as_secs()));
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => None,
    };
    let status = child.wait().map_err(MetadataError::Spawn)?;

    match first_line {
        Some(line) => parse_title(&line),
        None if !status.success() => {
            let stderr = err_rx.recv_timeout(Duration::from_secs(1)).unwrap_or_default();
            let message = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
                .unwrap_or_else(|| format!("yt-dlp exited with {status}"));
            Err(MetadataError::Exit(message))
        }
        None => Err(MetadataError::Empty),
    }
}

#[cfg(test)]
mod tests {
    use super::{UNKNOWN_TITLE, is_youtube_url, parse_title};
    use crate::error::MetadataError;
    use crate::settings::DownloadOptions;
    use std::time::{Duration, Instant};

    #[test]
    fn accepts_only_youtube_http_urls() {
        assert!(is_youtube_url("https://www.youtube.com/watch?v=abc"));
        assert!(is_youtube_url("https://youtu.be/abc"));
        assert!(is_youtube_url(" https://music.youtube.com/watch?v=abc "));
        assert!(!is_youtube_url("ftp://youtube.com/watch?v=abc"));
        assert!(!is_youtube_url("https://vimeo.com/123"));
        assert!(!is_youtube_url("not a url"));
    }

    #[test]
    fn playlist_titles_get_marker() {
        let line = r#"{"title":"Entry 1","playlist_title":"Road Trip"}"#;
        assert_eq!(parse_title(line).expect("title"), "Road Trip [Playlist]");
    }

    #[test]
    fn falls_back_to_unknown_title() {
        assert_eq!(parse_title(r#"{"title":"Song"}"#).expect("title"), "Song");
        assert_eq!(parse_title(r#"{"title":"  "}"#).expect("title"), UNKNOWN_TITLE);
        assert!(matches!(parse_title("<html>"), Err(MetadataError::Parse(_))));
    }

    #[cfg(unix)]
    fn fake_yt_dlp(dir: &std::path::Path, body: &str) -> crate::download::ToolPaths {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("yt-dlp");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        crate::download::ToolPaths {
            yt_dlp: script,
            ffmpeg: dir.join("ffmpeg"),
            ffprobe: dir.join("ffprobe"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn fetch_reads_first_json_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = fake_yt_dlp(
            dir.path(),
            r#"echo '{"title":"Entry 1","playlist_title":"P"}'; echo '{"title":"Entry 2"}'"#,
        );
        let title = super::fetch_title("https://youtu.be/abc", &DownloadOptions::default(), &tools);
        assert_eq!(title.expect("title"), "P [Playlist]");
    }

    #[cfg(unix)]
    #[test]
    fn fetch_reports_last_stderr_line_on_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = fake_yt_dlp(dir.path(), "echo 'WARNING: noise' >&2; echo 'ERROR: private video' >&2; exit 1");
        match super::fetch_title("https://youtu.be/abc", &DownloadOptions::default(), &tools) {
            Err(MetadataError::Exit(message)) => assert_eq!(message, "ERROR: private video"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn fetch_with_no_output_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = fake_yt_dlp(dir.path(), "exit 0");
        let result = super::fetch_title("https://youtu.be/abc", &DownloadOptions::default(), &tools);
        assert!(matches!(result, Err(MetadataError::Empty)));
    }

    #[cfg(unix)]
    #[test]
    fn fetch_gives_up_after_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = fake_yt_dlp(dir.path(), "exec sleep 30");
        let started = Instant::now();
        let result = super::fetch_title_within(
            "https://youtu.be/abc",
            &DownloadOptions::default(),
            &tools,
            Duration::from_millis(300),
        );
        assert!(matches!(result, Err(MetadataError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn non_youtube_url_is_refused_before_spawning() {
        let tools = crate::download::ToolPaths {
            yt_dlp: "/nonexistent/yt-dlp".into(),
            ffmpeg: "/nonexistent/ffmpeg".into(),
            ffprobe: "/nonexistent/ffprobe".into(),
        };
        let result = super::fetch_title("https://vimeo.com/1", &DownloadOptions::default(), &tools);
        assert!(matches!(result, Err(MetadataError::InvalidUrl(_))));
    }
}
