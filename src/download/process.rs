use std::collections::VecDeque;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::app_logger::Severity;
use crate::queue::{ItemId, QueueItem, RunOutcome};
use crate::settings::DownloadOptions;

use super::cleanup::clean_audio_filenames;
use super::command::{build_command, is_audio_format};
use super::tools::ToolPaths;

const FLUSH_INTERVAL: Duration = Duration::from_secs(3);
const FLUSH_PENDING_LINES: usize = 800;
const BUFFER_CAP: usize = 1500;
const BUFFER_DROP: usize = 700;
const STATUS_INTERVAL: Duration = Duration::from_secs(2);
const KILL_GRACE: Duration = Duration::from_secs(2);
const DRAIN_DEADLINE: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound for `cancel_and_wait`: terminate grace, forced kill, then the drain window.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub severity: Severity,
}

impl LogLine {
    pub fn classify(text: impl Into<String>) -> Self {
        let text = text.into();
        let severity = if text.to_lowercase().contains("error") {
            Severity::Error
        } else {
            Severity::Plain
        };
        Self { text, severity }
    }

    fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity: Severity::Info,
        }
    }
}

/// Messages from one run, in emission order. `Finished` is always last.
#[derive(Debug)]
pub enum DownloadEvent {
    Logs(Vec<LogLine>),
    Status(String),
    Finished(RunOutcome),
}

/// Everything a run needs, captured when the item is launched.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub item: QueueItem,
    pub argv: Vec<String>,
    pub search_dirs: Vec<PathBuf>,
    /// Set for audio items; scanned for tag cleanup after a clean exit.
    pub cleanup_dir: Option<PathBuf>,
}

impl RunRequest {
    pub fn prepare(item: QueueItem, options: &DownloadOptions, tools: &ToolPaths) -> Self {
        let argv = build_command(&item, options, tools);
        let cleanup_dir = is_audio_format(&item.format_code).then(|| options.download_dir.clone());
        Self {
            item,
            argv,
            search_dirs: tools.search_dirs(),
            cleanup_dir,
        }
    }
}

/// Handle to the single supervised process. Dropping it does not stop the
/// worker; call `cancel` for that, or `cancel_and_wait` when the app is
/// about to exit.
pub struct DownloadRun {
    item_id: ItemId,
    cancel: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl DownloadRun {
    pub fn start(request: RunRequest) -> (Self, mpsc::Receiver<DownloadEvent>) {
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let item_id = request.item.id;
        let flag = cancel.clone();
        let worker = thread::spawn(move || supervise(request, tx, flag));
        let run = Self {
            item_id,
            cancel,
            worker: Some(worker),
        };
        (run, rx)
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// Returns true only for the first effective request.
    pub fn cancel(&self) -> bool {
        !self.cancel.swap(true, Ordering::SeqCst)
    }

    /// Cancels and blocks until the supervisor has reaped the child. Returns
    /// false if `timeout` ran out first.
    pub fn cancel_and_wait(&mut self, timeout: Duration) -> bool {
        self.cancel();
        let Some(worker) = self.worker.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(item = %self.item_id, "download worker still running after {timeout:?}");
                self.worker = Some(worker);
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
        let _ = worker.join();
        true
    }
}

// Bounded line buffer between the pipe readers and the UI.
struct LogBuffer {
    lines: VecDeque<LogLine>,
    last_flush: Instant,
}

impl LogBuffer {
    fn new() -> Self {
        Self {
            lines: VecDeque::new(),
            last_flush: Instant::now(),
        }
    }

    fn push(&mut self, line: LogLine) {
        self.lines.push_back(line);
        if self.lines.len() > BUFFER_CAP {
            let dropped = self.lines.len().min(BUFFER_DROP);
            self.lines.drain(..dropped);
            tracing::warn!("log buffer overflow, dropped {dropped} lines");
        }
    }

    fn should_flush(&self) -> bool {
        !self.lines.is_empty()
            && (self.lines.len() > FLUSH_PENDING_LINES || self.last_flush.elapsed() >= FLUSH_INTERVAL)
    }

    fn flush(&mut self, tx: &mpsc::Sender<DownloadEvent>) {
        self.last_flush = Instant::now();
        if self.lines.is_empty() {
            return;
        }
        let batch: Vec<LogLine> = self.lines.drain(..).collect();
        let _ = tx.send(DownloadEvent::Logs(batch));
    }
}

struct StatusThrottle {
    last_text: String,
    last_sent: Option<Instant>,
}

impl StatusThrottle {
    fn new() -> Self {
        Self {
            last_text: String::new(),
            last_sent: None,
        }
    }

    fn admit(&mut self, text: &str, now: Instant) -> bool {
        if text == self.last_text {
            return false;
        }
        if let Some(sent) = self.last_sent {
            if now.duration_since(sent) < STATUS_INTERVAL {
                return false;
            }
        }
        self.last_text = text.to_string();
        self.last_sent = Some(now);
        true
    }
}

struct StatusParser {
    percent: Regex,
}

impl StatusParser {
    fn new() -> Option<Self> {
        Regex::new(r"([0-9]{1,3}(?:[.,][0-9]+)?)\s*%")
            .ok()
            .map(|percent| Self { percent })
    }

    // Derives "NN% ETA mm:ss" from the tail of a progress line.
    fn parse(&self, line: &str) -> Option<String> {
        let tail = tail_chars(line, 200);
        if !tail.contains("[download]") && !tail.contains('%') {
            return None;
        }
        let percent = self
            .percent
            .captures_iter(tail)
            .last()
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().replace(',', ".").parse::<f32>().ok())
            .map(|value| value.clamp(0.0, 100.0) as u32)?;

        // uppercasing ASCII keeps byte offsets, so `pos` is valid in `tail`
        let eta = tail.to_ascii_uppercase().rfind("ETA").and_then(|pos| {
            tail[pos + 3..]
                .split_whitespace()
                .next()
                .filter(|token| token.contains(':') || token.chars().all(|c| c.is_ascii_digit()))
        });

        Some(match eta {
            Some(eta) => format!("{percent}% ETA {eta}"),
            None => format!("{percent}%"),
        })
    }
}

fn tail_chars(line: &str, max: usize) -> &str {
    let count = line.chars().count();
    if count <= max {
        return line;
    }
    let skip = count - max;
    match line.char_indices().nth(skip) {
        Some((idx, _)) => &line[idx..],
        None => line,
    }
}

// Worker body: one process run, optional tag cleanup, then exactly one `Finished`.
fn supervise(request: RunRequest, tx: mpsc::Sender<DownloadEvent>, cancel: Arc<AtomicBool>) {
    let mut buffer = LogBuffer::new();
    let title = if request.item.title.trim().is_empty() {
        request.item.url.clone()
    } else {
        request.item.title.clone()
    };
    buffer.push(LogLine::info(format!("Starting download for {title}")));
    buffer.flush(&tx);
    tracing::info!(item = %request.item.id, argv = ?request.argv, "starting download");

    let outcome = run_process(&request, &tx, &cancel, &mut buffer);

    if outcome == RunOutcome::Succeeded {
        if let Some(dir) = request.cleanup_dir.as_ref() {
            let renamed = clean_audio_filenames(dir, &mut |line| buffer.push(line));
            if renamed > 0 {
                buffer.push(LogLine::info(format!("Cleaned up {renamed} filename(s)")));
            }
        }
    }

    tracing::info!(item = %request.item.id, %outcome, "download finished");
    buffer.flush(&tx);
    let _ = tx.send(DownloadEvent::Finished(outcome));
}

// Spawns the child and pumps its output until exit, honouring the cancel flag.
fn run_process(
    request: &RunRequest,
    tx: &mpsc::Sender<DownloadEvent>,
    cancel: &Arc<AtomicBool>,
    buffer: &mut LogBuffer,
) -> RunOutcome {
    let Some((program, args)) = request.argv.split_first() else {
        return RunOutcome::StartupFailed("empty command line".to_string());
    };
    if cancel.load(Ordering::SeqCst) {
        return RunOutcome::Cancelled;
    }

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if !request.search_dirs.is_empty() {
        let mut paths: Vec<std::ffi::OsString> =
            request.search_dirs.iter().map(|dir| dir.as_os_str().to_owned()).collect();
        if let Some(current) = std::env::var_os("PATH") {
            paths.push(current);
        }
        if let Ok(joined) = std::env::join_paths(paths) {
            command.env("PATH", joined);
        }
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            let reason = format!("failed to launch {program}: {err}");
            tracing::error!("{reason}");
            buffer.push(LogLine {
                text: reason.clone(),
                severity: Severity::Error,
            });
            return RunOutcome::StartupFailed(reason);
        }
    };

    let (line_tx, line_rx) = mpsc::channel();
    spawn_stream_thread(child.stdout.take(), &line_tx);
    spawn_stream_thread(child.stderr.take(), &line_tx);
    drop(line_tx);

    let parser = StatusParser::new();
    let mut throttle = StatusThrottle::new();
    let mut cancel_sent_at: Option<Instant> = None;
    let mut killed = false;

    let status = loop {
        match line_rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                handle_line(line, parser.as_ref(), &mut throttle, buffer, tx);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
        }

        if cancel.load(Ordering::SeqCst) {
            match cancel_sent_at {
                None => {
                    buffer.push(LogLine::info("Cancelling download..."));
                    buffer.flush(tx);
                    request_terminate(&child);
                    cancel_sent_at = Some(Instant::now());
                }
                Some(sent) if !killed && sent.elapsed() >= KILL_GRACE => {
                    tracing::warn!("process {} ignored terminate, killing", child.id());
                    let _ = child.kill();
                    killed = true;
                }
                _ => {}
            }
        }

        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(err) => {
                tracing::error!("waiting on download process failed: {err}");
                let _ = child.kill();
                break child.wait().ok();
            }
        }

        if buffer.should_flush() {
            buffer.flush(tx);
        }
    };

    // pick up whatever the readers still hold
    let deadline = Instant::now() + DRAIN_DEADLINE;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match line_rx.recv_timeout(left) {
            Ok(line) => {
                handle_line(line, parser.as_ref(), &mut throttle, buffer, tx);
            }
            Err(_) => break,
        }
    }

    if cancel.load(Ordering::SeqCst) {
        return RunOutcome::Cancelled;
    }
    match status {
        Some(status) if status.success() => RunOutcome::Succeeded,
        Some(status) => RunOutcome::Failed {
            code: status.code(),
        },
        None => RunOutcome::Failed { code: None },
    }
}

// One output line: maybe a status update, always a log entry.
fn handle_line(
    line: String,
    parser: Option<&StatusParser>,
    throttle: &mut StatusThrottle,
    buffer: &mut LogBuffer,
    tx: &mpsc::Sender<DownloadEvent>,
) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    if let Some(status) = parser.and_then(|parser| parser.parse(trimmed)) {
        if throttle.admit(&status, Instant::now()) {
            let _ = tx.send(DownloadEvent::Status(status));
        }
    }
    buffer.push(LogLine::classify(trimmed));
}

// Polite stop; the kill after `KILL_GRACE` is the fallback.
#[cfg(unix)]
fn request_terminate(child: &Child) {
    let _ = Command::new("kill")
        .arg("-TERM")
        .arg(child.id().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn request_terminate(child: &Child) {
    let _ = Command::new("taskkill")
        .arg("/PID")
        .arg(child.id().to_string())
        .arg("/T")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

// Splits a child stream on '\n' and '\r' so progress redraws arrive as lines.
fn stream_lines<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    let mut buffered = BufReader::new(reader);
    let mut buf = [0u8; 4096];
    let mut line = Vec::new();
    loop {
        let read = match buffered.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..read] {
            if byte == b'\n' || byte == b'\r' {
                if !line.is_empty() {
                    let text = String::from_utf8_lossy(&line).to_string();
                    if tx.send(text).is_err() {
                        return;
                    }
                    line.clear();
                }
            } else {
                line.push(byte);
            }
        }
    }
    if !line.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&line).to_string());
    }
}

// Streams are optional on `Child`; a missing one just means no reader.
fn spawn_stream_thread<R: Read + Send + 'static>(reader: Option<R>, tx: &mpsc::Sender<String>) {
    if let Some(reader) = reader {
        let tx = tx.clone();
        thread::spawn(move || stream_lines(reader, tx));
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DownloadEvent, DownloadRun, LogBuffer, LogLine, RunRequest, SHUTDOWN_TIMEOUT, StatusParser,
        StatusThrottle,
    };
    use crate::app_logger::Severity;
    use crate::queue::{QueueItem, RunOutcome};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    #[test]
    fn error_lines_are_flagged() {
        assert_eq!(LogLine::classify("ERROR: unable to download").severity, Severity::Error);
        assert_eq!(LogLine::classify("[download] Destination: a.mp3").severity, Severity::Plain);
    }

    #[test]
    fn status_reads_percent_and_eta() {
        let parser = StatusParser::new().expect("regex");
        assert_eq!(
            parser.parse("[download]  42.3% of 10.00MiB at 1.00MiB/s ETA 00:06").as_deref(),
            Some("42% ETA 00:06")
        );
        assert_eq!(
            parser.parse("[download] 100% of 10.00MiB in 00:10").as_deref(),
            Some("100%")
        );
        assert_eq!(parser.parse("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn eta_marker_is_case_insensitive() {
        let parser = StatusParser::new().expect("regex");
        assert_eq!(
            parser.parse("[download]  7.0% of 3.00MiB at 500KiB/s eta 01:15").as_deref(),
            Some("7% ETA 01:15")
        );
    }

    #[test]
    fn status_throttle_suppresses_repeats_and_bursts() {
        let mut throttle = StatusThrottle::new();
        let start = Instant::now();
        assert!(throttle.admit("10%", start));
        assert!(!throttle.admit("10%", start + Duration::from_secs(5)));
        assert!(!throttle.admit("11%", start + Duration::from_millis(500)));
        assert!(throttle.admit("12%", start + Duration::from_secs(3)));
    }

    #[test]
    fn log_buffer_drops_oldest_past_cap() {
        let mut buffer = LogBuffer::new();
        for idx in 0..1501 {
            buffer.push(LogLine::classify(format!("line {idx}")));
        }
        assert_eq!(buffer.lines.len(), 801);
        assert_eq!(buffer.lines.front().map(|l| l.text.as_str()), Some("line 700"));

        let (tx, rx) = mpsc::channel();
        assert!(buffer.should_flush());
        buffer.flush(&tx);
        match rx.try_recv() {
            Ok(DownloadEvent::Logs(lines)) => assert_eq!(lines.len(), 801),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn shell_request(script: &str) -> RunRequest {
        RunRequest {
            item: QueueItem::new("https://youtu.be/abc", "Test", "best"),
            argv: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
            search_dirs: Vec::new(),
            cleanup_dir: None,
        }
    }

    fn collect(rx: mpsc::Receiver<DownloadEvent>) -> (Vec<LogLine>, Vec<String>, RunOutcome) {
        let mut logs = Vec::new();
        let mut statuses = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(20)).expect("event") {
                DownloadEvent::Logs(lines) => logs.extend(lines),
                DownloadEvent::Status(status) => statuses.push(status),
                DownloadEvent::Finished(outcome) => {
                    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
                    return (logs, statuses, outcome);
                }
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn clean_exit_succeeds_and_streams_output() {
        let (_run, rx) = DownloadRun::start(shell_request(
            "echo '[download]  50.0% of 1MiB ETA 00:01'; echo 'ERROR: minor' 1>&2; exit 0",
        ));
        let (logs, statuses, outcome) = collect(rx);
        assert_eq!(outcome, RunOutcome::Succeeded);
        assert!(logs[0].text.starts_with("Starting download for Test"));
        assert!(logs.iter().any(|l| l.text == "ERROR: minor" && l.severity == Severity::Error));
        assert_eq!(statuses, vec!["50% ETA 00:01".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_failure_with_code() {
        let (_run, rx) = DownloadRun::start(shell_request("exit 1"));
        let (_, _, outcome) = collect(rx);
        assert_eq!(outcome, RunOutcome::Failed { code: Some(1) });
    }

    #[cfg(unix)]
    #[test]
    fn missing_binary_is_startup_failure() {
        let mut request = shell_request("");
        request.argv = vec!["/nonexistent/yt-dlp".to_string(), "https://youtu.be/abc".to_string()];
        let (_run, rx) = DownloadRun::start(request);
        let (_, _, outcome) = collect(rx);
        assert!(matches!(outcome, RunOutcome::StartupFailed(_)));
    }

    #[cfg(unix)]
    #[test]
    fn cancel_terminates_and_reports_cancelled() {
        let (run, rx) = DownloadRun::start(shell_request("sleep 30"));
        std::thread::sleep(Duration::from_millis(300));
        assert!(run.cancel());
        assert!(!run.cancel());
        let (_, _, outcome) = collect(rx);
        assert_eq!(outcome, RunOutcome::Cancelled);
    }

    #[cfg(unix)]
    #[test]
    fn clean_exit_after_cancel_is_still_cancelled() {
        let (run, rx) = DownloadRun::start(shell_request("trap 'exit 0' TERM; while true; do sleep 0.1; done"));
        std::thread::sleep(Duration::from_millis(300));
        run.cancel();
        let (_, _, outcome) = collect(rx);
        assert_eq!(outcome, RunOutcome::Cancelled);
    }

    #[cfg(unix)]
    #[test]
    fn cancel_and_wait_leaves_no_child_behind() {
        use std::process::{Command, Stdio};

        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
        let (mut run, _rx) = DownloadRun::start(shell_request(&script));

        let deadline = Instant::now() + Duration::from_secs(10);
        let pid = loop {
            let text = std::fs::read_to_string(&pid_file).unwrap_or_default();
            if text.ends_with('\n') {
                break text.trim().to_string();
            }
            assert!(Instant::now() < deadline, "child never wrote its pid");
            std::thread::sleep(Duration::from_millis(20));
        };

        assert!(run.cancel_and_wait(SHUTDOWN_TIMEOUT));
        let alive = Command::new("kill")
            .args(["-0", pid.as_str()])
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        assert!(!alive, "process {pid} survived");
    }
}
