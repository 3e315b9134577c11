use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, QueueFileError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One pending download. Only url/title/format_code reach the queue file;
/// the id is regenerated on load.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueItem {
    #[serde(skip, default = "ItemId::new")]
    pub id: ItemId,
    pub url: String,
    pub title: String,
    pub format_code: String,
}

impl QueueItem {
    pub fn new(url: impl Into<String>, title: impl Into<String>, format_code: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(),
            url: url.into(),
            title: title.into(),
            format_code: format_code.into(),
        }
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.title == other.title && self.format_code == other.format_code
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    Paused,
    Running,
    Drained,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Terminal result of one supervised download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed { code: Option<i32> },
    StartupFailed(String),
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Succeeded => write!(f, "completed"),
            RunOutcome::Failed { code: Some(code) } => write!(f, "failed with exit code {code}"),
            RunOutcome::Failed { code: None } => write!(f, "terminated without an exit code"),
            RunOutcome::StartupFailed(reason) => write!(f, "could not start: {reason}"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum StartOutcome {
    Launch(QueueItem),
    AlreadyRunning,
    /// A cancel is still being delivered; the head relaunches once it lands.
    Deferred,
    Empty,
}

#[derive(Debug, PartialEq)]
pub enum PauseOutcome {
    CancelCurrent(ItemId),
    NotRunning,
}

#[derive(Debug, PartialEq)]
pub enum FinishOutcome {
    Launch(QueueItem),
    Halted,
    Drained,
    Ignored,
}

/// Owns the ordered list and the notion of which entry is being downloaded.
/// Only the UI thread touches it; every transition returns what the caller
/// must do next instead of spawning anything itself.
#[derive(Debug)]
pub struct QueueDriver {
    items: Vec<QueueItem>,
    current: Option<ItemId>,
    state: QueueState,
}

impl Default for QueueDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueDriver {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            current: None,
            state: QueueState::Paused,
        }
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn current(&self) -> Option<ItemId> {
        self.current
    }

    pub fn is_current(&self, id: ItemId) -> bool {
        self.current == Some(id)
    }

    pub fn current_item(&self) -> Option<&QueueItem> {
        let id = self.current?;
        self.items.iter().find(|item| item.id == id)
    }

    pub fn add(&mut self, item: QueueItem) -> ItemId {
        let id = item.id;
        self.items.push(item);
        if self.state == QueueState::Drained {
            self.state = QueueState::Paused;
        }
        id
    }

    pub fn start(&mut self) -> StartOutcome {
        if self.current.is_some() {
            if self.state == QueueState::Running {
                return StartOutcome::AlreadyRunning;
            }
            self.state = QueueState::Running;
            return StartOutcome::Deferred;
        }
        let Some(head) = self.items.first().cloned() else {
            self.state = QueueState::Drained;
            return StartOutcome::Empty;
        };
        self.state = QueueState::Running;
        self.current = Some(head.id);
        StartOutcome::Launch(head)
    }

    pub fn pause(&mut self) -> PauseOutcome {
        if self.state == QueueState::Running {
            self.state = QueueState::Paused;
        }
        match self.current {
            Some(id) => PauseOutcome::CancelCurrent(id),
            None => PauseOutcome::NotRunning,
        }
    }

    pub fn remove(&mut self, index: usize) -> Result<QueueItem, QueueError> {
        let item = self.items.get(index).ok_or(QueueError::OutOfRange(index))?;
        if self.is_current(item.id) {
            return Err(QueueError::ItemActive);
        }
        Ok(self.items.remove(index))
    }

    /// Returns the new index of the moved item, or the same index at the edges.
    pub fn move_item(&mut self, index: usize, direction: Direction) -> Result<usize, QueueError> {
        let item = self.items.get(index).ok_or(QueueError::OutOfRange(index))?;
        if self.is_current(item.id) {
            return Err(QueueError::ItemActive);
        }
        let target = match direction {
            Direction::Up if index > 0 => index - 1,
            Direction::Down if index + 1 < self.items.len() => index + 1,
            _ => return Ok(index),
        };
        if self.is_current(self.items[target].id) {
            return Err(QueueError::ItemActive);
        }
        self.items.swap(index, target);
        Ok(target)
    }

    /// Applies the outcome of the run for `id`. Stale notifications for an
    /// item that is no longer current are ignored.
    pub fn finish(&mut self, id: ItemId, outcome: &RunOutcome) -> FinishOutcome {
        if self.current != Some(id) {
            return FinishOutcome::Ignored;
        }
        self.current = None;

        match outcome {
            RunOutcome::Succeeded => {
                self.items.retain(|item| item.id != id);
                if self.items.is_empty() {
                    self.state = QueueState::Drained;
                    return FinishOutcome::Drained;
                }
                self.launch_head_if_running()
            }
            RunOutcome::Failed { .. } | RunOutcome::StartupFailed(_) => {
                self.state = QueueState::Paused;
                FinishOutcome::Halted
            }
            RunOutcome::Cancelled => self.launch_head_if_running(),
        }
    }

    pub fn replace_all(&mut self, items: Vec<QueueItem>) -> Result<(), QueueError> {
        if self.current.is_some() {
            return Err(QueueError::ItemActive);
        }
        self.items = items;
        self.state = QueueState::Paused;
        Ok(())
    }

    fn launch_head_if_running(&mut self) -> FinishOutcome {
        if self.state != QueueState::Running {
            return FinishOutcome::Halted;
        }
        match self.items.first().cloned() {
            Some(head) => {
                self.current = Some(head.id);
                FinishOutcome::Launch(head)
            }
            None => {
                self.state = QueueState::Drained;
                FinishOutcome::Drained
            }
        }
    }
}

pub fn save_queue(path: &Path, items: &[QueueItem]) -> Result<(), QueueFileError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| QueueFileError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(items)?;
    fs::write(path, json).map_err(|source| QueueFileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_queue(path: &Path) -> Result<Vec<QueueItem>, QueueFileError> {
    let contents = fs::read_to_string(path).map_err(|source| QueueFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: serde_json::Value = serde_json::from_str(&contents)?;
    if !value.is_array() {
        return Err(QueueFileError::NotAnArray);
    }
    Ok(serde_json::from_value(value)?)
}

/// Persists whatever is still queued at exit. An empty queue removes the file
/// so the next launch starts clean.
pub fn save_session(path: &Path, items: &[QueueItem]) -> Result<(), QueueFileError> {
    if !items.is_empty() {
        return save_queue(path, items);
    }
    match fs::remove_file(path) {
        Err(source) if source.kind() != io::ErrorKind::NotFound => Err(QueueFileError::Io {
            path: path.to_path_buf(),
            source,
        }),
        _ => Ok(()),
    }
}

pub fn restore_session(path: &Path) -> Result<Vec<QueueItem>, QueueFileError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    load_queue(path)
}

#[cfg(test)]
mod tests {
    use super::{
        Direction, FinishOutcome, PauseOutcome, QueueDriver, QueueItem, QueueState, RunOutcome,
        StartOutcome, load_queue, restore_session, save_queue, save_session,
    };
    use crate::error::{QueueError, QueueFileError};

    fn driver_with(urls: &[&str]) -> QueueDriver {
        let mut driver = QueueDriver::new();
        for url in urls {
            driver.add(QueueItem::new(*url, format!("title of {url}"), "best"));
        }
        driver
    }

    fn launched(outcome: StartOutcome) -> QueueItem {
        match outcome {
            StartOutcome::Launch(item) => item,
            other => panic!("expected launch, got {other:?}"),
        }
    }

    #[test]
    fn start_launches_head_and_marks_it_current() {
        let mut driver = driver_with(&["a", "b"]);
        let head = launched(driver.start());
        assert_eq!(head.url, "a");
        assert!(driver.is_current(head.id));
        assert_eq!(driver.state(), QueueState::Running);
        assert_eq!(driver.start(), StartOutcome::AlreadyRunning);
    }

    #[test]
    fn start_on_empty_queue_drains() {
        let mut driver = QueueDriver::new();
        assert_eq!(driver.start(), StartOutcome::Empty);
        assert_eq!(driver.state(), QueueState::Drained);
        driver.add(QueueItem::new("a", "", "best"));
        assert_eq!(driver.state(), QueueState::Paused);
    }

    #[test]
    fn success_pops_head_and_launches_next() {
        let mut driver = driver_with(&["a", "b"]);
        let head = launched(driver.start());

        let next = match driver.finish(head.id, &RunOutcome::Succeeded) {
            FinishOutcome::Launch(item) => item,
            other => panic!("expected launch, got {other:?}"),
        };
        assert_eq!(next.url, "b");
        assert_eq!(driver.len(), 1);

        assert_eq!(driver.finish(next.id, &RunOutcome::Succeeded), FinishOutcome::Drained);
        assert!(driver.is_empty());
        assert_eq!(driver.current(), None);
        assert_eq!(driver.state(), QueueState::Drained);
    }

    #[test]
    fn failure_keeps_item_and_pauses() {
        let mut driver = driver_with(&["a", "b"]);
        let head = launched(driver.start());

        let outcome = driver.finish(head.id, &RunOutcome::Failed { code: Some(1) });
        assert_eq!(outcome, FinishOutcome::Halted);
        assert_eq!(driver.len(), 2);
        assert_eq!(driver.items()[0].url, "a");
        assert_eq!(driver.current(), None);
        assert_eq!(driver.state(), QueueState::Paused);

        let startup = launched(driver.start());
        let outcome = driver.finish(startup.id, &RunOutcome::StartupFailed("missing".into()));
        assert_eq!(outcome, FinishOutcome::Halted);
        assert_eq!(driver.len(), 2);
    }

    #[test]
    fn retry_after_failure_rebuilds_same_command() {
        use crate::download::ToolPaths;
        use crate::download::command::build_command;
        use crate::settings::DownloadOptions;
        use std::path::PathBuf;

        let options = DownloadOptions {
            download_dir: PathBuf::from("/downloads"),
            ..DownloadOptions::default()
        };
        let tools = ToolPaths {
            yt_dlp: PathBuf::from("/usr/bin/yt-dlp"),
            ffmpeg: PathBuf::from("/usr/bin/ffmpeg"),
            ffprobe: PathBuf::from("/usr/bin/ffprobe"),
        };
        let mut driver = driver_with(&["https://youtu.be/abc", "https://youtu.be/def"]);

        let first = launched(driver.start());
        let first_argv = build_command(&first, &options, &tools);
        driver.finish(first.id, &RunOutcome::Failed { code: Some(1) });

        let second = launched(driver.start());
        assert_eq!(second.id, first.id);
        assert_eq!(build_command(&second, &options, &tools), first_argv);
    }

    #[test]
    fn pause_cancels_current_and_keeps_item() {
        let mut driver = driver_with(&["a", "b"]);
        let head = launched(driver.start());

        assert_eq!(driver.pause(), PauseOutcome::CancelCurrent(head.id));
        assert_eq!(driver.state(), QueueState::Paused);
        // still current until the supervisor reports the cancellation
        assert!(driver.is_current(head.id));

        assert_eq!(driver.finish(head.id, &RunOutcome::Cancelled), FinishOutcome::Halted);
        assert_eq!(driver.len(), 2);
        assert_eq!(driver.current(), None);
        assert_eq!(driver.pause(), PauseOutcome::NotRunning);
    }

    #[test]
    fn resume_during_cancel_relaunches_head() {
        let mut driver = driver_with(&["a"]);
        let head = launched(driver.start());
        driver.pause();

        assert_eq!(driver.start(), StartOutcome::Deferred);
        let again = match driver.finish(head.id, &RunOutcome::Cancelled) {
            FinishOutcome::Launch(item) => item,
            other => panic!("expected relaunch, got {other:?}"),
        };
        assert_eq!(again.id, head.id);
    }

    #[test]
    fn stale_finish_is_ignored() {
        let mut driver = driver_with(&["a"]);
        let head = launched(driver.start());
        let stranger = QueueItem::new("x", "", "best");
        assert_eq!(driver.finish(stranger.id, &RunOutcome::Succeeded), FinishOutcome::Ignored);
        assert!(driver.is_current(head.id));
    }

    #[test]
    fn current_item_cannot_be_removed_or_moved() {
        let mut driver = driver_with(&["a", "b", "c"]);
        launched(driver.start());

        assert_eq!(driver.remove(0), Err(QueueError::ItemActive));
        assert_eq!(driver.move_item(0, Direction::Down), Err(QueueError::ItemActive));
        assert_eq!(driver.move_item(1, Direction::Up), Err(QueueError::ItemActive));

        assert_eq!(driver.move_item(1, Direction::Down), Ok(2));
        assert_eq!(driver.items()[2].url, "b");
        assert_eq!(driver.remove(2).map(|item| item.url), Ok("b".to_string()));
        assert_eq!(driver.remove(7), Err(QueueError::OutOfRange(7)));
    }

    #[test]
    fn edge_moves_are_no_ops() {
        let mut driver = driver_with(&["a", "b"]);
        assert_eq!(driver.move_item(0, Direction::Up), Ok(0));
        assert_eq!(driver.move_item(1, Direction::Down), Ok(1));
        assert_eq!(driver.items()[0].url, "a");
    }

    #[test]
    fn replace_all_refused_while_active() {
        let mut driver = driver_with(&["a"]);
        launched(driver.start());
        assert_eq!(driver.replace_all(Vec::new()), Err(QueueError::ItemActive));
    }

    #[test]
    fn queue_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("queue.json");
        let items = vec![
            QueueItem::new("https://youtu.be/abc", "First", "bestaudio"),
            QueueItem::new("https://www.youtube.com/playlist?list=PL1", "Mix [Playlist]", "playlist_mp3"),
        ];
        save_queue(&path, &items).expect("save");

        let raw = std::fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"format_code\": \"bestaudio\""));
        assert!(!raw.contains("\"id\""));

        let loaded = load_queue(&path).expect("load");
        assert_eq!(loaded, items);
        assert_ne!(loaded[0].id, items[0].id);
    }

    #[test]
    fn non_array_queue_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue.json");
        std::fs::write(&path, r#"{"url":"https://youtu.be/abc"}"#).expect("write");
        assert!(matches!(load_queue(&path), Err(QueueFileError::NotAnArray)));

        std::fs::write(&path, "not json").expect("write");
        assert!(matches!(load_queue(&path), Err(QueueFileError::Json(_))));
    }

    #[test]
    fn session_queue_survives_restart_and_clears_when_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue.json");
        assert!(restore_session(&path).expect("missing file").is_empty());

        let driver = driver_with(&["https://youtu.be/a", "https://youtu.be/b"]);
        save_session(&path, driver.items()).expect("save");
        let restored = restore_session(&path).expect("restore");
        assert_eq!(restored, driver.items());

        save_session(&path, &[]).expect("clear");
        assert!(!path.exists());
        save_session(&path, &[]).expect("clearing twice is fine");
    }
}
