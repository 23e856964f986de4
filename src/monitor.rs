//! File monitor that organizes files as they appear in watched directories.
//!
//! A [`FileMonitor`] owns one `notify` watcher and one worker thread. The watcher
//! callback converts raw notify events into [`FileEvent`]s and pushes them onto a
//! bounded queue; the worker pops them and runs each through an [`EventHandler`]
//! one at a time. When the queue is full the watcher callback blocks, leaving the
//! OS event queue to absorb the burst.
//!
//! Watching is non-recursive: files moved into category containers are not seen
//! again.
//!
//! A batch [`Organizer::organize`] pass on a watched directory races with the
//! monitor on file existence. Callers must not run both on the same directory at
//! once.

use crate::config::MonitorSettings;
use crate::debounce::DebounceLedger;
use crate::file_organizer::{FileOutcome, OrganizeError, Organizer};
use crate::notification::{Notifier, deliver};
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often the worker checks for shutdown while the queue is empty.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {}: {reason}", .path.display())]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Monitor is not watching")]
    NotWatching,
}

impl From<notify::Error> for MonitorError {
    fn from(e: notify::Error) -> Self {
        MonitorError::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// Caller hook invoked with the original path of every organized file.
pub type EventCallback = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    /// The path is the destination of a rename.
    Renamed,
}

/// A filesystem change relevant to organizing.
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
    pub timestamp: Instant,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: Instant::now(),
        }
    }

    /// Converts one notify event into file events.
    ///
    /// Rename sources and folder creations produce nothing.
    pub fn from_notify(event: &Event) -> Vec<FileEvent> {
        let timestamp = Instant::now();
        let (kind, paths): (FileEventKind, &[PathBuf]) = match event.kind {
            EventKind::Create(CreateKind::Folder) => return Vec::new(),
            EventKind::Create(_) => (FileEventKind::Created, &event.paths),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => return Vec::new(),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                (FileEventKind::Renamed, event.paths.get(1..).unwrap_or_default())
            }
            EventKind::Modify(ModifyKind::Name(_)) => (FileEventKind::Renamed, &event.paths),
            EventKind::Modify(_) => (FileEventKind::Modified, &event.paths),
            _ => return Vec::new(),
        };

        paths
            .iter()
            .map(|path| FileEvent {
                path: path.clone(),
                kind,
                timestamp,
            })
            .collect()
    }
}

/// Organizes one file of a directory. Implemented by [`Organizer`].
pub trait FileProcessor: Send + Sync {
    fn process(&self, directory: &Path, file: &Path) -> Result<FileOutcome, OrganizeError>;
}

impl FileProcessor for Organizer {
    fn process(&self, directory: &Path, file: &Path) -> Result<FileOutcome, OrganizeError> {
        self.process_single(directory, file)
    }
}

/// What the handler did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Directory, hidden or temporary file.
    Ignored,
    /// Same file name handled within the quiet interval.
    Debounced,
    /// Processed; see the organizer outcome.
    Processed(FileOutcome),
    /// The organizer failed on this file.
    Failed(String),
}

/// Filters, debounces and processes file events.
pub struct EventHandler {
    processor: Arc<dyn FileProcessor>,
    notifier: Arc<dyn Notifier>,
    ledger: Mutex<DebounceLedger>,
    callback: Option<EventCallback>,
}

impl EventHandler {
    pub fn new(
        processor: Arc<dyn FileProcessor>,
        notifier: Arc<dyn Notifier>,
        ledger: DebounceLedger,
    ) -> Self {
        Self {
            processor,
            notifier,
            ledger: Mutex::new(ledger),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: Option<EventCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn handle(&self, event: &FileEvent) -> HandleOutcome {
        let path = &event.path;
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            return HandleOutcome::Ignored;
        };
        if is_temporary(&name) || path.is_dir() {
            return HandleOutcome::Ignored;
        }
        let Some(directory) = path.parent() else {
            return HandleOutcome::Ignored;
        };

        if !self.ledger.lock().should_handle(&name, event.timestamp) {
            tracing::debug!("[monitor] debounced {:?} {name}", event.kind);
            return HandleOutcome::Debounced;
        }

        match self.processor.process(directory, path) {
            Ok(outcome) => {
                if let FileOutcome::Moved { category, .. } = &outcome {
                    tracing::info!("[monitor] organized {name} into {category}");
                    deliver(
                        self.notifier.as_ref(),
                        "File Organized",
                        &format!("File {name} was organized into {category}"),
                    );
                    if let Some(callback) = &self.callback {
                        callback(path);
                    }
                } else {
                    tracing::debug!("[monitor] {name} left in place: {outcome:?}");
                }
                HandleOutcome::Processed(outcome)
            }
            Err(e) => {
                tracing::error!("[monitor] failed to process {name}: {e}");
                deliver(
                    self.notifier.as_ref(),
                    "Organization Error",
                    &format!("Failed to process {name}: {e}"),
                );
                HandleOutcome::Failed(e.to_string())
            }
        }
    }
}

fn is_temporary(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('~')
}

struct ActiveWatch {
    watcher: RecommendedWatcher,
    watched: HashSet<PathBuf>,
    running: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

/// Watches directories and organizes new files as they arrive.
pub struct FileMonitor {
    processor: Arc<dyn FileProcessor>,
    notifier: Arc<dyn Notifier>,
    settings: MonitorSettings,
    active: Option<ActiveWatch>,
}

impl FileMonitor {
    pub fn new(
        processor: Arc<dyn FileProcessor>,
        notifier: Arc<dyn Notifier>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            processor,
            notifier,
            settings,
            active: None,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.active.is_some()
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.active
            .as_ref()
            .map(|active| active.watched.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Starts watching `paths`, restarting if already watching.
    ///
    /// Paths that do not exist or cannot be watched are skipped with a warning.
    pub fn start(
        &mut self,
        paths: &[PathBuf],
        callback: Option<EventCallback>,
    ) -> Result<(), MonitorError> {
        if self.is_watching() {
            self.stop();
        }

        let (tx, rx) = bounded::<FileEvent>(self.settings.queue_capacity.max(1));
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for file_event in FileEvent::from_notify(&event) {
                    if tx.send(file_event).is_err() {
                        break;
                    }
                }
            }
            Err(e) => tracing::error!("[monitor] file watch error: {e}"),
        })?;

        let ledger = DebounceLedger::new(
            self.settings.ledger_capacity,
            self.settings.quiet_interval(),
        );
        let handler = EventHandler::new(self.processor.clone(), self.notifier.clone(), ledger)
            .with_callback(callback);
        let running = Arc::new(AtomicBool::new(true));
        let worker = {
            let running = running.clone();
            thread::Builder::new()
                .name("tidydesk-monitor".to_string())
                .spawn(move || run_worker(rx, handler, running))
                .map_err(|e| MonitorError::InitFailed {
                    reason: e.to_string(),
                })?
        };

        let mut active = ActiveWatch {
            watcher,
            watched: HashSet::new(),
            running,
            worker,
        };
        for path in paths {
            if let Err(e) = watch_directory(&mut active, path) {
                tracing::warn!("[monitor] {e}");
            }
        }

        tracing::info!("[monitor] started, watching {} directories", active.watched.len());
        self.active = Some(active);
        Ok(())
    }

    /// Stops watching. Does nothing when idle.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let ActiveWatch {
            watcher,
            running,
            worker,
            ..
        } = active;

        running.store(false, Ordering::SeqCst);
        drop(watcher);
        if worker.join().is_err() {
            tracing::error!("[monitor] worker thread panicked");
        }
        tracing::info!("[monitor] stopped");
    }

    /// Adds a directory to the watched set.
    ///
    /// A path that does not exist is skipped with a warning.
    pub fn add_path(&mut self, path: &Path) -> Result<(), MonitorError> {
        let active = self.active.as_mut().ok_or(MonitorError::NotWatching)?;
        if !path.exists() {
            tracing::warn!("[monitor] not watching missing path {}", path.display());
            return Ok(());
        }
        watch_directory(active, path)
    }

    /// Removes a directory from the watched set. Returns false if it was not watched.
    pub fn remove_path(&mut self, path: &Path) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if !active.watched.remove(path) {
            return false;
        }
        if let Err(e) = active.watcher.unwatch(path) {
            tracing::warn!("[monitor] failed to unwatch {}: {e}", path.display());
        }
        tracing::info!("[monitor] no longer watching {}", path.display());
        true
    }
}

impl Drop for FileMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_directory(active: &mut ActiveWatch, path: &Path) -> Result<(), MonitorError> {
    if !path.is_dir() {
        return Err(MonitorError::PathWatchFailed {
            path: path.to_path_buf(),
            reason: "not an existing directory".to_string(),
        });
    }
    if active.watched.contains(path) {
        return Ok(());
    }

    active
        .watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|e| MonitorError::PathWatchFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    active.watched.insert(path.to_path_buf());
    tracing::debug!("[monitor] watching {}", path.display());
    Ok(())
}

fn run_worker(rx: Receiver<FileEvent>, handler: EventHandler, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                handler.handle(&event);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
