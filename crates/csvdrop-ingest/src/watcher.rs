//! Filesystem watching with per-file debounce
//!
//! ```text
//! notify::RecommendedWatcher (OS thread)
//!   │  create/modify events, filtered to suffix + direct children
//!   ▼
//! unbounded channel ──> debounce task ──> bounded ready queue ──> workers
//!                        (quiescence window per path)
//! ```
//!
//! A path is dispatched once no event for it has arrived for the whole
//! window, and only if it is still a regular file at that moment.

use chrono::Utc;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{IngestError, Result};
use crate::scanner::matches_suffix;
use crate::types::{FileState, WatchedFile};

/// Watches one directory (non-recursively) for files matching a suffix
#[derive(Debug, Clone)]
pub struct DirectoryWatcher {
    dir: PathBuf,
    suffix: String,
    debounce: Duration,
}

impl DirectoryWatcher {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>, debounce: Duration) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
            debounce,
        }
    }

    /// Attach the OS watch and start the debounce task
    ///
    /// Stabilized paths are sent to `ready_tx`. Fails with
    /// [`IngestError::DirectoryAccess`] when the directory cannot be watched.
    pub fn start(&self, ready_tx: mpsc::Sender<PathBuf>) -> Result<WatchHandle> {
        let dir = std::fs::canonicalize(&self.dir)
            .map_err(|e| IngestError::directory_access(&self.dir, e))?;
        if !dir.is_dir() {
            return Err(IngestError::directory_access(&dir, "not a directory"));
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let filter_dir = dir.clone();
        let suffix = self.suffix.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                for path in event.paths {
                    if is_candidate(&filter_dir, &suffix, &path) {
                        // Receiver gone means the watcher is shutting down
                        let _ = raw_tx.send(path);
                    }
                }
            }
            Err(e) => warn!(error = %e, "Filesystem watch error"),
        })
        .map_err(|e| IngestError::directory_access(&dir, e))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| IngestError::directory_access(&dir, e))?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(debounce_loop(raw_rx, ready_tx, self.debounce, cancel.clone()));

        info!(
            dir = %dir.display(),
            suffix = %self.suffix,
            debounce_ms = self.debounce.as_millis() as u64,
            "Watching directory"
        );

        Ok(WatchHandle {
            watcher: Some(watcher),
            cancel,
            task,
        })
    }
}

/// Running watch; dropping it without [`stop`](Self::stop) leaves the
/// debounce task to end when the OS watcher goes away
pub struct WatchHandle {
    watcher: Option<RecommendedWatcher>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Release the OS watch and wait for the debounce task to finish
    ///
    /// Paths still inside their debounce window are not dispatched.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        self.watcher.take();
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Debounce task ended abnormally");
        }
        debug!("Directory watcher stopped");
    }
}

/// Direct child of `dir` whose name ends with `suffix`
pub fn is_candidate(dir: &Path, suffix: &str, path: &Path) -> bool {
    path.parent() == Some(dir) && matches_suffix(path, suffix)
}

struct PendingFile {
    file: WatchedFile,
    deadline: Instant,
}

/// Per-path quiescence tracking
///
/// Every event for a path pushes its deadline to `now + window`.
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, PendingFile>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn record(&mut self, path: PathBuf, now: Instant) {
        let deadline = now + self.window;
        self.pending
            .entry(path.clone())
            .and_modify(|p| {
                p.file.touch();
                p.deadline = deadline;
            })
            .or_insert_with(|| {
                let mut file = WatchedFile::discovered(path);
                file.state = FileState::Stabilizing;
                PendingFile { file, deadline }
            });
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every file whose window has elapsed, oldest first
    pub fn take_ready(&mut self, now: Instant) -> Vec<WatchedFile> {
        let mut ready: Vec<PendingFile> = Vec::new();
        self.pending.retain(|_, p| {
            if p.deadline <= now {
                ready.push(PendingFile {
                    file: p.file.clone(),
                    deadline: p.deadline,
                });
                false
            } else {
                true
            }
        });
        ready.sort_by_key(|p| p.file.discovered_at);
        ready.into_iter().map(|p| p.file).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Turn raw events into stabilized paths until cancelled
pub async fn debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<PathBuf>,
    ready_tx: mpsc::Sender<PathBuf>,
    window: Duration,
    cancel: CancellationToken,
) {
    let mut debouncer = Debouncer::new(window);
    let mut events_open = true;

    loop {
        if !events_open && debouncer.is_empty() {
            break;
        }
        let deadline = debouncer.next_deadline();
        let wake_at = deadline.unwrap_or_else(|| Instant::now() + window);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            event = raw_rx.recv(), if events_open => match event {
                Some(path) => {
                    trace!(path = %path.display(), "Raw event");
                    debouncer.record(path, Instant::now());
                }
                None => events_open = false,
            },

            _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                for file in debouncer.take_ready(Instant::now()) {
                    if !is_regular_file(&file.path) {
                        debug!(path = %file.path.display(), "Gone before dispatch, skipping");
                        continue;
                    }
                    let stabilized_ms = (file.last_event_at - file.discovered_at).num_milliseconds();
                    debug!(
                        path = %file.path.display(),
                        quiet_ms = file.quiet_for(Utc::now()).num_milliseconds(),
                        stabilized_ms,
                        "File stable, dispatching"
                    );
                    tokio::select! {
                        sent = ready_tx.send(file.path) => if sent.is_err() { return },
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }
    }

    if !debouncer.is_empty() {
        debug!(pending = debouncer.len(), "Dropping undispatched paths on stop");
    }
}

fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
