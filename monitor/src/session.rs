//! A single live watch on one directory.
//!
//! A [`WatchSession`] owns exactly one [`notify`] watcher armed on one root and
//! translates the raw notifications it produces into [`FileEvent`]s.
//!
//! # Architecture
//!
//! The notify callback runs on the backend's own thread. It is kept
//! lightweight: it maps the raw event to zero or more [`FileEvent`]s and pushes
//! them into an unbounded channel, so the OS intake is never blocked and no
//! event is dropped while the session is open. The receiving half of that
//! channel is handed out once through [`WatchSession::events`].
//!
//! The sending half sits behind a mutex shared with the callback, together
//! with the record of files and directories known under the root. Closing the
//! session takes the sender out under that mutex before the OS watch is
//! released, so once [`WatchSession::close`] returns the callback can no
//! longer emit anything, even if the backend thread is still winding down.
//!
//! Right after the watch is armed the root is scanned to fill that record.
//! Notifications arriving during the scan are held back and applied after
//! it, so with an initial scan every existing file is reported as added
//! before any live change to it, and never twice.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use folderwatch::session::{SessionOptions, WatchSession};
//! use folderwatch::types::WatchPath;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let path = WatchPath::new("/tmp/a")?;
//!     let mut session = WatchSession::open(path, SessionOptions::default())?;
//!
//!     let mut events = Box::pin(session.events());
//!     while let Some(event) = events.next().await {
//!         println!("{event}");
//!     }
//!
//!     session.close()?;
//!     Ok(())
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::stream::{self, Stream};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::error::{WatchInitError, WatchTeardownError};
use crate::tree::FileTree;
use crate::types::{FileEvent, FileEventKind, WatchPath};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// State shared with the notify callback.
#[derive(Debug)]
struct IntakeState {
    /// Sending half of the event channel. `None` once the session is closed.
    tx: Option<mpsc::UnboundedSender<FileEvent>>,

    tree: FileTree,

    /// Raw events received before the initial scan finished.
    backlog: Option<Vec<Event>>,
}

impl IntakeState {
    fn send(&self, events: Vec<FileEvent>) {
        let Some(tx) = self.tx.as_ref() else {
            trace!(count = events.len(), "Session closed, discarding events");
            return;
        };

        for event in events {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped");
                break;
            }
        }
    }
}

type Intake = Arc<Mutex<IntakeState>>;

/// Lifecycle state of a [`WatchSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, OS watch not yet armed.
    Initializing,
    /// OS watch armed, events flowing.
    Active,
    /// OS watch released. Terminal.
    Closed,
}

/// Options controlling how a session arms its watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Watch the whole tree under the root rather than only its direct entries.
    pub recursive: bool,

    /// Report every file already present under the root as [`FileEventKind::Added`]
    /// right after the watch is armed.
    pub initial_scan: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            initial_scan: false,
        }
    }
}

impl SessionOptions {
    fn recursive_mode(self) -> RecursiveMode {
        if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }
}

/// One armed watch on one directory.
///
/// Dropping a session closes it.
#[derive(Debug)]
pub struct WatchSession {
    id: u64,
    path: WatchPath,
    root: PathBuf,
    options: SessionOptions,
    state: SessionState,

    /// The underlying file system watcher. `None` once released.
    watcher: Option<RecommendedWatcher>,

    intake: Intake,

    /// Receiving half, until taken by [`WatchSession::events`].
    events: Option<mpsc::UnboundedReceiver<FileEvent>>,

    #[cfg(test)]
    fail_release: bool,
}

impl WatchSession {
    /// Resolves `path` and arms a watch on it.
    ///
    /// The root is canonicalized, so every emitted event carries an absolute
    /// path under the canonical root even when `path` is relative.
    ///
    /// # Errors
    ///
    /// Returns a [`WatchInitError`] if:
    /// - The path does not exist or is not a directory
    /// - The directory cannot be read
    /// - The notify backend cannot be created or armed (including OS watch limits)
    pub fn open(path: WatchPath, options: SessionOptions) -> Result<Self, WatchInitError> {
        let root = resolve_root(path.as_path())?;

        let (tx, rx) = mpsc::unbounded_channel();

        let mut session = Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            path,
            root: root.clone(),
            options,
            state: SessionState::Initializing,
            watcher: None,
            intake: Arc::new(Mutex::new(IntakeState {
                tx: Some(tx),
                tree: FileTree::new(root, options.recursive),
                backlog: Some(Vec::new()),
            })),
            events: Some(rx),
            #[cfg(test)]
            fail_release: false,
        };

        session.arm()?;

        Ok(session)
    }

    /// Creates the notify watcher, arms it, and scans the root.
    fn arm(&mut self) -> Result<(), WatchInitError> {
        let intake = Arc::clone(&self.intake);
        let root = self.root.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                handle_notify_event(res, &root, &intake);
            },
            Config::default(),
        )
        .map_err(|e| WatchInitError::from_notify(self.root.clone(), e))?;

        watcher
            .watch(&self.root, self.options.recursive_mode())
            .map_err(|e| WatchInitError::from_notify(self.root.clone(), e))?;

        self.watcher = Some(watcher);
        self.state = SessionState::Active;

        info!(
            session_id = self.id,
            root = %self.root.display(),
            recursive = self.options.recursive,
            "Watch session opened"
        );

        let mut state = lock_intake(&self.intake);
        let existing = state.tree.seed();

        if self.options.initial_scan {
            info!(
                session_id = self.id,
                file_count = existing.len(),
                "Reporting existing files"
            );
            state.send(
                existing
                    .into_iter()
                    .map(|path| FileEvent::new(FileEventKind::Added, path))
                    .collect(),
            );
        } else {
            debug!(
                session_id = self.id,
                file_count = existing.len(),
                "Recorded existing files"
            );
        }

        let backlog = state.backlog.take().unwrap_or_default();
        for event in &backlog {
            let events = state.tree.apply(event);
            state.send(events);
        }

        Ok(())
    }

    /// Takes the stream of events produced by this session.
    ///
    /// The stream is lazy and yields events in the order the OS reported them.
    /// It ends only after the session is closed and every event queued before
    /// the close has been yielded. It can be taken once; later calls return an
    /// empty stream.
    pub fn events(&mut self) -> impl Stream<Item = FileEvent> + Send + 'static {
        if self.events.is_none() {
            warn!(session_id = self.id, "Event stream already taken");
        }

        stream::unfold(self.events.take(), |rx| async move {
            let mut rx = rx?;
            let event = rx.recv().await?;
            Some((event, Some(rx)))
        })
    }

    /// Closes the session and releases the OS watch.
    ///
    /// Idempotent. After this returns no further event is pushed into the
    /// stream; events queued before the close remain readable.
    ///
    /// # Errors
    ///
    /// Returns a [`WatchTeardownError`] if the backend failed to release the
    /// watch. The session is closed regardless.
    pub fn close(&mut self) -> Result<(), WatchTeardownError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        // Detach the callback first; it holds this lock while sending.
        lock_intake(&self.intake).tx.take();
        self.state = SessionState::Closed;

        // Never armed (open failed half way)
        let Some(mut watcher) = self.watcher.take() else {
            return Ok(());
        };

        let released = watcher.unwatch(&self.root);

        #[cfg(test)]
        let released = if self.fail_release {
            Err(notify::Error::generic("release refused"))
        } else {
            released
        };

        let result = match released {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.kind, notify::ErrorKind::WatchNotFound) => {
                debug!(
                    session_id = self.id,
                    root = %self.root.display(),
                    "Watch already released by the OS"
                );
                Ok(())
            }
            Err(source) => Err(WatchTeardownError {
                path: self.root.clone(),
                source,
            }),
        };

        // Dropping the watcher shuts down the backend
        drop(watcher);

        info!(
            session_id = self.id,
            root = %self.root.display(),
            "Watch session closed"
        );

        result
    }

    /// Process-unique identifier, useful for correlating log lines.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The path as configured.
    #[must_use]
    pub fn path(&self) -> &WatchPath {
        &self.path
    }

    /// The canonical root being watched.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn options(&self) -> SessionOptions {
        self.options
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Makes the next [`close`](Self::close) report a backend failure.
    #[cfg(test)]
    pub(crate) fn fail_next_release(&mut self) {
        self.fail_release = true;
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(session_id = self.id, error = %e, "Leaked OS watch on drop");
        }
    }
}

fn lock_intake(intake: &Intake) -> MutexGuard<'_, IntakeState> {
    intake.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Canonicalizes the root and checks that it is a readable directory.
fn resolve_root(path: &Path) -> Result<PathBuf, WatchInitError> {
    let root =
        fs::canonicalize(path).map_err(|e| WatchInitError::from_io(path.to_path_buf(), e))?;

    let metadata = fs::metadata(&root).map_err(|e| WatchInitError::from_io(root.clone(), e))?;
    if !metadata.is_dir() {
        return Err(WatchInitError::NotADirectory(root));
    }

    // Surface permission problems now rather than as a silent, empty watch
    fs::read_dir(&root).map_err(|e| WatchInitError::from_io(root.clone(), e))?;

    Ok(root)
}

/// Handles events from the notify crate.
///
/// Runs on the backend thread; only translates and enqueues.
fn handle_notify_event(res: notify::Result<Event>, root: &Path, intake: &Intake) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(root = %root.display(), error = %e, "File watcher error");
            return;
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    let mut state = lock_intake(intake);
    if state.tx.is_none() {
        trace!("Session closed, discarding notify event");
        return;
    }

    if let Some(backlog) = state.backlog.as_mut() {
        backlog.push(event);
        return;
    }

    let events = state.tree.apply(&event);
    if !events.is_empty() {
        state.send(events);
    }
}
