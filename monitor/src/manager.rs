//! Ownership of the single live watch and the reconfiguration protocol.
//!
//! # Architecture
//!
//! A [`WatchManager`] holds at most one [`WatchSession`] together with the
//! tokio task that forwards the session's events to the [`EventSink`].
//! Configuration changes (`start`, `reconfigure`, `stop`) take a single-writer
//! async mutex, so two racing reconfigurations are serialized and can never
//! both arm a watch.
//!
//! Tearing a session down happens in a fixed order:
//!
//! 1. The session is closed: its notify callback is detached and the OS watch
//!    released.
//! 2. The forwarding task is awaited. It drains whatever the old session had
//!    already queued, hands it to the sink, and exits.
//! 3. The sink is told the session is closed.
//!
//! Only then is a new session armed. Once `reconfigure` returns, the sink has
//! seen the last event of the old root.
//!
//! # Example
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use folderwatch::manager::WatchManager;
//! use folderwatch::types::WatchPath;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!     let manager = WatchManager::new(tx);
//!
//!     manager.start(WatchPath::new("/tmp/a")?).await?;
//!     manager.reconfigure(WatchPath::new("/tmp/b")?).await?;
//!
//!     while let Some(event) = rx.recv().await {
//!         println!("{event}");
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::WatchInitError;
use crate::session::{SessionOptions, WatchSession};
use crate::sink::EventSink;
use crate::types::{FileEvent, WatchPath};

/// Observable state of a [`WatchManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerState {
    /// Nothing is being watched. Initial and terminal state.
    NoSession,
    /// A session is armed on `root` (canonical path).
    Active { root: PathBuf },
}

/// Counters shared with the forwarding tasks.
#[derive(Debug, Default)]
struct DeliveryStats {
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// The live session and the task relaying its events.
#[derive(Debug)]
struct ActiveSession {
    session: WatchSession,
    forwarder: JoinHandle<()>,
}

/// Owns the single active watch and relays its events to a sink.
#[derive(Debug)]
pub struct WatchManager<S: EventSink> {
    sink: Arc<S>,
    options: SessionOptions,
    current: Mutex<Option<ActiveSession>>,
    stats: Arc<DeliveryStats>,
}

impl<S: EventSink> WatchManager<S> {
    /// Creates a manager with default session options (recursive, no initial scan).
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self::with_options(sink, SessionOptions::default())
    }

    /// Creates a manager whose sessions are armed with `options`.
    #[must_use]
    pub fn with_options(sink: S, options: SessionOptions) -> Self {
        Self {
            sink: Arc::new(sink),
            options,
            current: Mutex::new(None),
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    /// Starts watching `path`.
    ///
    /// If a session is already active this behaves exactly like
    /// [`reconfigure`](Self::reconfigure).
    ///
    /// # Errors
    ///
    /// Returns the [`WatchInitError`] of the failed open. The manager is then
    /// left without a session.
    pub async fn start(&self, path: WatchPath) -> Result<(), WatchInitError> {
        let mut current = self.current.lock().await;

        if current.is_some() {
            debug!(path = %path, "Start requested while active, reconfiguring");
        }

        self.swap(&mut current, path).await
    }

    /// Replaces the current watch with one on `path`.
    ///
    /// The old session is closed and its pending events delivered before the
    /// new watch is armed.
    ///
    /// # Errors
    ///
    /// Returns the [`WatchInitError`] of the failed open. The old session is
    /// already gone at that point, so the manager ends without a session.
    pub async fn reconfigure(&self, path: WatchPath) -> Result<(), WatchInitError> {
        let mut current = self.current.lock().await;
        self.swap(&mut current, path).await
    }

    /// Stops watching. Idempotent.
    pub async fn stop(&self) {
        let mut current = self.current.lock().await;

        match current.take() {
            Some(active) => self.teardown(active).await,
            None => debug!("Stop requested with no active session"),
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> ManagerState {
        match self.current.lock().await.as_ref() {
            Some(active) => ManagerState::Active {
                root: active.session.root().to_path_buf(),
            },
            None => ManagerState::NoSession,
        }
    }

    /// Returns the canonical root being watched, if any.
    pub async fn current_root(&self) -> Option<PathBuf> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|active| active.session.root().to_path_buf())
    }

    /// Returns true if a session is active.
    pub async fn is_active(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Number of events the sink accepted since the manager was created.
    #[must_use]
    pub fn forwarded_events(&self) -> u64 {
        self.stats.forwarded.load(Ordering::Relaxed)
    }

    /// Number of events the sink rejected since the manager was created.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[must_use]
    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Tears down whatever is in `current`, then arms a session on `path`.
    async fn swap(
        &self,
        current: &mut Option<ActiveSession>,
        path: WatchPath,
    ) -> Result<(), WatchInitError> {
        if let Some(active) = current.take() {
            self.teardown(active).await;
        }

        match self.open(path.clone()) {
            Ok(active) => {
                info!(
                    path = %path,
                    root = %active.session.root().display(),
                    "Watching"
                );
                *current = Some(active);
                Ok(())
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to start watch, no active session");
                Err(e)
            }
        }
    }

    fn open(&self, path: WatchPath) -> Result<ActiveSession, WatchInitError> {
        let mut session = WatchSession::open(path, self.options)?;

        self.sink.on_session_opened(session.root());

        let forwarder = tokio::spawn(forward_events(
            session.events(),
            Arc::clone(&self.sink),
            Arc::clone(&self.stats),
            session.id(),
        ));

        Ok(ActiveSession { session, forwarder })
    }

    async fn teardown(&self, active: ActiveSession) {
        let ActiveSession {
            mut session,
            forwarder,
        } = active;

        let teardown = session.close().err();
        if let Some(e) = &teardown {
            warn!(
                session_id = session.id(),
                error = %e,
                "OS watch could not be released, continuing without it"
            );
        }

        // The intake is detached, so the forwarder ends once it has drained
        if let Err(e) = forwarder.await {
            error!(session_id = session.id(), error = %e, "Forwarding task failed");
        }

        self.sink.on_session_closed(session.root(), teardown.as_ref());
    }
}

/// Relays one session's events to the sink, in order, until the stream ends.
async fn forward_events<S: EventSink>(
    events: impl Stream<Item = FileEvent>,
    sink: Arc<S>,
    stats: Arc<DeliveryStats>,
    session_id: u64,
) {
    let mut events = pin!(events);

    while let Some(event) = events.next().await {
        debug!(
            session_id,
            kind = ?event.kind,
            path = %event.path.display(),
            "Forwarding event"
        );

        let path = event.path.clone();
        match sink.on_event(event) {
            Ok(()) => {
                stats.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_id,
                    path = %path.display(),
                    error = %e,
                    "Sink rejected event, dropping it"
                );
            }
        }
    }

    debug!(session_id, "Event forwarder drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EventDeliveryError, WatchTeardownError};
    use crate::types::FileEventKind;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Sink that records everything it is told.
    #[derive(Debug, Default)]
    struct RecordingSink {
        events: StdMutex<Vec<FileEvent>>,
        opened: StdMutex<Vec<PathBuf>>,
        closed: StdMutex<Vec<PathBuf>>,
        failed_releases: StdMutex<Vec<PathBuf>>,
        reject_all: bool,
    }

    impl RecordingSink {
        fn rejecting() -> Self {
            Self {
                reject_all: true,
                ..Self::default()
            }
        }

        fn events(&self) -> Vec<FileEvent> {
            self.events.lock().unwrap().clone()
        }

        fn opened(&self) -> Vec<PathBuf> {
            self.opened.lock().unwrap().clone()
        }

        fn closed(&self) -> Vec<PathBuf> {
            self.closed.lock().unwrap().clone()
        }

        fn failed_releases(&self) -> Vec<PathBuf> {
            self.failed_releases.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn on_event(&self, event: FileEvent) -> Result<(), EventDeliveryError> {
            if self.reject_all {
                return Err(EventDeliveryError::Rejected("test".to_string()));
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        }

        fn on_session_opened(&self, root: &Path) {
            self.opened.lock().unwrap().push(root.to_path_buf());
        }

        fn on_session_closed(&self, root: &Path, teardown: Option<&WatchTeardownError>) {
            self.closed.lock().unwrap().push(root.to_path_buf());
            if let Some(e) = teardown {
                self.failed_releases.lock().unwrap().push(e.path.clone());
            }
        }
    }

    fn create_test_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp dir")
    }

    fn watch_path(dir: &Path) -> WatchPath {
        WatchPath::new(dir.to_string_lossy()).unwrap()
    }

    async fn fail_next_release<S: EventSink>(manager: &WatchManager<S>) {
        manager
            .current
            .lock()
            .await
            .as_mut()
            .expect("Manager should be active")
            .session
            .fail_next_release();
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "Timed out waiting for condition"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn new_manager_has_no_session() {
        let manager = WatchManager::new(RecordingSink::default());

        assert_eq!(manager.state().await, ManagerState::NoSession);
        assert!(manager.current_root().await.is_none());
        assert!(!manager.is_active().await);
    }

    #[tokio::test]
    async fn start_then_stop() {
        let temp_dir = create_test_dir();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let manager = WatchManager::new(RecordingSink::default());

        manager.start(watch_path(temp_dir.path())).await.unwrap();
        assert_eq!(
            manager.state().await,
            ManagerState::Active { root: root.clone() }
        );
        assert_eq!(manager.sink().opened(), vec![root.clone()]);

        manager.stop().await;
        assert_eq!(manager.state().await, ManagerState::NoSession);
        assert_eq!(manager.sink().closed(), vec![root]);
        assert!(manager.sink().failed_releases().is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let temp_dir = create_test_dir();
        let manager = WatchManager::new(RecordingSink::default());
        manager.start(watch_path(temp_dir.path())).await.unwrap();

        manager.stop().await;
        assert_eq!(manager.state().await, ManagerState::NoSession);
        manager.stop().await;
        assert_eq!(manager.state().await, ManagerState::NoSession);

        assert_eq!(manager.sink().closed().len(), 1);
    }

    #[tokio::test]
    async fn release_failure_is_reported_and_stop_completes() {
        let temp_dir = create_test_dir();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let manager = WatchManager::new(RecordingSink::default());
        manager.start(watch_path(temp_dir.path())).await.unwrap();

        fail_next_release(&manager).await;
        manager.stop().await;

        assert_eq!(manager.state().await, ManagerState::NoSession);
        assert_eq!(manager.sink().closed(), vec![root.clone()]);
        assert_eq!(manager.sink().failed_releases(), vec![root]);
    }

    #[tokio::test]
    async fn release_failure_does_not_block_reconfigure() {
        let dir_a = create_test_dir();
        let dir_b = create_test_dir();
        let root_a = fs::canonicalize(dir_a.path()).unwrap();
        let root_b = fs::canonicalize(dir_b.path()).unwrap();
        let manager = WatchManager::new(RecordingSink::default());
        manager.start(watch_path(dir_a.path())).await.unwrap();

        fail_next_release(&manager).await;
        manager.reconfigure(watch_path(dir_b.path())).await.unwrap();

        assert_eq!(
            manager.state().await,
            ManagerState::Active { root: root_b }
        );
        assert_eq!(manager.sink().failed_releases(), vec![root_a]);
    }

    #[tokio::test]
    async fn start_missing_path_leaves_no_session() {
        let manager = WatchManager::new(RecordingSink::default());

        let result = manager
            .start(WatchPath::new("/nonexistent/folderwatch").unwrap())
            .await;

        assert!(matches!(result, Err(WatchInitError::NotFound(_))));
        assert_eq!(manager.state().await, ManagerState::NoSession);
        assert!(manager.sink().opened().is_empty());
    }

    #[tokio::test]
    async fn failed_reconfigure_does_not_keep_old_session() {
        let temp_dir = create_test_dir();
        let manager = WatchManager::new(RecordingSink::default());
        manager.start(watch_path(temp_dir.path())).await.unwrap();

        let result = manager
            .reconfigure(WatchPath::new("/nonexistent/folderwatch").unwrap())
            .await;

        assert!(result.is_err());
        assert_eq!(manager.state().await, ManagerState::NoSession);
        assert_eq!(manager.sink().closed().len(), 1);
    }

    #[tokio::test]
    async fn start_while_active_reconfigures() {
        let dir_a = create_test_dir();
        let dir_b = create_test_dir();
        let root_b = fs::canonicalize(dir_b.path()).unwrap();
        let manager = WatchManager::new(RecordingSink::default());

        manager.start(watch_path(dir_a.path())).await.unwrap();
        manager.start(watch_path(dir_b.path())).await.unwrap();

        assert_eq!(manager.current_root().await, Some(root_b));
        assert_eq!(manager.sink().opened().len(), 2);
        assert_eq!(manager.sink().closed().len(), 1);
    }

    #[tokio::test]
    async fn events_reach_sink_in_order() {
        let temp_dir = create_test_dir();
        let manager = WatchManager::new(RecordingSink::default());
        manager.start(watch_path(temp_dir.path())).await.unwrap();

        let root = manager.current_root().await.unwrap();
        let file = root.join("x.txt");
        fs::write(&file, b"").unwrap();
        wait_until(|| !manager.sink().events().is_empty()).await;

        fs::remove_file(&file).unwrap();
        wait_until(|| {
            manager
                .sink()
                .events()
                .iter()
                .any(|e| e.kind == FileEventKind::Removed)
        })
        .await;

        // Stopping drains the forwarder, so the counters are settled
        manager.stop().await;

        let events = manager.sink().events();
        assert_eq!(events.first().map(|e| e.kind), Some(FileEventKind::Added));
        assert_eq!(events.last().map(|e| e.kind), Some(FileEventKind::Removed));
        assert!(events.iter().all(|e| e.path == file));
        assert_eq!(manager.forwarded_events(), events.len() as u64);
        assert_eq!(manager.dropped_events(), 0);
    }

    #[tokio::test]
    async fn rejected_events_are_counted_and_forwarding_continues() {
        let temp_dir = create_test_dir();
        let manager = WatchManager::new(RecordingSink::rejecting());
        manager.start(watch_path(temp_dir.path())).await.unwrap();

        let root = manager.current_root().await.unwrap();
        fs::write(root.join("one.txt"), b"").unwrap();
        wait_until(|| manager.dropped_events() >= 1).await;

        fs::write(root.join("two.txt"), b"").unwrap();
        wait_until(|| manager.dropped_events() >= 2).await;

        assert!(manager.is_active().await);
        assert_eq!(manager.forwarded_events(), 0);
    }

    #[tokio::test]
    async fn manager_uses_configured_options() {
        let options = SessionOptions {
            recursive: false,
            initial_scan: true,
        };
        let manager = WatchManager::with_options(RecordingSink::default(), options);

        assert_eq!(manager.options(), options);
    }
}
