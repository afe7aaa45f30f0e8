//! Error types for the folderwatch core.
//!
//! Each failure domain of the watch service has its own error type so callers
//! can react precisely: arming a watch ([`WatchInitError`]), releasing one
//! ([`WatchTeardownError`]), and handing an event to the sink
//! ([`EventDeliveryError`]). [`MonitorError`] wraps them all for callers that
//! only need to propagate.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while arming a watch on a directory.
///
/// The manager never retries on these; it stays without a session and the
/// caller decides what to do next.
#[derive(Error, Debug)]
pub enum WatchInitError {
    /// The configured path is empty or blank.
    #[error("watch path is empty")]
    EmptyPath,

    /// The watch directory does not exist.
    #[error("watch directory does not exist: {0}")]
    NotFound(PathBuf),

    /// The path exists but is not a directory.
    #[error("watch path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The directory cannot be read by this process.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The OS refused another watch (e.g. inotify `max_user_watches`).
    #[error("OS watch limit reached while watching {0}")]
    WatchLimit(PathBuf),

    /// Resolving the path failed for another reason.
    #[error("failed to resolve {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The notify backend could not be created or armed.
    #[error("failed to create watcher for {path}: {source}")]
    Backend {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

impl WatchInitError {
    /// Classifies an I/O error raised while resolving `path`.
    pub(crate) fn from_io(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::Io { path, source },
        }
    }

    /// Classifies an error raised by the notify backend while arming `path`.
    pub(crate) fn from_notify(path: PathBuf, source: notify::Error) -> Self {
        match &source.kind {
            notify::ErrorKind::PathNotFound => Self::NotFound(path),
            notify::ErrorKind::MaxFilesWatch => Self::WatchLimit(path),
            notify::ErrorKind::Io(e) if e.kind() == io::ErrorKind::NotFound => {
                Self::NotFound(path)
            }
            notify::ErrorKind::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                Self::PermissionDenied(path)
            }
            _ => Self::Backend { path, source },
        }
    }
}

/// Failure to release an OS watch handle.
///
/// Non-fatal: the session is considered closed regardless and the leaked
/// handle is reported rather than hidden.
#[derive(Error, Debug)]
#[error("failed to release watch on {path}: {source}")]
pub struct WatchTeardownError {
    /// Root of the session whose watch could not be released.
    pub path: PathBuf,
    #[source]
    pub source: notify::Error,
}

/// The sink refused an event.
///
/// Only the affected event is dropped; forwarding continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventDeliveryError {
    /// The sink is no longer accepting events (e.g. its receiver was dropped).
    #[error("event sink closed")]
    Closed,

    /// The sink rejected the event for its own reasons.
    #[error("event sink rejected event: {0}")]
    Rejected(String),
}

/// Errors that can occur during monitor operations.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A watch could not be armed.
    #[error("watch init error: {0}")]
    Init(#[from] WatchInitError),

    /// A watch could not be released.
    #[error("watch teardown error: {0}")]
    Teardown(#[from] WatchTeardownError),

    /// An event could not be handed to the sink.
    #[error("event delivery error: {0}")]
    Delivery(#[from] EventDeliveryError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A specialized `Result` type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
