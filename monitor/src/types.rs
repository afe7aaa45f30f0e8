//! Core value types shared by the session, the manager and the host glue.
//!
//! [`FileEvent`] serializes with camelCase field names and a snake_case
//! `kind`, and [`WatchPath`] as a plain string, so the binary can emit events
//! as line-delimited JSON records.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WatchInitError;

/// The three canonical kinds of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    Added,
    Changed,
    Removed,
}

impl FileEventKind {
    /// Past-tense verb used in user-facing notices.
    #[must_use]
    pub fn verb(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Changed => "changed",
            Self::Removed => "removed",
        }
    }
}

/// A normalized notification about a single file.
///
/// Paths are absolute and live under the canonical root of the session that
/// produced the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    /// What happened to the file.
    pub kind: FileEventKind,

    /// The file the event refers to.
    pub path: PathBuf,

    /// When the change was detected.
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }

    /// Returns true if the event refers to a path under `root`.
    #[must_use]
    pub fn is_under(&self, root: &Path) -> bool {
        self.path.starts_with(root)
    }
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File {}: {}", self.kind.verb(), self.path.display())
    }
}

/// A directory to observe, as supplied by the host settings.
///
/// The only invariant is that the string is not blank. Whether the directory
/// exists is checked when a session is opened, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WatchPath(String);

impl WatchPath {
    /// Validates and wraps a watch root.
    ///
    /// # Errors
    ///
    /// Returns [`WatchInitError::EmptyPath`] if `raw` is empty or only whitespace.
    pub fn new(raw: impl Into<String>) -> Result<Self, WatchInitError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(WatchInitError::EmptyPath);
        }
        Ok(Self(raw))
    }

    /// The path as configured, before any resolution.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl AsRef<Path> for WatchPath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl fmt::Display for WatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WatchPath {
    type Err = WatchInitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for WatchPath {
    type Error = WatchInitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WatchPath> for String {
    fn from(path: WatchPath) -> Self {
        path.0
    }
}
