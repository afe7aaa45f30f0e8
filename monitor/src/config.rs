//! Configuration module for folderwatch.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `FOLDERWATCH_PATH` | No | `~/Documents` | Directory to watch |
//! | `FOLDERWATCH_RECURSIVE` | No | `true` | Watch the whole tree under the root |
//! | `FOLDERWATCH_INITIAL_SCAN` | No | `false` | Report existing files as added on start |
//!
//! Booleans accept `1`/`0`, `true`/`false`, `yes`/`no` and `on`/`off`.
//!
//! # Example
//!
//! ```no_run
//! use folderwatch::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Watching: {}", config.watch_path);
//! ```

use std::env;

use directories::{BaseDirs, UserDirs};
use thiserror::Error;

use crate::session::SessionOptions;
use crate::types::WatchPath;

/// Default watch directory name relative to home, when the platform has no
/// documents directory.
const DEFAULT_WATCH_DIR: &str = "Documents";

const ENV_PATH: &str = "FOLDERWATCH_PATH";
const ENV_RECURSIVE: &str = "FOLDERWATCH_RECURSIVE";
const ENV_INITIAL_SCAN: &str = "FOLDERWATCH_INITIAL_SCAN";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Configuration for the watch service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root directory to watch.
    pub watch_path: WatchPath,

    /// Watch subdirectories as well.
    pub recursive: bool,

    /// Report files already present when a session opens.
    pub initial_scan: bool,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `FOLDERWATCH_PATH` is set but blank
    /// - A boolean variable holds something other than a recognized boolean
    /// - `FOLDERWATCH_PATH` is unset and the home directory cannot be determined
    pub fn from_env() -> Result<Self, ConfigError> {
        // Optional: FOLDERWATCH_PATH (default: ~/Documents)
        let watch_path = match env::var(ENV_PATH) {
            Ok(val) => WatchPath::new(val).map_err(|e| ConfigError::InvalidValue {
                key: ENV_PATH.to_string(),
                message: e.to_string(),
            })?,
            Err(_) => default_watch_path()?,
        };

        // Optional: FOLDERWATCH_RECURSIVE (default: true)
        let recursive = parse_bool_var(ENV_RECURSIVE, true)?;

        // Optional: FOLDERWATCH_INITIAL_SCAN (default: false)
        let initial_scan = parse_bool_var(ENV_INITIAL_SCAN, false)?;

        Ok(Self {
            watch_path,
            recursive,
            initial_scan,
        })
    }

    /// Session options derived from this configuration.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            recursive: self.recursive,
            initial_scan: self.initial_scan,
        }
    }
}

/// The user's documents directory, or `~/Documents` where the platform has none.
fn default_watch_path() -> Result<WatchPath, ConfigError> {
    let dir = match UserDirs::new().and_then(|dirs| dirs.document_dir().map(|d| d.to_path_buf())) {
        Some(dir) => dir,
        None => BaseDirs::new()
            .ok_or(ConfigError::NoHomeDirectory)?
            .home_dir()
            .join(DEFAULT_WATCH_DIR),
    };

    WatchPath::new(dir.to_string_lossy()).map_err(|_| ConfigError::NoHomeDirectory)
}

fn parse_bool_var(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(val) => parse_bool(&val).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{val}'"),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
