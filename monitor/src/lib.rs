//! Folderwatch - reconfigurable directory watch service.
//!
//! This crate watches a single directory for file additions, modifications and
//! removals and forwards normalized events to a consumer, while letting the
//! watched directory change at runtime without leaking OS watches or mixing
//! events from the old and new roots.
//!
//! # Overview
//!
//! A [`WatchSession`] owns one OS watch on one root. A [`WatchManager`] owns at
//! most one session, swaps it on reconfiguration and relays its events to an
//! [`EventSink`]. [`Core`] wires the manager to a host's lifecycle and settings.
//!
//! # Modules
//!
//! - [`types`]: Watch paths and file events
//! - [`session`]: A single armed watch and its event stream
//! - [`manager`]: Session ownership, reconfiguration, forwarding
//! - [`sink`]: The event consumer interface
//! - [`host`]: Load/unload hooks and settings following
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for watch operations

pub mod config;
pub mod error;
pub mod host;
pub mod manager;
pub mod session;
pub mod sink;
mod tree;
pub mod types;

pub use config::{Config, ConfigError};
pub use error::{
    EventDeliveryError, MonitorError, Result, WatchInitError, WatchTeardownError,
};
pub use host::Core;
pub use manager::{ManagerState, WatchManager};
pub use session::{SessionOptions, SessionState, WatchSession};
pub use sink::EventSink;
pub use types::{FileEvent, FileEventKind, WatchPath};
