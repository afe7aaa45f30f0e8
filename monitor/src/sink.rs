//! The consumer side of the watch service.
//!
//! A [`EventSink`] receives every [`FileEvent`] the active session produces.
//! Presentation (notices, rate limiting, formatting) is entirely the sink's
//! business; the manager only hands events over in order.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{EventDeliveryError, WatchTeardownError};
use crate::types::FileEvent;

/// Receives file events from a [`WatchManager`](crate::manager::WatchManager).
///
/// Called from the manager's forwarding task, one event at a time and in
/// order. Implementations must not block for long: while `on_event` runs, the
/// next events of the session wait in the manager's queue.
pub trait EventSink: Send + Sync + 'static {
    /// Accepts one event.
    ///
    /// # Errors
    ///
    /// Returning an error drops this event only; later events are still
    /// delivered.
    fn on_event(&self, event: FileEvent) -> Result<(), EventDeliveryError>;

    /// A session was armed on `root`.
    fn on_session_opened(&self, _root: &Path) {}

    /// The session on `root` was closed and all of its events were delivered.
    ///
    /// `teardown` carries the error if the OS watch could not be released.
    fn on_session_closed(&self, _root: &Path, _teardown: Option<&WatchTeardownError>) {}
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn on_event(&self, event: FileEvent) -> Result<(), EventDeliveryError> {
        (**self).on_event(event)
    }

    fn on_session_opened(&self, root: &Path) {
        (**self).on_session_opened(root);
    }

    fn on_session_closed(&self, root: &Path, teardown: Option<&WatchTeardownError>) {
        (**self).on_session_closed(root, teardown);
    }
}

impl EventSink for mpsc::UnboundedSender<FileEvent> {
    fn on_event(&self, event: FileEvent) -> Result<(), EventDeliveryError> {
        self.send(event).map_err(|_| EventDeliveryError::Closed)
    }
}

/// Bounded channels reject instead of waiting when full.
impl EventSink for mpsc::Sender<FileEvent> {
    fn on_event(&self, event: FileEvent) -> Result<(), EventDeliveryError> {
        self.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                EventDeliveryError::Rejected("channel full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => EventDeliveryError::Closed,
        })
    }
}
