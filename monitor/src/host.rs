//! Lifecycle glue for the host application.
//!
//! The host drives the core through three entry points:
//!
//! - [`Core::load`] when it starts: builds the manager and starts watching the
//!   configured path.
//! - [`Core::follow_settings`] to hand over the watch-path setting. Every new
//!   value triggers a reconfiguration.
//! - [`Core::unload`] when it shuts down: stops listening for settings, closes
//!   the watch and returns only once everything is released.
//!
//! A failing path never fails the host. The core logs the error, stays without
//! a session, and picks up again on the next settings change.

use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::WatchInitError;
use crate::manager::WatchManager;
use crate::sink::EventSink;
use crate::types::WatchPath;

/// Background task applying settings changes.
#[derive(Debug)]
struct SettingsListener {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SettingsListener {
    async fn shutdown(self) {
        // The task may already have ended because the settings channel closed
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Settings listener failed");
        }
    }
}

/// The watch service as seen by the host.
#[derive(Debug)]
pub struct Core<S: EventSink> {
    manager: Arc<WatchManager<S>>,
    settings: Option<SettingsListener>,
}

impl<S: EventSink> Core<S> {
    /// Builds the manager and starts watching `config.watch_path`.
    ///
    /// If the initial path cannot be watched, the error is logged and the core
    /// is returned without a session.
    pub async fn load(config: &Config, sink: S) -> Self {
        let manager = Arc::new(WatchManager::with_options(sink, config.session_options()));

        match manager.start(config.watch_path.clone()).await {
            Ok(()) => info!(path = %config.watch_path, "Core loaded"),
            Err(e) => warn!(
                path = %config.watch_path,
                error = %e,
                "Core loaded without a watch, waiting for a usable path"
            ),
        }

        Self {
            manager,
            settings: None,
        }
    }

    #[must_use]
    pub fn manager(&self) -> &WatchManager<S> {
        &self.manager
    }

    /// Applies a new watch-path setting.
    ///
    /// # Errors
    ///
    /// Returns the [`WatchInitError`] if the new path cannot be watched; the
    /// core is then without a session until the next change.
    pub async fn on_watch_path_changed(&self, path: WatchPath) -> Result<(), WatchInitError> {
        self.manager.reconfigure(path).await
    }

    /// Reconfigures on every value published to `settings`.
    ///
    /// The value current at the time of the call is not applied; only later
    /// changes are. Replaces any listener installed earlier.
    pub async fn follow_settings(&mut self, mut settings: watch::Receiver<WatchPath>) {
        if let Some(previous) = self.settings.take() {
            previous.shutdown().await;
        }

        settings.mark_unchanged();

        let manager = Arc::clone(&self.manager);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    changed = settings.changed() => {
                        if changed.is_err() {
                            debug!("Settings channel closed");
                            break;
                        }

                        let path = settings.borrow_and_update().clone();
                        info!(path = %path, "Watch path setting changed");

                        if let Err(e) = manager.reconfigure(path.clone()).await {
                            warn!(path = %path, error = %e, "Could not watch new path");
                        }
                    }
                }
            }
        });

        self.settings = Some(SettingsListener {
            shutdown: shutdown_tx,
            task,
        });
    }

    /// Stops following settings and closes the watch.
    pub async fn unload(mut self) {
        if let Some(listener) = self.settings.take() {
            listener.shutdown().await;
        }

        self.manager.stop().await;

        let dropped = self.manager.dropped_events();
        if dropped > 0 {
            warn!(dropped_events = dropped, "Sink rejected some events");
        }
        info!(
            forwarded_events = self.manager.forwarded_events(),
            "Core unloaded"
        );
    }
}
