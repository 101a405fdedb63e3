//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use nearlock_core::{Command, MonitorInput, MonitorSnapshot, NearlockError};
use tokio::sync::{mpsc, watch};

use crate::observer::StatusNotice;

/// Handle to the running monitor: a command sender plus the latest published
/// state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

/// State type used by the router.
pub type SharedState = AppState;

struct AppStateInner {
    commands: mpsc::Sender<MonitorInput>,
    snapshots: watch::Receiver<MonitorSnapshot>,
    notices: watch::Receiver<StatusNotice>,
    started_at: Instant,
}

impl AppState {
    /// Wrap the monitor's channels.
    #[must_use]
    pub fn new(
        commands: mpsc::Sender<MonitorInput>,
        snapshots: watch::Receiver<MonitorSnapshot>,
        notices: watch::Receiver<StatusNotice>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                commands,
                snapshots,
                notices,
                started_at: Instant::now(),
            }),
        }
    }

    /// Queue a command for the monitor loop.
    ///
    /// # Errors
    ///
    /// Returns [`NearlockError::MonitorStopped`] once the loop has exited.
    pub async fn send(&self, command: Command) -> nearlock_core::Result<()> {
        self.inner
            .commands
            .send(command.into())
            .await
            .map_err(|_| NearlockError::MonitorStopped)
    }

    /// Latest monitor snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    /// Latest observer notices.
    #[must_use]
    pub fn notice(&self) -> StatusNotice {
        self.inner.notices.borrow().clone()
    }

    /// Seconds since the state was created.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }
}
