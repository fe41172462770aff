//! Shutdown coordination.
//!
//! One `CancellationToken` fans out to the accept loop and every session
//! task. Sessions react by escalating with reason `Shutdown`, so clients get
//! a terminal envelope and a normal close before the process exits. Session
//! tasks are spawned by the upgrade machinery, so they are tracked here
//! rather than handed back as join handles.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

/// Drain window used when the caller gives none.
const DEFAULT_DRAIN: Duration = Duration::from_secs(30);

/// How a drain ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every task finished.
    Completed,
    /// The window closed with tasks still running.
    TimedOut {
        /// Tasks that had not finished.
        pending: usize,
    },
}

/// Shared shutdown signal plus the set of live session tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// A coordinator that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that resolves once shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the signal. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the signal has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wrap a session future so the drain waits for it.
    pub fn track_session<F: Future>(&self, session: F) -> TrackedFuture<F> {
        self.sessions.track_future(session)
    }

    /// Session tasks still running.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Fire the signal, then wait up to `window` for `tasks` and for every
    /// tracked session to finish its escalation.
    pub async fn graceful_shutdown(
        &self,
        tasks: Vec<JoinHandle<()>>,
        window: Option<Duration>,
    ) -> DrainOutcome {
        self.shutdown();
        let _ = self.sessions.close();
        let window = window.unwrap_or(DEFAULT_DRAIN);
        let deadline = Instant::now() + window;
        let mut pending: FuturesUnordered<_> = tasks.into_iter().collect();
        info!(tasks = pending.len(), window_ms = window.as_millis(), "draining");

        while !pending.is_empty() {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some(Err(error))) => warn!(%error, "task ended abnormally during drain"),
                Ok(_) => {}
                Err(_) => {
                    let pending = pending.len() + self.live_sessions();
                    warn!(pending, "drain window closed");
                    return DrainOutcome::TimedOut { pending };
                }
            }
        }

        if tokio::time::timeout_at(deadline, self.sessions.wait()).await.is_err() {
            let pending = self.live_sessions();
            warn!(pending, "drain window closed with sessions open");
            return DrainOutcome::TimedOut { pending };
        }
        DrainOutcome::Completed
    }
}
