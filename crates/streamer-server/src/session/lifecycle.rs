//! Per-session lifecycle controller.
//!
//! A session starts `IdleArmed` with the long grace timer (`time_to_sleep`).
//! Every unit of relay output re-arms the short timer (`time_out`) and moves
//! it to `Active`. The controller escalates on the first of: the timer
//! firing, the peer leaving, a malformed inbound frame, the relay task
//! ending, or server shutdown. It then runs the shutdown sequence once:
//!
//! 1. stop the inbound bridge (and abandon a pending setup gate)
//! 2. wait for the relay task to unwind, aborting it after `drain_timeout`
//! 3. send the final notification, unless the peer is already gone
//! 4. mark the close as server-initiated and close the connection
//! 5. resolve the close rendezvous
//!
//! There is only ever one timer: a single pinned `Sleep` that is reset in
//! place.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use streamer_core::Notification;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::registry::{Session, SessionRegistry};
use crate::metrics::LIFECYCLE_ESCALATIONS_TOTAL;

/// Lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// No output yet; the long grace timer is armed.
    IdleArmed,
    /// Output has flowed; the short grace timer is armed.
    Active,
    /// Shutdown sequence in progress.
    Stopping,
    /// Shutdown finished and the close rendezvous resolved.
    Closed,
}

/// Why a session was escalated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscalationReason {
    /// Timer fired before any output flowed.
    Asleep,
    /// Timer fired after output had flowed.
    Idle,
    /// The peer closed or dropped the connection.
    RemoteClosed,
    /// The relay task returned on its own.
    BackendFinished,
    /// The relay task returned an error or panicked.
    BackendFailed,
    /// An inbound frame was not valid JSON.
    Protocol,
    /// The server is shutting down.
    Shutdown,
}

impl EscalationReason {
    /// The final envelope sent to the client for this escalation.
    pub fn notification(self) -> Option<Notification> {
        match self {
            Self::Asleep => Some(Notification::sleeping()),
            Self::Idle => Some(Notification::idle()),
            Self::BackendFailed | Self::Protocol | Self::Shutdown => {
                Some(Notification::terminal())
            }
            Self::RemoteClosed | Self::BackendFinished => None,
        }
    }

    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asleep => "asleep",
            Self::Idle => "idle",
            Self::RemoteClosed => "remote_closed",
            Self::BackendFinished => "backend_finished",
            Self::BackendFailed => "backend_failed",
            Self::Protocol => "protocol",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
enum LifecycleEvent {
    Activity,
    RemoteClosed,
    Malformed,
    Shutdown,
}

/// Timer and drain settings.
#[derive(Clone, Copy, Debug)]
pub struct LifecycleConfig {
    /// Short grace period once output has flowed.
    pub time_out: Duration,
    /// Long grace period before any output.
    pub time_to_sleep: Duration,
    /// Upper bound on waiting for the relay task after the bridge stops.
    pub drain_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            time_out: Duration::from_millis(2_000),
            time_to_sleep: Duration::from_millis(5_000),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Cheap handle used by the socket task and the relay to feed the controller.
#[derive(Clone)]
pub struct LifecycleHandle {
    events: mpsc::UnboundedSender<LifecycleEvent>,
    state: watch::Receiver<LifecycleState>,
}

impl LifecycleHandle {
    /// A unit of output was forwarded to the client; re-arm the short timer.
    pub fn record_activity(&self) {
        let _ = self.events.send(LifecycleEvent::Activity);
    }

    /// The peer went away.
    pub fn remote_closed(&self) {
        let _ = self.events.send(LifecycleEvent::RemoteClosed);
    }

    /// An inbound frame could not be parsed; fail the session.
    pub fn protocol_error(&self) {
        let _ = self.events.send(LifecycleEvent::Malformed);
    }

    /// The server is shutting down; close the session.
    pub fn shutdown(&self) {
        let _ = self.events.send(LifecycleEvent::Shutdown);
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Wait until the shutdown sequence has finished.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == LifecycleState::Closed).await;
    }
}

/// Drives one session's timers and shutdown sequence.
pub struct LifecycleController {
    session: Arc<Session>,
    registry: Arc<SessionRegistry>,
    config: LifecycleConfig,
    events: mpsc::UnboundedReceiver<LifecycleEvent>,
    state: watch::Sender<LifecycleState>,
}

/// Create a controller for `session` and the handle that feeds it.
pub fn controller(
    session: Arc<Session>,
    registry: Arc<SessionRegistry>,
    config: LifecycleConfig,
) -> (LifecycleHandle, LifecycleController) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(LifecycleState::IdleArmed);
    let handle = LifecycleHandle {
        events: events_tx,
        state: state_rx,
    };
    let controller = LifecycleController {
        session,
        registry,
        config,
        events: events_rx,
        state: state_tx,
    };
    (handle, controller)
}

impl LifecycleController {
    /// Watch the session until it escalates, then shut it down.
    ///
    /// `backend` is the relay task driving the session. It is always awaited
    /// (or aborted) before the connection is closed, whether it succeeded,
    /// failed, or is still running.
    #[instrument(skip_all, fields(session_id = %self.session.id()))]
    pub async fn run<E>(mut self, mut backend: JoinHandle<Result<(), E>>) -> EscalationReason
    where
        E: fmt::Display + Send + 'static,
    {
        let timer = tokio::time::sleep(self.config.time_to_sleep);
        tokio::pin!(timer);

        let (reason, backend) = loop {
            tokio::select! {
                biased;

                event = self.events.recv() => match event {
                    Some(LifecycleEvent::Activity) => {
                        timer.as_mut().reset(Instant::now() + self.config.time_out);
                        self.set_state(LifecycleState::Active);
                    }
                    Some(LifecycleEvent::Malformed) => break (EscalationReason::Protocol, Some(backend)),
                    Some(LifecycleEvent::Shutdown) => break (EscalationReason::Shutdown, Some(backend)),
                    Some(LifecycleEvent::RemoteClosed) | None => {
                        break (EscalationReason::RemoteClosed, Some(backend));
                    }
                },

                joined = &mut backend => break (backend_outcome(joined), None),

                () = &mut timer => {
                    let reason = if *self.state.borrow() == LifecycleState::Active {
                        EscalationReason::Idle
                    } else {
                        EscalationReason::Asleep
                    };
                    break (reason, Some(backend));
                }
            }
        };

        self.shutdown(reason, backend).await;
        reason
    }

    async fn shutdown<E>(&self, reason: EscalationReason, backend: Option<JoinHandle<Result<(), E>>>)
    where
        E: fmt::Display + Send + 'static,
    {
        let id = self.session.id();
        self.set_state(LifecycleState::Stopping);
        counter!(LIFECYCLE_ESCALATIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        info!(%reason, "escalating session");

        let discarded = self.session.inbound().stop();
        let _ = self.session.setup().abandon();
        if discarded > 0 {
            debug!(discarded, "discarded unconsumed inbound messages");
        }

        if let Some(mut backend) = backend {
            match tokio::time::timeout(self.config.drain_timeout, &mut backend).await {
                Ok(joined) => {
                    let _ = backend_outcome(joined);
                }
                Err(_) => {
                    warn!(
                        timeout_ms = self.config.drain_timeout.as_millis(),
                        "relay did not unwind after bridge stop, aborting"
                    );
                    backend.abort();
                }
            }
        }

        if let Some(notification) = reason.notification() {
            if self.session.connection().is_remote_closed() {
                debug!("peer gone, skipping final notification");
            } else {
                let _ = self.registry.send(id, &notification);
            }
        }

        if reason != EscalationReason::RemoteClosed {
            self.session.mark_server_closed();
        }
        self.registry.close(id);
        let _ = self.session.close_complete().complete();
        self.set_state(LifecycleState::Closed);
        debug!("session shutdown complete");
    }

    fn set_state(&self, state: LifecycleState) {
        let _ = self.state.send_replace(state);
    }
}

fn backend_outcome<E: fmt::Display>(joined: Result<Result<(), E>, JoinError>) -> EscalationReason {
    match joined {
        Ok(Ok(())) => EscalationReason::BackendFinished,
        Ok(Err(error)) => {
            warn!(%error, "relay failed");
            EscalationReason::BackendFailed
        }
        Err(error) => {
            warn!(%error, "relay task panicked or was cancelled");
            EscalationReason::BackendFailed
        }
    }
}
