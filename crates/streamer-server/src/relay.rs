//! Relay contract.
//!
//! A relay is the per-connection task that waits for the handshake, pulls
//! inbound messages from the bridge, drives a backend, and pushes results
//! back out. It sees the session only through [`RelayContext`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use streamer_core::{GatewayError, Notification, ProtocolError, SessionId};
use thiserror::Error;

use crate::session::{BridgeReceiver, LifecycleHandle, Session, SessionRegistry};

/// Errors a relay can end with. Any error makes the gateway send the
/// terminal `{data: null}` envelope before closing.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The session ended before the relay got what it was waiting for.
    #[error("session closed")]
    Closed,

    /// The platform refused the task.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The session core rejected an operation (e.g. duplicate identity).
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The platform API could not be reached or answered unexpectedly.
    #[error("platform request failed: {0}")]
    Platform(String),

    /// The streaming backend failed.
    #[error("backend failed: {0}")]
    Backend(String),

    /// An inbound payload had the wrong shape.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Local I/O (recordings).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The inbound stream was already taken.
    #[error("inbound stream already taken")]
    InboundTaken,
}

/// A relay handler. One `run` call per connection.
#[async_trait]
pub trait Relay: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Drive one session to completion.
    async fn run(&self, ctx: RelayContext) -> Result<(), RelayError>;
}

/// The relay's view of its session.
#[derive(Clone)]
pub struct RelayContext {
    session: Arc<Session>,
    registry: Arc<SessionRegistry>,
    lifecycle: LifecycleHandle,
}

impl RelayContext {
    /// Bundle a session with its registry and lifecycle handle.
    pub fn new(
        session: Arc<Session>,
        registry: Arc<SessionRegistry>,
        lifecycle: LifecycleHandle,
    ) -> Self {
        Self {
            session,
            registry,
            lifecycle,
        }
    }

    /// This session's id.
    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    /// Wait for the handshake payload.
    pub async fn setup(&self) -> Result<Value, RelayError> {
        self.session.setup().get().await.ok_or(RelayError::Closed)
    }

    /// Take the inbound stream. Only one consumer is allowed.
    pub fn inbound(&self) -> Result<BridgeReceiver<String>, RelayError> {
        self.session.take_inbound().ok_or(RelayError::InboundTaken)
    }

    /// Send `{data}` and count it as activity for the lifecycle timers.
    pub fn emit(&self, notification: Notification) -> bool {
        let sent = self.send(&notification);
        self.lifecycle.record_activity();
        sent
    }

    /// Send without touching the lifecycle timers.
    pub fn send(&self, notification: &Notification) -> bool {
        self.registry.send(self.session.id(), notification)
    }

    /// Bind an identity to this session. On a duplicate the session is
    /// closed and the error tells the relay to stop.
    pub fn bind_identity(&self, identity: &str) -> Result<(), RelayError> {
        Ok(self.registry.bind_identity(identity, self.session.id())?)
    }

    /// Re-arm the short lifecycle timer without sending anything.
    pub fn record_activity(&self) {
        self.lifecycle.record_activity();
    }
}
