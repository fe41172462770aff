//! Error taxonomy for the gateway.
//!
//! Only conditions a caller can act on are errors. Idle escalation is a
//! lifecycle transition and never appears here; operations against unknown
//! sessions are silent no-ops in the registry and only surface as
//! [`GatewayError::UnknownSession`] where a caller asked for a result.

use thiserror::Error;

use crate::ids::SessionId;

/// Errors produced by the session core.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The identity is already bound to another live session. The newcomer
    /// has been closed; the incumbent binding is untouched.
    #[error("identity {identity} is already bound to session {incumbent}")]
    DuplicateIdentity {
        /// The contested identity.
        identity: String,
        /// The session currently holding the binding.
        incumbent: SessionId,
    },

    /// The session is unknown or already torn down.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// The streaming backend failed.
    #[error("backend failure: {0}")]
    Backend(String),

    /// An inbound frame could not be understood.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Malformed inbound payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("invalid JSON frame: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// Valid JSON, but not the shape the relay expects.
    #[error("malformed payload: {0}")]
    Malformed(String),
}
