//! # streamer-core
//!
//! Shared contracts for the streamer gateway.
//!
//! - [`ids`]: identifier newtypes (`SessionId`, `TaskId`)
//! - [`envelope`]: inbound frame classification and the outbound notification envelope
//! - [`errors`]: the gateway error taxonomy
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use envelope::{Inbound, Notification, SETUP_MARKER, classify};
pub use errors::{GatewayError, ProtocolError};
pub use ids::{SessionId, TaskId};
