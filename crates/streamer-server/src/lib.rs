//! # streamer-server
//!
//! Session core and Axum WebSocket gateway.
//!
//! - [`session`]: registry, setup gate, message bridge, lifecycle controller
//! - [`relay`]: the contract relay handlers implement
//! - [`websocket`]: per-connection socket task and inbound routing
//! - [`server`]: router, listener, health and metrics endpoints
//! - Graceful shutdown via `CancellationToken`, draining tracked sessions

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod websocket;
