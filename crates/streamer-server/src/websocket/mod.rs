//! WebSocket connection handling and inbound routing.

pub mod handler;
pub mod socket;
