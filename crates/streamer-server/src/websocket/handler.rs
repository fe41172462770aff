//! Inbound frame routing.

use streamer_core::{Inbound, classify};
use tracing::{debug, warn};

use crate::session::{LifecycleHandle, Session};

/// Where an inbound frame went.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Routed {
    /// First handshake: resolved the setup gate.
    Setup,
    /// Handshake after the gate was already resolved: dropped.
    DuplicateSetup,
    /// Ordinary data: pushed onto the bridge.
    Data,
    /// Data arriving after the bridge stopped.
    Discarded,
    /// Not JSON: the session is being failed.
    Malformed,
}

/// Classify one text frame and hand it to the gate or the bridge.
pub fn route_inbound(session: &Session, lifecycle: &LifecycleHandle, text: &str) -> Routed {
    match classify(text) {
        Ok(Inbound::Setup(setup)) => {
            if session.setup().resolve(setup) {
                debug!("setup received");
                Routed::Setup
            } else {
                debug!("repeated setup ignored");
                Routed::DuplicateSetup
            }
        }
        Ok(Inbound::Data(data)) => {
            if session.inbound().push(data) {
                Routed::Data
            } else {
                Routed::Discarded
            }
        }
        Err(error) => {
            warn!(%error, "malformed inbound frame");
            lifecycle.protocol_error();
            Routed::Malformed
        }
    }
}
