//! Per-session state and coordination primitives.

pub mod bridge;
pub mod connection;
pub mod gate;
pub mod lifecycle;
pub mod registry;
pub mod rendezvous;

pub use bridge::{BridgeReceiver, BridgeSender};
pub use connection::ClientConnection;
pub use gate::SetupGate;
pub use lifecycle::{
    EscalationReason, LifecycleConfig, LifecycleController, LifecycleHandle, LifecycleState,
};
pub use registry::{Session, SessionRegistry};
pub use rendezvous::Rendezvous;
