//! Setup gate: a one-shot, multi-reader handshake signal.

use serde_json::Value;
use tokio::sync::watch;

#[derive(Clone, Debug, PartialEq)]
enum GateState {
    Pending,
    Resolved(Value),
    Abandoned,
}

/// Gates a session's processing on receipt of its handshake.
///
/// Resolves at most once; later resolutions are ignored. A session torn
/// down before its handshake abandons the gate so waiters unblock with
/// `None` instead of hanging.
pub struct SetupGate {
    tx: watch::Sender<GateState>,
}

impl SetupGate {
    /// Create an unresolved gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::Pending);
        Self { tx }
    }

    /// Resolve with the handshake payload. Returns `true` only for the call
    /// that actually resolved the gate.
    pub fn resolve(&self, setup: Value) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == GateState::Pending {
                *state = GateState::Resolved(setup);
                true
            } else {
                false
            }
        })
    }

    /// Give up on a pending gate. No effect once resolved.
    pub fn abandon(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == GateState::Pending {
                *state = GateState::Abandoned;
                true
            } else {
                false
            }
        })
    }

    /// Wait for the handshake. `None` if the gate was abandoned.
    pub async fn get(&self) -> Option<Value> {
        let mut rx = self.tx.subscribe();
        let state = rx.wait_for(|s| *s != GateState::Pending).await.ok()?;
        match &*state {
            GateState::Resolved(setup) => Some(setup.clone()),
            _ => None,
        }
    }

    /// The resolved payload, without waiting.
    pub fn peek(&self) -> Option<Value> {
        match &*self.tx.borrow() {
            GateState::Resolved(setup) => Some(setup.clone()),
            _ => None,
        }
    }

    /// Whether the gate has been resolved.
    pub fn is_resolved(&self) -> bool {
        matches!(*self.tx.borrow(), GateState::Resolved(_))
    }
}

impl Default for SetupGate {
    fn default() -> Self {
        Self::new()
    }
}
