//! One-shot completion signal between tasks.

use std::sync::Arc;

use tokio::sync::watch;

/// Lets one task await another task's completion.
///
/// Cloning shares the same signal. `complete` is idempotent and every
/// `wait`, before or after completion, returns once it has happened.
#[derive(Clone)]
pub struct Rendezvous {
    tx: Arc<watch::Sender<bool>>,
}

impl Rendezvous {
    /// Create an incomplete rendezvous.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Mark complete. Returns `true` for the first call only.
    pub fn complete(&self) -> bool {
        self.tx.send_if_modified(|done| !std::mem::replace(done, true))
    }

    /// Whether `complete` has been called.
    pub fn is_complete(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until complete.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}
