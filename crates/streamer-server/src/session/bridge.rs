//! Push-to-pull message bridge.
//!
//! The socket reader pushes inbound messages whenever they arrive; the
//! relay task pulls them one at a time. The queue is an unbounded FIFO with
//! a single-slot wake signal. [`BridgeReceiver`] is not `Clone` and
//! [`BridgeReceiver::next`] takes `&mut self`, so at most one consumer can
//! ever be parked.
//!
//! [`BridgeSender::stop`] is a hard cut: the sequence ends immediately and
//! anything still queued is discarded.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

struct State<T> {
    queue: VecDeque<T>,
    stopped: bool,
    parked: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    wake: Notify,
    warn_threshold: usize,
}

/// Create a bridge. A warning is logged each time the backlog reaches a
/// multiple of `warn_threshold` (0 disables the warning).
pub fn channel<T>(warn_threshold: usize) -> (BridgeSender<T>, BridgeReceiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            stopped: false,
            parked: false,
        }),
        wake: Notify::new(),
        warn_threshold,
    });
    (
        BridgeSender {
            shared: shared.clone(),
        },
        BridgeReceiver { shared },
    )
}

/// Producer half. Cheap to clone.
pub struct BridgeSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BridgeSender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> BridgeSender<T> {
    /// Append to the tail and wake a parked consumer. Never blocks.
    ///
    /// Returns `false` (dropping the item) once the bridge is stopped.
    pub fn push(&self, item: T) -> bool {
        let backlog = {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return false;
            }
            state.queue.push_back(item);
            state.queue.len()
        };
        self.shared.wake.notify_one();

        let threshold = self.shared.warn_threshold;
        if threshold > 0 && backlog % threshold == 0 {
            warn!(backlog, "inbound backlog growing, consumer is falling behind");
        }
        true
    }

    /// End the sequence. Returns how many queued items were discarded.
    /// Idempotent: later calls return 0.
    pub fn stop(&self) -> usize {
        let discarded = {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return 0;
            }
            state.stopped = true;
            let n = state.queue.len();
            state.queue.clear();
            n
        };
        self.shared.wake.notify_one();
        if discarded > 0 {
            debug!(discarded, "bridge stopped with unconsumed backlog");
        }
        discarded
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// Current backlog.
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Whether the backlog is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the consumer is currently parked in [`BridgeReceiver::next`].
    pub fn has_parked_waiter(&self) -> bool {
        self.shared.state.lock().parked
    }
}

/// Consumer half. Exactly one exists per bridge.
pub struct BridgeReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> BridgeReceiver<T> {
    /// Pop the head, parking until a push arrives. `None` once stopped,
    /// even if items were queued before the stop.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            {
                let mut state = self.shared.state.lock();
                if state.stopped {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    return Some(item);
                }
                state.parked = true;
            }
            let _parked = Parked(&*self.shared);
            // A push between the unlock and this await leaves a permit, so
            // the wakeup is not lost.
            self.shared.wake.notified().await;
        }
    }

    /// Adapt into a [`Stream`] that ends when the bridge stops.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |mut rx| async move {
            let item = rx.next().await?;
            Some((item, rx))
        })
    }
}

/// Clears the parked flag when a wait finishes or is cancelled.
struct Parked<'a, T>(&'a Shared<T>);

impl<T> Drop for Parked<'_, T> {
    fn drop(&mut self) {
        self.0.state.lock().parked = false;
    }
}
