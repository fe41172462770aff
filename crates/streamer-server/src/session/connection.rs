//! WebSocket client connection handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Normal closure status code.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Reason string sent with every server-initiated close.
pub const CLOSE_REASON: &str = "Closing connection";

/// Close status and reason requested by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    /// WebSocket status code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

impl Default for CloseFrame {
    fn default() -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: CLOSE_REASON.to_string(),
        }
    }
}

/// Handle to one connected client, shared between the socket task, the
/// registry and the lifecycle controller.
///
/// Outbound text goes through a bounded queue drained by the socket's
/// writer task. Closing is a separate signal so a full queue can never
/// swallow it; the writer flushes queued text before honoring it.
pub struct ClientConnection {
    tx: mpsc::Sender<String>,
    close: CancellationToken,
    close_frame: Mutex<Option<CloseFrame>>,
    remote_closed: AtomicBool,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection around the writer's send channel.
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            tx,
            close: CancellationToken::new(),
            close_frame: Mutex::new(None),
            remote_closed: AtomicBool::new(false),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame for the client.
    ///
    /// Returns `false` without queueing once the connection is closing or
    /// the peer is gone, and when the queue is full or closed (the latter
    /// two also bump the dropped counter).
    pub fn send(&self, message: String) -> bool {
        if self.is_closing() || self.is_remote_closed() {
            return false;
        }
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Request a close with the given status. Idempotent: only the first
    /// call records a frame and returns `true`.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        {
            let mut frame = self.close_frame.lock();
            if frame.is_some() {
                return false;
            }
            *frame = Some(CloseFrame {
                code,
                reason: reason.to_string(),
            });
        }
        self.close.cancel();
        true
    }

    /// Whether a server-side close has been requested.
    pub fn is_closing(&self) -> bool {
        self.close.is_cancelled()
    }

    /// The close frame requested by the server, if any.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.close_frame.lock().clone()
    }

    /// Resolves once a server-side close has been requested.
    pub async fn close_requested(&self) {
        self.close.cancelled().await;
    }

    /// Record that the peer closed or dropped the socket.
    pub fn mark_remote_closed(&self) {
        self.remote_closed.store(true, Ordering::Release);
    }

    /// Whether the peer is gone.
    pub fn is_remote_closed(&self) -> bool {
        self.remote_closed.load(Ordering::Acquire)
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or ping received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
