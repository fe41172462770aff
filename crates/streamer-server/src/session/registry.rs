//! Session registry: the set of live sessions and their identity bindings.
//!
//! Each session is one owned record ([`Session`]) holding everything the
//! gateway tracks per connection. The id and identity maps are only touched
//! through [`SessionRegistry`] methods; the lock is never held across an
//! await.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::counter;
use parking_lot::Mutex;
use streamer_core::{GatewayError, Notification, SessionId};
use tracing::{debug, info, warn};

use super::bridge::{self, BridgeReceiver, BridgeSender};
use super::connection::{CLOSE_REASON, ClientConnection, NORMAL_CLOSURE};
use super::gate::SetupGate;
use super::rendezvous::Rendezvous;
use crate::metrics::IDENTITY_REJECTIONS_TOTAL;

/// One live connection and its coordination state.
pub struct Session {
    id: SessionId,
    connection: Arc<ClientConnection>,
    setup: SetupGate,
    inbound_tx: BridgeSender<String>,
    inbound_rx: Mutex<Option<BridgeReceiver<String>>>,
    close_complete: Rendezvous,
    server_closed: AtomicBool,
    identity: Mutex<Option<String>>,
}

impl Session {
    fn new(id: SessionId, connection: Arc<ClientConnection>, backlog_warn: usize) -> Self {
        let (inbound_tx, inbound_rx) = bridge::channel(backlog_warn);
        Self {
            id,
            connection,
            setup: SetupGate::new(),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            close_complete: Rendezvous::new(),
            server_closed: AtomicBool::new(false),
            identity: Mutex::new(None),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Underlying connection handle.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    /// The handshake gate.
    pub fn setup(&self) -> &SetupGate {
        &self.setup
    }

    /// Producer side of the inbound bridge.
    pub fn inbound(&self) -> &BridgeSender<String> {
        &self.inbound_tx
    }

    /// Take the single consumer side of the inbound bridge. `None` after
    /// the first call.
    pub fn take_inbound(&self) -> Option<BridgeReceiver<String>> {
        self.inbound_rx.lock().take()
    }

    /// Resolved once teardown work for this session has finished.
    pub fn close_complete(&self) -> &Rendezvous {
        &self.close_complete
    }

    /// Record that the server initiated the close.
    pub fn mark_server_closed(&self) {
        self.server_closed.store(true, Ordering::Release);
    }

    /// Whether the server initiated the close.
    pub fn is_server_closed(&self) -> bool {
        self.server_closed.load(Ordering::Acquire)
    }

    /// The identity bound to this session, if any.
    pub fn identity(&self) -> Option<String> {
        self.identity.lock().clone()
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Arc<Session>>,
    identities: HashMap<String, SessionId>,
}

/// Owns the live sessions and enforces at most one session per identity.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    backlog_warn: usize,
}

impl SessionRegistry {
    /// Create an empty registry. `backlog_warn` is passed to every
    /// session's inbound bridge.
    pub fn new(backlog_warn: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            backlog_warn,
        }
    }

    /// Register a connection under a fresh id.
    pub fn register(&self, connection: Arc<ClientConnection>) -> Arc<Session> {
        let id = SessionId::new();
        let session = Arc::new(Session::new(id.clone(), connection, self.backlog_warn));
        let _ = self.inner.lock().sessions.insert(id.clone(), session.clone());
        debug!(session_id = %id, "session registered");
        session
    }

    /// Look up a live session.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.lock().sessions.get(id).cloned()
    }

    /// Bind `identity` to session `id`.
    ///
    /// If another live session already holds the identity, the session
    /// asking for it is closed and the incumbent binding is left unchanged.
    /// Re-binding the same pair is a no-op. Binding a different identity to
    /// a session replaces its previous one.
    pub fn bind_identity(&self, identity: &str, id: &SessionId) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock();
        let Some(session) = inner.sessions.get(id).cloned() else {
            return Err(GatewayError::UnknownSession(id.clone()));
        };

        match inner.identities.get(identity).cloned() {
            Some(incumbent) if incumbent == *id => return Ok(()),
            Some(incumbent) => {
                drop(inner);
                warn!(
                    identity,
                    session_id = %id,
                    incumbent = %incumbent,
                    "identity already bound, closing new session"
                );
                counter!(IDENTITY_REJECTIONS_TOTAL).increment(1);
                let _ = session.connection.close(NORMAL_CLOSURE, CLOSE_REASON);
                return Err(GatewayError::DuplicateIdentity {
                    identity: identity.to_string(),
                    incumbent,
                });
            }
            None => {}
        }

        let previous = session.identity.lock().replace(identity.to_string());
        if let Some(previous) = previous {
            let _ = inner.identities.remove(&previous);
        }
        let _ = inner.identities.insert(identity.to_string(), id.clone());
        info!(identity, session_id = %id, "identity bound");
        Ok(())
    }

    /// The session currently bound to `identity`.
    pub fn session_for(&self, identity: &str) -> Option<SessionId> {
        self.inner.lock().identities.get(identity).cloned()
    }

    /// Send a notification. Silently ignored for unknown sessions.
    pub fn send(&self, id: &SessionId, notification: &Notification) -> bool {
        match self.get(id) {
            Some(session) => session.connection.send(notification.to_json()),
            None => {
                debug!(session_id = %id, "send to unknown session ignored");
                false
            }
        }
    }

    /// Gracefully close (1000, "Closing connection"). Idempotent; silently
    /// ignored for unknown sessions.
    pub fn close(&self, id: &SessionId) {
        if let Some(session) = self.get(id) {
            if session.connection.close(NORMAL_CLOSURE, CLOSE_REASON) {
                debug!(session_id = %id, "close requested");
            }
        }
    }

    /// Drop a session and its identity binding. Only called after the
    /// session's close rendezvous has resolved.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.remove(id)?;
        if let Some(identity) = session.identity() {
            if inner.identities.get(&identity) == Some(id) {
                let _ = inner.identities.remove(&identity);
            }
        }
        debug!(session_id = %id, "session removed");
        Some(session)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bound identities.
    pub fn identity_count(&self) -> usize {
        self.inner.lock().identities.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    fn connect(registry: &SessionRegistry) -> (Arc<Session>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        let session = registry.register(Arc::new(ClientConnection::new(tx)));
        (session, rx)
    }

    #[test]
    fn register_assigns_unique_ids() {
        let registry = SessionRegistry::default();
        let (a, _ra) = connect(&registry);
        let (b, _rb) = connect(&registry);
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
        assert!(registry.get(a.id()).is_some());
    }

    #[test]
    fn duplicate_identity_closes_newcomer() {
        let registry = SessionRegistry::default();
        let (first, _r1) = connect(&registry);
        let (second, _r2) = connect(&registry);

        registry.bind_identity("user-1", first.id()).unwrap();
        let err = registry.bind_identity("user-1", second.id()).unwrap_err();

        assert_matches!(
            err,
            GatewayError::DuplicateIdentity { ref incumbent, .. } if incumbent == first.id()
        );
        assert!(second.connection().is_closing());
        assert!(!first.connection().is_closing());
        assert_eq!(registry.session_for("user-1").as_ref(), Some(first.id()));
        assert_eq!(second.identity(), None);
    }

    #[test]
    fn identity_rebinds_after_removal() {
        let registry = SessionRegistry::default();
        let (first, _r1) = connect(&registry);
        registry.bind_identity("user-1", first.id()).unwrap();
        let _ = registry.remove(first.id());
        assert_eq!(registry.identity_count(), 0);

        let (second, _r2) = connect(&registry);
        registry.bind_identity("user-1", second.id()).unwrap();
        assert_eq!(registry.session_for("user-1").as_ref(), Some(second.id()));
    }

    #[test]
    fn identity_is_held_during_teardown() {
        let registry = SessionRegistry::default();
        let (first, _r1) = connect(&registry);
        registry.bind_identity("user-1", first.id()).unwrap();
        registry.close(first.id());

        let (second, _r2) = connect(&registry);
        assert_matches!(
            registry.bind_identity("user-1", second.id()),
            Err(GatewayError::DuplicateIdentity { .. })
        );
    }

    #[test]
    fn rebinding_same_pair_is_ok() {
        let registry = SessionRegistry::default();
        let (s, _r) = connect(&registry);
        registry.bind_identity("u", s.id()).unwrap();
        registry.bind_identity("u", s.id()).unwrap();
        assert!(!s.connection().is_closing());
    }

    #[test]
    fn new_identity_replaces_previous_for_session() {
        let registry = SessionRegistry::default();
        let (s, _r) = connect(&registry);
        registry.bind_identity("a", s.id()).unwrap();
        registry.bind_identity("b", s.id()).unwrap();
        assert_eq!(registry.session_for("a"), None);
        assert_eq!(registry.identity_count(), 1);
    }

    #[test]
    fn bind_unknown_session_is_error() {
        let registry = SessionRegistry::default();
        assert_matches!(
            registry.bind_identity("u", &SessionId::from("ghost")),
            Err(GatewayError::UnknownSession(_))
        );
    }

    #[tokio::test]
    async fn send_reaches_connection() {
        let registry = SessionRegistry::default();
        let (s, mut rx) = connect(&registry);
        assert!(registry.send(s.id(), &Notification::data("hi")));
        assert_eq!(rx.recv().await.unwrap(), r#"{"data":"hi"}"#);
    }

    #[test]
    fn unknown_session_operations_are_silent() {
        let registry = SessionRegistry::default();
        let ghost = SessionId::from("ghost");
        assert!(!registry.send(&ghost, &Notification::terminal()));
        registry.close(&ghost);
        assert!(registry.remove(&ghost).is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let registry = SessionRegistry::default();
        let (s, _r) = connect(&registry);
        registry.close(s.id());
        registry.close(s.id());
        assert!(s.connection().is_closing());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn inbound_consumer_taken_once() {
        let registry = SessionRegistry::default();
        let (s, _r) = connect(&registry);
        assert!(s.take_inbound().is_some());
        assert!(s.take_inbound().is_none());
    }
}
