//! Test doubles shared by the relay tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use streamer_server::relay::{RelayContext, RelayError};
use streamer_server::session::lifecycle::{self, LifecycleConfig, LifecycleController};
use streamer_server::session::{ClientConnection, Session, SessionRegistry};
use tokio::sync::mpsc;

use crate::platform::{AccessGrant, Platform, TaskRecord, TaskType};

/// Platform that grants or denies every request and keeps what was recorded.
pub(crate) struct FakePlatform {
    grant: Result<AccessGrant, String>,
    pub(crate) checked: Mutex<Vec<(String, TaskType)>>,
    pub(crate) records: Mutex<Vec<TaskRecord>>,
}

impl FakePlatform {
    pub(crate) fn granting(user: &str) -> Arc<Self> {
        Arc::new(Self {
            grant: Ok(AccessGrant {
                user_id: Some(user.to_string()),
            }),
            checked: Mutex::new(Vec::new()),
            records: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn anonymous() -> Arc<Self> {
        Arc::new(Self {
            grant: Ok(AccessGrant::default()),
            checked: Mutex::new(Vec::new()),
            records: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn denying(message: &str) -> Arc<Self> {
        Arc::new(Self {
            grant: Err(message.to_string()),
            checked: Mutex::new(Vec::new()),
            records: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn check_access(
        &self,
        token: &str,
        task_type: TaskType,
    ) -> Result<AccessGrant, RelayError> {
        self.checked.lock().push((token.to_string(), task_type));
        self.grant.clone().map_err(RelayError::AccessDenied)
    }

    async fn record_task(&self, record: &TaskRecord) -> Result<(), RelayError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// A registered session with no socket behind it.
pub(crate) struct Harness {
    pub(crate) ctx: RelayContext,
    pub(crate) session: Arc<Session>,
    pub(crate) registry: Arc<SessionRegistry>,
    outbound: mpsc::Receiver<String>,
    _controller: LifecycleController,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let registry = Arc::new(SessionRegistry::default());
        let (tx, outbound) = mpsc::channel(256);
        let session = registry.register(Arc::new(ClientConnection::new(tx)));
        let (handle, controller) =
            lifecycle::controller(session.clone(), registry.clone(), LifecycleConfig::default());
        let ctx = RelayContext::new(session.clone(), registry.clone(), handle);
        Self {
            ctx,
            session,
            registry,
            outbound,
            _controller: controller,
        }
    }

    pub(crate) fn setup(&self, setup: Value) {
        let _ = self.session.setup().resolve(setup);
    }

    pub(crate) fn push(&self, message: impl Into<String>) {
        let _ = self.session.inbound().push(message.into());
    }

    /// Wait until the relay has consumed everything and parked, then stop
    /// the bridge.
    pub(crate) async fn drain_and_stop(&self) {
        let inbound = self.session.inbound();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !(inbound.is_empty() && inbound.has_parked_waiter()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("relay never drained the bridge");
        let _ = inbound.stop();
    }

    /// Every envelope sent so far.
    pub(crate) fn sent(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }
}
