//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::session::SessionRegistry;

/// Whether the gateway takes new connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    /// Accepting connections.
    Ok,
    /// Shutdown started; existing sessions are finishing.
    Draining,
}

/// Snapshot served at `/health`.
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    /// Readiness of the listener.
    pub status: Readiness,
    /// Relay this gateway serves.
    pub relay: &'static str,
    /// Seconds since start.
    pub uptime_secs: u64,
    /// Registered sessions.
    pub connections: usize,
    /// Sessions bound to a user.
    pub active_sessions: usize,
}

impl HealthReport {
    /// Read the registry counters at this instant.
    pub fn capture(
        relay: &'static str,
        started: Instant,
        registry: &SessionRegistry,
        draining: bool,
    ) -> Self {
        Self {
            status: if draining { Readiness::Draining } else { Readiness::Ok },
            relay,
            uptime_secs: started.elapsed().as_secs(),
            connections: registry.len(),
            active_sessions: registry.identity_count(),
        }
    }

    /// Whether a load balancer should keep routing here.
    pub fn is_ready(&self) -> bool {
        self.status == Readiness::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_registry_reports_ok() {
        let registry = SessionRegistry::new(16);
        let report = HealthReport::capture("chat", Instant::now(), &registry, false);
        assert!(report.is_ready());
        assert_eq!(report.connections, 0);
        assert_eq!(report.active_sessions, 0);

        let body = serde_json::to_value(&report).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["relay"], "chat");
    }

    #[test]
    fn draining_is_not_ready() {
        let registry = SessionRegistry::new(16);
        let started = Instant::now().checked_sub(Duration::from_secs(90)).unwrap();
        let report = HealthReport::capture("transcribe", started, &registry, true);
        assert!(!report.is_ready());
        assert!(report.uptime_secs >= 89);
        assert_eq!(serde_json::to_value(&report).unwrap()["status"], "draining");
    }
}
