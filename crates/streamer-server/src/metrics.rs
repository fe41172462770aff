//! Prometheus recorder and the gateway's metric names.
//!
//! Every series carries a `relay` label so several gateways can share one
//! scrape target.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Sessions accepted (counter).
pub const SESSIONS_OPENED_TOTAL: &str = "streamer_sessions_opened_total";
/// Sessions torn down (counter).
pub const SESSIONS_CLOSED_TOTAL: &str = "streamer_sessions_closed_total";
/// Sessions currently registered (gauge).
pub const SESSIONS_ACTIVE: &str = "streamer_sessions_active";
/// Session lifetime in seconds (histogram).
pub const SESSION_DURATION_SECONDS: &str = "streamer_session_duration_seconds";
/// Outbound frames dropped on a full writer queue (counter).
pub const OUTBOUND_DROPPED_TOTAL: &str = "streamer_outbound_dropped_total";
/// Escalations, labelled by `reason` (counter).
pub const LIFECYCLE_ESCALATIONS_TOTAL: &str = "streamer_lifecycle_escalations_total";
/// Identity binds refused because the user already had a session (counter).
pub const IDENTITY_REJECTIONS_TOTAL: &str = "streamer_identity_rejections_total";

/// Session lengths span sub-second rejects to hour-long dictations.
const SESSION_BUCKETS: &[f64] = &[0.5, 2.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0];

fn builder(relay: &str) -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .add_global_label("relay", relay)
        .set_buckets_for_metric(
            Matcher::Full(SESSION_DURATION_SECONDS.to_string()),
            SESSION_BUCKETS,
        )
}

/// Install the global recorder for `relay` and return the handle that
/// renders `/metrics`. Fails if a recorder is already installed.
pub fn install_recorder(relay: &str) -> Result<PrometheusHandle, BuildError> {
    let handle = builder(relay)?.install_recorder()?;
    info!(relay, "prometheus recorder installed");
    Ok(handle)
}
