//! Server configuration.

use std::time::Duration;

use streamer_settings::StreamerSettings;

use crate::session::lifecycle::LifecycleConfig;

/// Configuration for the gateway server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server Ping frames.
    pub heartbeat_interval: Duration,
    /// Close when no Pong arrived for this long.
    pub pong_timeout: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
    /// Inbound backlog size that triggers a warning.
    pub backlog_warn_threshold: usize,
    /// Per-session timers.
    pub lifecycle: LifecycleConfig,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &StreamerSettings) -> Self {
        let server = &settings.server;
        let lifecycle = &settings.lifecycle;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_message_size: server.max_message_size,
            heartbeat_interval: Duration::from_secs(server.heartbeat_interval_secs),
            pong_timeout: Duration::from_secs(server.pong_timeout_secs),
            outbound_queue: server.outbound_queue.max(1),
            backlog_warn_threshold: lifecycle.backlog_warn_threshold,
            lifecycle: LifecycleConfig {
                time_out: lifecycle.time_out(),
                time_to_sleep: lifecycle.time_to_sleep(),
                drain_timeout: lifecycle.drain_timeout(),
            },
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            outbound_queue: 1024,
            backlog_warn_threshold: 4096,
            lifecycle: LifecycleConfig::default(),
        }
    }
}
