//! Settings type definitions.
//!
//! All types use camelCase JSON and `#[serde(default)]`, so a partial
//! settings file only needs the fields it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamerSettings {
    /// Listener and WebSocket transport settings.
    pub server: ServerSettings,
    /// Inactivity lifecycle timers.
    pub lifecycle: LifecycleSettings,
    /// Access-control and usage backend.
    pub platform: PlatformSettings,
    /// Chat completion backend.
    pub chat: ChatSettings,
    /// Speech backends (recognition and synthesis sidecars).
    pub speech: SpeechSettings,
    /// Recording hand-off.
    pub recordings: RecordingSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

/// Listener and WebSocket transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server Ping frames.
    pub heartbeat_interval_secs: u64,
    /// Close the connection when no Pong arrived for this long.
    pub pong_timeout_secs: u64,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_message_size: 16 * 1024 * 1024,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 60,
            outbound_queue: 1024,
        }
    }
}

/// Inactivity lifecycle timers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleSettings {
    /// Short grace period once data has flowed (`TIME_OUT`).
    pub time_out_ms: u64,
    /// Long grace period before any data flowed (`TIME_TO_SLEEP`).
    pub time_to_sleep_ms: u64,
    /// Upper bound on waiting for the backend task to unwind.
    pub drain_timeout_ms: u64,
    /// Log a warning each time the inbound backlog grows past a multiple of this.
    pub backlog_warn_threshold: usize,
}

impl LifecycleSettings {
    /// `time_out_ms` as a [`Duration`].
    pub fn time_out(&self) -> Duration {
        Duration::from_millis(self.time_out_ms)
    }

    /// `time_to_sleep_ms` as a [`Duration`].
    pub fn time_to_sleep(&self) -> Duration {
        Duration::from_millis(self.time_to_sleep_ms)
    }

    /// `drain_timeout_ms` as a [`Duration`].
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            time_out_ms: 2_000,
            time_to_sleep_ms: 5_000,
            drain_timeout_ms: 30_000,
            backlog_warn_threshold: 4_096,
        }
    }
}

/// Access-control and usage backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformSettings {
    /// Base URL of the backend API.
    pub base_url: String,
    /// Sent as `X-API-Key`.
    pub api_token: String,
    /// Per-request timeout.
    pub timeout_ms: u64,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_token: String::new(),
            timeout_ms: 10_000,
        }
    }
}

/// Chat completion backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// OpenAI-compatible API base URL.
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
        }
    }
}

/// Speech backends.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechSettings {
    /// WebSocket URL of the streaming recognition sidecar.
    pub recognizer_url: String,
    /// HTTP base URL of the synthesis sidecar.
    pub synthesizer_url: String,
    /// PCM sample rate of inbound audio.
    pub sample_rate: u32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            recognizer_url: "ws://127.0.0.1:8300/recognize".to_string(),
            synthesizer_url: "http://127.0.0.1:8301".to_string(),
            sample_rate: 44_100,
        }
    }
}

/// Recording hand-off to the external transcoder.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingSettings {
    /// Whether captured audio is persisted at all.
    pub enabled: bool,
    /// Output directory.
    pub dir: String,
    /// Transcoder executable.
    pub ffmpeg_path: String,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "recordings".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_defaults_match_gateway_timers() {
        let l = LifecycleSettings::default();
        assert_eq!(l.time_out(), Duration::from_secs(2));
        assert_eq!(l.time_to_sleep(), Duration::from_secs(5));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: StreamerSettings =
            serde_json::from_str(r#"{"server":{"port":9000},"lifecycle":{"timeOutMs":100}}"#)
                .unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.lifecycle.time_out_ms, 100);
        assert_eq!(s.lifecycle.time_to_sleep_ms, 5_000);
        assert_eq!(s.chat.model, "gpt-3.5-turbo");
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(StreamerSettings::default()).unwrap();
        assert!(json["lifecycle"]["timeToSleepMs"].is_number());
        assert!(json["recordings"]["ffmpegPath"].is_string());
    }
}
