//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::StreamerSettings;

/// Resolve the path to the settings file (`~/.streamer/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".streamer").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<StreamerSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<StreamerSettings> {
    let defaults = serde_json::to_value(StreamerSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: StreamerSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from a variable lookup (the process environment in
/// production). Invalid values are logged and ignored.
pub fn apply_overrides<F>(settings: &mut StreamerSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let vars = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = vars.string("STREAMER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = vars.u16("STREAMER_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Lifecycle ───────────────────────────────────────────────────
    if let Some(v) = vars.u64("STREAMER_TIME_OUT_MS", 1, 3_600_000) {
        settings.lifecycle.time_out_ms = v;
    }
    if let Some(v) = vars.u64("STREAMER_TIME_TO_SLEEP_MS", 1, 3_600_000) {
        settings.lifecycle.time_to_sleep_ms = v;
    }

    // ── Backends ────────────────────────────────────────────────────
    if let Some(v) = vars.string("BACKEND_URL") {
        settings.platform.base_url = v;
    }
    if let Some(v) = vars.string("STREAMER_API_TOKEN") {
        settings.platform.api_token = v;
    }
    if let Some(v) = vars.string("OPENAI_API_KEY") {
        settings.chat.api_key = v;
    }
    if let Some(v) = vars.string("STREAMER_RECOGNIZER_URL") {
        settings.speech.recognizer_url = v;
    }
    if let Some(v) = vars.string("STREAMER_SYNTHESIZER_URL") {
        settings.speech.synthesizer_url = v;
    }
    if let Some(v) = vars.string("STREAMER_RECORDINGS_DIR") {
        settings.recordings.dir = v;
    }
    if let Some(v) = vars.bool("STREAMER_RECORDINGS_ENABLED") {
        settings.recordings.enabled = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = vars.string("STREAMER_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

/// Read a port from the process environment (used for relay-specific port
/// variables such as `AWS_TRANSCRIBE_PORT`).
pub fn env_port(name: &str) -> Option<u16> {
    EnvReader {
        lookup: |key: &str| std::env::var(key).ok(),
    }
    .u16(name, 1, 65535)
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}
