//! # streamer-settings
//!
//! Configuration for the streamer gateway, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`StreamerSettings::default()`]
//! 2. **User file**: `~/.streamer/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: highest priority
//!
//! Process configuration is owned by the binary; the session core only ever
//! sees the already-resolved values.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
