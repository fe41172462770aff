//! # streamer-relays
//!
//! Relay handlers served by the gateway, plus the collaborators they drive.
//!
//! - [`transcribe`]: streaming speech recognition (`SPEECH_TO_TEXT`)
//! - [`synthesize`]: speech synthesis (`TEXT_TO_SPEECH_NEURAL`)
//! - [`chat`]: streaming chat completion (`CHAT_COMPLETION`)
//! - [`platform`]: access-control and usage reporting client
//! - [`openai`], [`sidecar`]: backend adapters
//! - [`recording`]: WAV capture and hand-off to the external transcoder

#![deny(unsafe_code)]

pub mod chat;
pub mod openai;
pub mod platform;
pub mod recording;
pub mod sidecar;
pub mod sse;
pub mod synthesize;
pub mod transcribe;

#[cfg(test)]
pub(crate) mod testing;

pub use chat::{ChatCompletion, ChatMessage, ChatRelay};
pub use openai::OpenAiChat;
pub use platform::{AccessGrant, HttpPlatform, Platform, TaskRecord, TaskType};
pub use recording::Recorder;
pub use sidecar::{SidecarRecognizer, SidecarSynthesizer};
pub use synthesize::{SpeechSynthesizer, SynthesisRequest, SynthesisRelay};
pub use transcribe::{SpeechRecognizer, TranscriptItem, TranscriptionRelay};
