//! Relay selection and wiring.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use streamer_relays::{
    ChatRelay, HttpPlatform, OpenAiChat, Platform, Recorder, SidecarRecognizer,
    SidecarSynthesizer, SynthesisRelay, TranscriptionRelay,
};
use streamer_server::relay::Relay;
use streamer_settings::{StreamerSettings, loader::env_port};

/// Which relay this process serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RelayKind {
    /// Streaming speech recognition.
    Transcribe,
    /// Speech synthesis.
    Synthesize,
    /// Streaming chat completion.
    Chat,
}

impl RelayKind {
    /// Environment variable holding this relay's port.
    pub fn port_var(self) -> &'static str {
        match self {
            Self::Transcribe => "AWS_TRANSCRIBE_PORT",
            Self::Synthesize => "AWS_POLLY_PORT",
            Self::Chat => "OPENAIGPT_PORT",
        }
    }

    /// Port from the relay-specific environment variable, if set and valid.
    pub fn env_port(self) -> Option<u16> {
        env_port(self.port_var())
    }
}

/// Build the selected relay with its production backends.
pub fn build_relay(kind: RelayKind, settings: &StreamerSettings) -> Result<Arc<dyn Relay>> {
    let platform: Arc<dyn Platform> = Arc::new(
        HttpPlatform::new(&settings.platform).context("Failed to build platform client")?,
    );
    let relay: Arc<dyn Relay> = match kind {
        RelayKind::Transcribe => {
            let sample_rate = settings.speech.sample_rate;
            Arc::new(TranscriptionRelay::new(
                platform,
                Arc::new(SidecarRecognizer::new(&settings.speech)),
                Recorder::from_settings(&settings.recordings, sample_rate),
                sample_rate,
            ))
        }
        RelayKind::Synthesize => Arc::new(SynthesisRelay::new(
            platform,
            Arc::new(SidecarSynthesizer::new(&settings.speech)),
        )),
        RelayKind::Chat => Arc::new(ChatRelay::new(
            platform,
            Arc::new(OpenAiChat::new(&settings.chat)),
        )),
    };
    Ok(relay)
}
