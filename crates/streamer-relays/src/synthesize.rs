//! Speech synthesis relay.
//!
//! One request per session: the first inbound `{text, languageCode, voiceId}`
//! is synthesized and the audio goes back as `{data: [bytes...]}`. The relay
//! then returns and the session closes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use streamer_core::{Notification, ProtocolError};
use streamer_server::relay::{Relay, RelayContext, RelayError};
use tracing::{debug, info, instrument};

use crate::platform::{Platform, TaskType, setup_token};

/// A synthesis request as the client sends it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    /// Plain text to speak.
    pub text: String,
    /// BCP-47 language code, e.g. `es-ES`.
    pub language_code: String,
    /// Backend voice name.
    pub voice_id: String,
}

/// Text-to-speech backend.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize one request into encoded audio.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Bytes, RelayError>;
}

/// Wrap text in a `<speak>` element, escaping XML metacharacters.
pub fn ssml(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 15);
    out.push_str("<speak>");
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out.push_str("</speak>");
    out
}

/// Relay for `TEXT_TO_SPEECH_NEURAL` tasks.
pub struct SynthesisRelay {
    platform: Arc<dyn Platform>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl SynthesisRelay {
    /// Create a relay over a platform client and a synthesis backend.
    pub fn new(platform: Arc<dyn Platform>, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            platform,
            synthesizer,
        }
    }
}

#[async_trait]
impl Relay for SynthesisRelay {
    fn name(&self) -> &'static str {
        "synthesize"
    }

    #[instrument(skip_all, fields(session_id = %ctx.session_id()))]
    async fn run(&self, ctx: RelayContext) -> Result<(), RelayError> {
        let setup = ctx.setup().await?;
        let _ = self
            .platform
            .check_access(setup_token(&setup)?, TaskType::TextToSpeechNeural)
            .await?;

        let mut inbound = ctx.inbound()?;
        let Some(raw) = inbound.next().await else {
            debug!("session ended before a request arrived");
            return Ok(());
        };
        let request: SynthesisRequest =
            serde_json::from_str(&raw).map_err(ProtocolError::InvalidJson)?;

        let audio = self.synthesizer.synthesize(&request).await?;
        info!(bytes = audio.len(), voice = %request.voice_id, "speech synthesized");
        let _ = ctx.emit(Notification::data(audio.to_vec()));
        Ok(())
    }
}
