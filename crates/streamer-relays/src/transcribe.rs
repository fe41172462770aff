//! Streaming speech recognition relay.
//!
//! Audio arrives as `{AudioEvent: {AudioChunk: [u8...]}}` envelopes and is
//! decoded lazily off the bridge into the recognizer. Each word of a final
//! transcript item goes back as `{data: "<word> ", isAsleep: false}`.
//!
//! The audio stream only ends when the session escalates, so the wrap-up
//! (recording, usage) runs while the lifecycle controller drains the relay.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use streamer_core::{Notification, ProtocolError, TaskId};
use streamer_server::relay::{Relay, RelayContext, RelayError};
use tracing::{debug, info, instrument, warn};

use crate::platform::{AiModelUsage, Platform, TaskRecord, TaskType, report_usage, setup_token};
use crate::recording::Recorder;

/// Language used when the handshake names none.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Bytes per PCM sample (16-bit mono).
const BYTES_PER_SAMPLE: u64 = 2;

/// One recognition result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptItem {
    /// Recognized text.
    pub text: String,
    /// Interim hypothesis that may still change.
    pub is_partial: bool,
}

/// Streaming speech-to-text backend.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Recognize a PCM stream. Results end after the audio ends.
    async fn recognize(
        &self,
        language: &str,
        sample_rate: u32,
        audio: BoxStream<'static, Bytes>,
    ) -> Result<BoxStream<'static, Result<TranscriptItem, RelayError>>, RelayError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AudioEnvelope {
    audio_event: AudioEvent,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AudioEvent {
    audio_chunk: Vec<u8>,
}

/// Decode one inbound audio envelope into raw PCM.
pub fn decode_audio_chunk(raw: &str) -> Result<Vec<u8>, ProtocolError> {
    serde_json::from_str::<AudioEnvelope>(raw)
        .map(|envelope| envelope.audio_event.audio_chunk)
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Whole seconds of audio in `len` PCM bytes, rounded up.
pub fn audio_seconds(len: usize, sample_rate: u32) -> u64 {
    let bytes_per_second = u64::from(sample_rate.max(1)) * BYTES_PER_SAMPLE;
    (len as u64).div_ceil(bytes_per_second)
}

/// Relay for `SPEECH_TO_TEXT` tasks.
pub struct TranscriptionRelay {
    platform: Arc<dyn Platform>,
    recognizer: Arc<dyn SpeechRecognizer>,
    recorder: Option<Recorder>,
    sample_rate: u32,
}

impl TranscriptionRelay {
    /// Create a relay. Without a recorder, captured audio is discarded.
    pub fn new(
        platform: Arc<dyn Platform>,
        recognizer: Arc<dyn SpeechRecognizer>,
        recorder: Option<Recorder>,
        sample_rate: u32,
    ) -> Self {
        Self {
            platform,
            recognizer,
            recorder,
            sample_rate,
        }
    }

    async fn persist(&self, name: &str, pcm: &[u8]) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        if pcm.is_empty() {
            return;
        }
        match recorder.persist(name, pcm).await {
            Ok(path) => info!(path = %path.display(), "recording saved"),
            Err(error) => warn!(%error, "failed to save recording"),
        }
    }
}

#[async_trait]
impl Relay for TranscriptionRelay {
    fn name(&self) -> &'static str {
        "transcribe"
    }

    #[instrument(skip_all, fields(session_id = %ctx.session_id()))]
    async fn run(&self, ctx: RelayContext) -> Result<(), RelayError> {
        let setup = ctx.setup().await?;
        let language = setup
            .get("language")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_LANGUAGE)
            .to_string();
        let grant = self
            .platform
            .check_access(setup_token(&setup)?, TaskType::SpeechToText)
            .await?;
        let user_id = grant.require_user()?.to_string();
        ctx.bind_identity(&user_id)?;

        let captured = Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink = captured.clone();
        let audio = ctx
            .inbound()?
            .into_stream()
            .filter_map(move |raw| {
                let chunk = match decode_audio_chunk(&raw) {
                    Ok(chunk) => {
                        sink.lock().extend_from_slice(&chunk);
                        Some(Bytes::from(chunk))
                    }
                    Err(error) => {
                        warn!(%error, "skipping malformed audio chunk");
                        None
                    }
                };
                futures::future::ready(chunk)
            })
            .boxed();

        let mut transcript = String::new();
        let mut failure = None;
        match self.recognizer.recognize(&language, self.sample_rate, audio).await {
            Ok(mut items) => {
                while let Some(item) = items.next().await {
                    match item {
                        Ok(item) if item.is_partial => {}
                        Ok(item) => {
                            for word in item.text.split_whitespace() {
                                let _ = ctx.emit(Notification::awake(format!("{word} ")));
                                transcript.push_str(word);
                                transcript.push(' ');
                            }
                        }
                        Err(error) => {
                            failure = Some(error);
                            break;
                        }
                    }
                }
            }
            Err(error) => failure = Some(error),
        }

        let pcm = std::mem::take(&mut *captured.lock());
        let seconds = audio_seconds(pcm.len(), self.sample_rate);
        debug!(bytes = pcm.len(), seconds, "audio stream finished");
        self.persist(ctx.session_id().as_str(), &pcm).await;

        let result = match transcript.trim_end() {
            "" => ".".to_string(),
            text => text.to_string(),
        };
        let record = TaskRecord {
            task_id: TaskId::new(),
            task_type: TaskType::SpeechToText,
            user_id,
            input_type: "NULL".into(),
            input: "empty".into(),
            result,
            ai_models: vec![AiModelUsage {
                name: "aws-transcribe".into(),
                option: "speech-to-text".into(),
                usage_type: "seconds".into(),
                usage: seconds,
            }],
        };
        report_usage(self.platform.as_ref(), &record).await;

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
