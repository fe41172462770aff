//! Speech backends reached through local sidecar services.
//!
//! The recognizer sidecar speaks WebSocket: binary PCM frames in, JSON
//! `{text, isPartial}` results out, and a text `EOS` frame once the audio
//! ends. The synthesizer sidecar is a plain HTTP endpoint returning audio.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use streamer_server::relay::RelayError;
use streamer_settings::SpeechSettings;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use crate::synthesize::{SpeechSynthesizer, SynthesisRequest, ssml};
use crate::transcribe::{SpeechRecognizer, TranscriptItem};

/// Text frame that tells the recognizer no more audio follows.
pub const END_OF_STREAM: &str = "EOS";

fn backend<E: std::fmt::Display>(error: E) -> RelayError {
    RelayError::Backend(error.to_string())
}

/// Synthesizes speech with `POST {synthesizer_url}/synthesize`.
pub struct SidecarSynthesizer {
    client: Client,
    base_url: String,
}

impl SidecarSynthesizer {
    /// Build from settings.
    pub fn new(settings: &SpeechSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.synthesizer_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for SidecarSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Bytes, RelayError> {
        let response = self
            .client
            .post(format!("{}/synthesize", self.base_url))
            .json(&json!({
                "text": ssml(&request.text),
                "textType": "ssml",
                "languageCode": request.language_code,
                "voiceId": request.voice_id,
                "outputFormat": "mp3",
                "engine": "neural",
            }))
            .send()
            .await
            .map_err(backend)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Backend(format!("HTTP {status}: {body}")));
        }
        response.bytes().await.map_err(backend)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionFrame {
    #[serde(default)]
    text: String,
    #[serde(default)]
    is_partial: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Streams audio to the recognition sidecar over WebSocket.
pub struct SidecarRecognizer {
    url: String,
}

impl SidecarRecognizer {
    /// Build from settings.
    pub fn new(settings: &SpeechSettings) -> Self {
        Self {
            url: settings.recognizer_url.clone(),
        }
    }

    fn session_url(&self, language: &str, sample_rate: u32) -> Result<Url, RelayError> {
        let mut url = Url::parse(&self.url).map_err(backend)?;
        let _ = url
            .query_pairs_mut()
            .append_pair("language", language)
            .append_pair("sampleRate", &sample_rate.to_string());
        Ok(url)
    }
}

#[async_trait]
impl SpeechRecognizer for SidecarRecognizer {
    async fn recognize(
        &self,
        language: &str,
        sample_rate: u32,
        mut audio: BoxStream<'static, Bytes>,
    ) -> Result<BoxStream<'static, Result<TranscriptItem, RelayError>>, RelayError> {
        let url = self.session_url(language, sample_rate)?;
        let (ws, _) = connect_async(url.as_str()).await.map_err(backend)?;
        debug!(%url, "recognizer connected");
        let (mut sink, source) = ws.split();

        let writer = AbortOnDropHandle::new(tokio::spawn(async move {
            while let Some(chunk) = audio.next().await {
                if let Err(error) = sink.send(Message::Binary(chunk)).await {
                    warn!(%error, "recognizer stopped accepting audio");
                    return;
                }
            }
            let _ = sink.send(Message::Text(END_OF_STREAM.into())).await;
        }));

        let results = futures::stream::unfold(Some((source, writer)), |state| async move {
            let (mut source, writer) = state?;
            loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RecognitionFrame>(text.as_str()) {
                            Ok(RecognitionFrame {
                                error: Some(error), ..
                            }) => return Some((Err(RelayError::Backend(error)), None)),
                            Ok(frame) => {
                                let item = TranscriptItem {
                                    text: frame.text,
                                    is_partial: frame.is_partial,
                                };
                                return Some((Ok(item), Some((source, writer))));
                            }
                            Err(error) => warn!(%error, "skipping unparseable recognizer frame"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return Some((Err(backend(error)), None)),
                }
            }
        });
        Ok(results.boxed())
    }
}
