//! OpenAI-compatible streaming chat backend.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use streamer_server::relay::RelayError;
use streamer_settings::ChatSettings;
use tracing::{debug, warn};

use crate::chat::{ChatCompletion, ChatMessage};
use crate::sse::sse_data_lines;

/// Streams completions from `{base_url}/chat/completions`.
pub struct OpenAiChat {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    /// Build from settings.
    pub fn new(settings: &ChatSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        }
    }
}

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Text delta of one streamed chunk. Unparseable chunks yield nothing.
fn chunk_delta(data: &str) -> Option<String> {
    match serde_json::from_str::<Chunk>(data) {
        Ok(chunk) => chunk.choices.into_iter().next()?.delta.content,
        Err(error) => {
            warn!(%error, "skipping unparseable completion chunk");
            None
        }
    }
}

/// Extract an API error message from a failed response body.
fn parse_api_error(body: &str, status: u16) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| format!("HTTP {status}: {body}"))
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<BoxStream<'static, Result<String, RelayError>>, RelayError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, messages = messages.len(), "starting completion");
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "stream": true,
            }))
            .send()
            .await
            .map_err(|e| RelayError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Backend(parse_api_error(&body, status.as_u16())));
        }

        let deltas = sse_data_lines(response.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(data) => chunk_delta(&data).map(Ok),
                Err(error) => Some(Err(error)),
            }
        });
        Ok(deltas.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat(server: &MockServer) -> OpenAiChat {
        OpenAiChat::new(&ChatSettings {
            base_url: format!("{}/v1", server.uri()),
            api_key: "sk-test".into(),
            model: "gpt-3.5-turbo".into(),
        })
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage {
            role: "user".into(),
            content: "hi".into(),
        }]
    }

    #[test]
    fn delta_extraction() {
        assert_eq!(
            chunk_delta(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).as_deref(),
            Some("Hi")
        );
        assert_eq!(chunk_delta(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#), None);
        assert_eq!(chunk_delta(r#"{"choices":[]}"#), None);
        assert_eq!(chunk_delta("garbage"), None);
    }

    #[test]
    fn api_error_message() {
        assert_eq!(
            parse_api_error(r#"{"error":{"message":"Invalid key"}}"#, 401),
            "Invalid key"
        );
        assert!(parse_api_error("Bad Gateway", 502).contains("502"));
    }

    #[tokio::test]
    async fn streams_content_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-3.5-turbo", "stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let stream = chat(&server).stream(messages()).await.unwrap();
        let deltas: Vec<String> = stream.map(Result::unwrap).collect().await;
        assert_eq!(deltas, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn error_status_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": {"message": "Invalid key"}})),
            )
            .mount(&server)
            .await;

        let error = chat(&server).stream(messages()).await.err();
        assert_matches!(error, Some(RelayError::Backend(m)) if m == "Invalid key");
    }
}
