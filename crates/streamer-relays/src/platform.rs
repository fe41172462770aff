//! Access-control and usage reporting client.
//!
//! Every relay asks the platform whether the handshake token may run its
//! task type before touching a backend. Relays that bill usage post a task
//! record when they finish.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use streamer_core::TaskId;
use streamer_server::relay::RelayError;
use streamer_settings::PlatformSettings;
use tracing::{debug, warn};

/// Response message that grants a task.
pub const ACCESS_GRANTED: &str = "Access granted";

const ACCESS_CONTROL_PATH: &str = "/api/v1/streamer/task/access-control";
const TASK_CREATE_PATH: &str = "/api/v1/streamer/task/create";

/// Task categories the platform authorizes and bills.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskType {
    /// Streaming speech recognition.
    SpeechToText,
    /// Neural speech synthesis.
    TextToSpeechNeural,
    /// Chat completion.
    ChatCompletion,
}

impl TaskType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpeechToText => "SPEECH_TO_TEXT",
            Self::TextToSpeechNeural => "TEXT_TO_SPEECH_NEURAL",
            Self::ChatCompletion => "CHAT_COMPLETION",
        }
    }
}

/// A granted access check.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessGrant {
    /// The user the token belongs to, when the platform reports one.
    pub user_id: Option<String>,
}

impl AccessGrant {
    /// The user id, or an access error for relays that must bill someone.
    pub fn require_user(&self) -> Result<&str, RelayError> {
        self.user_id
            .as_deref()
            .ok_or_else(|| RelayError::AccessDenied("grant carries no user".into()))
    }
}

/// One billed model in a task record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AiModelUsage {
    /// Model or service name.
    pub name: String,
    /// Operation, e.g. `speech-to-text`.
    pub option: String,
    /// Unit of `usage`, e.g. `seconds` or `tokens`.
    pub usage_type: String,
    /// Amount consumed.
    pub usage: u64,
}

/// A completed task to record.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskRecord {
    /// Fresh id for the task.
    pub task_id: TaskId,
    /// Category.
    pub task_type: TaskType,
    /// Billed user.
    pub user_id: String,
    /// Kind of `input` (`NULL`, `JSON`).
    pub input_type: String,
    /// Task input.
    pub input: String,
    /// Text result.
    pub result: String,
    /// Models consumed.
    pub ai_models: Vec<AiModelUsage>,
}

impl TaskRecord {
    /// JSON body for the task-create endpoint. `ai_models` travels as a
    /// JSON-encoded string.
    pub fn to_body(&self) -> Value {
        let ai_models = serde_json::to_string(&self.ai_models).unwrap_or_else(|_| "[]".into());
        json!({
            "task_id": self.task_id,
            "task_type": self.task_type.as_str(),
            "task_status": "SUCCESS",
            "user_id": self.user_id,
            "input_type": self.input_type,
            "input": self.input,
            "result_type": "TEXT",
            "result": self.result,
            "ai_models": ai_models,
        })
    }
}

/// Access-control and usage backend.
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Ask whether `token` may run `task_type`.
    async fn check_access(&self, token: &str, task_type: TaskType)
    -> Result<AccessGrant, RelayError>;

    /// Record a finished task.
    async fn record_task(&self, record: &TaskRecord) -> Result<(), RelayError>;
}

/// The `token` field of a handshake.
pub fn setup_token(setup: &Value) -> Result<&str, RelayError> {
    setup
        .get("token")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::AccessDenied("handshake carries no token".into()))
}

/// Post a task record, logging instead of failing.
pub async fn report_usage(platform: &dyn Platform, record: &TaskRecord) {
    match platform.record_task(record).await {
        Ok(()) => debug!(task_id = %record.task_id, "usage recorded"),
        Err(error) => warn!(task_id = %record.task_id, %error, "failed to record usage"),
    }
}

#[derive(Deserialize)]
struct AccessResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    user_id: Option<Value>,
}

/// [`Platform`] over the backend HTTP API.
pub struct HttpPlatform {
    client: Client,
    base_url: String,
    api_token: String,
}

impl HttpPlatform {
    /// Build a client from settings.
    pub fn new(settings: &PlatformSettings) -> Result<Self, RelayError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| RelayError::Platform(e.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, RelayError> {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header("X-API-Key", &self.api_token)
            .json(body)
            .send()
            .await
            .map_err(|e| RelayError::Platform(e.to_string()))
    }
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn check_access(
        &self,
        token: &str,
        task_type: TaskType,
    ) -> Result<AccessGrant, RelayError> {
        let body = json!({ "token": token, "task_type": task_type.as_str() });
        let response = self.post(ACCESS_CONTROL_PATH, &body).await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(RelayError::AccessDenied(format!("HTTP {status}")));
        }
        let parsed: AccessResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Platform(e.to_string()))?;
        match parsed.message.as_deref() {
            Some(ACCESS_GRANTED) => {}
            Some(other) => return Err(RelayError::AccessDenied(other.to_string())),
            None => return Err(RelayError::AccessDenied("no message".into())),
        }
        // The backend sends the id as a number or a string.
        let user_id = match parsed.user_id {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Ok(AccessGrant { user_id })
    }

    async fn record_task(&self, record: &TaskRecord) -> Result<(), RelayError> {
        let response = self.post(TASK_CREATE_PATH, &record.to_body()).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RelayError::Platform(format!("HTTP {status}: {text}")));
        }
        Ok(())
    }
}
