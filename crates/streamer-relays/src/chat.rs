//! Streaming chat completion relay.
//!
//! The first inbound message is a JSON array of chat messages. Each
//! non-empty delta from the backend is sent as `{data: "<delta>"}`, followed
//! by a terminal `{data: null}` once the completion ends.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use streamer_core::{Notification, ProtocolError, TaskId};
use streamer_server::relay::{Relay, RelayContext, RelayError};
use tracing::{debug, info, instrument};

use crate::platform::{AiModelUsage, Platform, TaskRecord, TaskType, report_usage, setup_token};

/// Characters per token used for usage estimates.
pub const CHARS_PER_TOKEN: usize = 4;

/// One chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// A streaming completion backend.
#[async_trait]
pub trait ChatCompletion: Send + Sync + 'static {
    /// Model name used for billing.
    fn model(&self) -> &str;

    /// Start a completion and stream its text deltas.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<BoxStream<'static, Result<String, RelayError>>, RelayError>;
}

/// Rough token count: one token per [`CHARS_PER_TOKEN`] characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
}

/// Relay for `CHAT_COMPLETION` tasks.
pub struct ChatRelay {
    platform: Arc<dyn Platform>,
    backend: Arc<dyn ChatCompletion>,
}

impl ChatRelay {
    /// Create a relay over a platform client and a completion backend.
    pub fn new(platform: Arc<dyn Platform>, backend: Arc<dyn ChatCompletion>) -> Self {
        Self { platform, backend }
    }
}

#[async_trait]
impl Relay for ChatRelay {
    fn name(&self) -> &'static str {
        "chat"
    }

    #[instrument(skip_all, fields(session_id = %ctx.session_id()))]
    async fn run(&self, ctx: RelayContext) -> Result<(), RelayError> {
        let setup = ctx.setup().await?;
        let grant = self
            .platform
            .check_access(setup_token(&setup)?, TaskType::ChatCompletion)
            .await?;
        let user_id = grant.require_user()?.to_string();

        let mut inbound = ctx.inbound()?;
        let Some(raw) = inbound.next().await else {
            debug!("session ended before a prompt arrived");
            return Ok(());
        };
        let messages: Vec<ChatMessage> =
            serde_json::from_str(&raw).map_err(ProtocolError::InvalidJson)?;

        let mut deltas = self.backend.stream(messages).await?;
        let mut output = String::new();
        while let Some(delta) = deltas.next().await {
            let delta = delta?;
            if delta.is_empty() {
                continue;
            }
            output.push_str(&delta);
            let _ = ctx.emit(Notification::data(delta));
        }
        let _ = ctx.send(&Notification::terminal());

        let tokens = estimate_tokens(&raw) + estimate_tokens(&output);
        info!(tokens, "completion finished");
        let record = TaskRecord {
            task_id: TaskId::new(),
            task_type: TaskType::ChatCompletion,
            user_id,
            input_type: "JSON".into(),
            input: raw,
            result: output,
            ai_models: vec![AiModelUsage {
                name: self.backend.model().to_string(),
                option: "chat-completion".into(),
                usage_type: "tokens".into(),
                usage: tokens,
            }],
        };
        report_usage(self.platform.as_ref(), &record).await;
        Ok(())
    }
}
