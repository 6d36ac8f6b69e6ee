use std::pin::Pin;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{future, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;

pub const DEFAULT_SYSTEM_CONTENT: &str = "
You're an assistant in a Slack workspace.
Users in the workspace will ask you to help them write something or to think better about a specific topic.
You'll respond to those questions in a professional way.
When you include markdown text, convert them to Slack compatible ones.
When a prompt has Slack's special syntax like <@USER_ID> or <#CHANNEL_ID>, you must keep them as-is in your response.
";

/// Event type carrying an incremental chunk of generated text.
pub const OUTPUT_TEXT_DELTA: &str = "response.output_text.delta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One server-sent event of a streamed response. Only the fields the relay
/// needs are decoded; everything else in the payload is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub delta: Option<String>,
}

impl ResponseEvent {
    /// Text carried by an output-text delta, `None` for every other event.
    pub fn text_delta(&self) -> Option<&str> {
        if self.event_type == OUTPUT_TEXT_DELTA {
            self.delta.as_deref()
        } else {
            None
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent>> + Send>>;

/// A model backend able to stream a completion for a transcript.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn stream_completion(&self, model: &str, messages: &[ChatMessage])
        -> Result<EventStream>;
}

/// Prepend the system instruction to the thread transcript and start a
/// streamed completion. The returned stream is handed back untouched.
pub async fn call_llm(
    backend: &dyn ModelBackend,
    model: &str,
    messages_in_thread: &[ChatMessage],
    system_content: Option<&str>,
) -> Result<EventStream> {
    let mut messages = Vec::with_capacity(messages_in_thread.len() + 1);
    messages.push(ChatMessage::new(
        Role::System,
        system_content.unwrap_or(DEFAULT_SYSTEM_CONTENT),
    ));
    messages.extend_from_slice(messages_in_thread);

    backend.stream_completion(model, &messages).await
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode a single `data:` payload. Error events become `Err` items so the
/// consumer sees a failure at the point in the stream where it happened.
fn parse_stream_event(data: &str) -> Result<ResponseEvent> {
    let event: ResponseEvent =
        serde_json::from_str(data).context("Failed to parse model stream event")?;

    if event.event_type == "error" {
        let detail: StreamError = serde_json::from_str(data).unwrap_or(StreamError {
            code: None,
            message: None,
        });
        anyhow::bail!(
            "Model backend stream error ({}): {}",
            detail.code.as_deref().unwrap_or("unknown"),
            detail.message.as_deref().unwrap_or("no message")
        );
    }

    Ok(event)
}

pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ModelBackend for LlmClient {
    async fn stream_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<EventStream> {
        let request = ResponsesRequest {
            model,
            input: messages,
            stream: true,
            max_output_tokens: self.config.max_output_tokens,
        };

        let url = format!("{}/responses", self.config.effective_base_url());

        debug!(
            "Sending streaming request to {} ({}): {} message(s)",
            self.config.provider,
            url,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to model backend")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Model backend API error ({}): {}", status, error_body);
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .take_while(|item| {
                future::ready(!matches!(item, Ok(event) if event.data.trim() == "[DONE]"))
            })
            .map(|item| match item {
                Ok(event) => parse_stream_event(&event.data),
                Err(e) => Err(anyhow!("Model backend stream interrupted: {}", e)),
            });

        Ok(Box::pin(events))
    }
}
