pub mod slack;
pub mod socket_mode;
pub mod stream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// A message fetched from a thread's history
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ThreadMessage {
    /// Empty for messages that only carry blocks or files
    #[serde(default)]
    pub text: String,
    /// Present when the message was posted by a bot identity
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuggestedPrompt {
    pub title: String,
    pub message: String,
}

impl SuggestedPrompt {
    pub fn new(title: &str, message: &str) -> Self {
        Self {
            title: title.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlainText {
    #[serde(rename = "type")]
    pub text_type: &'static str,
    pub text: String,
}

impl PlainText {
    pub fn new(text: &str) -> Self {
        Self {
            text_type: "plain_text",
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeedbackButton {
    pub text: PlainText,
    pub accessibility_label: String,
    pub value: String,
}

/// Interactive elements allowed inside a `context_actions` block
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockElement {
    FeedbackButtons {
        action_id: String,
        positive_button: FeedbackButton,
        negative_button: FeedbackButton,
    },
}

/// Block Kit blocks this bot attaches to messages
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    ContextActions { elements: Vec<BlockElement> },
}

/// The messaging-platform operations the listeners depend on.
#[async_trait]
pub trait SlackApi: Send + Sync {
    /// Messages of a thread, oldest first.
    async fn conversations_replies(
        &self,
        channel: &str,
        ts: &str,
        oldest: &str,
        limit: u32,
    ) -> Result<Vec<ThreadMessage>>;

    async fn post_message(&self, channel: &str, thread_ts: Option<&str>, text: &str)
        -> Result<()>;

    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<()>;

    async fn set_status(
        &self,
        channel: &str,
        thread_ts: &str,
        status: &str,
        loading_messages: &[&str],
    ) -> Result<()>;

    async fn set_suggested_prompts(
        &self,
        channel: &str,
        thread_ts: &str,
        prompts: &[SuggestedPrompt],
    ) -> Result<()>;

    /// Open a streaming message in a thread and return its `ts` handle.
    async fn start_stream(&self, channel: &str, thread_ts: &str) -> Result<String>;

    async fn append_stream(&self, channel: &str, ts: &str, markdown_text: &str) -> Result<()>;

    async fn stop_stream(&self, channel: &str, ts: &str, blocks: Option<&[Block]>) -> Result<()>;
}

/// Acknowledges one inbound envelope. Cloning shares the same envelope, and
/// only the first `ack()` across all clones is sent.
#[derive(Clone)]
pub struct Ack {
    envelope_id: Option<String>,
    tx: Option<mpsc::UnboundedSender<String>>,
    sent: Arc<AtomicBool>,
}

impl Ack {
    pub fn new(envelope_id: String, tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            envelope_id: Some(envelope_id),
            tx: Some(tx),
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// An acknowledgement for an envelope that was already acked upstream.
    pub fn acknowledged() -> Self {
        Self {
            envelope_id: None,
            tx: None,
            sent: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn ack(&self) {
        if self.sent.swap(true, Ordering::SeqCst) {
            return;
        }
        if let (Some(id), Some(tx)) = (&self.envelope_id, &self.tx) {
            debug!("Acknowledging envelope {}", id);
            // The socket session may already be gone; nothing left to ack then.
            let _ = tx.send(id.clone());
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }
}
