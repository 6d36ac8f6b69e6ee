//! Typed records for the events the listeners react to, decoded from
//! Socket Mode payloads. Required fields are checked here so handlers
//! never look up keys themselves.

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use super::ListenerError;

/// Where an assistant thread was opened from
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ThreadContext {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub enterprise_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStarted {
    pub user_id: String,
    pub channel_id: String,
    pub thread_ts: String,
    pub context: ThreadContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub user_id: String,
    pub channel_id: String,
    pub thread_ts: String,
    pub ts: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAction {
    pub action_id: String,
    pub value: Option<String>,
    pub user_id: String,
    pub channel_id: String,
    pub message_ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ThreadStarted(ThreadStarted),
    UserMessage(UserMessage),
    BlockAction(BlockAction),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ThreadStarted(_) => "assistant_thread_started",
            Event::UserMessage(_) => "user message",
            Event::BlockAction(_) => "block action",
        }
    }

    /// Channel and thread a failure notice should go to, if any.
    pub fn reply_target(&self) -> Option<(&str, &str)> {
        match self {
            Event::ThreadStarted(e) => Some((&e.channel_id, &e.thread_ts)),
            Event::UserMessage(e) => Some((&e.channel_id, &e.thread_ts)),
            Event::BlockAction(_) => None,
        }
    }

    /// Decode an `events_api` payload. `Ok(None)` means the event is not
    /// assistant traffic.
    pub fn from_events_api(payload: &Value) -> Result<Option<Event>, ListenerError> {
        let callback: EventCallback = serde_json::from_value(payload.clone())
            .context("Failed to decode event callback payload")?;
        if callback.callback_type != "event_callback" {
            return Ok(None);
        }
        let Some(event) = callback.event else {
            return Err(missing("event", "event_callback"));
        };
        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match event_type.as_str() {
            "assistant_thread_started" => {
                const PAYLOAD: &str = "assistant_thread_started";
                let raw: RawThreadStarted = serde_json::from_value(event)
                    .context("Failed to decode assistant_thread_started event")?;
                let thread = raw
                    .assistant_thread
                    .ok_or_else(|| missing("assistant_thread", PAYLOAD))?;
                Ok(Some(Event::ThreadStarted(ThreadStarted {
                    user_id: required(thread.user_id, "assistant_thread.user_id", PAYLOAD)?,
                    channel_id: required(thread.channel_id, "assistant_thread.channel_id", PAYLOAD)?,
                    thread_ts: required(thread.thread_ts, "assistant_thread.thread_ts", PAYLOAD)?,
                    context: thread.context,
                })))
            }
            "message" => {
                let raw: RawMessage =
                    serde_json::from_value(event).context("Failed to decode message event")?;
                if !raw.is_assistant_user_message() {
                    return Ok(None);
                }
                Ok(Some(Event::UserMessage(UserMessage {
                    user_id: required(raw.user, "user", "message")?,
                    channel_id: required(raw.channel, "channel", "message")?,
                    thread_ts: required(raw.thread_ts, "thread_ts", "message")?,
                    ts: required(raw.ts, "ts", "message")?,
                    text: raw.text.unwrap_or_default(),
                })))
            }
            _ => Ok(None),
        }
    }

    /// Channel and thread named by an `events_api` payload, read loosely so a
    /// payload that failed to decode can still be answered in its thread.
    pub fn failure_target(payload: &Value) -> Option<(String, String)> {
        let event = payload.get("event")?;
        let thread = event.get("assistant_thread").unwrap_or(event);
        let channel = thread
            .get("channel_id")
            .or_else(|| thread.get("channel"))?
            .as_str()?;
        let thread_ts = thread.get("thread_ts")?.as_str()?;
        Some((channel.to_string(), thread_ts.to_string()))
    }

    /// Decode an `interactive` payload. Only `block_actions` are routed.
    pub fn from_interactive(payload: &Value) -> Result<Option<Event>, ListenerError> {
        let raw: RawInteraction = serde_json::from_value(payload.clone())
            .context("Failed to decode interactive payload")?;
        if raw.interaction_type != "block_actions" {
            return Ok(None);
        }
        const PAYLOAD: &str = "block_actions";

        let action = raw
            .actions
            .into_iter()
            .next()
            .ok_or_else(|| missing("actions[0]", PAYLOAD))?;
        let message_ts = raw
            .message
            .and_then(|m| m.ts)
            .or_else(|| raw.container.as_ref().and_then(|c| c.message_ts.clone()));
        let channel_id = raw
            .channel
            .and_then(|c| c.id)
            .or_else(|| raw.container.and_then(|c| c.channel_id));

        Ok(Some(Event::BlockAction(BlockAction {
            action_id: required(action.action_id, "actions[0].action_id", PAYLOAD)?,
            value: action.value,
            user_id: required(raw.user.and_then(|u| u.id), "user.id", PAYLOAD)?,
            channel_id: required(channel_id, "channel.id", PAYLOAD)?,
            message_ts: required(message_ts, "message.ts", PAYLOAD)?,
        })))
    }
}

fn missing(field: &'static str, payload: &'static str) -> ListenerError {
    ListenerError::MissingField { field, payload }
}

fn required<T>(
    value: Option<T>,
    field: &'static str,
    payload: &'static str,
) -> Result<T, ListenerError> {
    value.ok_or_else(|| missing(field, payload))
}

#[derive(Debug, Deserialize)]
struct EventCallback {
    #[serde(rename = "type")]
    callback_type: String,
    #[serde(default)]
    event: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawThreadStarted {
    #[serde(default)]
    assistant_thread: Option<RawAssistantThread>,
}

#[derive(Debug, Deserialize)]
struct RawAssistantThread {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    context: ThreadContext,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channel_type: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
}

impl RawMessage {
    /// A human reply inside an assistant (direct message) thread
    fn is_assistant_user_message(&self) -> bool {
        self.channel_type.as_deref() == Some("im")
            && self.thread_ts.is_some()
            && self.subtype.is_none()
            && self.bot_id.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct RawInteraction {
    #[serde(rename = "type")]
    interaction_type: String,
    #[serde(default)]
    user: Option<IdRef>,
    #[serde(default)]
    channel: Option<IdRef>,
    #[serde(default)]
    message: Option<MessageRef>,
    #[serde(default)]
    container: Option<Container>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Container {
    #[serde(default)]
    message_ts: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(default)]
    action_id: Option<String>,
    #[serde(default)]
    value: Option<String>,
}
