use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::actions::{FEEDBACK_ACTION_ID, NEGATIVE_FEEDBACK_VALUE, POSITIVE_FEEDBACK_VALUE};
use super::events::{ThreadContext, ThreadStarted, UserMessage};
use super::{Handler, HandlerContext, ListenerError};
use crate::config::Config;
use crate::llm::{call_llm, ChatMessage, EventStream, ModelBackend, Role};
use crate::platform::stream::ChatStream;
use crate::platform::{
    Block, BlockElement, FeedbackButton, PlainText, SuggestedPrompt, ThreadMessage,
};

pub const GREETING: &str = "How can I help you?";

pub const TYPING_STATUS: &str = "is typing...";

pub const LOADING_MESSAGES: [&str; 5] = [
    "Teaching the hamsters to type faster…",
    "Untangling the internet cables…",
    "Consulting the office goldfish…",
    "Polishing up the response just for you…",
    "Convincing the AI to stop overthinking…",
];

/// Starter prompts offered when a thread opens. A thread opened from a
/// channel also gets a prompt to summarize that channel, always last.
pub fn suggested_prompts(context: &ThreadContext) -> Vec<SuggestedPrompt> {
    let mut prompts = vec![
        SuggestedPrompt::new(
            "What does Slack stand for?",
            "Slack, a business communication service, was named after an acronym. Can you guess what it stands for?",
        ),
        SuggestedPrompt::new(
            "Write a draft announcement",
            "Can you write a draft announcement about a new feature my team just released? It must include how impactful it is.",
        ),
        SuggestedPrompt::new(
            "Suggest names for my Slack app",
            "Can you suggest a few names for my Slack app? The app helps my teammates better organize information and plan priorities and action items.",
        ),
    ];

    if context.channel_id.is_some() {
        prompts.push(SuggestedPrompt::new(
            "Summarize the referred channel",
            "Can you generate a brief summary of the referred channel?",
        ));
    }

    prompts
}

/// Thumbs up/down controls attached to every finished response
pub fn create_feedback_block() -> Vec<Block> {
    vec![Block::ContextActions {
        elements: vec![BlockElement::FeedbackButtons {
            action_id: FEEDBACK_ACTION_ID.to_string(),
            positive_button: FeedbackButton {
                text: PlainText::new("Good Response"),
                accessibility_label: "Submit positive feedback on this response".to_string(),
                value: POSITIVE_FEEDBACK_VALUE.to_string(),
            },
            negative_button: FeedbackButton {
                text: PlainText::new("Bad Response"),
                accessibility_label: "Submit negative feedback on this response".to_string(),
                value: NEGATIVE_FEEDBACK_VALUE.to_string(),
            },
        }],
    }]
}

/// Thread history in order, labelled by whether a bot posted each message.
/// Messages without text are left out.
pub fn transcript_from_history(messages: &[ThreadMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|message| !message.text.trim().is_empty())
        .map(|message| {
            let role = if message.bot_id.is_none() {
                Role::User
            } else {
                Role::Assistant
            };
            ChatMessage::new(role, message.text.clone())
        })
        .collect()
}

/// Append every text delta to `stream` in arrival order. Other events are
/// skipped. Returns how many deltas were appended.
pub async fn relay_deltas(stream: &mut ChatStream, mut events: EventStream) -> Result<usize> {
    let mut appended = 0;
    while let Some(event) = events.next().await {
        let event = event?;
        match event.text_delta() {
            // chat.appendStream rejects empty markdown
            Some(delta) if !delta.is_empty() => {
                stream.append(delta).await?;
                appended += 1;
            }
            _ => continue,
        }
    }
    Ok(appended)
}

/// Greets the user and offers starter prompts when a thread opens
pub struct ThreadStartedResponder;

#[async_trait]
impl Handler<ThreadStarted> for ThreadStartedResponder {
    async fn handle(&self, event: ThreadStarted, cx: &HandlerContext) -> Result<(), ListenerError> {
        info!(
            "Assistant thread started by {} in {}/{}",
            event.user_id, event.channel_id, event.thread_ts
        );

        cx.slack
            .post_message(&event.channel_id, Some(&event.thread_ts), GREETING)
            .await?;

        let prompts = suggested_prompts(&event.context);
        cx.slack
            .set_suggested_prompts(&event.channel_id, &event.thread_ts, &prompts)
            .await?;

        Ok(())
    }
}

/// Answers a user message by streaming the model's reply into the thread
pub struct MessageRelay {
    llm: Arc<dyn ModelBackend>,
    model: String,
    system_prompt: String,
    history_limit: u32,
}

impl MessageRelay {
    pub fn new(llm: Arc<dyn ModelBackend>, config: &Config) -> Self {
        Self {
            llm,
            model: config.llm.model.clone(),
            system_prompt: config.llm.system_prompt.clone(),
            history_limit: config.assistant.history_limit,
        }
    }
}

#[async_trait]
impl Handler<UserMessage> for MessageRelay {
    async fn handle(&self, event: UserMessage, cx: &HandlerContext) -> Result<(), ListenerError> {
        let channel = event.channel_id.as_str();
        let thread_ts = event.thread_ts.as_str();

        info!(
            "Message from {} in {}/{}: {} chars",
            event.user_id,
            channel,
            thread_ts,
            event.text.len()
        );

        let replies = cx
            .slack
            .conversations_replies(channel, thread_ts, thread_ts, self.history_limit)
            .await?;
        let messages_in_thread = transcript_from_history(&replies);

        let events = call_llm(
            self.llm.as_ref(),
            &self.model,
            &messages_in_thread,
            Some(&self.system_prompt),
        )
        .await?;

        cx.slack
            .set_status(channel, thread_ts, TYPING_STATUS, &LOADING_MESSAGES)
            .await?;

        let mut stream = ChatStream::start(Arc::clone(&cx.slack), channel, thread_ts).await?;

        match relay_deltas(&mut stream, events).await {
            Ok(appended) => {
                debug!("Relayed {} delta(s) into stream {}", appended, stream.ts());
                stream.stop(Some(create_feedback_block().as_slice())).await?;
                Ok(())
            }
            Err(e) => {
                let ts = stream.ts().to_string();
                if let Err(stop_err) = stream.stop(None).await {
                    warn!("Failed to stop stream {} after error: {:#}", ts, stop_err);
                }
                Err(e.into())
            }
        }
    }
}
