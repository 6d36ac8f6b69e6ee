use async_trait::async_trait;
use tracing::debug;

use super::events::BlockAction;
use super::{Handler, HandlerContext, ListenerError};

pub const FEEDBACK_ACTION_ID: &str = "feedback";
pub const POSITIVE_FEEDBACK_VALUE: &str = "good-feedback";
pub const NEGATIVE_FEEDBACK_VALUE: &str = "bad-feedback";

pub const POSITIVE_FEEDBACK_REPLY: &str = "We're glad you found this useful.";
pub const NEGATIVE_FEEDBACK_REPLY: &str = "Sorry to hear that response wasn't up to par :slightly_frowning_face: Starting a new chat may help with AI mistakes and hallucinations.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Positive,
    Negative,
}

impl Feedback {
    /// Anything but the positive sentinel counts as negative.
    pub fn from_value(value: Option<&str>) -> Self {
        if value == Some(POSITIVE_FEEDBACK_VALUE) {
            Feedback::Positive
        } else {
            Feedback::Negative
        }
    }

    pub fn reply_text(self) -> &'static str {
        match self {
            Feedback::Positive => POSITIVE_FEEDBACK_REPLY,
            Feedback::Negative => NEGATIVE_FEEDBACK_REPLY,
        }
    }
}

/// Thumbs up/down on a finished response. Every click gets its own
/// ephemeral reply; repeated clicks are not deduplicated.
pub struct FeedbackHandler;

#[async_trait]
impl Handler<BlockAction> for FeedbackHandler {
    async fn handle(&self, action: BlockAction, cx: &HandlerContext) -> Result<(), ListenerError> {
        cx.ack.ack();

        let feedback = Feedback::from_value(action.value.as_deref());
        cx.slack
            .post_ephemeral(
                &action.channel_id,
                &action.user_id,
                &action.message_ts,
                feedback.reply_text(),
            )
            .await?;

        debug!(
            "Handled feedback: type={}, message_ts={}",
            action.value.as_deref().unwrap_or("<none>"),
            action.message_ts
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::listeners::events::Event;
    use crate::listeners::Router;
    use crate::platform::fake::{Call, RecordingSlack};
    use crate::platform::Ack;

    fn click(value: Option<&str>) -> BlockAction {
        BlockAction {
            action_id: FEEDBACK_ACTION_ID.into(),
            value: value.map(str::to_string),
            user_id: "U1".into(),
            channel_id: "D1".into(),
            message_ts: "200.5".into(),
        }
    }

    async fn run(slack: Arc<RecordingSlack>, value: Option<&str>) -> Vec<String> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cx = HandlerContext {
            slack,
            ack: Ack::new("env-1".into(), tx),
        };
        let mut router = Router::new();
        router.action(FEEDBACK_ACTION_ID, FeedbackHandler);

        router.handle(Event::BlockAction(click(value)), cx).await;

        let mut acks = Vec::new();
        while let Ok(id) = rx.try_recv() {
            acks.push(id);
        }
        acks
    }

    #[test]
    fn polarity_from_value() {
        assert_eq!(Feedback::from_value(Some("good-feedback")), Feedback::Positive);
        assert_eq!(Feedback::from_value(Some("bad-feedback")), Feedback::Negative);
        assert_eq!(Feedback::from_value(Some("GOOD-FEEDBACK")), Feedback::Negative);
        assert_eq!(Feedback::from_value(None), Feedback::Negative);
    }

    #[tokio::test]
    async fn positive_feedback_gets_affirmation() {
        let slack = Arc::new(RecordingSlack::default());

        let acks = run(slack.clone(), Some(POSITIVE_FEEDBACK_VALUE)).await;

        assert_eq!(acks, vec!["env-1".to_string()]);
        assert_eq!(
            slack.calls(),
            vec![Call::Ephemeral {
                channel: "D1".into(),
                user: "U1".into(),
                thread_ts: "200.5".into(),
                text: POSITIVE_FEEDBACK_REPLY.into(),
            }]
        );
    }

    #[tokio::test]
    async fn other_values_get_negative_acknowledgement() {
        for value in [Some(NEGATIVE_FEEDBACK_VALUE), Some("meh"), None] {
            let slack = Arc::new(RecordingSlack::default());

            let acks = run(slack.clone(), value).await;

            assert_eq!(acks.len(), 1);
            match &slack.calls()[..] {
                [Call::Ephemeral { text, .. }] => assert_eq!(text, NEGATIVE_FEEDBACK_REPLY),
                other => panic!("unexpected calls {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn post_failure_is_swallowed_after_ack() {
        let slack = Arc::new(RecordingSlack::failing("chat.postEphemeral"));

        let acks = run(slack.clone(), Some(POSITIVE_FEEDBACK_VALUE)).await;

        assert_eq!(acks, vec!["env-1".to_string()]);
        // no in-thread warning for feedback failures
        assert!(slack.posts().is_empty());
    }

    #[tokio::test]
    async fn handler_acks_before_replying() {
        let slack = Arc::new(RecordingSlack::failing("chat.postEphemeral"));
        let (tx, _rx) = mpsc::unbounded_channel();
        let ack = Ack::new("env-2".into(), tx);
        let cx = HandlerContext {
            slack: slack.clone(),
            ack: ack.clone(),
        };

        let result = FeedbackHandler
            .handle(click(Some(POSITIVE_FEEDBACK_VALUE)), &cx)
            .await;

        assert!(result.is_err());
        assert!(ack.is_sent());
    }
}
