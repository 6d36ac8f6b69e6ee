pub mod actions;
pub mod assistant;
pub mod events;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::Config;
use crate::llm::ModelBackend;
use crate::platform::{Ack, SlackApi};

use self::actions::{FeedbackHandler, FEEDBACK_ACTION_ID};
use self::assistant::{MessageRelay, ThreadStartedResponder};
use self::events::{BlockAction, Event, ThreadStarted, UserMessage};

/// Posted in-thread when a handler fails. Details stay in the logs.
pub const FAILURE_TEXT: &str = ":warning: Something went wrong!";

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("missing required field `{field}` in {payload} payload")]
    MissingField {
        field: &'static str,
        payload: &'static str,
    },
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

/// What a handler gets besides its event
#[derive(Clone)]
pub struct HandlerContext {
    pub slack: Arc<dyn SlackApi>,
    pub ack: Ack,
}

#[async_trait]
pub trait Handler<E: Send + 'static>: Send + Sync {
    async fn handle(&self, event: E, cx: &HandlerContext) -> Result<(), ListenerError>;
}

/// Maps decoded events to the handlers registered for them
#[derive(Default)]
pub struct Router {
    thread_started: Option<Arc<dyn Handler<ThreadStarted>>>,
    user_message: Option<Arc<dyn Handler<UserMessage>>>,
    actions: HashMap<String, Arc<dyn Handler<BlockAction>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_started(&mut self, handler: impl Handler<ThreadStarted> + 'static) -> &mut Self {
        self.thread_started = Some(Arc::new(handler));
        self
    }

    pub fn user_message(&mut self, handler: impl Handler<UserMessage> + 'static) -> &mut Self {
        self.user_message = Some(Arc::new(handler));
        self
    }

    pub fn action(
        &mut self,
        action_id: &str,
        handler: impl Handler<BlockAction> + 'static,
    ) -> &mut Self {
        self.actions.insert(action_id.to_string(), Arc::new(handler));
        self
    }

    async fn dispatch(&self, event: Event, cx: &HandlerContext) -> Result<(), ListenerError> {
        match event {
            Event::ThreadStarted(e) => match &self.thread_started {
                Some(h) => h.handle(e, cx).await,
                None => {
                    debug!("No thread_started listener registered");
                    Ok(())
                }
            },
            Event::UserMessage(e) => match &self.user_message {
                Some(h) => h.handle(e, cx).await,
                None => {
                    debug!("No user_message listener registered");
                    Ok(())
                }
            },
            Event::BlockAction(e) => match self.actions.get(&e.action_id) {
                Some(h) => h.handle(e, cx).await,
                None => {
                    debug!("No listener for action '{}'", e.action_id);
                    Ok(())
                }
            },
        }
    }

    /// Run the matching handler to completion. This is the one place where
    /// failures are logged and turned into the user-visible notice; it never
    /// returns an error, so one bad event cannot stop the next.
    pub async fn handle(&self, event: Event, cx: HandlerContext) {
        let kind = event.kind();
        let target = event
            .reply_target()
            .map(|(channel, thread_ts)| (channel.to_string(), thread_ts.to_string()));

        if let Err(e) = self.dispatch(event, &cx).await {
            let target = target
                .as_ref()
                .map(|(channel, thread_ts)| (channel.as_str(), thread_ts.as_str()));
            self.report_failure(cx.slack.as_ref(), kind, target, &e).await;
        }

        // Handlers ack first when they care about timing; make sure the
        // envelope is acknowledged regardless of outcome.
        cx.ack.ack();
    }

    /// Log `err` and, when the event belongs to a thread, post the generic
    /// notice there. Also used for payloads that never decoded into an event.
    pub async fn report_failure(
        &self,
        slack: &dyn SlackApi,
        kind: &str,
        target: Option<(&str, &str)>,
        err: &ListenerError,
    ) {
        error!("Failed to handle {} event: {:#}", kind, err);
        let Some((channel, thread_ts)) = target else {
            return;
        };
        if let Err(post_err) = slack
            .post_message(channel, Some(thread_ts), FAILURE_TEXT)
            .await
        {
            error!("Failed to post failure notice to {}: {:#}", channel, post_err);
        }
    }
}

/// Attach the assistant and feedback listeners to `router`.
pub fn register_listeners(router: &mut Router, llm: Arc<dyn ModelBackend>, config: &Config) {
    router
        .thread_started(ThreadStartedResponder)
        .user_message(MessageRelay::new(llm, config))
        .action(FEEDBACK_ACTION_ID, FeedbackHandler);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;
    use crate::listeners::events::ThreadContext;
    use crate::platform::fake::{Call, RecordingSlack};

    struct Failing;

    #[async_trait]
    impl Handler<ThreadStarted> for Failing {
        async fn handle(&self, _: ThreadStarted, _: &HandlerContext) -> Result<(), ListenerError> {
            Err(anyhow::anyhow!("token_revoked").into())
        }
    }

    #[async_trait]
    impl Handler<BlockAction> for Failing {
        async fn handle(&self, _: BlockAction, _: &HandlerContext) -> Result<(), ListenerError> {
            Err(anyhow::anyhow!("channel_not_found").into())
        }
    }

    #[derive(Clone, Default)]
    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler<BlockAction> for Counting {
        async fn handle(&self, _: BlockAction, cx: &HandlerContext) -> Result<(), ListenerError> {
            cx.ack.ack();
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn started() -> Event {
        Event::ThreadStarted(ThreadStarted {
            user_id: "U1".into(),
            channel_id: "D1".into(),
            thread_ts: "100.1".into(),
            context: ThreadContext::default(),
        })
    }

    fn action(action_id: &str) -> Event {
        Event::BlockAction(BlockAction {
            action_id: action_id.into(),
            value: Some("good-feedback".into()),
            user_id: "U1".into(),
            channel_id: "D1".into(),
            message_ts: "200.5".into(),
        })
    }

    fn context(slack: Arc<RecordingSlack>) -> (HandlerContext, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cx = HandlerContext {
            slack,
            ack: Ack::new("env-1".into(), tx),
        };
        (cx, rx)
    }

    #[tokio::test]
    async fn failure_in_thread_handler_posts_one_generic_notice() {
        let mut router = Router::new();
        router.thread_started(Failing);
        let slack = Arc::new(RecordingSlack::default());
        let (cx, _rx) = context(slack.clone());

        router.handle(started(), cx).await;

        assert_eq!(
            slack.calls(),
            vec![Call::Post {
                channel: "D1".into(),
                thread_ts: Some("100.1".into()),
                text: FAILURE_TEXT.into(),
            }]
        );
        assert!(!slack.posts()[0].contains("token_revoked"));
    }

    #[tokio::test]
    async fn failure_in_action_handler_is_logged_only() {
        let mut router = Router::new();
        router.action("feedback", Failing);
        let slack = Arc::new(RecordingSlack::default());
        let (cx, mut rx) = context(slack.clone());

        router.handle(action("feedback"), cx).await;

        assert!(slack.calls().is_empty());
        assert_eq!(rx.try_recv().unwrap(), "env-1");
    }

    #[tokio::test]
    async fn actions_route_by_id_and_ack_once() {
        let counter = Counting::default();
        let mut router = Router::new();
        router.action("feedback", counter.clone());
        let slack = Arc::new(RecordingSlack::default());

        let (cx, mut rx) = context(slack.clone());
        router.handle(action("feedback"), cx).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_recv().unwrap(), "env-1");
        assert!(rx.try_recv().is_err());

        let (cx, mut rx) = context(slack);
        router.handle(action("something_else"), cx).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        // unrouted interactions are still acknowledged
        assert_eq!(rx.try_recv().unwrap(), "env-1");
    }

    #[tokio::test]
    async fn unregistered_events_are_noops() {
        let router = Router::new();
        let slack = Arc::new(RecordingSlack::default());
        let (cx, _rx) = context(slack.clone());

        router.handle(started(), cx).await;

        assert!(slack.calls().is_empty());
    }
}
