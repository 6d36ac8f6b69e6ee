//! Socket Mode transport: receives event envelopes over a websocket,
//! acknowledges them and hands decoded events to the router.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use super::slack::SlackClient;
use super::{Ack, SlackApi};
use crate::listeners::events::Event;
use crate::listeners::{HandlerContext, Router};

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub envelope_id: Option<String>,
    #[serde(rename = "type")]
    pub envelope_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Decode a websocket frame. Control frames carry no envelope.
pub fn parse_envelope(message: WsMessage) -> Result<Option<Envelope>> {
    let text = match message {
        WsMessage::Text(text) => text,
        WsMessage::Binary(bytes) => {
            String::from_utf8(bytes).context("Invalid UTF-8 in Socket Mode frame")?
        }
        _ => return Ok(None),
    };
    let envelope = serde_json::from_str(&text).context("Failed to parse Socket Mode envelope")?;
    Ok(Some(envelope))
}

/// What the session loop should do after an envelope
#[derive(Debug)]
pub enum Flow {
    Continue,
    Dispatched(JoinHandle<()>),
    Reconnect,
}

/// Routes envelopes to listeners. Each event is handled on its own task.
#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<Router>,
    slack: Arc<dyn SlackApi>,
}

impl Dispatcher {
    pub fn new(router: Arc<Router>, slack: Arc<dyn SlackApi>) -> Self {
        Self { router, slack }
    }

    fn ack_for(envelope: &Envelope, ack_tx: &mpsc::UnboundedSender<String>) -> Ack {
        match &envelope.envelope_id {
            Some(id) => Ack::new(id.clone(), ack_tx.clone()),
            None => Ack::acknowledged(),
        }
    }

    pub fn on_envelope(&self, envelope: Envelope, ack_tx: &mpsc::UnboundedSender<String>) -> Flow {
        let ack = Self::ack_for(&envelope, ack_tx);

        let decoded = match envelope.envelope_type.as_str() {
            "hello" => {
                info!("Socket Mode connection ready");
                return Flow::Continue;
            }
            "disconnect" => {
                info!(
                    "Slack asked to disconnect ({})",
                    envelope.reason.as_deref().unwrap_or("no reason")
                );
                return Flow::Reconnect;
            }
            "events_api" => {
                // Events API envelopes are acked on receipt; handlers may run long.
                ack.ack();
                Event::from_events_api(&envelope.payload)
            }
            "interactive" => Event::from_interactive(&envelope.payload),
            other => {
                debug!("Ignoring {} envelope", other);
                ack.ack();
                return Flow::Continue;
            }
        };

        match decoded {
            Ok(Some(event)) => {
                let router = Arc::clone(&self.router);
                let cx = HandlerContext {
                    slack: Arc::clone(&self.slack),
                    ack,
                };
                Flow::Dispatched(tokio::spawn(async move {
                    router.handle(event, cx).await;
                }))
            }
            Ok(None) => {
                ack.ack();
                Flow::Continue
            }
            Err(e) => {
                ack.ack();
                let target = match envelope.envelope_type.as_str() {
                    "events_api" => Event::failure_target(&envelope.payload),
                    _ => None,
                };
                let Some((channel, thread_ts)) = target else {
                    warn!("Dropping {} envelope: {:#}", envelope.envelope_type, e);
                    return Flow::Continue;
                };
                let router = Arc::clone(&self.router);
                let slack = Arc::clone(&self.slack);
                Flow::Dispatched(tokio::spawn(async move {
                    router
                        .report_failure(
                            slack.as_ref(),
                            "events_api",
                            Some((channel.as_str(), thread_ts.as_str())),
                            &e,
                        )
                        .await;
                }))
            }
        }
    }
}

/// Wait before the next connection attempt. Sessions Slack ends on purpose
/// are replaced right away; failures back off.
fn reconnect_wait(ended: &Result<SessionEnd>, delay: Duration) -> Duration {
    match ended {
        Ok(_) => Duration::ZERO,
        Err(_) => delay,
    }
}

enum SessionEnd {
    Reconnect,
    Shutdown,
}

pub struct SocketMode {
    client: Arc<SlackClient>,
    dispatcher: Dispatcher,
    reconnect_delay: Duration,
}

impl SocketMode {
    pub fn new(client: Arc<SlackClient>, router: Arc<Router>, reconnect_delay: Duration) -> Self {
        let slack: Arc<dyn SlackApi> = client.clone();
        Self {
            client,
            dispatcher: Dispatcher::new(router, slack),
            reconnect_delay,
        }
    }

    /// Connect and serve until Ctrl-C, reconnecting whenever a session ends.
    pub async fn run(&self) -> Result<()> {
        loop {
            let ended = match self.client.open_connection().await {
                Ok(url) => self.run_session(&url).await,
                Err(e) => Err(e.context("Failed to open Socket Mode connection")),
            };
            match &ended {
                Ok(SessionEnd::Shutdown) => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                Ok(SessionEnd::Reconnect) => info!("Socket Mode session ended"),
                Err(e) => error!("Socket Mode session error: {:#}", e),
            }

            let wait = reconnect_wait(&ended, self.reconnect_delay);
            if !wait.is_zero() {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown requested");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            info!("Reconnecting to Slack...");
        }
    }

    async fn run_session(&self, url: &str) -> Result<SessionEnd> {
        let (socket, _response) = connect_async(url)
            .await
            .context("Failed to connect Socket Mode websocket")?;
        let (mut sink, mut source) = socket.split();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<String>();

        info!("Socket Mode websocket connected");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    return Ok(SessionEnd::Shutdown);
                }
                Some(envelope_id) = ack_rx.recv() => {
                    let ack = json!({ "envelope_id": envelope_id }).to_string();
                    sink.send(WsMessage::Text(ack))
                        .await
                        .context("Failed to send Socket Mode ack")?;
                }
                frame = source.next() => {
                    let Some(frame) = frame else {
                        return Ok(SessionEnd::Reconnect);
                    };
                    let frame = frame.context("Failed reading Socket Mode websocket")?;
                    if let WsMessage::Close(close) = &frame {
                        debug!("Websocket closed by Slack: {:?}", close);
                        return Ok(SessionEnd::Reconnect);
                    }
                    let envelope = match parse_envelope(frame) {
                        Ok(Some(envelope)) => envelope,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!("Skipping unreadable frame: {:#}", e);
                            continue;
                        }
                    };
                    if let Flow::Reconnect = self.dispatcher.on_envelope(envelope, &ack_tx) {
                        return Ok(SessionEnd::Reconnect);
                    }
                }
            }
        }
    }
}
