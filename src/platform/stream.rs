//! A streaming message in a thread: opened once, appended to in order,
//! stopped exactly once.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use super::{Block, SlackApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Closed,
}

/// Handle to an open streaming message. Only `ChatStream::start` creates one,
/// and `stop` consumes it, so a closed stream cannot be appended to or
/// reopened. Dropping a handle that is still open stops it in the background.
pub struct ChatStream {
    slack: Arc<dyn SlackApi>,
    channel: String,
    ts: String,
    state: StreamState,
}

impl ChatStream {
    pub async fn start(slack: Arc<dyn SlackApi>, channel: &str, thread_ts: &str) -> Result<Self> {
        let ts = slack.start_stream(channel, thread_ts).await?;
        debug!("Opened stream {} in {}/{}", ts, channel, thread_ts);
        Ok(Self {
            slack,
            channel: channel.to_string(),
            ts,
            state: StreamState::Open,
        })
    }

    pub fn ts(&self) -> &str {
        &self.ts
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub async fn append(&mut self, markdown_text: &str) -> Result<()> {
        if self.state != StreamState::Open {
            anyhow::bail!("Stream {} is already closed", self.ts);
        }
        self.slack
            .append_stream(&self.channel, &self.ts, markdown_text)
            .await
    }

    /// Finalize the message, optionally attaching blocks.
    pub async fn stop(mut self, blocks: Option<&[Block]>) -> Result<()> {
        // Closed even if the call fails: a failed stop is not retried.
        self.state = StreamState::Closed;
        self.slack.stop_stream(&self.channel, &self.ts, blocks).await
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        if self.state != StreamState::Open {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Stream {} dropped while open outside a runtime", self.ts);
            return;
        };
        warn!("Stream {} dropped while open, stopping it", self.ts);
        let slack = Arc::clone(&self.slack);
        let channel = std::mem::take(&mut self.channel);
        let ts = std::mem::take(&mut self.ts);
        runtime.spawn(async move {
            if let Err(e) = slack.stop_stream(&channel, &ts, None).await {
                warn!("Failed to stop abandoned stream {}: {:#}", ts, e);
            }
        });
    }
}
