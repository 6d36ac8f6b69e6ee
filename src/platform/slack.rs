use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{Block, SlackApi, SuggestedPrompt, ThreadMessage};
use crate::config::SlackConfig;

/// Envelope every Web API method answers with
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RepliesResponse {
    #[serde(default)]
    messages: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    ts: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpenResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Empty {}

#[derive(Debug, Serialize)]
struct ReplyParams<'a> {
    channel: &'a str,
    ts: &'a str,
    oldest: &'a str,
    limit: u32,
}

/// Slack Web API client authenticated with the bot token
pub struct SlackClient {
    client: reqwest::Client,
    api_url: String,
    bot_token: String,
    app_token: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            app_token: config.app_token.clone(),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        debug!("Calling Slack API: {}", method);

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request to Slack {}", method))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Slack {} HTTP error ({}): {}", method, status, error_body);
        }

        let parsed: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Slack {} response", method))?;

        if !parsed.ok {
            anyhow::bail!(
                "Slack {} failed: {}",
                method,
                parsed.error.as_deref().unwrap_or("unknown_error")
            );
        }

        parsed
            .data
            .with_context(|| format!("Slack {} response is missing expected fields", method))
    }

    /// JSON-bodied write method
    async fn call_bot<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let request = self
            .client
            .post(format!("{}/{}", self.api_url, method))
            .bearer_auth(&self.bot_token)
            .json(&body);
        self.send(method, request).await
    }

    /// Read method; these take query parameters rather than a JSON body
    async fn get_bot<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        method: &str,
        query: &Q,
    ) -> Result<T> {
        let request = self
            .client
            .get(format!("{}/{}", self.api_url, method))
            .bearer_auth(&self.bot_token)
            .query(query);
        self.send(method, request).await
    }

    /// Ask Slack for a Socket Mode websocket URL (uses the app-level token)
    pub async fn open_connection(&self) -> Result<String> {
        let request = self
            .client
            .post(format!("{}/apps.connections.open", self.api_url))
            .bearer_auth(&self.app_token);
        let response: ConnectionsOpenResponse =
            self.send("apps.connections.open", request).await?;
        Ok(response.url)
    }
}

#[async_trait]
impl SlackApi for SlackClient {
    async fn conversations_replies(
        &self,
        channel: &str,
        ts: &str,
        oldest: &str,
        limit: u32,
    ) -> Result<Vec<ThreadMessage>> {
        let params = ReplyParams {
            channel,
            ts,
            oldest,
            limit,
        };
        let response: RepliesResponse = self.get_bot("conversations.replies", &params).await?;
        Ok(response.messages)
    }

    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<()> {
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(thread_ts) = thread_ts {
            body["thread_ts"] = Value::String(thread_ts.to_string());
        }
        let _: Empty = self.call_bot("chat.postMessage", body).await?;
        Ok(())
    }

    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<()> {
        let body = json!({
            "channel": channel,
            "user": user,
            "thread_ts": thread_ts,
            "text": text,
        });
        let _: Empty = self.call_bot("chat.postEphemeral", body).await?;
        Ok(())
    }

    async fn set_status(
        &self,
        channel: &str,
        thread_ts: &str,
        status: &str,
        loading_messages: &[&str],
    ) -> Result<()> {
        let body = json!({
            "channel_id": channel,
            "thread_ts": thread_ts,
            "status": status,
            "loading_messages": loading_messages,
        });
        let _: Empty = self.call_bot("assistant.threads.setStatus", body).await?;
        Ok(())
    }

    async fn set_suggested_prompts(
        &self,
        channel: &str,
        thread_ts: &str,
        prompts: &[SuggestedPrompt],
    ) -> Result<()> {
        let body = json!({
            "channel_id": channel,
            "thread_ts": thread_ts,
            "prompts": prompts,
        });
        let _: Empty = self
            .call_bot("assistant.threads.setSuggestedPrompts", body)
            .await?;
        Ok(())
    }

    async fn start_stream(&self, channel: &str, thread_ts: &str) -> Result<String> {
        let body = json!({ "channel": channel, "thread_ts": thread_ts });
        let response: StreamResponse = self.call_bot("chat.startStream", body).await?;
        Ok(response.ts)
    }

    async fn append_stream(&self, channel: &str, ts: &str, markdown_text: &str) -> Result<()> {
        let body = json!({
            "channel": channel,
            "ts": ts,
            "markdown_text": markdown_text,
        });
        let _: Empty = self.call_bot("chat.appendStream", body).await?;
        Ok(())
    }

    async fn stop_stream(&self, channel: &str, ts: &str, blocks: Option<&[Block]>) -> Result<()> {
        let mut body = json!({ "channel": channel, "ts": ts });
        if let Some(blocks) = blocks {
            body["blocks"] = serde_json::to_value(blocks).context("Failed to encode blocks")?;
        }
        let _: Empty = self.call_bot("chat.stopStream", body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SlackClient {
        SlackClient::new(&SlackConfig {
            bot_token: "xoxb-test".into(),
            app_token: "xapp-test".into(),
            api_url: format!("{}/api/", server.uri()),
        })
    }

    #[tokio::test]
    async fn replies_are_decoded_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/conversations.replies"))
            .and(header("authorization", "Bearer xoxb-test"))
            .and(query_param("channel", "D1"))
            .and(query_param("ts", "100.1"))
            .and(query_param("oldest", "100.1"))
            .and(query_param("limit", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [
                    {"type": "message", "user": "U1", "text": "first", "ts": "100.1"},
                    {"type": "message", "bot_id": "B1", "text": "second", "ts": "100.2"},
                    {"type": "message", "user": "U1", "ts": "100.3"}
                ],
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let messages = client_for(&server)
            .conversations_replies("D1", "100.1", "100.1", 10)
            .await
            .unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text, "first");
        assert!(messages[0].bot_id.is_none());
        assert_eq!(messages[1].bot_id.as_deref(), Some("B1"));
        assert_eq!(messages[2].text, "");
    }

    #[tokio::test]
    async fn not_ok_response_names_method_and_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat.appendStream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "message_not_in_streaming_state"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .append_stream("D1", "200.1", "hi")
            .await
            .unwrap_err()
            .to_string();

        assert!(err.contains("chat.appendStream"), "{err}");
        assert!(err.contains("message_not_in_streaming_state"), "{err}");
    }

    #[tokio::test]
    async fn start_stream_returns_handle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat.startStream"))
            .and(body_json(json!({"channel": "D1", "thread_ts": "100.1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "channel": "D1", "ts": "200.5"})),
            )
            .mount(&server)
            .await;

        let ts = client_for(&server)
            .start_stream("D1", "100.1")
            .await
            .unwrap();
        assert_eq!(ts, "200.5");
    }

    #[tokio::test]
    async fn stop_stream_sends_blocks_only_when_given() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat.stopStream"))
            .and(body_json(json!({"channel": "D1", "ts": "200.5"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .stop_stream("D1", "200.5", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn open_connection_uses_app_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/apps.connections.open"))
            .and(header("authorization", "Bearer xapp-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "url": "wss://example.test/link"})),
            )
            .mount(&server)
            .await;

        let url = client_for(&server).open_connection().await.unwrap();
        assert_eq!(url, "wss://example.test/link");
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat.postMessage"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .post_message("D1", Some("100.1"), "hello")
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("500"), "{err}");
    }
}
