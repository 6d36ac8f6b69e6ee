mod config;
mod listeners;
mod llm;
mod platform;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::listeners::{register_listeners, Router};
use crate::llm::{LlmClient, ModelBackend};
use crate::platform::slack::SlackClient;
use crate::platform::socket_mode::SocketMode;

#[tokio::main]
async fn main() -> Result<()> {
    // Tokens may live in a local .env during development
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,slack_assistant=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Provider: {}", config.llm.provider);
    info!("  Model: {}", config.llm.model);
    info!("  Slack API: {}", config.api_url());
    info!("  History limit: {}", config.assistant.history_limit);

    let slack = Arc::new(SlackClient::new(&config.slack));
    let llm: Arc<dyn ModelBackend> = Arc::new(LlmClient::new(config.llm.clone()));

    let mut router = Router::new();
    register_listeners(&mut router, llm, &config);

    let socket = SocketMode::new(
        slack,
        Arc::new(router),
        Duration::from_secs(config.assistant.reconnect_delay_secs),
    );

    info!("Assistant is starting...");
    socket.run().await?;

    Ok(())
}
