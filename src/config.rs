use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::llm::DEFAULT_SYSTEM_CONTENT;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openai,
    Openrouter,
    Ollama,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openai => write!(f, "openai"),
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: default_model(),
            base_url: String::new(),
            api_key: String::new(),
            max_output_tokens: None,
            system_prompt: default_system_prompt(),
        }
    }
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return self.base_url.trim_end_matches('/');
        }
        match self.provider {
            LlmProvider::Openai => "https://api.openai.com/v1",
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub app_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            app_token: String::new(),
            api_url: default_api_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    /// How many thread messages are fetched as model context per turn.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_CONTENT.to_string()
}

fn default_api_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_history_limit() -> u32 {
    10
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

impl Config {
    /// Load the TOML file if it exists, then apply environment overrides.
    /// A missing file is not an error: every setting has a default or an env var.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Overlay the process environment on top of file values.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty("SLACK_BOT_TOKEN") {
            self.slack.bot_token = token;
        }
        if let Some(token) = non_empty("SLACK_APP_TOKEN") {
            self.slack.app_token = token;
        }
        if let Some(url) = non_empty("SLACK_API_URL") {
            self.slack.api_url = url;
        }
        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.llm.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.slack.bot_token.trim().is_empty() {
            anyhow::bail!("Slack bot token is not set (slack.bot_token or SLACK_BOT_TOKEN)");
        }
        if self.slack.app_token.trim().is_empty() {
            anyhow::bail!("Slack app token is not set (slack.app_token or SLACK_APP_TOKEN)");
        }
        if self.llm.provider != LlmProvider::Ollama && self.llm.api_key.trim().is_empty() {
            anyhow::bail!("Model API key is not set (llm.api_key or OPENAI_API_KEY)");
        }
        Ok(())
    }

    pub fn api_url(&self) -> &str {
        self.slack.api_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.provider, LlmProvider::Openai);
        assert_eq!(config.slack.api_url, "https://slack.com/api");
        assert_eq!(config.assistant.history_limit, 10);
        assert_eq!(config.llm.system_prompt, DEFAULT_SYSTEM_CONTENT);
        assert!(config.llm.max_output_tokens.is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config: Config = toml::from_str(
            r#"
            [slack]
            bot_token = "xoxb-file"
            api_url = "https://file.example/api"

            [llm]
            model = "gpt-4.1"
            "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("SLACK_BOT_TOKEN", "xoxb-env"),
            ("SLACK_APP_TOKEN", "xapp-env"),
            ("SLACK_API_URL", "  "),
            ("OPENAI_API_KEY", "sk-env"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.slack.bot_token, "xoxb-env");
        assert_eq!(config.slack.app_token, "xapp-env");
        // blank env values do not clobber the file
        assert_eq!(config.slack.api_url, "https://file.example/api");
        assert_eq!(config.llm.api_key, "sk-env");
        assert_eq!(config.llm.model, "gpt-4.1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_names_the_missing_secret() {
        let mut config = Config::default();
        config.slack.bot_token = "xoxb".into();
        config.slack.app_token = "xapp".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("OPENAI_API_KEY"), "{err}");

        config.llm.provider = LlmProvider::Ollama;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn base_url_falls_back_per_provider() {
        let mut llm = LlmConfig::default();
        assert_eq!(llm.effective_base_url(), "https://api.openai.com/v1");
        llm.provider = LlmProvider::Ollama;
        assert_eq!(llm.effective_base_url(), "http://localhost:11434/v1");
        llm.base_url = "http://proxy.local/v1/".into();
        assert_eq!(llm.effective_base_url(), "http://proxy.local/v1");
    }
}
