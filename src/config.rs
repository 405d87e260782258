//! Runtime configuration.
//!
//! Settings come from the environment, optionally seeded from `~/.shex/env`
//! (loaded via dotenvy before reading). Recognized variables:
//! - `LLM_API_KEY` / `LLM_BASE_URL` / `LLM_MODEL` for any OpenAI-compatible
//!   endpoint
//! - `DEEPSEEK_API_KEY` as a shortcut that also selects the DeepSeek
//!   endpoint and model

use std::time::Duration;

use crate::utils::paths;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
const DEEPSEEK_MODEL: &str = "deepseek-chat";

/// Connection settings for the LLM endpoint.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub api_key: String,
    /// None means the client's default endpoint.
    pub base_url: Option<String>,
    pub model: String,
}

impl LlmConfig {
    /// Read settings from the environment, after loading `~/.shex/env`.
    /// An empty `api_key` means nothing usable was found.
    pub fn from_env() -> Self {
        dotenvy::from_path(paths::env_path()).ok();

        let (api_key, default_base, default_model) =
            if let Ok(key) = std::env::var("LLM_API_KEY") {
                (key, None, DEFAULT_MODEL)
            } else if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
                (key, Some(DEEPSEEK_BASE_URL.to_string()), DEEPSEEK_MODEL)
            } else {
                (String::new(), None, DEFAULT_MODEL)
            };

        Self {
            api_key,
            base_url: std::env::var("LLM_BASE_URL").ok().or(default_base),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| default_model.to_string()),
        }
    }
}

/// Settings for one agent run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub llm: LlmConfig,
    /// Consecutive failed commands tolerated before asking the user.
    pub max_retries: usize,
    /// Wall-clock limit per executed command.
    pub command_timeout: Duration,
    /// User turns kept when persisting conversation context.
    pub max_context_turns: usize,
    /// Whether conversation context is loaded/saved at all.
    pub enable_context: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            max_retries: 30,
            command_timeout: Duration::from_secs(60),
            max_context_turns: 5,
            enable_context: true,
        }
    }
}
