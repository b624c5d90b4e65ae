// story-context/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

pub const DEFAULT_COMPLETION_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "x-ai/grok-4-fast";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an expert in story writing. write the stores according to the user.";

/// Budgets and prompts used when assembling per-turn context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    /// Trailing messages always sent verbatim (or compressed).
    pub recent_message_count: usize,
    /// Output budget for summary calls; also bounds summary text under pressure.
    pub summary_max_tokens: usize,
    /// Character length above which a message is compressed.
    pub message_compress_threshold: usize,
    /// Output budget for one compressed message.
    pub message_compressed_size: usize,
    /// Soft input target, logged only.
    pub target_input_tokens: usize,
    /// Hard input cap enforced by dropping old recent entries.
    pub max_input_tokens: usize,
    pub system_prompt: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_message_count: 10,
            summary_max_tokens: 2000,
            message_compress_threshold: 2500,
            message_compressed_size: 800,
            target_input_tokens: 20000,
            max_input_tokens: 50000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub completion_url: String,
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub request_timeout_seconds: u64,
    pub api_host: String,
    pub api_port: u16,
    pub db_path: PathBuf,
    pub min_request_interval_ms: u64,
    pub context: ContextConfig,
}

fn parse_var<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| default.into())
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}", key))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENROUTER_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .context("OPENROUTER_API_KEY environment variable not set. Please set it in your .env file")?;

        let defaults = ContextConfig::default();
        let context = ContextConfig {
            recent_message_count: parse_var(&lookup, "RECENT_MESSAGE_COUNT", "10")?,
            summary_max_tokens: parse_var(&lookup, "SUMMARY_MAX_TOKENS", "2000")?,
            message_compress_threshold: parse_var(&lookup, "MESSAGE_COMPRESS_THRESHOLD", "2500")?,
            message_compressed_size: parse_var(&lookup, "MESSAGE_COMPRESSED_SIZE", "800")?,
            target_input_tokens: parse_var(&lookup, "TARGET_INPUT_TOKENS", "20000")?,
            max_input_tokens: parse_var(&lookup, "MAX_INPUT_TOKENS", "50000")?,
            system_prompt: lookup("SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
        };
        if context.target_input_tokens > context.max_input_tokens {
            warn!(
                "TARGET_INPUT_TOKENS ({}) exceeds MAX_INPUT_TOKENS ({})",
                context.target_input_tokens, context.max_input_tokens
            );
        }

        Ok(Self {
            api_key,
            completion_url: lookup("COMPLETION_URL").unwrap_or_else(|| DEFAULT_COMPLETION_URL.into()),
            model: lookup("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL.into()),
            max_output_tokens: parse_var(&lookup, "MAX_OUTPUT_TOKENS", "4000")?,
            temperature: parse_var(&lookup, "TEMPERATURE", "0.8")?,
            request_timeout_seconds: parse_var(&lookup, "REQUEST_TIMEOUT_SECONDS", "120")?,
            api_host: lookup("API_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            api_port: parse_var(&lookup, "API_PORT", "9000")?,
            db_path: lookup("DB_PATH")
                .unwrap_or_else(|| "./data/story_conversations.db".into())
                .into(),
            min_request_interval_ms: parse_var(&lookup, "MIN_REQUEST_INTERVAL_MS", "2000")?,
            context,
        })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Completion URL: {}", self.completion_url);
        info!("- Model: {}", self.model);
        info!("- Max Output Tokens: {}", self.max_output_tokens);
        info!("- Temperature: {}", self.temperature);
        info!("- Request Timeout: {}s", self.request_timeout_seconds);
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Database: {}", self.db_path.display());
        info!("- Min Request Interval: {}ms", self.min_request_interval_ms);
        info!(
            "- Context: recent={}, summary_max={}, compress>{} chars -> {}, target={}, max={}",
            self.context.recent_message_count,
            self.context.summary_max_tokens,
            self.context.message_compress_threshold,
            self.context.message_compressed_size,
            self.context.target_input_tokens,
            self.context.max_input_tokens,
        );
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Helper function to create a test Config with default values
    pub(crate) fn create_test_config() -> Config {
        Config {
            api_key: "test-key".to_string(),
            completion_url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            model: "test-model".to_string(),
            max_output_tokens: 4000,
            temperature: 0.8,
            request_timeout_seconds: 5,
            api_host: "127.0.0.1".to_string(),
            api_port: 9000,
            db_path: PathBuf::from("./data/test.db"),
            min_request_interval_ms: 2000,
            context: ContextConfig::default(),
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ===== Loading Tests =====

    #[test]
    fn test_from_vars_applies_defaults() {
        let config = Config::from_vars(vars(&[("OPENROUTER_API_KEY", "sk-test")])).unwrap();

        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.completion_url, DEFAULT_COMPLETION_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_output_tokens, 4000);
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.min_request_interval_ms, 2000);
        assert_eq!(config.db_path, PathBuf::from("./data/story_conversations.db"));
        assert_eq!(config.context, ContextConfig::default());
    }

    #[test]
    fn test_from_vars_requires_api_key() {
        assert!(Config::from_vars(vars(&[])).is_err());
        assert!(Config::from_vars(vars(&[("OPENROUTER_API_KEY", "  ")])).is_err());
    }

    #[test]
    fn test_from_vars_overrides_context_budgets() {
        let config = Config::from_vars(vars(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("RECENT_MESSAGE_COUNT", "6"),
            ("MAX_INPUT_TOKENS", "30000"),
            ("SYSTEM_PROMPT", "Narrate tersely."),
            ("TEMPERATURE", "0.3"),
        ]))
        .unwrap();

        assert_eq!(config.context.recent_message_count, 6);
        assert_eq!(config.context.max_input_tokens, 30000);
        assert_eq!(config.context.summary_max_tokens, 2000);
        assert_eq!(config.context.system_prompt, "Narrate tersely.");
        assert!((config.temperature - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_from_vars_rejects_malformed_numbers() {
        let err = Config::from_vars(vars(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("API_PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("API_PORT"));
    }

    // ===== API Address Tests =====

    #[test]
    fn test_api_addr_parsing() {
        let config = create_test_config();
        let addr = config.api_addr().unwrap();

        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 9000);
    }

    #[test]
    fn test_api_addr_with_zero_address() {
        let mut config = create_test_config();
        config.api_host = "0.0.0.0".to_string();
        config.api_port = 3000;

        let addr = config.api_addr().unwrap();
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_api_addr_rejects_hostname() {
        let mut config = create_test_config();
        config.api_host = "not a host".to_string();
        assert!(config.api_addr().is_err());
    }

    // ===== Budget Sanity Tests =====

    #[test]
    fn test_default_budgets_are_consistent() {
        let context = ContextConfig::default();
        assert!(context.target_input_tokens <= context.max_input_tokens);
        assert!(context.message_compressed_size * 4 < context.message_compress_threshold);
        assert!(context.summary_max_tokens < context.max_input_tokens);
        assert!(context.recent_message_count > 0);
    }
}
