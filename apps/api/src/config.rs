use std::time::Duration;

use anyhow::{Context, Result};

use crate::llm_client::ReasoningEffort;
use crate::retry::RetryPolicy;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub generation: GenerationConfig,
    pub content_store: ContentStoreConfig,
    pub pipeline: PipelineConfig,
    pub port: u16,
    pub rust_log: String,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub temperature: f32,
    pub retry: RetryPolicy,
    /// Per-attempt deadline, covering the whole stream read.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ContentStoreConfig {
    pub base_url: String,
    pub token: String,
    pub refresh: Option<RefreshConfig>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub url: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub intermediate_save_interval: Duration,
    pub snapshot_interval: Duration,
    pub store_retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy::new(
            parse_env("GENERATION_MAX_ATTEMPTS", defaults.max_attempts)?,
            Duration::from_millis(parse_env(
                "RETRY_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )?),
        );

        let reasoning_effort = match std::env::var("GENERATION_REASONING_EFFORT") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.parse::<ReasoningEffort>()
                    .map_err(anyhow::Error::msg)
                    .context("GENERATION_REASONING_EFFORT must be low, medium or high")?,
            ),
            _ => None,
        };

        let refresh = match std::env::var("CONTENT_STORE_REFRESH_URL") {
            Ok(url) if !url.trim().is_empty() => Some(RefreshConfig {
                url,
                refresh_token: require_env("CONTENT_STORE_REFRESH_TOKEN")?,
            }),
            _ => None,
        };

        Ok(Config {
            generation: GenerationConfig {
                api_url: std::env::var("GENERATION_API_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: require_env("GENERATION_API_KEY")?,
                model: std::env::var("GENERATION_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
                reasoning_effort,
                temperature: parse_env("GENERATION_TEMPERATURE", 0.7f32)?,
                retry,
                timeout: Duration::from_secs(parse_env("GENERATION_TIMEOUT_SECS", 120u64)?),
            },
            content_store: ContentStoreConfig {
                base_url: require_env("CONTENT_STORE_URL")?,
                token: require_env("CONTENT_STORE_TOKEN")?,
                refresh,
                request_timeout: Duration::from_secs(30),
            },
            pipeline: PipelineConfig {
                intermediate_save_interval: Duration::from_secs(parse_env(
                    "INTERMEDIATE_SAVE_INTERVAL_SECS",
                    5u64,
                )?),
                snapshot_interval: Duration::from_secs(parse_env("SNAPSHOT_INTERVAL_SECS", 3u64)?),
                store_retry: retry,
            },
            port: parse_env("PORT", 8080u16)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}
