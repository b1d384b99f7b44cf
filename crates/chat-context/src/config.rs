use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::context_engine::{SummarizationConfig, SummarizationMode, SummaryProfile};
use crate::turn::{ChunkerConfig, TurnConfig, DEFAULT_FALLBACK_MESSAGE};

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub database_path: PathBuf,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub chat_model: String,
    pub summary_model: String,
    pub system_prompt_path: Option<PathBuf>,
    pub token_threshold: usize,
    pub recent_messages: usize,
    pub summary_mode: SummarizationMode,
    pub summary_interval_minutes: u64,
    pub summary_startup_delay_seconds: u64,
    pub chat_clear_cron: String,
    pub chat_clear_idle_minutes: i64,
    pub max_message_chars: usize,
    pub max_attachments: usize,
    pub chunk_max_chars: usize,
    pub chunk_min_length: usize,
    pub chunk_base_delay_ms: u64,
    pub chunk_chars_per_second: f64,
    pub hybrid_delay_ms: u64,
    pub generate_timeout_seconds: u64,
    pub summary_domain: String,
    pub fallback_message: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            api_host: get("API_HOST", "127.0.0.1"),
            api_port: parse(&lookup, "API_PORT", "8000")?,
            database_path: PathBuf::from(get("DATABASE_PATH", "./data/chat.db")),
            llm_base_url: get("LLM_BASE_URL", "https://api.openai.com"),
            llm_api_key: optional("LLM_API_KEY"),
            chat_model: get("CHAT_MODEL", "gpt-4o"),
            summary_model: get("SUMMARY_MODEL", "gpt-4o-mini"),
            system_prompt_path: optional("SYSTEM_PROMPT_PATH").map(PathBuf::from),
            token_threshold: parse(&lookup, "CHAT_TOKEN_THRESHOLD", "3000")?,
            recent_messages: parse(&lookup, "CHAT_RECENT_MESSAGES", "10")?,
            summary_mode: parse(&lookup, "SUMMARY_MODE", "deferred")?,
            summary_interval_minutes: parse(&lookup, "SUMMARY_INTERVAL_MINUTES", "10")?,
            summary_startup_delay_seconds: parse(&lookup, "SUMMARY_STARTUP_DELAY_SECONDS", "30")?,
            chat_clear_cron: get("CHAT_CLEAR_CRON", "0 59 23 * * *"),
            chat_clear_idle_minutes: parse(&lookup, "CHAT_CLEAR_IDLE_MINUTES", "10")?,
            max_message_chars: parse(&lookup, "MAX_MESSAGE_CHARS", "5000")?,
            max_attachments: parse(&lookup, "MAX_ATTACHMENTS", "2")?,
            chunk_max_chars: parse(&lookup, "CHUNK_MAX_CHARS", "150")?,
            chunk_min_length: parse(&lookup, "CHUNK_MIN_LENGTH", "100")?,
            chunk_base_delay_ms: parse(&lookup, "CHUNK_BASE_DELAY_MS", "400")?,
            chunk_chars_per_second: parse(&lookup, "CHUNK_CHARS_PER_SECOND", "60")?,
            hybrid_delay_ms: parse(&lookup, "HYBRID_DELAY_MS", "5000")?,
            generate_timeout_seconds: parse(&lookup, "GENERATE_TIMEOUT_SECONDS", "120")?,
            summary_domain: get("SUMMARY_DOMAIN", "food recommendations and dietary preferences"),
            fallback_message: get("FALLBACK_MESSAGE", DEFAULT_FALLBACK_MESSAGE),
        };

        if config.recent_messages == 0 {
            return Err(anyhow::anyhow!("CHAT_RECENT_MESSAGES must be at least 1"));
        }
        if config.summary_interval_minutes == 0 {
            return Err(anyhow::anyhow!("SUMMARY_INTERVAL_MINUTES must be at least 1"));
        }
        Ok(config)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Database: {}", self.database_path.display());
        info!("- LLM Backend: {}", self.llm_base_url);
        info!("- API Key: {}", if self.llm_api_key.is_some() { "set" } else { "not set" });
        info!("- Chat Model: {}", self.chat_model);
        info!("- Summary Model: {}", self.summary_model);
        info!("- Token Threshold: {}", self.token_threshold);
        info!("- Recent Messages: {}", self.recent_messages);
        info!("- Summary Mode: {:?}", self.summary_mode);
        info!("- Summary Interval: {}m", self.summary_interval_minutes);
        info!("- Chat Clearing: '{}' (idle {}m)", self.chat_clear_cron, self.chat_clear_idle_minutes);
        info!("- Chunking: {} chars max, above {} chars", self.chunk_max_chars, self.chunk_min_length);
        info!("- Generate Timeout: {}s", self.generate_timeout_seconds);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }

    pub fn summarization_config(&self) -> SummarizationConfig {
        SummarizationConfig {
            recent_count: self.recent_messages,
            token_threshold: self.token_threshold,
            mode: self.summary_mode,
            ..SummarizationConfig::default()
        }
    }

    pub fn summary_profile(&self) -> SummaryProfile {
        SummaryProfile::with_domain(self.summary_domain.clone())
    }

    pub fn turn_config(&self) -> TurnConfig {
        TurnConfig {
            max_message_chars: self.max_message_chars,
            max_attachments: self.max_attachments,
            hybrid_delay: Duration::from_millis(self.hybrid_delay_ms),
            generate_timeout: Duration::from_secs(self.generate_timeout_seconds),
            fallback_message: self.fallback_message.clone(),
        }
    }

    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_chars: self.chunk_max_chars,
            min_length_to_chunk: self.chunk_min_length,
            base_delay: Duration::from_millis(self.chunk_base_delay_ms),
            chars_per_second: self.chunk_chars_per_second,
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", raw, key, e))
}
