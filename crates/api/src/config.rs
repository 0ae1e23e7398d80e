//! Application configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::inference::InferenceConfig;
use crate::websocket::{SessionConfig, DEFAULT_ESCALATION_TRIGGERS};

/// Upper bound accepted for `AI_REQUEST_TIMEOUT_MS`
const MAX_AI_REQUEST_TIMEOUT_MS: u64 = 120_000;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Redis (cross-process broadcast groups; in-process rooms when unset)
    pub redis_url: Option<String>,

    // AI provider
    pub ai_api_key: String,
    pub ai_agent_base_url: String,
    pub ai_rag_base_url: String,
    pub ai_request_timeout_ms: u64,
    pub ai_max_retries: usize,
    pub ai_retry_base_delay_ms: u64,
    pub ai_llm_credential_id: String,
    pub ai_embedding_credential_id: String,
    pub ai_vector_db_credential_id: String,

    // Chat sessions
    pub chat_history_limit: usize,
    pub chat_max_message_chars: usize,
    pub chat_max_inbound_bytes: usize,
    pub escalation_triggers: Vec<String>,

    // Worker
    pub summary_min_messages: i32,
    pub summary_schedule: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let ai_request_timeout_ms = parse_or("AI_REQUEST_TIMEOUT_MS", 30_000u64);
        if ai_request_timeout_ms == 0 || ai_request_timeout_ms > MAX_AI_REQUEST_TIMEOUT_MS {
            return Err(ConfigError::Invalid(
                "AI_REQUEST_TIMEOUT_MS must be between 1 and 120000",
            ));
        }

        let chat_max_message_chars = parse_or("CHAT_MAX_MESSAGE_CHARS", 10_000usize);
        if chat_max_message_chars == 0 {
            return Err(ConfigError::Invalid("CHAT_MAX_MESSAGE_CHARS must be positive"));
        }

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),

            // Redis
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),

            // AI provider
            ai_api_key: env::var("AI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty())
                .ok_or(ConfigError::Missing("AI_API_KEY"))?,
            ai_agent_base_url: env::var("AI_AGENT_BASE_URL")
                .unwrap_or_else(|_| "https://agent-prod.studio.lyzr.ai".to_string()),
            ai_rag_base_url: env::var("AI_RAG_BASE_URL")
                .unwrap_or_else(|_| "https://rag-prod.studio.lyzr.ai".to_string()),
            ai_request_timeout_ms,
            ai_max_retries: parse_or("AI_MAX_RETRIES", 3),
            ai_retry_base_delay_ms: parse_or("AI_RETRY_BASE_DELAY_MS", 1_000),
            ai_llm_credential_id: env::var("AI_LLM_CREDENTIAL_ID").unwrap_or_default(),
            ai_embedding_credential_id: env::var("AI_EMBEDDING_CREDENTIAL_ID").unwrap_or_default(),
            ai_vector_db_credential_id: env::var("AI_VECTOR_DB_CREDENTIAL_ID").unwrap_or_default(),

            // Chat sessions
            chat_history_limit: parse_or("CHAT_HISTORY_LIMIT", 50),
            chat_max_message_chars,
            chat_max_inbound_bytes: parse_or("CHAT_MAX_INBOUND_BYTES", 65_536),
            escalation_triggers: parse_triggers(
                &env::var("ESCALATION_TRIGGERS")
                    .unwrap_or_else(|_| DEFAULT_ESCALATION_TRIGGERS.to_string()),
            ),

            // Worker
            summary_min_messages: parse_or("SUMMARY_MIN_MESSAGES", 4),
            summary_schedule: env::var("SUMMARY_SCHEDULE")
                .unwrap_or_else(|_| "0 */10 * * * *".to_string()),
        })
    }

    /// Settings for the AI backend client
    pub fn inference_config(&self) -> InferenceConfig {
        let mut config = InferenceConfig::new(
            self.ai_api_key.clone(),
            self.ai_agent_base_url.clone(),
            self.ai_rag_base_url.clone(),
        );
        config.request_timeout = Duration::from_millis(self.ai_request_timeout_ms);
        config.max_retries = self.ai_max_retries;
        config.retry_base_delay = Duration::from_millis(self.ai_retry_base_delay_ms);
        config.llm_credential_id = self.ai_llm_credential_id.clone();
        config.embedding_credential_id = self.ai_embedding_credential_id.clone();
        config.vector_db_credential_id = self.ai_vector_db_credential_id.clone();
        config
    }

    /// Settings for chat sessions
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            history_limit: self.chat_history_limit,
            max_message_chars: self.chat_max_message_chars,
            max_inbound_bytes: self.chat_max_inbound_bytes,
            escalation_triggers: self.escalation_triggers.clone(),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Split a comma-separated trigger list, lower-casing and dropping blanks
pub fn parse_triggers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "AI_API_KEY",
        "AI_REQUEST_TIMEOUT_MS",
        "CHAT_HISTORY_LIMIT",
        "ESCALATION_TRIGGERS",
        "REDIS_URL",
    ];

    /// Helper to set required env vars for testing
    fn setup_minimal_config() {
        cleanup_config();
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("AI_API_KEY", "test-key");
    }

    /// Helper to clear env vars after tests
    fn cleanup_config() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_applied() {
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.chat_history_limit, 50);
        assert_eq!(config.chat_max_message_chars, 10_000);
        assert_eq!(config.ai_max_retries, 3);
        assert!(config.redis_url.is_none());
        assert!(config.escalation_triggers.contains(&"help".to_string()));

        let inference = config.inference_config();
        assert_eq!(inference.request_timeout, Duration::from_secs(30));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_missing_api_key_rejected() {
        setup_minimal_config();
        env::remove_var("AI_API_KEY");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("AI_API_KEY"))
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_unbounded_timeout_rejected() {
        setup_minimal_config();

        env::set_var("AI_REQUEST_TIMEOUT_MS", "0");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        env::set_var("AI_REQUEST_TIMEOUT_MS", "600000");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        env::set_var("AI_REQUEST_TIMEOUT_MS", "15000");
        assert_eq!(Config::from_env().unwrap().ai_request_timeout_ms, 15_000);

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_overrides_parsed() {
        setup_minimal_config();
        env::set_var("CHAT_HISTORY_LIMIT", "20");
        env::set_var("ESCALATION_TRIGGERS", " Agent Please , ,refund ");
        env::set_var("REDIS_URL", "redis://localhost:6379");

        let config = Config::from_env().unwrap();
        assert_eq!(config.chat_history_limit, 20);
        assert_eq!(config.escalation_triggers, vec!["agent please", "refund"]);
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));

        cleanup_config();
    }
}
