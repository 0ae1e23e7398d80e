//! HTTP client for the remote inference provider
//!
//! Every call goes through one retry policy: rate limiting, server errors and
//! network failures back off exponentially, bad-input responses fail at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client, Method, StatusCode};
use serde_json::{json, Value};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;

use super::types::{
    extract_text, AgentDefinition, ChatRequest, CreateAgentRequest, KnowledgeConfigRequest,
    SummarizeRequest, ID_FIELDS, REPLY_FIELDS, SUMMARY_FIELDS,
};
use super::AiBackend;

/// Default per-attempt timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Default delay before the first retry; doubles on each further retry
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on any single backoff delay
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

const EMBEDDING_MODEL: &str = "text-embedding-ada-002";
const VECTOR_STORE_PROVIDER: &str = "Weaviate [Lyzr]";

/// Longest slice of an error body kept in error messages
const ERROR_BODY_SNIPPET: usize = 300;

/// Error type for inference provider operations
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Provider server error (status {status})")]
    Server { status: u16 },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Request rejected (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("Provider returned no reply text")]
    EmptyReply,

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        last: Box<InferenceError>,
    },
}

impl InferenceError {
    /// Returns true if this error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::Timeout
                | InferenceError::Network(_)
                | InferenceError::RateLimited
                | InferenceError::Server { .. }
        )
    }

    /// Returns true for bad-input responses that are never retried
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            InferenceError::NotFound(_)
                | InferenceError::Validation(_)
                | InferenceError::Rejected { .. }
        )
    }
}

/// Result type for inference provider operations
pub type InferenceResult<T> = Result<T, InferenceError>;

/// Connection settings for the provider
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub api_key: String,
    pub agent_base_url: String,
    pub rag_base_url: String,
    pub request_timeout: Duration,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub llm_credential_id: String,
    pub embedding_credential_id: String,
    pub vector_db_credential_id: String,
}

impl InferenceConfig {
    pub fn new(
        api_key: impl Into<String>,
        agent_base_url: impl Into<String>,
        rag_base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            agent_base_url: agent_base_url.into(),
            rag_base_url: rag_base_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            llm_credential_id: String::new(),
            embedding_credential_id: String::new(),
            vector_db_credential_id: String::new(),
        }
    }
}

/// Retrying client for the inference provider
#[derive(Clone)]
pub struct InferenceClient {
    http: Client,
    config: InferenceConfig,
}

impl InferenceClient {
    /// Create a new inference client
    #[allow(clippy::expect_used)] // HTTP client creation failure is a fatal system error
    pub fn new(config: InferenceConfig) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .build()
            .expect("Failed to create HTTP client");

        Self { http, config }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Create a provider-side agent and return its reference
    pub async fn create_agent(&self, definition: &AgentDefinition) -> InferenceResult<String> {
        let body = CreateAgentRequest {
            name: &definition.name,
            system_prompt: &definition.system_prompt,
            description: format!("AI Agent: {}", definition.name),
            provider_id: &definition.provider_id,
            model: &definition.model,
            temperature: definition.temperature.to_string(),
            top_p: definition.top_p.to_string(),
            features: Vec::new(),
            tools: Vec::new(),
            llm_credential_id: &self.config.llm_credential_id,
            response_format: json!({}),
        };

        let url = join_url(&self.config.agent_base_url, "v3/agents/");
        let value = self
            .send(Method::POST, url, Some(serde_json::to_value(&body)?), self.config.max_retries)
            .await?;

        extract_text(&value, ID_FIELDS)
            .ok_or_else(|| InferenceError::InvalidResponse("missing agent id".to_string()))
    }

    /// Create a knowledge-base configuration and return its reference
    pub async fn create_knowledge_config(
        &self,
        collection_name: &str,
        model: &str,
    ) -> InferenceResult<String> {
        let body = KnowledgeConfigRequest {
            user_id: &self.config.api_key,
            collection_name,
            llm_model: model,
            embedding_model: EMBEDDING_MODEL,
            vector_store_provider: VECTOR_STORE_PROVIDER,
            llm_credential_id: &self.config.llm_credential_id,
            embedding_credential_id: &self.config.embedding_credential_id,
            vector_db_credential_id: &self.config.vector_db_credential_id,
        };

        let url = join_url(&self.config.rag_base_url, "v3/rag/");
        let value = self
            .send(Method::POST, url, Some(serde_json::to_value(&body)?), self.config.max_retries)
            .await?;

        extract_text(&value, ID_FIELDS)
            .ok_or_else(|| InferenceError::InvalidResponse("missing knowledge config id".to_string()))
    }

    /// Attach a knowledge base to an agent.
    ///
    /// The provider only accepts full agent documents on update, so the
    /// current definition is fetched first and re-sent with the knowledge
    /// and memory features set.
    pub async fn link_knowledge_to_agent(
        &self,
        agent_ref: &str,
        knowledge_ref: &str,
    ) -> InferenceResult<()> {
        let url = join_url(&self.config.agent_base_url, &format!("v3/agents/{agent_ref}"));
        let existing = self
            .send(Method::GET, url.clone(), None, self.config.max_retries)
            .await?;

        let field = |name: &str, default: Value| existing.get(name).cloned().unwrap_or(default);

        let body = json!({
            "name": field("name", json!("AI Agent")),
            "system_prompt": field("system_prompt", json!("You are a helpful AI assistant.")),
            "description": field("description", json!("AI Agent")),
            "features": [
                {
                    "type": "KNOWLEDGE_BASE",
                    "config": {
                        "lyzr_rag": {
                            "rag_id": knowledge_ref,
                            "params": {
                                "top_k": 5,
                                "retrieval_type": "basic",
                                "score_threshold": 0
                            }
                        },
                        "agentic_rag": []
                    },
                    "priority": 0
                },
                {
                    "type": "MEMORY",
                    "config": { "max_messages_context_count": 10 },
                    "priority": 1
                }
            ],
            "tools": field("tools", json!([])),
            "llm_credential_id": field("llm_credential_id", json!(self.config.llm_credential_id)),
            "provider_id": field("provider_id", json!("OpenAI")),
            "model": field("model", json!("gpt-4o-mini")),
            "top_p": field("top_p", json!(1.0)),
            "temperature": field("temperature", json!(0.2)),
            "response_format": field("response_format", json!({})),
        });

        self.send(Method::PUT, url, Some(body), self.config.max_retries)
            .await?;

        tracing::info!(agent_ref = %agent_ref, knowledge_ref = %knowledge_ref, "Linked knowledge base to agent");
        Ok(())
    }

    /// Single-attempt reachability check used by health probes
    pub async fn test_connection(&self) -> InferenceResult<()> {
        let url = join_url(&self.config.agent_base_url, "v3/agents/");
        self.send(Method::GET, url, None, 0).await.map(|_| ())
    }

    /// Send a request, retrying transient failures up to `max_retries` times
    async fn send(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
        max_retries: usize,
    ) -> InferenceResult<Value> {
        // tokio-retry multiplies `factor` by powers of the base, so base 2 with
        // factor d/2 yields d, 2d, 4d, ...
        let factor = (self.config.retry_base_delay.as_millis() as u64 / 2).max(1);
        let retry_strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(RETRY_MAX_DELAY)
            .take(max_retries);

        let attempts = AtomicUsize::new(0);

        let outcome = Retry::spawn(retry_strategy, || async {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let result = self.send_once(&method, &url, body.as_ref()).await;

            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        url = %url,
                        attempt = attempt,
                        error = %e,
                        "Transient provider error - will retry"
                    );
                    Err(result) // Return error to trigger retry
                }
                Err(e) => {
                    tracing::debug!(
                        url = %url,
                        attempt = attempt,
                        error = %e,
                        "Permanent provider error - will not retry"
                    );
                    Ok(result) // Return Ok to stop retrying, but with error inside
                }
            }
        })
        .await
        .unwrap_or_else(|e| e); // Extract the inner result

        match outcome {
            Err(e) if e.is_transient() => Err(InferenceError::RetriesExhausted {
                attempts: attempts.load(Ordering::Relaxed),
                last: Box::new(e),
            }),
            other => other,
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
    ) -> InferenceResult<Value> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .header("x-api-key", &self.config.api_key)
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl AiBackend for InferenceClient {
    async fn get_response(&self, request: ChatRequest) -> InferenceResult<String> {
        let url = join_url(&self.config.agent_base_url, "v3/inference/chat/");
        let value = self
            .send(Method::POST, url, Some(serde_json::to_value(&request)?), self.config.max_retries)
            .await?;

        extract_text(&value, REPLY_FIELDS).ok_or(InferenceError::EmptyReply)
    }

    async fn summarize(&self, transcript: &str) -> InferenceResult<String> {
        let url = join_url(&self.config.agent_base_url, "v3/tools/summarize/");
        let body = serde_json::to_value(SummarizeRequest { text: transcript })?;
        let value = self
            .send(Method::POST, url, Some(body), self.config.max_retries)
            .await?;

        extract_text(&value, SUMMARY_FIELDS).ok_or(InferenceError::EmptyReply)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn classify_transport(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout
    } else {
        InferenceError::Network(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> InferenceError {
    let detail: String = body.chars().take(ERROR_BODY_SNIPPET).collect();

    match status {
        StatusCode::NOT_FOUND => InferenceError::NotFound(detail),
        StatusCode::UNPROCESSABLE_ENTITY => InferenceError::Validation(detail),
        StatusCode::TOO_MANY_REQUESTS => InferenceError::RateLimited,
        s if s.is_server_error() => InferenceError::Server { status: s.as_u16() },
        s => InferenceError::Rejected {
            status: s.as_u16(),
            body: detail,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url_normalizes_slashes() {
        assert_eq!(
            join_url("https://api.example.com/", "/v3/agents/"),
            "https://api.example.com/v3/agents/"
        );
        assert_eq!(
            join_url("https://api.example.com", "v3/rag/"),
            "https://api.example.com/v3/rag/"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "missing"),
            InferenceError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad"),
            InferenceError::Validation(_)
        ));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_status(StatusCode::BAD_REQUEST, "").is_client_error());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").is_transient());
    }

    #[test]
    fn test_retries_exhausted_is_terminal() {
        let err = InferenceError::RetriesExhausted {
            attempts: 4,
            last: Box::new(InferenceError::Timeout),
        };
        assert!(!err.is_transient());
        assert!(!err.is_client_error());
    }
}
