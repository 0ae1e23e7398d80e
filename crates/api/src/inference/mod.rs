//! AI backend access
//!
//! The session engine and escalation worker depend on [`AiBackend`] only;
//! [`InferenceClient`] is the production implementation and additionally
//! carries the provisioning calls used by the worker.

pub mod client;
pub mod types;

use async_trait::async_trait;

pub use client::{InferenceClient, InferenceConfig, InferenceError, InferenceResult};
pub use types::{extract_text, AgentDefinition, ChatRequest};

/// Chat-time operations against the inference provider
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Produce a reply for one chat turn
    async fn get_response(&self, request: ChatRequest) -> InferenceResult<String>;

    /// Summarize a plain-text transcript
    async fn summarize(&self, transcript: &str) -> InferenceResult<String>;
}
