//! Provider payloads and reply extraction

use serde::Serialize;
use serde_json::Value;

/// Fields that may carry a chat reply, highest priority first.
///
/// The provider is not consistent about which one it fills, and some of them
/// nest further objects (`{"response": {"message": {"content": "..."}}}`).
pub const REPLY_FIELDS: &[&str] = &[
    "response",
    "agent_response",
    "message",
    "answer",
    "text",
    "content",
    "result",
    "output",
    "choices",
];

/// Fields that may carry a summary, highest priority first
pub const SUMMARY_FIELDS: &[&str] = &["summary", "response", "result", "text", "content"];

/// Fields that may carry a newly created resource id
pub const ID_FIELDS: &[&str] = &["agent_id", "rag_id", "id", "_id"];

/// Nesting depth after which extraction gives up
const MAX_EXTRACT_DEPTH: usize = 8;

/// One chat turn sent to the inference endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Provider-side agent reference
    pub agent_id: String,
    pub session_id: String,
    pub message: String,
    /// Provider-side user reference (the agent owner's email)
    pub user_id: String,
    /// Knowledge-base references attached to the turn
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<String>,
}

impl ChatRequest {
    pub fn new(
        agent_ref: impl Into<String>,
        session_id: impl Into<String>,
        message: impl Into<String>,
        user_ref: impl Into<String>,
        knowledge_ref: Option<&str>,
    ) -> Self {
        Self {
            agent_id: agent_ref.into(),
            session_id: session_id.into(),
            message: message.into(),
            user_id: user_ref.into(),
            assets: knowledge_ref.map(|r| vec![r.to_string()]).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SummarizeRequest<'a> {
    pub text: &'a str,
}

/// Agent definition used when provisioning a provider-side agent
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub system_prompt: String,
    pub provider_id: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateAgentRequest<'a> {
    pub name: &'a str,
    pub system_prompt: &'a str,
    pub description: String,
    pub provider_id: &'a str,
    pub model: &'a str,
    pub temperature: String,
    pub top_p: String,
    pub features: Vec<Value>,
    pub tools: Vec<Value>,
    pub llm_credential_id: &'a str,
    pub response_format: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct KnowledgeConfigRequest<'a> {
    pub user_id: &'a str,
    pub collection_name: &'a str,
    pub llm_model: &'a str,
    pub embedding_model: &'a str,
    pub vector_store_provider: &'a str,
    pub llm_credential_id: &'a str,
    pub embedding_credential_id: &'a str,
    pub vector_db_credential_id: &'a str,
}

/// Find the first non-empty string reachable through `fields`.
///
/// Objects are searched field by field in priority order, descending into
/// nested objects and arrays. A bare string at the top level is returned as is.
pub fn extract_text(value: &Value, fields: &[&str]) -> Option<String> {
    extract_at_depth(value, fields, 0)
}

fn extract_at_depth(value: &Value, fields: &[&str], depth: usize) -> Option<String> {
    if depth > MAX_EXTRACT_DEPTH {
        return None;
    }

    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Object(map) => fields
            .iter()
            .filter_map(|field| map.get(*field))
            .find_map(|nested| extract_at_depth(nested, fields, depth + 1)),
        Value::Array(items) => items
            .iter()
            .find_map(|item| extract_at_depth(item, fields, depth + 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_prefers_higher_priority_field() {
        let body = json!({"message": "second", "response": "first"});
        assert_eq!(extract_text(&body, REPLY_FIELDS).as_deref(), Some("first"));
    }

    #[test]
    fn test_extract_skips_empty_strings() {
        let body = json!({"response": "   ", "answer": "fallback"});
        assert_eq!(extract_text(&body, REPLY_FIELDS).as_deref(), Some("fallback"));
    }

    #[test]
    fn test_extract_descends_into_nested_shapes() {
        let body = json!({"response": {"message": {"content": "nested reply"}}});
        assert_eq!(
            extract_text(&body, REPLY_FIELDS).as_deref(),
            Some("nested reply")
        );

        let openai_like = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        assert_eq!(extract_text(&openai_like, REPLY_FIELDS).as_deref(), Some("hi"));
    }

    #[test]
    fn test_extract_returns_none_without_text() {
        let body = json!({"response": null, "status": "ok", "result": 42});
        assert_eq!(extract_text(&body, REPLY_FIELDS), None);
    }

    #[test]
    fn test_chat_request_omits_empty_assets() {
        let request = ChatRequest::new("agt", "u1", "hi", "owner@example.com", None);
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("assets").is_none());

        let request = ChatRequest::new("agt", "u1", "hi", "owner@example.com", Some("rag_1"));
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["assets"], json!(["rag_1"]));
    }
}
