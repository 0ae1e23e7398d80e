//! AI backend client behaviour against a mock provider

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chatdesk_api::inference::{
    AgentDefinition, AiBackend, ChatRequest, InferenceClient, InferenceConfig, InferenceError,
};
use mockito::Matcher;
use serde_json::json;

fn client_for(server: &mockito::ServerGuard, max_retries: usize) -> InferenceClient {
    let mut config = InferenceConfig::new("test-key", server.url(), server.url());
    config.max_retries = max_retries;
    config.retry_base_delay = Duration::from_millis(1);
    config.request_timeout = Duration::from_secs(5);
    config.llm_credential_id = "lyzr_openai".to_string();
    InferenceClient::new(config)
}

fn chat_request() -> ChatRequest {
    ChatRequest::new("agt_1", "session-1", "hello", "owner@example.com", Some("rag_9"))
}

#[tokio::test]
async fn test_get_response_sends_expected_payload() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v3/inference/chat/")
        .match_header("x-api-key", "test-key")
        .match_body(Matcher::PartialJson(json!({
            "agent_id": "agt_1",
            "session_id": "session-1",
            "message": "hello",
            "user_id": "owner@example.com",
            "assets": ["rag_9"]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"response": "Hi there!"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server, 3);
    let reply = client.get_response(chat_request()).await.unwrap();

    assert_eq!(reply, "Hi there!");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_get_response_reads_nested_reply() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v3/inference/chat/")
        .with_status(200)
        .with_body(r#"{"data": 1, "agent_response": {"message": {"content": "nested"}}}"#)
        .create_async()
        .await;

    let client = client_for(&server, 0);
    assert_eq!(client.get_response(chat_request()).await.unwrap(), "nested");
}

#[tokio::test]
async fn test_empty_reply_is_an_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v3/inference/chat/")
        .with_status(200)
        .with_body(r#"{"status": "ok"}"#)
        .create_async()
        .await;

    let client = client_for(&server, 0);
    let err = client.get_response(chat_request()).await.unwrap_err();
    assert!(matches!(err, InferenceError::EmptyReply));
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v3/inference/chat/")
        .with_status(404)
        .with_body(r#"{"detail": "agent not found"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server, 3);
    let err = client.get_response(chat_request()).await.unwrap_err();

    assert!(matches!(err, InferenceError::NotFound(_)));
    assert!(err.is_client_error());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_validation_failure_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v3/tools/summarize/")
        .with_status(422)
        .with_body(r#"{"detail": [{"msg": "field required"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server, 3);
    let err = client.summarize("USER: hi").await.unwrap_err();

    assert!(matches!(err, InferenceError::Validation(_)));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_retry_until_ceiling() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v3/inference/chat/")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let client = client_for(&server, 2);
    let err = client.get_response(chat_request()).await.unwrap_err();

    match err {
        InferenceError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, InferenceError::Server { status: 503 }));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v3/tools/summarize/")
        .with_status(429)
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server, 1);
    let err = client.summarize("USER: hi").await.unwrap_err();

    assert!(matches!(err, InferenceError::RetriesExhausted { attempts: 2, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_connection_refused_is_network_failure() {
    // Nothing listens on port 9 on a test host
    let mut config = InferenceConfig::new("k", "http://127.0.0.1:9", "http://127.0.0.1:9");
    config.max_retries = 1;
    config.retry_base_delay = Duration::from_millis(1);
    config.request_timeout = Duration::from_secs(2);
    let client = InferenceClient::new(config);

    let err = client.summarize("text").await.unwrap_err();
    match err {
        InferenceError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, InferenceError::Network(_) | InferenceError::Timeout));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unanswered_requests_time_out_then_give_up() {
    // Accepts connections and never writes a response
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    let _server = tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            open.push(socket);
        }
    });

    let mut config = InferenceConfig::new("k", url.clone(), url);
    config.max_retries = 2;
    config.retry_base_delay = Duration::from_millis(1);
    config.request_timeout = Duration::from_millis(150);
    let client = InferenceClient::new(config);

    let err = client.summarize("text").await.unwrap_err();
    match err {
        InferenceError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, InferenceError::Timeout));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_summarize_reads_summary_field() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v3/tools/summarize/")
        .match_body(Matcher::Json(json!({"text": "USER: my order is late"})))
        .with_status(200)
        .with_body(r#"{"summary": "Late order"}"#)
        .create_async()
        .await;

    let client = client_for(&server, 0);
    let summary = client.summarize("USER: my order is late").await.unwrap();
    assert_eq!(summary, "Late order");
}

#[tokio::test]
async fn test_create_agent_returns_provider_id() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v3/agents/")
        .match_body(Matcher::PartialJson(json!({
            "name": "Support",
            "description": "AI Agent: Support",
            "temperature": "0.2",
            "llm_credential_id": "lyzr_openai"
        })))
        .with_status(200)
        .with_body(r#"{"agent_id": "agt_new"}"#)
        .create_async()
        .await;

    let client = client_for(&server, 0);
    let definition = AgentDefinition {
        name: "Support".to_string(),
        system_prompt: "Be nice".to_string(),
        provider_id: "OpenAI".to_string(),
        model: "gpt-4o-mini".to_string(),
        temperature: 0.2,
        top_p: 1.0,
    };
    assert_eq!(client.create_agent(&definition).await.unwrap(), "agt_new");
}

#[tokio::test]
async fn test_create_knowledge_config_returns_id() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v3/rag/")
        .match_body(Matcher::PartialJson(json!({
            "collection_name": "agent_abc",
            "embedding_model": "text-embedding-ada-002"
        })))
        .with_status(200)
        .with_body(r#"{"id": "rag_1"}"#)
        .create_async()
        .await;

    let client = client_for(&server, 0);
    let id = client
        .create_knowledge_config("agent_abc", "gpt-4o-mini")
        .await
        .unwrap();
    assert_eq!(id, "rag_1");
}

#[tokio::test]
async fn test_link_knowledge_preserves_agent_fields() {
    let mut server = mockito::Server::new_async().await;
    let get = server
        .mock("GET", "/v3/agents/agt_1")
        .with_status(200)
        .with_body(r#"{"name": "Support", "model": "gpt-4o", "tools": []}"#)
        .expect(1)
        .create_async()
        .await;
    let put = server
        .mock("PUT", "/v3/agents/agt_1")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"name": "Support", "model": "gpt-4o"})),
            Matcher::Regex(r#""type":"KNOWLEDGE_BASE""#.to_string()),
            Matcher::Regex(r#""rag_id":"rag_1""#.to_string()),
        ]))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server, 0);
    client.link_knowledge_to_agent("agt_1", "rag_1").await.unwrap();

    get.assert_async().await;
    put.assert_async().await;
}

#[tokio::test]
async fn test_connection_probe_makes_single_attempt() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v3/agents/")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server, 3);
    assert!(client.test_connection().await.is_err());
    mock.assert_async().await;
}
