//! WebSocket event types and serialization
//!
//! Defines the client-to-server and server-to-client chat events with
//! type-safe serde serialization. History replay and live delivery share
//! [`MessageEvent`], so clients handle a single message schema.

use chatdesk_shared::{Feedback, Message, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// End-user chat turn
    UserMessage { message: String },

    /// Rate a message (`"positive"` or `"negative"`)
    Feedback { message_id: String, feedback: String },

    /// Ask for a human to take over
    EscalateToTicket,

    /// Heartbeat ping to keep connection alive
    Ping,
}

const CLIENT_EVENT_TYPES: &[&str] = &["user_message", "feedback", "escalate_to_ticket", "ping"];

/// Why an inbound frame could not be turned into a [`ClientEvent`]
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("unknown event type: {0}")]
    UnknownType(String),
}

impl ClientEvent {
    /// Parse a text frame, telling unknown event types apart from
    /// malformed payloads of known ones.
    pub fn parse(text: &str) -> Result<Self, EventParseError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| EventParseError::Malformed(e.to_string()))?;

        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| EventParseError::Malformed("missing \"type\"".to_string()))?;

        if !CLIENT_EVENT_TYPES.contains(&event_type) {
            return Err(EventParseError::UnknownType(event_type.to_string()));
        }

        serde_json::from_value(value).map_err(|e| EventParseError::Malformed(e.to_string()))
    }
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
///
/// Also deserializable so events can be relayed between processes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once after the connection is set up
    ConnectionEstablished {
        conversation_id: Uuid,
        history: Vec<MessageEvent>,
    },

    /// Message added to the conversation
    NewMessage { message: MessageEvent },

    /// Feedback stored for a message
    FeedbackConfirmation { message_id: Uuid },

    /// Error message
    Error { message: String },

    /// Heartbeat response
    Pong,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn new_message(message: &Message) -> Self {
        ServerEvent::NewMessage {
            message: MessageEvent::from(message),
        }
    }
}

// =============================================================================
// Event Data Structures
// =============================================================================

/// Message event data
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MessageEvent {
    pub id: Uuid,
    pub sender: Sender,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

impl From<&Message> for MessageEvent {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender: message.sender,
            content: message.content.clone(),
            created_at: message.created_at,
            feedback: message.feedback,
        }
    }
}

impl MessageEvent {
    /// A system notice delivered to one connection without being stored
    pub fn ephemeral_system(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: Sender::System,
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
            feedback: None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_client_event_deserialization() {
        let event = ClientEvent::parse(r#"{"type":"user_message","message":"hi"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::UserMessage {
                message: "hi".to_string()
            }
        );

        let event =
            ClientEvent::parse(r#"{"type":"feedback","message_id":"abc","feedback":"positive"}"#)
                .unwrap();
        assert!(matches!(event, ClientEvent::Feedback { .. }));

        let event = ClientEvent::parse(r#"{"type":"escalate_to_ticket"}"#).unwrap();
        assert_eq!(event, ClientEvent::EscalateToTicket);
    }

    #[test]
    fn test_unknown_type_is_distinguished() {
        match ClientEvent::parse(r#"{"type":"typing_start"}"#) {
            Err(EventParseError::UnknownType(t)) => assert_eq!(t, "typing_start"),
            other => panic!("Expected UnknownType, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            ClientEvent::parse("not json"),
            Err(EventParseError::Malformed(_))
        ));
        assert!(matches!(
            ClientEvent::parse(r#"{"message":"hi"}"#),
            Err(EventParseError::Malformed(_))
        ));
        assert!(matches!(
            ClientEvent::parse(r#"{"type":"user_message"}"#),
            Err(EventParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_server_event_serialization() {
        let event = ServerEvent::Pong;
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_new_message_shape() {
        let event = ServerEvent::NewMessage {
            message: MessageEvent {
                id: Uuid::nil(),
                sender: Sender::Ai,
                content: "Hello".to_string(),
                created_at: OffsetDateTime::UNIX_EPOCH,
                feedback: None,
            },
        };
        let json: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["message"]["sender"], "AI");
        assert_eq!(json["message"]["created_at"], "1970-01-01T00:00:00Z");
        assert!(json["message"].get("feedback").is_none());
    }

    #[test]
    fn test_feedback_serialized_lowercase() {
        let event = MessageEvent {
            id: Uuid::nil(),
            sender: Sender::Ai,
            content: "Hello".to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            feedback: Some(Feedback::Positive),
        };
        let json: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["feedback"], "positive");
    }
}
