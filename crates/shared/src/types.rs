//! Domain types shared across Chatdesk
//!
//! These mirror the rows the session engine reads and writes. The surrounding
//! CRUD (agent editing, knowledge upload, billing plans) lives elsewhere and only
//! shows up here as the fields the chat core actually needs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum length of a ticket title (matches the `tickets.title` column)
pub const MAX_TICKET_TITLE_CHARS: usize = 255;

/// Prefix used when rendering human-readable ticket references
pub const TICKET_REFERENCE_PREFIX: &str = "TKT";

// =============================================================================
// Enums
// =============================================================================

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Sender {
    User,
    Ai,
    System,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Ai => "AI",
            Self::System => "SYSTEM",
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// End-user rating of a single message
///
/// Stored upper-case (`POSITIVE`), exchanged lower-case (`positive`) on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
}

impl Feedback {
    /// Parse a wire token. Only the exact lower-case tokens are accepted.
    pub fn from_wire(token: &str) -> Option<Self> {
        match token {
            "positive" => Some(Self::Positive),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

/// Conversation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ConversationStatus {
    Active,
    Resolved,
    Flagged,
    Archived,
}

impl Default for ConversationStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// Ticket workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    New,
    Open,
    Pending,
    OnHold,
    Solved,
    Closed,
}

impl Default for TicketStatus {
    fn default() -> Self {
        Self::New
    }
}

/// Ticket priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for TicketPriority {
    fn default() -> Self {
        Self::Normal
    }
}

// =============================================================================
// Rows
// =============================================================================

/// Configuration for one AI persona, read-only to the chat core
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_email: String,
    pub name: String,
    /// Provider-side agent reference; `None` until provisioned
    pub provider_agent_id: Option<String>,
    pub is_active: bool,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: i32,
    /// Provider-side knowledge-base reference, if the agent has one
    pub knowledge_ref: Option<String>,
}

impl Agent {
    /// Returns the provider reference when the agent can serve chats.
    ///
    /// An agent is servable only if it is active and carries a non-blank
    /// provider reference.
    pub fn provider_ref(&self) -> Option<&str> {
        if !self.is_active {
            return None;
        }
        self.provider_agent_id
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

/// One continuous exchange between an end-user identity and an agent
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub end_user_id: String,
    pub status: ConversationStatus,
    pub summary: Option<String>,
    pub message_count: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One turn within a conversation
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: Sender,
    pub content: String,
    pub feedback: Option<Feedback>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Support ticket created from an escalated conversation
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub number: i64,
    pub conversation_id: Uuid,
    pub title: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub team_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Ticket {
    /// Human-readable reference, e.g. `TKT-000042`
    pub fn reference(&self) -> String {
        format!("{}-{:06}", TICKET_REFERENCE_PREFIX, self.number)
    }
}

/// Input for ticket creation
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub conversation_id: Uuid,
    pub title: String,
    pub summary: Option<String>,
    pub team_id: Option<Uuid>,
    pub priority: TicketPriority,
}

/// Per (subscription, day) message counter
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageRecord {
    pub subscription_id: Uuid,
    pub date: time::Date,
    pub messages_count: i64,
}

/// Truncate `title` to the ticket title column width, on a char boundary.
pub fn clamp_ticket_title(title: &str) -> String {
    title.trim().chars().take(MAX_TICKET_TITLE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn agent(active: bool, provider: Option<&str>) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            owner_email: "owner@example.com".to_string(),
            name: "Support".to_string(),
            provider_agent_id: provider.map(str::to_string),
            is_active: active,
            model: "gpt-4o-mini".to_string(),
            system_prompt: String::new(),
            temperature: 0.2,
            top_p: 1.0,
            max_tokens: 1500,
            knowledge_ref: None,
        }
    }

    #[test]
    fn test_provider_ref_requires_active_and_reference() {
        assert_eq!(agent(true, Some("agt_1")).provider_ref(), Some("agt_1"));
        assert_eq!(agent(false, Some("agt_1")).provider_ref(), None);
        assert_eq!(agent(true, None).provider_ref(), None);
        assert_eq!(agent(true, Some("   ")).provider_ref(), None);
    }

    #[test]
    fn test_feedback_wire_tokens_are_lowercase_only() {
        assert_eq!(Feedback::from_wire("positive"), Some(Feedback::Positive));
        assert_eq!(Feedback::from_wire("negative"), Some(Feedback::Negative));
        assert_eq!(Feedback::from_wire("POSITIVE"), None);
        assert_eq!(Feedback::from_wire("meh"), None);
        assert_eq!(
            serde_json::to_string(&Feedback::Negative).unwrap(),
            r#""negative""#
        );
    }

    #[test]
    fn test_sender_serialization() {
        assert_eq!(serde_json::to_string(&Sender::Ai).unwrap(), r#""AI""#);
        assert_eq!(Sender::System.to_string(), "SYSTEM");
    }

    #[test]
    fn test_ticket_reference_is_zero_padded() {
        let ticket = Ticket {
            id: Uuid::new_v4(),
            number: 42,
            conversation_id: Uuid::new_v4(),
            title: "Refund request".to_string(),
            status: TicketStatus::New,
            priority: TicketPriority::Normal,
            team_id: None,
            assigned_to: None,
            created_at: OffsetDateTime::now_utc(),
        };
        assert_eq!(ticket.reference(), "TKT-000042");
    }

    #[test]
    fn test_clamp_ticket_title() {
        let long = "é".repeat(300);
        assert_eq!(clamp_ticket_title(&long).chars().count(), MAX_TICKET_TITLE_CHARS);
        assert_eq!(clamp_ticket_title("  short  "), "short");
    }
}
