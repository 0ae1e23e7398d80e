//! Collaborator interfaces consumed by the session engine and escalation worker
//!
//! Two implementations ship with this crate: [`crate::pg::PgChatStore`] for
//! production and [`crate::memory::MemoryStore`] for tests and local runs.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{Agent, Conversation, Feedback, Message, NewTicket, Sender, Ticket};

/// Read-only lookup of agent configuration
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Look up an agent by id, regardless of its active/provisioned state
    async fn find_agent(&self, agent_id: Uuid) -> StoreResult<Option<Agent>>;
}

/// Persistence for conversations and their messages
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Idempotent get-or-create keyed on (agent, end-user identifier)
    async fn get_or_create_conversation(
        &self,
        agent_id: Uuid,
        end_user_id: &str,
    ) -> StoreResult<Conversation>;

    async fn get_conversation(&self, conversation_id: Uuid) -> StoreResult<Option<Conversation>>;

    /// Append a message and bump the conversation's message count
    async fn append_message(
        &self,
        conversation_id: Uuid,
        sender: Sender,
        content: &str,
    ) -> StoreResult<Message>;

    /// Messages in creation order. With a limit, the most recent `limit`
    /// messages are returned, still in ascending order.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Message>>;

    /// Overwrite feedback on a message belonging to `conversation_id`.
    /// Returns `false` when no such message exists in that conversation.
    async fn set_feedback(
        &self,
        message_id: Uuid,
        conversation_id: Uuid,
        value: Feedback,
    ) -> StoreResult<bool>;

    async fn update_summary(&self, conversation_id: Uuid, summary: &str) -> StoreResult<()>;

    /// Conversations with at least `min_messages` messages and no summary yet
    async fn conversations_missing_summary(
        &self,
        min_messages: i32,
        limit: i64,
    ) -> StoreResult<Vec<Conversation>>;
}

/// Creation contract of the ticketing collaborator
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn ticket_exists(&self, conversation_id: Uuid) -> StoreResult<bool>;

    /// Default destination team for an agent owner, if one exists
    async fn default_team_for_owner(&self, owner_id: Uuid) -> StoreResult<Option<Uuid>>;

    /// Create the ticket for a conversation.
    ///
    /// Re-checks existence while holding a write lock on the conversation and
    /// relies on the unique conversation reference as the final guard. Returns
    /// `None` when a ticket already exists; that is not an error.
    async fn create_ticket(&self, ticket: NewTicket) -> StoreResult<Option<Ticket>>;
}

/// Everything the chat core needs from persistence
pub trait ChatStore: AgentDirectory + ConversationStore + TicketStore {}

impl<T> ChatStore for T where T: AgentDirectory + ConversationStore + TicketStore {}
