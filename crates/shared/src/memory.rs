//! In-process store used by tests and single-node development runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{AgentDirectory, ConversationStore, TicketStore};
use crate::types::{
    Agent, Conversation, ConversationStatus, Feedback, Message, NewTicket, Sender, Ticket,
    TicketStatus,
};

#[derive(Default)]
struct Inner {
    agents: HashMap<Uuid, Agent>,
    conversations: HashMap<Uuid, Conversation>,
    /// Insertion order doubles as creation order
    messages: Vec<Message>,
    tickets: HashMap<Uuid, Ticket>,
    /// (team id, owner id) in creation order
    teams: Vec<(Uuid, Uuid)>,
    next_ticket_number: i64,
}

/// Store backed by a single async lock over plain collections
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_agent(&self, agent: Agent) {
        self.inner.write().await.agents.insert(agent.id, agent);
    }

    /// Register a team owned by `owner_id` and return its id
    pub async fn insert_team(&self, owner_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.write().await.teams.push((id, owner_id));
        id
    }

    pub async fn ticket_count(&self) -> usize {
        self.inner.read().await.tickets.len()
    }

    pub async fn ticket_for(&self, conversation_id: Uuid) -> Option<Ticket> {
        self.inner.read().await.tickets.get(&conversation_id).cloned()
    }

    /// Make every subsequent call fail as if the database went away
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentDirectory for MemoryStore {
    async fn find_agent(&self, agent_id: Uuid) -> StoreResult<Option<Agent>> {
        self.check()?;
        Ok(self.inner.read().await.agents.get(&agent_id).cloned())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_or_create_conversation(
        &self,
        agent_id: Uuid,
        end_user_id: &str,
    ) -> StoreResult<Conversation> {
        self.check()?;
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .conversations
            .values()
            .find(|c| c.agent_id == agent_id && c.end_user_id == end_user_id)
        {
            return Ok(existing.clone());
        }

        if !inner.agents.contains_key(&agent_id) {
            return Err(StoreError::NotFound(format!("agent {agent_id}")));
        }

        let now = OffsetDateTime::now_utc();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            agent_id,
            end_user_id: end_user_id.to_string(),
            status: ConversationStatus::Active,
            summary: None,
            message_count: 0,
            created_at: now,
            updated_at: now,
        };
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> StoreResult<Option<Conversation>> {
        self.check()?;
        Ok(self
            .inner
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .cloned())
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        sender: Sender,
        content: &str,
    ) -> StoreResult<Message> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let now = OffsetDateTime::now_utc();

        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        conversation.message_count += 1;
        conversation.updated_at = now;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender,
            content: content.to_string(),
            feedback: None,
            created_at: now,
        };
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Message>> {
        self.check()?;
        let inner = self.inner.read().await;
        let all: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();

        let skip = match limit {
            Some(limit) => all.len().saturating_sub(limit),
            None => 0,
        };
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn set_feedback(
        &self,
        message_id: Uuid,
        conversation_id: Uuid,
        value: Feedback,
    ) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        match inner
            .messages
            .iter_mut()
            .find(|m| m.id == message_id && m.conversation_id == conversation_id)
        {
            Some(message) => {
                message.feedback = Some(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_summary(&self, conversation_id: Uuid, summary: &str) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if let Some(conversation) = inner.conversations.get_mut(&conversation_id) {
            conversation.summary = Some(summary.to_string());
            conversation.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn conversations_missing_summary(
        &self,
        min_messages: i32,
        limit: i64,
    ) -> StoreResult<Vec<Conversation>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut pending: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.summary.is_none() && c.message_count >= min_messages)
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.updated_at);
        pending.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(pending)
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn ticket_exists(&self, conversation_id: Uuid) -> StoreResult<bool> {
        self.check()?;
        Ok(self
            .inner
            .read()
            .await
            .tickets
            .contains_key(&conversation_id))
    }

    async fn default_team_for_owner(&self, owner_id: Uuid) -> StoreResult<Option<Uuid>> {
        self.check()?;
        Ok(self
            .inner
            .read()
            .await
            .teams
            .iter()
            .find(|(_, owner)| *owner == owner_id)
            .map(|(id, _)| *id))
    }

    async fn create_ticket(&self, ticket: NewTicket) -> StoreResult<Option<Ticket>> {
        self.check()?;
        // The write guard is held across check-and-insert
        let mut inner = self.inner.write().await;

        if !inner.conversations.contains_key(&ticket.conversation_id) {
            return Err(StoreError::NotFound(format!(
                "conversation {}",
                ticket.conversation_id
            )));
        }
        if inner.tickets.contains_key(&ticket.conversation_id) {
            return Ok(None);
        }

        inner.next_ticket_number += 1;
        let created = Ticket {
            id: Uuid::new_v4(),
            number: inner.next_ticket_number,
            conversation_id: ticket.conversation_id,
            title: ticket.title,
            status: TicketStatus::New,
            priority: ticket.priority,
            team_id: ticket.team_id,
            assigned_to: None,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.tickets.insert(created.conversation_id, created.clone());

        if let Some(conversation) = inner.conversations.get_mut(&ticket.conversation_id) {
            conversation.status = ConversationStatus::Flagged;
            if ticket.summary.is_some() {
                conversation.summary = ticket.summary;
            }
            conversation.updated_at = OffsetDateTime::now_utc();
        }

        Ok(Some(created))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::types::TicketPriority;

    fn agent() -> Agent {
        Agent {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            owner_email: "owner@example.com".to_string(),
            name: "Support".to_string(),
            provider_agent_id: Some("agt_1".to_string()),
            is_active: true,
            model: "gpt-4o-mini".to_string(),
            system_prompt: String::new(),
            temperature: 0.2,
            top_p: 1.0,
            max_tokens: 1500,
            knowledge_ref: None,
        }
    }

    fn new_ticket(conversation_id: Uuid) -> NewTicket {
        NewTicket {
            conversation_id,
            title: "User needs assistance".to_string(),
            summary: Some("summary".to_string()),
            team_id: None,
            priority: TicketPriority::Normal,
        }
    }

    #[tokio::test]
    async fn test_conversation_is_reused_per_end_user() {
        let store = MemoryStore::new();
        let agent = agent();
        store.insert_agent(agent.clone()).await;

        let a = store.get_or_create_conversation(agent.id, "u1").await.unwrap();
        let b = store.get_or_create_conversation(agent.id, "u1").await.unwrap();
        let c = store.get_or_create_conversation(agent.id, "u2").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn test_list_messages_returns_most_recent_ascending() {
        let store = MemoryStore::new();
        let agent = agent();
        store.insert_agent(agent.clone()).await;
        let conv = store.get_or_create_conversation(agent.id, "u1").await.unwrap();

        for i in 0..60 {
            store
                .append_message(conv.id, Sender::User, &format!("m{i}"))
                .await
                .unwrap();
        }

        let recent = store.list_messages(conv.id, Some(50)).await.unwrap();
        assert_eq!(recent.len(), 50);
        assert_eq!(recent.first().unwrap().content, "m10");
        assert_eq!(recent.last().unwrap().content, "m59");

        let conv = store.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(conv.message_count, 60);
    }

    #[tokio::test]
    async fn test_feedback_scoped_to_conversation() {
        let store = MemoryStore::new();
        let agent = agent();
        store.insert_agent(agent.clone()).await;
        let mine = store.get_or_create_conversation(agent.id, "u1").await.unwrap();
        let other = store.get_or_create_conversation(agent.id, "u2").await.unwrap();
        let msg = store.append_message(mine.id, Sender::Ai, "hi").await.unwrap();

        assert!(!store.set_feedback(msg.id, other.id, Feedback::Positive).await.unwrap());
        assert!(store.set_feedback(msg.id, mine.id, Feedback::Positive).await.unwrap());
        assert!(store.set_feedback(msg.id, mine.id, Feedback::Negative).await.unwrap());

        let stored = store.list_messages(mine.id, None).await.unwrap();
        assert_eq!(stored[0].feedback, Some(Feedback::Negative));
    }

    #[tokio::test]
    async fn test_second_ticket_is_refused_and_conversation_flagged() {
        let store = MemoryStore::new();
        let agent = agent();
        store.insert_agent(agent.clone()).await;
        let conv = store.get_or_create_conversation(agent.id, "u1").await.unwrap();

        let first = store.create_ticket(new_ticket(conv.id)).await.unwrap();
        let second = store.create_ticket(new_ticket(conv.id)).await.unwrap();
        assert_eq!(first.unwrap().reference(), "TKT-000001");
        assert!(second.is_none());
        assert_eq!(store.ticket_count().await, 1);

        let conv = store.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(conv.status, ConversationStatus::Flagged);
        assert_eq!(conv.summary.as_deref(), Some("summary"));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_calls() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.find_agent(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
