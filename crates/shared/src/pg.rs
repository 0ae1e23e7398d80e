//! Postgres-backed implementation of the chat collaborator traits

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{AgentDirectory, ConversationStore, TicketStore};
use crate::types::{Agent, Conversation, ConversationStatus, Feedback, Message, NewTicket, Sender, Ticket};

const CONVERSATION_COLUMNS: &str =
    "id, agent_id, end_user_id, status, summary, message_count, created_at, updated_at";

#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentDirectory for PgChatStore {
    async fn find_agent(&self, agent_id: Uuid) -> StoreResult<Option<Agent>> {
        let agent = sqlx::query_as::<_, Agent>(
            r#"
            SELECT a.id, a.owner_id, u.email AS owner_email, a.name, a.provider_agent_id,
                   a.is_active, a.model, a.system_prompt, a.temperature, a.top_p,
                   a.max_tokens, kb.provider_rag_id AS knowledge_ref
            FROM agents a
            JOIN users u ON u.id = a.owner_id
            LEFT JOIN knowledge_bases kb ON kb.agent_id = a.id
            WHERE a.id = $1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(agent)
    }
}

#[async_trait]
impl ConversationStore for PgChatStore {
    async fn get_or_create_conversation(
        &self,
        agent_id: Uuid,
        end_user_id: &str,
    ) -> StoreResult<Conversation> {
        // The no-op DO UPDATE makes RETURNING yield the existing row on conflict
        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            r#"
            INSERT INTO conversations (id, agent_id, end_user_id, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (agent_id, end_user_id) DO UPDATE SET
              end_user_id = EXCLUDED.end_user_id
            RETURNING {CONVERSATION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(agent_id)
        .bind(end_user_id)
        .bind(ConversationStatus::Active)
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> StoreResult<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        sender: Sender,
        content: &str,
    ) -> StoreResult<Message> {
        let mut tx = self.pool.begin().await?;

        // Updating the conversation first takes its row lock, so appends to one
        // conversation commit in the same order their timestamps are taken.
        let updated = sqlx::query(
            r#"
            UPDATE conversations
            SET message_count = message_count + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "conversation {conversation_id}"
            )));
        }

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, conversation_id, sender, content, created_at)
            VALUES ($1, $2, $3, $4, clock_timestamp())
            RETURNING id, conversation_id, sender, content, feedback, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(sender)
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Message>> {
        // LIMIT NULL means no limit in Postgres
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));

        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, conversation_id, sender, content, feedback, created_at
            FROM (
                SELECT id, conversation_id, sender, content, feedback, created_at, seq
                FROM messages
                WHERE conversation_id = $1
                ORDER BY created_at DESC, seq DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn set_feedback(
        &self,
        message_id: Uuid,
        conversation_id: Uuid,
        value: Feedback,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE messages SET feedback = $1 WHERE id = $2 AND conversation_id = $3",
        )
        .bind(value)
        .bind(message_id)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_summary(&self, conversation_id: Uuid, summary: &str) -> StoreResult<()> {
        sqlx::query("UPDATE conversations SET summary = $2, updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .bind(summary)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn conversations_missing_summary(
        &self,
        min_messages: i32,
        limit: i64,
    ) -> StoreResult<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations
            WHERE summary IS NULL AND message_count >= $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#
        ))
        .bind(min_messages)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(conversations)
    }
}

#[async_trait]
impl TicketStore for PgChatStore {
    async fn ticket_exists(&self, conversation_id: Uuid) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM tickets WHERE conversation_id = $1)",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn default_team_for_owner(&self, owner_id: Uuid) -> StoreResult<Option<Uuid>> {
        let team_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM teams WHERE owner_id = $1 ORDER BY created_at ASC LIMIT 1",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(team_id)
    }

    async fn create_ticket(&self, ticket: NewTicket) -> StoreResult<Option<Ticket>> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM conversations WHERE id = $1 FOR UPDATE",
        )
        .bind(ticket.conversation_id)
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            return Err(StoreError::NotFound(format!(
                "conversation {}",
                ticket.conversation_id
            )));
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM tickets WHERE conversation_id = $1)",
        )
        .bind(ticket.conversation_id)
        .fetch_one(&mut *tx)
        .await?;

        if exists {
            tx.rollback().await?;
            return Ok(None);
        }

        let created = sqlx::query_as::<_, Ticket>(
            r#"
            INSERT INTO tickets (id, conversation_id, title, priority, team_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (conversation_id) DO NOTHING
            RETURNING id, number, conversation_id, title, status, priority,
                      team_id, assigned_to, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ticket.conversation_id)
        .bind(&ticket.title)
        .bind(ticket.priority)
        .bind(ticket.team_id)
        .fetch_optional(&mut *tx)
        .await?;

        if created.is_some() {
            sqlx::query(
                r#"
                UPDATE conversations
                SET status = $2, summary = COALESCE($3, summary), updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(ticket.conversation_id)
            .bind(ConversationStatus::Flagged)
            .bind(ticket.summary.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }
}
