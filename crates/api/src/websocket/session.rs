//! Chat session engine
//!
//! One [`ChatSession`] per live connection. The session validates and routes
//! inbound events, persists every turn before publishing it, and drives the AI
//! backend. Only persistence failures end a session; AI failures degrade to an
//! apology message and validation failures to an error event.

use std::sync::Arc;

use chatdesk_billing::MessageMeter;
use chatdesk_shared::{Agent, ChatStore, Feedback, Sender, StoreError};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::broadcast::{BroadcastError, Broadcaster, Subscription};
use super::connection::Connection;
use super::events::{ClientEvent, EventParseError, MessageEvent, ServerEvent};
use crate::escalation::EscalationWorker;
use crate::inference::{AiBackend, ChatRequest};

/// Default comma-separated escalation trigger phrases
pub const DEFAULT_ESCALATION_TRIGGERS: &str =
    "help,human agent,talk to a human,speak to a person,real person,create a ticket";

/// Marker appended to content cut at the length cap
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Longest accepted end-user identifier (matches the column width)
const MAX_END_USER_ID_LEN: usize = 255;

// User-facing texts. Raw error detail is only ever logged.
pub const APOLOGY_MESSAGE: &str =
    "I'm sorry, I'm having trouble responding right now. Please try again in a moment.";
pub const ESCALATION_ACK_MESSAGE: &str =
    "Thanks for your patience. I'm creating a support ticket so a member of our team can follow up with you.";
pub const TICKET_EXISTS_MESSAGE: &str =
    "A support ticket has already been created for this conversation. Our team will be in touch soon.";
const INVALID_FORMAT_MESSAGE: &str = "Invalid event format";
const UNKNOWN_EVENT_MESSAGE: &str = "Unsupported event type";
const EMPTY_MESSAGE: &str = "Message cannot be empty";
const TOO_LARGE_MESSAGE: &str = "Message is too large";
const INVALID_FEEDBACK_MESSAGE: &str = "Feedback must be \"positive\" or \"negative\"";
const FEEDBACK_NOT_FOUND_MESSAGE: &str = "Message not found in this conversation";
pub const INTERNAL_ERROR_MESSAGE: &str = "Something went wrong. Please reconnect and try again.";

/// Per-session limits and trigger phrases
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Messages replayed on connect
    pub history_limit: usize,
    /// Stored content cap in characters
    pub max_message_chars: usize,
    /// Frames above this size are rejected outright
    pub max_inbound_bytes: usize,
    /// Lower-case trigger phrases
    pub escalation_triggers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            max_message_chars: 10_000,
            max_inbound_bytes: 65_536,
            escalation_triggers: crate::config::parse_triggers(DEFAULT_ESCALATION_TRIGGERS),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid agent identifier")]
    InvalidAgentId,

    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("Agent is inactive or not provisioned: {0}")]
    AgentUnavailable(Uuid),

    #[error("Invalid end-user identifier")]
    InvalidEndUser,

    #[error("Persistence failure: {0}")]
    Store(#[from] StoreError),

    #[error("Broadcast failure: {0}")]
    Broadcast(#[from] BroadcastError),
}

impl SessionError {
    /// Configuration errors refuse the connection before any state exists
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidAgentId
                | SessionError::AgentNotFound(_)
                | SessionError::AgentUnavailable(_)
                | SessionError::InvalidEndUser
        )
    }
}

/// An agent that passed the connect-time checks
#[derive(Debug, Clone)]
pub struct ResolvedAgent {
    agent: Agent,
    provider_ref: String,
}

impl ResolvedAgent {
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn provider_ref(&self) -> &str {
        &self.provider_ref
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Established,
    Active,
    Closed,
}

/// Shared collaborators for all chat sessions
#[derive(Clone)]
pub struct SessionEngine {
    store: Arc<dyn ChatStore>,
    ai: Arc<dyn AiBackend>,
    meter: Arc<dyn MessageMeter>,
    broadcaster: Arc<dyn Broadcaster>,
    escalations: EscalationWorker,
    config: Arc<SessionConfig>,
}

impl SessionEngine {
    pub fn new(
        store: Arc<dyn ChatStore>,
        ai: Arc<dyn AiBackend>,
        meter: Arc<dyn MessageMeter>,
        broadcaster: Arc<dyn Broadcaster>,
        config: SessionConfig,
    ) -> Self {
        let escalations =
            EscalationWorker::new(Arc::clone(&store), Arc::clone(&ai), Arc::clone(&broadcaster));

        Self {
            store,
            ai,
            meter,
            broadcaster,
            escalations,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn escalations(&self) -> &EscalationWorker {
        &self.escalations
    }

    /// Fail-closed agent check run before the connection is accepted
    pub async fn resolve_agent(&self, agent_id: &str) -> Result<ResolvedAgent, SessionError> {
        let agent_id =
            Uuid::parse_str(agent_id.trim()).map_err(|_| SessionError::InvalidAgentId)?;

        let agent = self
            .store
            .find_agent(agent_id)
            .await?
            .ok_or(SessionError::AgentNotFound(agent_id))?;

        let Some(provider_ref) = agent.provider_ref().map(str::to_string) else {
            return Err(SessionError::AgentUnavailable(agent_id));
        };

        Ok(ResolvedAgent {
            agent,
            provider_ref,
        })
    }

    /// Attach a connection to its conversation and replay history.
    ///
    /// The connection joins the broadcast group before history is read, so
    /// nothing published in between is lost. Messages that show up in both
    /// are delivered once, inside the history.
    pub async fn establish(
        &self,
        agent: ResolvedAgent,
        end_user_id: &str,
        conn: Arc<Connection>,
    ) -> Result<(ChatSession, Subscription), SessionError> {
        let end_user_id = validate_end_user_id(end_user_id)?;

        let conversation = self
            .store
            .get_or_create_conversation(agent.agent.id, &end_user_id)
            .await?;

        self.broadcaster
            .subscribe(conversation.id, Arc::clone(&conn))
            .await?;
        let subscription =
            Subscription::new(Arc::clone(&self.broadcaster), conversation.id, conn.session_id);

        let history: Vec<MessageEvent> = self
            .store
            .list_messages(conversation.id, Some(self.config.history_limit))
            .await?
            .iter()
            .map(MessageEvent::from)
            .collect();

        let replayed: Vec<Uuid> = history.iter().map(|m| m.id).collect();
        let established = ServerEvent::ConnectionEstablished {
            conversation_id: conversation.id,
            history,
        };
        let _ = conn.open(established, |event| match event {
            ServerEvent::NewMessage { message } => replayed.contains(&message.id),
            _ => false,
        });

        tracing::info!(
            conversation_id = %conversation.id,
            agent_id = %agent.agent.id,
            session_id = %conn.session_id,
            replayed = replayed.len(),
            "Chat session established"
        );

        let session = ChatSession {
            engine: self.clone(),
            agent,
            conversation_id: conversation.id,
            conn,
            state: SessionState::Established,
        };
        Ok((session, subscription))
    }

    fn record_usage(&self, owner_id: Uuid) {
        let meter = Arc::clone(&self.meter);
        tokio::spawn(async move {
            if let Err(e) = meter.record_user_message(owner_id).await {
                tracing::warn!(owner_id = %owner_id, error = %e, "Failed to record message usage");
            }
        });
    }
}

/// State owned by the task serving one connection
pub struct ChatSession {
    engine: SessionEngine,
    agent: ResolvedAgent,
    conversation_id: Uuid,
    conn: Arc<Connection>,
    state: SessionState,
}

impl ChatSession {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Process inbound frames in arrival order until the channel closes or a
    /// persistence failure ends the session.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<String>) -> Result<(), SessionError> {
        while let Some(text) = inbound.recv().await {
            self.handle_text(&text).await?;
        }
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Handle one inbound text frame.
    ///
    /// On a fatal error the client gets a generic error event and the session
    /// moves to `Closed`; the caller is expected to drop the connection.
    pub async fn handle_text(&mut self, text: &str) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Active;

        let result = self.dispatch(text).await;
        if let Err(e) = &result {
            tracing::error!(
                conversation_id = %self.conversation_id,
                session_id = %self.conn.session_id,
                error = %e,
                "Chat turn failed; closing session"
            );
            self.reply(ServerEvent::error(INTERNAL_ERROR_MESSAGE));
            self.state = SessionState::Closed;
        }
        result
    }

    async fn dispatch(&mut self, text: &str) -> Result<(), SessionError> {
        if text.len() > self.engine.config.max_inbound_bytes {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                bytes = text.len(),
                "Rejected oversized frame"
            );
            self.reply(ServerEvent::error(TOO_LARGE_MESSAGE));
            return Ok(());
        }

        match ClientEvent::parse(text) {
            Ok(ClientEvent::UserMessage { message }) => self.handle_user_message(&message).await,
            Ok(ClientEvent::Feedback {
                message_id,
                feedback,
            }) => self.handle_feedback(&message_id, &feedback).await,
            Ok(ClientEvent::EscalateToTicket) => self.handle_escalate().await,
            Ok(ClientEvent::Ping) => {
                self.reply(ServerEvent::Pong);
                Ok(())
            }
            Err(EventParseError::UnknownType(event_type)) => {
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    event_type = %event_type,
                    "Unknown client event type"
                );
                self.reply(ServerEvent::error(UNKNOWN_EVENT_MESSAGE));
                Ok(())
            }
            Err(EventParseError::Malformed(reason)) => {
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    reason = %reason,
                    "Failed to parse client event"
                );
                self.reply(ServerEvent::error(INVALID_FORMAT_MESSAGE));
                Ok(())
            }
        }
    }

    async fn handle_user_message(&mut self, raw: &str) -> Result<(), SessionError> {
        let text = raw.trim();
        if text.is_empty() {
            self.reply(ServerEvent::error(EMPTY_MESSAGE));
            return Ok(());
        }
        let content = truncate_content(text, self.engine.config.max_message_chars);

        let user_message = self
            .engine
            .store
            .append_message(self.conversation_id, Sender::User, &content)
            .await?;
        self.engine.record_usage(self.agent.agent.owner_id);
        self.publish(ServerEvent::new_message(&user_message)).await;

        if matches_trigger(text, &self.engine.config.escalation_triggers) {
            tracing::info!(
                conversation_id = %self.conversation_id,
                "Escalation trigger phrase detected"
            );
            return self.handle_escalate().await;
        }

        let request = ChatRequest::new(
            self.agent.provider_ref(),
            self.conversation_id.to_string(),
            content,
            self.agent.agent.owner_email.clone(),
            self.agent.agent.knowledge_ref.as_deref(),
        );

        let reply = match self.engine.ai.get_response(request).await {
            Ok(reply) => truncate_content(&reply, self.engine.config.max_message_chars),
            Err(e) => {
                tracing::error!(
                    conversation_id = %self.conversation_id,
                    agent_id = %self.agent.agent.id,
                    error = %e,
                    "AI backend failed; replying with apology"
                );
                APOLOGY_MESSAGE.to_string()
            }
        };

        let ai_message = self
            .engine
            .store
            .append_message(self.conversation_id, Sender::Ai, &reply)
            .await?;
        self.publish(ServerEvent::new_message(&ai_message)).await;
        Ok(())
    }

    async fn handle_feedback(&mut self, message_id: &str, token: &str) -> Result<(), SessionError> {
        let Some(value) = Feedback::from_wire(token) else {
            self.reply(ServerEvent::error(INVALID_FEEDBACK_MESSAGE));
            return Ok(());
        };

        let Ok(message_id) = Uuid::parse_str(message_id.trim()) else {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                message_id = %message_id,
                "Feedback for malformed message id"
            );
            self.reply(ServerEvent::error(FEEDBACK_NOT_FOUND_MESSAGE));
            return Ok(());
        };

        let updated = self
            .engine
            .store
            .set_feedback(message_id, self.conversation_id, value)
            .await?;

        if updated {
            tracing::debug!(
                conversation_id = %self.conversation_id,
                message_id = %message_id,
                feedback = value.as_wire(),
                "Stored message feedback"
            );
            self.reply(ServerEvent::FeedbackConfirmation { message_id });
        } else {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                message_id = %message_id,
                "Feedback for message outside this conversation"
            );
            self.reply(ServerEvent::error(FEEDBACK_NOT_FOUND_MESSAGE));
        }
        Ok(())
    }

    async fn handle_escalate(&mut self) -> Result<(), SessionError> {
        if self.engine.store.ticket_exists(self.conversation_id).await? {
            self.reply(ServerEvent::NewMessage {
                message: MessageEvent::ephemeral_system(TICKET_EXISTS_MESSAGE),
            });
            return Ok(());
        }

        let ack = self
            .engine
            .store
            .append_message(self.conversation_id, Sender::System, ESCALATION_ACK_MESSAGE)
            .await?;
        self.publish(ServerEvent::new_message(&ack)).await;

        self.engine.escalations.spawn(self.conversation_id);
        Ok(())
    }

    /// Publish to the conversation group. Falls back to this connection
    /// alone if the group is unreachable; the turn is already durable.
    async fn publish(&self, event: ServerEvent) {
        if let Err(e) = self
            .engine
            .broadcaster
            .publish(&self.conversation_id, event.clone())
            .await
        {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                error = %e,
                "Broadcast failed; delivering to requesting connection only"
            );
            self.reply(event);
        }
    }

    fn reply(&self, event: ServerEvent) {
        if self.conn.send(event).is_err() {
            tracing::debug!(
                session_id = %self.conn.session_id,
                "Reply dropped; connection closed"
            );
        }
    }
}

/// Check an end-user identifier taken from the connection target
pub fn validate_end_user_id(raw: &str) -> Result<String, SessionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_END_USER_ID_LEN {
        return Err(SessionError::InvalidEndUser);
    }
    Ok(trimmed.to_string())
}

/// Cut `text` to `max_chars` characters, appending a visible marker when cut
pub fn truncate_content(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Case-insensitive trigger match on word boundaries
pub fn matches_trigger(text: &str, triggers: &[String]) -> bool {
    let normalized = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    triggers.iter().any(|trigger| {
        normalized.match_indices(trigger.as_str()).any(|(start, found)| {
            let end = start + found.len();
            let before = normalized[..start].chars().next_back();
            let after = normalized[end..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
    })
}
