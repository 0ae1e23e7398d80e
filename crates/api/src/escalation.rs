//! Background escalation of conversations to support tickets
//!
//! Runs detached from the session that asked for it. The user already has an
//! acknowledgement, so failures here are logged and never surface on the
//! socket.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chatdesk_shared::{
    clamp_ticket_title, ChatStore, Message, NewTicket, Sender, StoreError, Ticket, TicketPriority,
};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::inference::AiBackend;
use crate::websocket::{Broadcaster, ServerEvent};

/// Ticket title used when the summary cannot be produced
pub const FALLBACK_TICKET_TITLE: &str = "User needs assistance";

#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub enum EscalationOutcome {
    Created(Ticket),
    AlreadyExists,
    /// Another escalation of the same conversation is running in this process
    InProgress,
}

#[derive(Clone)]
pub struct EscalationWorker {
    store: Arc<dyn ChatStore>,
    ai: Arc<dyn AiBackend>,
    broadcaster: Arc<dyn Broadcaster>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

/// Claim on a conversation for the duration of one escalation
struct InFlight {
    set: Arc<Mutex<HashSet<Uuid>>>,
    conversation_id: Uuid,
}

impl InFlight {
    fn claim(set: &Arc<Mutex<HashSet<Uuid>>>, conversation_id: Uuid) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|p| p.into_inner());
        guard.insert(conversation_id).then(|| Self {
            set: Arc::clone(set),
            conversation_id,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(|p| p.into_inner());
        guard.remove(&self.conversation_id);
    }
}

impl EscalationWorker {
    pub fn new(
        store: Arc<dyn ChatStore>,
        ai: Arc<dyn AiBackend>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            ai,
            broadcaster,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run [`EscalationWorker::escalate`] on its own task
    pub fn spawn(&self, conversation_id: Uuid) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move {
            match worker.escalate(conversation_id).await {
                Ok(EscalationOutcome::Created(ticket)) => {
                    tracing::info!(
                        conversation_id = %conversation_id,
                        ticket = %ticket.reference(),
                        "Escalated conversation to ticket"
                    );
                }
                Ok(EscalationOutcome::AlreadyExists) => {
                    tracing::info!(
                        conversation_id = %conversation_id,
                        "Escalation skipped; ticket already exists"
                    );
                }
                Ok(EscalationOutcome::InProgress) => {
                    tracing::info!(
                        conversation_id = %conversation_id,
                        "Escalation skipped; already running"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Escalation failed"
                    );
                }
            }
        })
    }

    /// Summarize the conversation and open its ticket.
    ///
    /// At most one ticket exists per conversation; a repeated call resolves
    /// to [`EscalationOutcome::AlreadyExists`]. Concurrent calls in one process
    /// are claimed before the summary so only one pays for it; across
    /// processes the locked insert in the store is the guard.
    pub async fn escalate(&self, conversation_id: Uuid) -> Result<EscalationOutcome, EscalationError> {
        let Some(_claim) = InFlight::claim(&self.in_flight, conversation_id) else {
            return Ok(EscalationOutcome::InProgress);
        };

        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(EscalationError::ConversationNotFound(conversation_id))?;

        if self.store.ticket_exists(conversation_id).await? {
            return Ok(EscalationOutcome::AlreadyExists);
        }

        let messages = self.store.list_messages(conversation_id, None).await?;
        let transcript = render_transcript(&messages);

        let summary = match self.ai.summarize(&transcript).await {
            Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Summarization failed; using fallback ticket title"
                );
                None
            }
        };
        let title = summary
            .as_deref()
            .map(clamp_ticket_title)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| FALLBACK_TICKET_TITLE.to_string());

        let team_id = self.default_team(conversation.agent_id).await;

        let ticket = self
            .store
            .create_ticket(NewTicket {
                conversation_id,
                title,
                summary,
                team_id,
                priority: TicketPriority::default(),
            })
            .await?;

        let Some(ticket) = ticket else {
            return Ok(EscalationOutcome::AlreadyExists);
        };

        self.announce(conversation_id, &ticket).await;
        Ok(EscalationOutcome::Created(ticket))
    }

    /// Team lookup is best effort; tickets may start unassigned.
    async fn default_team(&self, agent_id: Uuid) -> Option<Uuid> {
        let agent = match self.store.find_agent(agent_id).await {
            Ok(agent) => agent?,
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, error = %e, "Agent lookup failed");
                return None;
            }
        };
        match self.store.default_team_for_owner(agent.owner_id).await {
            Ok(team) => team,
            Err(e) => {
                tracing::warn!(owner_id = %agent.owner_id, error = %e, "Default team lookup failed");
                None
            }
        }
    }

    async fn announce(&self, conversation_id: Uuid, ticket: &Ticket) {
        let content = ticket_created_message(ticket);
        let message = match self
            .store
            .append_message(conversation_id, Sender::System, &content)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to store ticket announcement"
                );
                return;
            }
        };

        if let Err(e) = self
            .broadcaster
            .publish(&conversation_id, ServerEvent::new_message(&message))
            .await
        {
            tracing::warn!(
                conversation_id = %conversation_id,
                error = %e,
                "Failed to broadcast ticket announcement"
            );
        }
    }
}

pub fn ticket_created_message(ticket: &Ticket) -> String {
    format!(
        "A new support ticket ({}) has been created for you. Our team will review your request and get back to you shortly.",
        ticket.reference()
    )
}

/// One `SENDER: content` line per message
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.sender, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
