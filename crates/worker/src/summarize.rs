//! Conversation summary sweep
//!
//! Summarizes conversations that have grown past a threshold and have no
//! summary yet. Runs off the connection path, so closing a session never
//! waits on the AI provider.

use chatdesk_api::escalation::render_transcript;
use chatdesk_api::inference::AiBackend;
use chatdesk_shared::ChatStore;
use tracing::{error, info, warn};

/// Conversations handled per sweep
pub const SWEEP_BATCH_SIZE: i64 = 25;

/// Summarize pending conversations; returns how many were updated
pub async fn summarize_pending(store: &dyn ChatStore, ai: &dyn AiBackend, min_messages: i32) -> usize {
    let conversations = match store
        .conversations_missing_summary(min_messages, SWEEP_BATCH_SIZE)
        .await
    {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to fetch conversations for summarization");
            return 0;
        }
    };

    if conversations.is_empty() {
        return 0; // No work to do
    }

    info!(count = conversations.len(), "Summarizing conversations");

    let mut updated = 0;
    for conversation in conversations {
        let messages = match store.list_messages(conversation.id, None).await {
            Ok(messages) => messages,
            Err(e) => {
                error!(conversation_id = %conversation.id, error = %e, "Failed to load transcript");
                continue;
            }
        };

        let summary = match ai.summarize(&render_transcript(&messages)).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => {
                warn!(conversation_id = %conversation.id, "Provider returned an empty summary");
                continue;
            }
            Err(e) => {
                warn!(conversation_id = %conversation.id, error = %e, "Summarization failed, will retry");
                continue;
            }
        };

        match store.update_summary(conversation.id, summary.trim()).await {
            Ok(()) => updated += 1,
            Err(e) => {
                error!(conversation_id = %conversation.id, error = %e, "Failed to store summary");
            }
        }
    }

    info!(updated = updated, "Summary sweep finished");
    updated
}
