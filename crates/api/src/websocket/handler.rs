//! WebSocket handler for Axum
//!
//! Validates the connection target, upgrades, then bridges the socket to a
//! [`ChatSession`](super::session::ChatSession) running on its own task.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use tokio::sync::mpsc;

use crate::error::ApiResult;
use crate::state::AppState;

use super::{
    connection::Connection,
    events::ServerEvent,
    session::{validate_end_user_id, ResolvedAgent, SessionEngine, INTERNAL_ERROR_MESSAGE},
};

/// Inbound frames buffered ahead of the session task
const INBOUND_QUEUE_DEPTH: usize = 32;

/// How long queued outbound events get to drain after the session ends
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket handler - upgrades `/ws/chat/:agent_id/:end_user_id`
///
/// Configuration errors refuse the upgrade; no conversation is created.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Path((agent_id, end_user_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let engine = app_state.sessions.clone();

    let agent = engine.resolve_agent(&agent_id).await.map_err(|e| {
        tracing::warn!(agent_id = %agent_id, error = %e, "Refusing chat connection");
        e
    })?;
    let end_user_id = validate_end_user_id(&end_user_id)?;

    tracing::info!(
        agent_id = %agent.agent().id,
        end_user_id = %end_user_id,
        "Chat connection upgrade requested"
    );

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, engine, agent, end_user_id)))
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    engine: SessionEngine,
    agent: ResolvedAgent,
    end_user_id: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Held until the connection-established event is out
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn = Arc::new(Connection::held(tx));
    let session_id = conn.session_id;

    // Runs until every handle to the connection is gone
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        return; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let (session, subscription) = match engine
        .establish(agent, &end_user_id, Arc::clone(&conn))
        .await
    {
        Ok(established) => established,
        Err(e) => {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "Failed to establish chat session"
            );
            let _ = conn.open(ServerEvent::error(INTERNAL_ERROR_MESSAGE), |_| true);
            drop(conn);
            let _ = tokio::time::timeout(FLUSH_TIMEOUT, send_task).await;
            return;
        }
    };
    let conversation_id = session.conversation_id();

    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_QUEUE_DEPTH);
    let mut turn_task = tokio::spawn(session.run(inbound_rx));
    let mut session_finished = false;

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(text).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(session_id = %session_id, "WebSocket close received");
                    break;
                }
                Some(Ok(_)) => {} // Binary and control frames are ignored
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
            result = &mut turn_task => {
                session_finished = true;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::info!(session_id = %session_id, error = %e, "Chat session closed by server");
                    }
                    Err(e) => {
                        tracing::error!(session_id = %session_id, error = %e, "Chat session task failed");
                    }
                }
                break;
            }
        }
    }

    // Cleanup on disconnect
    tracing::info!(
        session_id = %session_id,
        conversation_id = %conversation_id,
        "WebSocket connection closing"
    );
    subscription.release().await;
    drop(inbound_tx);
    drop(conn);

    if session_finished {
        // Let the final error event reach the client before closing
        let _ = tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await;
    }
    // An in-flight turn keeps running detached so its messages are persisted
    send_task.abort();
}
