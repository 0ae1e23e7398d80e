//! Conversation room management for pub/sub
//!
//! Manages per-conversation "rooms" for broadcasting events to every
//! connection in this process that is attached to the conversation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::broadcast::{BroadcastError, Broadcaster};
use super::connection::Connection;
use super::events::ServerEvent;

/// Manages conversation "rooms" for broadcasting events
#[derive(Clone)]
pub struct RoomManager {
    /// Map of conversation_id -> list of connections
    rooms: Arc<RwLock<HashMap<Uuid, Vec<Arc<Connection>>>>>,
}

impl RoomManager {
    /// Create a new room manager
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to a conversation room
    pub async fn join(&self, conversation_id: Uuid, conn: Arc<Connection>) {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(conversation_id).or_default();
        room.push(Arc::clone(&conn));

        tracing::debug!(
            conversation_id = %conversation_id,
            session_id = %conn.session_id,
            room_size = room.len(),
            "Connection joined conversation room"
        );
    }

    /// Remove a connection from a conversation room
    pub async fn leave(&self, conversation_id: &Uuid, session_id: &Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(conns) = rooms.get_mut(conversation_id) {
            conns.retain(|c| c.session_id != *session_id);

            // Clean up empty rooms
            if conns.is_empty() {
                rooms.remove(conversation_id);
                tracing::debug!(
                    conversation_id = %conversation_id,
                    "Removed empty conversation room"
                );
            } else {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    session_id = %session_id,
                    room_size = conns.len(),
                    "Connection left conversation room"
                );
            }
        }
    }

    /// Broadcast an event to all connections in a conversation room
    ///
    /// Silently ignores send errors (closed connections leave on their own)
    pub async fn broadcast(&self, conversation_id: &Uuid, event: ServerEvent) {
        let rooms = self.rooms.read().await;
        let Some(conns) = rooms.get(conversation_id) else {
            tracing::debug!(
                conversation_id = %conversation_id,
                "No local subscribers for conversation"
            );
            return;
        };

        let mut success_count = 0;
        let mut failed_count = 0;

        for conn in conns {
            match conn.send(event.clone()) {
                Ok(()) => success_count += 1,
                Err(_) => {
                    failed_count += 1;
                    tracing::debug!(
                        session_id = %conn.session_id,
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            recipients = success_count,
            failed = failed_count,
            "Broadcast event to conversation room"
        );
    }

    /// Get room size (number of connections) for a conversation
    pub async fn get_room_size(&self, conversation_id: &Uuid) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(conversation_id).map(|v| v.len()).unwrap_or(0)
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broadcaster for RoomManager {
    async fn subscribe(
        &self,
        conversation_id: Uuid,
        conn: Arc<Connection>,
    ) -> Result<(), BroadcastError> {
        self.join(conversation_id, conn).await;
        Ok(())
    }

    async fn unsubscribe(&self, conversation_id: &Uuid, session_id: &Uuid) {
        self.leave(conversation_id, session_id).await;
    }

    async fn publish(&self, conversation_id: &Uuid, event: ServerEvent) -> Result<(), BroadcastError> {
        self.broadcast(conversation_id, event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_room_join_and_leave() {
        let room_manager = RoomManager::new();
        let conversation_id = Uuid::new_v4();

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(tx));

        // Initially room doesn't exist
        assert_eq!(room_manager.get_room_size(&conversation_id).await, 0);

        room_manager.join(conversation_id, Arc::clone(&conn)).await;
        assert_eq!(room_manager.get_room_size(&conversation_id).await, 1);

        room_manager.leave(&conversation_id, &conn.session_id).await;
        assert_eq!(room_manager.get_room_size(&conversation_id).await, 0);
        assert!(room_manager.rooms.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_tab() {
        let room_manager = RoomManager::new();
        let conversation_id = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        room_manager
            .join(conversation_id, Arc::new(Connection::new(tx1)))
            .await;
        room_manager
            .join(conversation_id, Arc::new(Connection::new(tx2)))
            .await;
        room_manager
            .join(Uuid::new_v4(), Arc::new(Connection::new(tx3)))
            .await;

        room_manager
            .publish(&conversation_id, ServerEvent::Pong)
            .await
            .unwrap();

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_survives_closed_connection() {
        let room_manager = RoomManager::new();
        let conversation_id = Uuid::new_v4();

        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        room_manager
            .join(conversation_id, Arc::new(Connection::new(tx1)))
            .await;
        room_manager
            .join(conversation_id, Arc::new(Connection::new(tx2)))
            .await;
        drop(rx1);

        room_manager.broadcast(&conversation_id, ServerEvent::Pong).await;
        assert!(rx2.try_recv().is_ok());
    }
}
