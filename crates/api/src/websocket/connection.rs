//! WebSocket connection management
//!
//! Represents an active chat connection. A connection can start out held:
//! broadcast events are queued until the connection-confirmation event has
//! been sent, so that event always arrives first.

use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerEvent;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Channel to send events to this connection
    sender: mpsc::UnboundedSender<ServerEvent>,

    /// Events queued while the connection is held
    held: Mutex<Option<Vec<ServerEvent>>>,
}

impl Connection {
    /// Create a connection that delivers events immediately
    pub fn new(sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            sender,
            held: Mutex::new(None),
        }
    }

    /// Create a connection that queues events until [`Connection::open`]
    pub fn held(sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            sender,
            held: Mutex::new(Some(Vec::new())),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if sent or queued, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(queue) = held.as_mut() {
            queue.push(event);
            return Ok(());
        }
        drop(held);
        self.sender.send(event)
    }

    /// Deliver `first`, then flush queued events except those `skip` rejects.
    #[allow(clippy::result_large_err)]
    pub fn open<F>(&self, first: ServerEvent, skip: F) -> Result<(), mpsc::error::SendError<ServerEvent>>
    where
        F: Fn(&ServerEvent) -> bool,
    {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        self.sender.send(first)?;
        if let Some(queue) = held.take() {
            for event in queue.into_iter().filter(|e| !skip(e)) {
                self.sender.send(event)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn test_open_connection_delivers_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(tx);

        conn.send(ServerEvent::Pong).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::Pong);
    }

    #[tokio::test]
    async fn test_held_connection_delivers_first_event_first() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::held(tx);

        conn.send(ServerEvent::Pong).unwrap();
        conn.send(ServerEvent::error("dropped")).unwrap();
        assert!(rx.try_recv().is_err());

        conn.open(ServerEvent::error("first"), |e| {
            matches!(e, ServerEvent::Error { message } if message == "dropped")
        })
        .unwrap();

        assert_eq!(rx.try_recv().unwrap(), ServerEvent::error("first"));
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::Pong);
        assert!(rx.try_recv().is_err());

        // After opening, events flow straight through
        conn.send(ServerEvent::Pong).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::Pong);
    }

    #[tokio::test]
    async fn test_send_fails_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(tx);
        drop(rx);

        assert!(conn.send(ServerEvent::Pong).is_err());
    }
}
