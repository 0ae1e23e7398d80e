//! WebSocket support for real-time support chat
//!
//! # Architecture
//!
//! - **Session**: per-connection chat engine (validation, persistence, AI turns)
//! - **Connection**: outbound channel of one WebSocket
//! - **Broadcast**: conversation-keyed fan-out, in-process or via Redis
//! - **Room**: in-process broadcast groups
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: Type-safe event definitions for client/server communication

pub mod broadcast;
pub mod connection;
pub mod events;
pub mod handler;
pub mod room;
pub mod session;

pub use broadcast::{BroadcastError, Broadcaster, RedisBroadcaster, Subscription};
pub use connection::Connection;
pub use events::{ClientEvent, EventParseError, MessageEvent, ServerEvent};
pub use handler::ws_handler;
pub use room::RoomManager;
pub use session::{
    ChatSession, ResolvedAgent, SessionConfig, SessionEngine, SessionError, SessionState,
    DEFAULT_ESCALATION_TRIGGERS,
};
