//! Chatdesk Shared Types and Persistence
//!
//! Domain types, the persistence interfaces used by the chat core, and their
//! Postgres and in-memory implementations.

pub mod db;
pub mod error;
pub mod memory;
pub mod pg;
pub mod store;
pub mod types;

pub use db::*;
pub use error::*;
pub use memory::MemoryStore;
pub use pg::PgChatStore;
pub use store::{AgentDirectory, ChatStore, ConversationStore, TicketStore};
pub use types::*;
