//! Chatdesk API Library
//!
//! Real-time support chat: WebSocket sessions, the AI backend client, and
//! escalation of conversations to support tickets.

pub mod config;
pub mod error;
pub mod escalation;
pub mod inference;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use escalation::{EscalationOutcome, EscalationWorker};
pub use state::AppState;
