//! Chatdesk Billing
//!
//! Per-day message metering for the subscription that owns an agent.

pub mod error;
pub mod usage;

pub use error::{BillingError, BillingResult};
pub use usage::{MessageMeter, UsageMeter};
