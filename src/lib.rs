//! relaybot - Telegram Signal Relay Bot
//!
//! Registers users through a short private-chat conversation, keeps their
//! channel membership in sync, hands out one-time channel invites and relays
//! trading signals to qualifying users.
//!
//! Key principles:
//! - Conversation state is ephemeral (memory only)
//! - Every store mutation is a single atomic statement
//! - A failed delivery never aborts a broadcast
//! - Admin actions are gated before anything runs

pub mod admin;
pub mod broadcast;
pub mod error;
pub mod membership;
pub mod registration;
pub mod store;
pub mod telegram;

pub use error::{RelayError, RelayResult};
