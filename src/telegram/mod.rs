//! Telegram Integration Module
//!
//! The bot core depends only on the [`TelegramClient`] trait:
//! - `client`: Bot API over HTTPS (long polling)
//! - `mock`: scripted client for tests
//! - `bot`: update dispatcher and run loop

pub mod bot;
pub mod client;
pub mod commands;
pub mod messages;
pub mod mock;
pub mod traits;

pub use bot::{BotConfig, RelayBot};
pub use client::{BotApiClient, BotToken};
pub use mock::MockTelegramClient;
pub use traits::{ChatId, TelegramClient, TelegramError, TelegramResult, UserId};
