//! Telegram Client Trait Abstractions
//!
//! The bot core only talks to Telegram through [`TelegramClient`], so every
//! component can be driven by `MockTelegramClient` in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram user identifier (stable, unique per account)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Telegram chat identifier (private chat, group or channel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A private chat with a user has the same id as the user.
impl From<UserId> for ChatId {
    fn from(user: UserId) -> Self {
        ChatId(user.0)
    }
}

/// Sender metadata attached to every private message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

/// Private message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    /// Shared contact card. `user_id` is set when the contact is a Telegram user.
    Contact {
        phone_number: String,
        user_id: Option<UserId>,
    },
    /// Stickers, photos, voice notes...
    Other,
}

/// Private message sent to the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: Sender,
    pub content: MessageContent,
    pub timestamp: u64,
}

/// Post published in a channel the bot administers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPost {
    pub chat: ChatId,
    /// Text or media caption; `None` for posts without either
    pub text: Option<String>,
}

/// Status of a user inside a chat, as reported by `getChatMember`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberStatus {
    /// Channel owner
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MemberStatus {
    /// Owners, administrators and plain members count as channel members.
    pub fn is_member(&self) -> bool {
        matches!(
            self,
            MemberStatus::Creator | MemberStatus::Administrator | MemberStatus::Member
        )
    }

    /// Parse a Bot API status string ("owner" is accepted as an alias of "creator")
    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "creator" | "owner" => Some(MemberStatus::Creator),
            "administrator" => Some(MemberStatus::Administrator),
            "member" => Some(MemberStatus::Member),
            "restricted" => Some(MemberStatus::Restricted),
            "left" => Some(MemberStatus::Left),
            "kicked" | "banned" => Some(MemberStatus::Kicked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Creator => "creator",
            MemberStatus::Administrator => "administrator",
            MemberStatus::Member => "member",
            MemberStatus::Restricted => "restricted",
            MemberStatus::Left => "left",
            MemberStatus::Kicked => "kicked",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pushed membership change (`chat_member` update)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub chat: ChatId,
    /// Subject whose status changed (not the admin who changed it)
    pub user: UserId,
    pub old_status: MemberStatus,
    pub new_status: MemberStatus,
}

/// Inbound event from Telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Message(InboundMessage),
    ChannelPost(ChannelPost),
    MemberChange(MembershipChange),
}

/// Update as delivered by `getUpdates`.
///
/// `update` is `None` for kinds the bot does not handle; the id still has to be
/// acknowledged so the next poll moves past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub update_id: i64,
    pub update: Option<Update>,
}

/// Reply keyboard attached to an outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    /// One button sharing the user's own phone number, one cancel button
    RequestContact { share_label: String, cancel_label: String },
    /// One button per choice, hidden after use
    Choices(Vec<String>),
    /// Remove any custom keyboard
    Remove,
}

/// Result type for Telegram operations
pub type TelegramResult<T> = Result<T, TelegramError>;

/// Telegram client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelegramError {
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP 403: the user blocked the bot or the bot was removed from the chat
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Bot API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TelegramError {
    /// True when the recipient can no longer be reached by the bot.
    pub fn is_blocked(&self) -> bool {
        matches!(self, TelegramError::Forbidden(_))
    }
}

/// Telegram client abstraction
///
/// Implementations must be cheap to clone: the broadcast engine clones the
/// client into every concurrent send.
#[async_trait]
pub trait TelegramClient: Clone + Send + Sync + 'static {
    /// Send a text message, optionally with a reply keyboard
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> TelegramResult<()>;

    /// Look up a user's status in a chat
    async fn get_chat_member(&self, chat: ChatId, user: UserId) -> TelegramResult<MemberStatus>;

    /// Long-poll for updates with id >= `offset`
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> TelegramResult<Vec<Envelope>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_status_mapping() {
        assert!(MemberStatus::Creator.is_member());
        assert!(MemberStatus::Administrator.is_member());
        assert!(MemberStatus::Member.is_member());
        assert!(!MemberStatus::Restricted.is_member());
        assert!(!MemberStatus::Left.is_member());
        assert!(!MemberStatus::Kicked.is_member());
    }

    #[test]
    fn test_member_status_parse() {
        assert_eq!(MemberStatus::parse("owner"), Some(MemberStatus::Creator));
        assert_eq!(MemberStatus::parse("creator"), Some(MemberStatus::Creator));
        assert_eq!(MemberStatus::parse("left"), Some(MemberStatus::Left));
        assert_eq!(MemberStatus::parse("lurker"), None);
    }

    #[test]
    fn test_private_chat_id_matches_user() {
        assert_eq!(ChatId::from(UserId(42)), ChatId(42));
    }

    #[test]
    fn test_blocked_error() {
        assert!(TelegramError::Forbidden("bot was blocked by the user".into()).is_blocked());
        assert!(!TelegramError::Network("timeout".into()).is_blocked());
    }
}
