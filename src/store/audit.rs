//! Append-only audit logs.
//!
//! - `signals`: one record per manual signal, broadcast or auto-forward
//! - `channel_events`: one record per channel join or leave
//!
//! Neither log is ever updated or pruned by the bot.

use super::{from_db_time, to_db_time, StoreError};
use crate::telegram::traits::UserId;
use sqlx::{FromRow, SqlitePool};
use std::fmt;

/// Kind of outbound relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalCategory {
    /// Admin `/signal`, delivered to channel members
    ManualSignal,
    /// Admin `/broadcast`, delivered to every active user
    Broadcast,
    /// Channel post relayed to channel members
    AutoForward,
}

impl SignalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::ManualSignal => "manual_signal",
            SignalCategory::Broadcast => "broadcast",
            SignalCategory::AutoForward => "auto_forward",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual_signal" => Some(SignalCategory::ManualSignal),
            "broadcast" => Some(SignalCategory::Broadcast),
            "auto_forward" => Some(SignalCategory::AutoForward),
            _ => None,
        }
    }
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSignal {
    pub body: String,
    pub category: SignalCategory,
    /// `None` for system-originated posts (auto-forward)
    pub sender: Option<UserId>,
    pub recipient_count: u64,
    pub sent_at: u64,
}

/// Stored signal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRecord {
    pub id: i64,
    pub body: String,
    pub category: SignalCategory,
    pub sender: Option<UserId>,
    pub recipient_count: u64,
    pub sent_at: u64,
}

impl SignalRecord {
    /// Relative age for display ("5 min ago").
    pub fn age_display(&self, now: u64) -> String {
        if now < self.sent_at {
            return format!("Unix: {}", self.sent_at);
        }

        let elapsed = now - self.sent_at;
        match elapsed {
            0..=60 => "Just now".to_string(),
            61..=3600 => format!("{} min ago", elapsed / 60),
            3601..=86400 => format!("{} hours ago", elapsed / 3600),
            86401..=604800 => format!("{} days ago", elapsed / 86400),
            _ => format!("Unix: {}", self.sent_at),
        }
    }
}

#[derive(FromRow)]
struct SignalRow {
    id: i64,
    body: String,
    category: String,
    sender_id: Option<i64>,
    recipient_count: i64,
    sent_at: i64,
}

impl TryFrom<SignalRow> for SignalRecord {
    type Error = StoreError;

    fn try_from(row: SignalRow) -> Result<Self, Self::Error> {
        let category = SignalCategory::parse(&row.category).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "signal {} has unknown category '{}'",
                row.id, row.category
            ))
        })?;

        Ok(SignalRecord {
            id: row.id,
            body: row.body,
            category,
            sender: row.sender_id.map(UserId),
            recipient_count: from_db_time(row.recipient_count),
            sent_at: from_db_time(row.sent_at),
        })
    }
}

/// Signal / broadcast audit log.
pub struct SignalLog<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SignalLog<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a record and return its id.
    pub async fn append(&self, signal: &NewSignal) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO signals (body, category, sender_id, recipient_count, sent_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&signal.body)
        .bind(signal.category.as_str())
        .bind(signal.sender.map(|s| s.0))
        .bind(to_db_time(signal.recipient_count))
        .bind(to_db_time(signal.sent_at))
        .fetch_one(self.pool)
        .await?;

        Ok(id)
    }

    /// Most recent records first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<SignalRecord>, StoreError> {
        let rows = sqlx::query_as::<_, SignalRow>(
            "SELECT id, body, category, sender_id, recipient_count, sent_at \
             FROM signals ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(SignalRecord::try_from).collect()
    }

    /// Number of records, optionally restricted to one category.
    pub async fn count(&self, category: Option<SignalCategory>) -> Result<u64, StoreError> {
        let count: i64 = match category {
            Some(category) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM signals WHERE category = ?")
                    .bind(category.as_str())
                    .fetch_one(self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM signals")
                    .fetch_one(self.pool)
                    .await?
            }
        };

        Ok(u64::try_from(count).unwrap_or_default())
    }
}

/// Channel membership transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEventKind {
    Joined,
    Left,
}

impl ChannelEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelEventKind::Joined => "joined",
            ChannelEventKind::Left => "left",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "joined" => Some(ChannelEventKind::Joined),
            "left" => Some(ChannelEventKind::Left),
            _ => None,
        }
    }

    /// Event kind for a membership observation.
    pub fn from_membership(is_member: bool) -> Self {
        if is_member {
            ChannelEventKind::Joined
        } else {
            ChannelEventKind::Left
        }
    }
}

/// Stored channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub id: i64,
    pub user: UserId,
    pub kind: ChannelEventKind,
    pub occurred_at: u64,
    pub detail: String,
}

#[derive(FromRow)]
struct ChannelEventRow {
    id: i64,
    user_id: i64,
    kind: String,
    occurred_at: i64,
    detail: String,
}

impl TryFrom<ChannelEventRow> for ChannelEvent {
    type Error = StoreError;

    fn try_from(row: ChannelEventRow) -> Result<Self, Self::Error> {
        let kind = ChannelEventKind::parse(&row.kind).ok_or_else(|| {
            StoreError::Corrupt(format!("channel event {} has unknown kind '{}'", row.id, row.kind))
        })?;

        Ok(ChannelEvent {
            id: row.id,
            user: UserId(row.user_id),
            kind,
            occurred_at: from_db_time(row.occurred_at),
            detail: row.detail,
        })
    }
}

/// Channel membership audit log.
pub struct ChannelEventLog<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChannelEventLog<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        user: UserId,
        kind: ChannelEventKind,
        detail: &str,
        now: u64,
    ) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO channel_events (user_id, kind, occurred_at, detail)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user.0)
        .bind(kind.as_str())
        .bind(to_db_time(now))
        .bind(detail)
        .fetch_one(self.pool)
        .await?;

        Ok(id)
    }

    /// Events for one user, oldest first.
    pub async fn for_user(&self, user: UserId) -> Result<Vec<ChannelEvent>, StoreError> {
        let rows = sqlx::query_as::<_, ChannelEventRow>(
            "SELECT id, user_id, kind, occurred_at, detail \
             FROM channel_events WHERE user_id = ? ORDER BY id",
        )
        .bind(user.0)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(ChannelEvent::try_from).collect()
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM channel_events")
            .fetch_one(self.pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or_default())
    }
}
