//! Invite ledger: one-time channel invitation tokens.
//!
//! A token moves from unused to used exactly once. The flip is a conditional
//! `UPDATE ... WHERE used = 0`, so two racing redemptions of the same token
//! cannot both win.

use super::{from_db_time, to_db_time, unix_now, Database, StoreError};
use crate::telegram::traits::UserId;
use rand::rngs::OsRng;
use rand::RngCore;
use sqlx::FromRow;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Random bytes per token (256 bits of entropy, 64 hex characters).
const TOKEN_BYTES: usize = 32;

/// Regenerate on primary-key collision at most this many times.
const MAX_ISSUE_ATTEMPTS: usize = 3;

/// Why a token was rejected.
#[derive(Debug, Error)]
pub enum InviteError {
    #[error("unknown invite token")]
    Unknown,
    #[error("invite token already used")]
    AlreadyUsed,
    #[error("invite token expired")]
    Expired,
    #[error("invite token belongs to another user")]
    WrongOwner,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InviteError {
    /// True for rejections of the token itself (as opposed to storage failures).
    pub fn is_invalid(&self) -> bool {
        !matches!(self, InviteError::Store(_))
    }
}

/// Ledger settings: link validity and join URL shape.
#[derive(Debug, Clone)]
pub struct InviteSettings {
    pub ttl: Duration,
    /// Platform base, e.g. `https://t.me`
    pub base_url: String,
    pub channel_handle: String,
}

impl Default for InviteSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            base_url: "https://t.me".to_string(),
            channel_handle: String::new(),
        }
    }
}

/// Freshly issued invite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedInvite {
    pub token: String,
    pub owner: UserId,
    pub expires_at: u64,
    /// `<base_url>/<channel_handle>?start=<token>`
    pub url: String,
}

/// Stored invite token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteToken {
    pub token: String,
    pub owner: UserId,
    pub created_at: u64,
    pub expires_at: u64,
    pub used: bool,
    pub used_at: Option<u64>,
}

impl InviteToken {
    fn rejection_at(&self, now: u64) -> InviteError {
        if self.used {
            InviteError::AlreadyUsed
        } else if now >= self.expires_at {
            InviteError::Expired
        } else {
            InviteError::WrongOwner
        }
    }
}

#[derive(FromRow)]
struct TokenRow {
    token: String,
    owner_id: i64,
    created_at: i64,
    expires_at: i64,
    used: bool,
    used_at: Option<i64>,
}

impl From<TokenRow> for InviteToken {
    fn from(row: TokenRow) -> Self {
        InviteToken {
            token: row.token,
            owner: UserId(row.owner_id),
            created_at: from_db_time(row.created_at),
            expires_at: from_db_time(row.expires_at),
            used: row.used,
            used_at: row.used_at.map(from_db_time),
        }
    }
}

/// Invite token ledger.
#[derive(Clone)]
pub struct InviteLedger {
    db: Database,
    settings: InviteSettings,
}

impl InviteLedger {
    pub fn new(db: Database, settings: InviteSettings) -> Self {
        Self { db, settings }
    }

    /// Join URL embedding `token`.
    pub fn join_url(&self, token: &str) -> String {
        format!(
            "{}/{}?start={}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.channel_handle.trim_start_matches('@'),
            token
        )
    }

    /// Issue a new token for `owner`, valid for the configured duration.
    pub async fn issue(&self, owner: UserId) -> Result<IssuedInvite, StoreError> {
        self.issue_at(owner, unix_now()).await
    }

    pub async fn issue_at(&self, owner: UserId, now: u64) -> Result<IssuedInvite, StoreError> {
        let expires_at = now.saturating_add(self.settings.ttl.as_secs());
        let mut attempt = 0;

        loop {
            attempt += 1;
            let token = generate_token();

            let result = sqlx::query(
                r#"
                INSERT INTO invite_tokens (token, owner_id, created_at, expires_at, used)
                VALUES (?, ?, ?, ?, 0)
                "#,
            )
            .bind(&token)
            .bind(owner.0)
            .bind(to_db_time(now))
            .bind(to_db_time(expires_at))
            .execute(self.db.pool())
            .await;

            match result {
                Ok(_) => {
                    info!(owner = %owner, expires_at, "Issued invite token");
                    let url = self.join_url(&token);
                    return Ok(IssuedInvite {
                        token,
                        owner,
                        expires_at,
                        url,
                    });
                }
                Err(sqlx::Error::Database(ref db_err))
                    if db_err.is_unique_violation() && attempt < MAX_ISSUE_ATTEMPTS =>
                {
                    debug!(attempt, "Invite token collision, regenerating");
                }
                Err(e) => return Err(StoreError::from(e)),
            }
        }
    }

    /// Fetch a stored token.
    pub async fn get(&self, token: &str) -> Result<Option<InviteToken>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT token, owner_id, created_at, expires_at, used, used_at \
             FROM invite_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(InviteToken::from))
    }

    /// Return the owner if the token exists, is unused and has not expired.
    pub async fn validate(&self, token: &str) -> Result<UserId, InviteError> {
        self.validate_at(token, unix_now()).await
    }

    pub async fn validate_at(&self, token: &str, now: u64) -> Result<UserId, InviteError> {
        let stored = self.get(token).await?.ok_or(InviteError::Unknown)?;

        if stored.used {
            return Err(InviteError::AlreadyUsed);
        }
        if now >= stored.expires_at {
            return Err(InviteError::Expired);
        }
        Ok(stored.owner)
    }

    /// Flip the used flag. Returns `true` only for the call that flipped it.
    pub async fn mark_used(&self, token: &str) -> Result<bool, StoreError> {
        self.mark_used_at(token, unix_now()).await
    }

    pub async fn mark_used_at(&self, token: &str, now: u64) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE invite_tokens SET used = 1, used_at = ? WHERE token = ? AND used = 0")
                .bind(to_db_time(now))
                .bind(token)
                .execute(self.db.pool())
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Validate and consume `token` for `claimant` in one atomic step.
    pub async fn redeem(&self, token: &str, claimant: UserId) -> Result<UserId, InviteError> {
        self.redeem_at(token, claimant, unix_now()).await
    }

    pub async fn redeem_at(
        &self,
        token: &str,
        claimant: UserId,
        now: u64,
    ) -> Result<UserId, InviteError> {
        let now_db = to_db_time(now);

        let owner: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE invite_tokens
            SET used = 1, used_at = ?
            WHERE token = ? AND owner_id = ? AND used = 0 AND expires_at > ?
            RETURNING owner_id
            "#,
        )
        .bind(now_db)
        .bind(token)
        .bind(claimant.0)
        .bind(now_db)
        .fetch_optional(self.db.pool())
        .await
        .map_err(StoreError::from)?;

        match owner {
            Some(owner) => {
                info!(owner = owner, "Invite token redeemed");
                Ok(UserId(owner))
            }
            None => {
                let stored = self.get(token).await?.ok_or(InviteError::Unknown)?;
                Err(stored.rejection_at(now))
            }
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
