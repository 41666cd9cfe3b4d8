//! Channel Membership Synchronizer
//!
//! Two paths keep the stored membership flag current:
//! - `refresh`: polls the platform; logs a channel event on every call
//! - `reconcile`: applies a pushed membership change; logs only on a change
//!
//! Platform failures fail closed (not a member) and are never raised.

use crate::store::{unix_now, ChannelEventKind, Database};
use crate::telegram::messages;
use crate::telegram::traits::{ChatId, MembershipChange, TelegramClient, UserId};
use tracing::{debug, info, warn};

/// What a pushed membership change did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Notification for another chat
    Ignored,
    /// Status changed without crossing the member boundary
    Unchanged,
    Joined,
    Left,
}

/// Keeps the User Store's channel flag in line with the platform.
#[derive(Clone)]
pub struct MembershipSync<C: TelegramClient> {
    client: C,
    db: Database,
    channel: ChatId,
    channel_name: String,
}

impl<C: TelegramClient> MembershipSync<C> {
    pub fn new(client: C, db: Database, channel: ChatId, channel_name: impl Into<String>) -> Self {
        Self {
            client,
            db,
            channel,
            channel_name: channel_name.into(),
        }
    }

    /// Query the platform for `user` and store the result.
    ///
    /// Returns `false` when the query fails; the stored flag is left untouched.
    pub async fn refresh(&self, user: UserId) -> bool {
        self.refresh_at(user, unix_now()).await
    }

    pub async fn refresh_at(&self, user: UserId, now: u64) -> bool {
        let status = match self.client.get_chat_member(self.channel, user).await {
            Ok(status) => status,
            Err(e) => {
                warn!(user = %user, channel = %self.channel, error = %e, "Membership query failed");
                return false;
            }
        };

        let is_member = status.is_member();
        debug!(user = %user, status = %status, is_member, "Membership refreshed");

        if let Err(e) = self.db.users().set_channel_member(user, is_member).await {
            warn!(user = %user, error = %e, "Failed to store channel membership");
        }

        let kind = ChannelEventKind::from_membership(is_member);
        let detail = format!("status={status}");
        if let Err(e) = self.db.channel_events().append(user, kind, &detail, now).await {
            warn!(user = %user, error = %e, "Failed to log channel event");
        }

        is_member
    }

    /// Apply a pushed membership change.
    pub async fn reconcile(&self, change: &MembershipChange) -> ReconcileOutcome {
        self.reconcile_at(change, unix_now()).await
    }

    pub async fn reconcile_at(&self, change: &MembershipChange, now: u64) -> ReconcileOutcome {
        if change.chat != self.channel {
            debug!(chat = %change.chat, "Ignoring membership change for another chat");
            return ReconcileOutcome::Ignored;
        }

        let was_member = change.old_status.is_member();
        let is_member = change.new_status.is_member();
        if was_member == is_member {
            return ReconcileOutcome::Unchanged;
        }

        let user = change.user;
        if let Err(e) = self.db.users().set_channel_member(user, is_member).await {
            warn!(user = %user, error = %e, "Failed to store channel membership");
        }

        let kind = ChannelEventKind::from_membership(is_member);
        let detail = format!("{} -> {}", change.old_status, change.new_status);
        if let Err(e) = self.db.channel_events().append(user, kind, &detail, now).await {
            warn!(user = %user, error = %e, "Failed to log channel event");
        }

        if !is_member {
            info!(user = %user, "User left channel");
            return ReconcileOutcome::Left;
        }

        info!(user = %user, "User joined channel");
        let welcome = messages::channel_welcome(&self.channel_name);
        if let Err(e) = self.client.send_message(ChatId::from(user), &welcome, None).await {
            warn!(user = %user, error = %e, "Failed to send channel welcome");
        }
        ReconcileOutcome::Joined
    }
}
