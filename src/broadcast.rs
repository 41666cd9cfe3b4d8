//! Broadcast Engine
//!
//! Fans one message out to an audience snapshot. Every recipient is delivered
//! independently with bounded concurrency; a failed send is counted and the
//! pass continues. Exactly one audit record is written per pass.

use crate::admin::{AdminAction, AdminGate};
use crate::error::RelayError;
use crate::store::{unix_now, Database, NewSignal, SignalCategory, UserRecord};
use crate::telegram::messages;
use crate::telegram::traits::{ChannelPost, ChatId, TelegramClient, TelegramError, UserId};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default number of sends in flight.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Who receives a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    /// Active users flagged as channel members
    ChannelMembersOnly,
    /// Every active user
    AllActiveUsers,
    /// Channel post relay; channel members only, sent by the system
    PassthroughFromChannel,
}

impl Audience {
    pub fn category(&self) -> SignalCategory {
        match self {
            Audience::ChannelMembersOnly => SignalCategory::ManualSignal,
            Audience::AllActiveUsers => SignalCategory::Broadcast,
            Audience::PassthroughFromChannel => SignalCategory::AutoForward,
        }
    }

    fn admin_action(&self) -> AdminAction {
        match self {
            Audience::AllActiveUsers => AdminAction::Broadcast,
            Audience::ChannelMembersOnly | Audience::PassthroughFromChannel => {
                AdminAction::ManualSignal
            }
        }
    }
}

/// Originator of a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(UserId),
    /// Bot-originated (channel post relay)
    System,
}

impl Actor {
    fn user(&self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::System => None,
        }
    }
}

/// Aggregate outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Recipients soft-deactivated because they blocked the bot
    pub deactivated: usize,
    /// `None` when the audit write failed
    pub audit_id: Option<i64>,
}

#[derive(Clone)]
pub struct BroadcastEngine<C: TelegramClient> {
    client: C,
    db: Database,
    gate: AdminGate,
    concurrency: usize,
}

impl<C: TelegramClient> BroadcastEngine<C> {
    pub fn new(client: C, db: Database, gate: AdminGate, concurrency: usize) -> Self {
        Self {
            client,
            db,
            gate,
            concurrency: concurrency.max(1),
        }
    }

    /// Deliver `body` to `audience`.
    ///
    /// User actors must pass the admin gate before the audience is even loaded.
    pub async fn broadcast(
        &self,
        body: &str,
        audience: Audience,
        actor: Actor,
    ) -> Result<BroadcastReport, RelayError> {
        if let Actor::User(user) = actor {
            self.gate.authorize(user, audience.admin_action())?;
        }

        let recipients = self.snapshot(audience).await?;
        let category = audience.category();
        let text = messages::signal_message(category, body);

        let report = self.fan_out(&text, &recipients).await;
        let audit_id = self.record(body, category, actor, report.sent).await;

        info!(
            category = %category,
            attempted = report.attempted,
            sent = report.sent,
            failed = report.failed,
            "Broadcast complete"
        );

        Ok(BroadcastReport { audit_id, ..report })
    }

    /// Relay a channel post to channel members.
    ///
    /// Returns `None` for posts from other chats and posts without text.
    pub async fn forward_channel_post(
        &self,
        post: &ChannelPost,
        channel: ChatId,
    ) -> Option<BroadcastReport> {
        if post.chat != channel {
            debug!(chat = %post.chat, "Ignoring post from another chat");
            return None;
        }
        let body = post.text.as_deref().map(str::trim).filter(|t| !t.is_empty())?;

        match self
            .broadcast(body, Audience::PassthroughFromChannel, Actor::System)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Channel post relay failed");
                None
            }
        }
    }

    async fn snapshot(&self, audience: Audience) -> Result<Vec<UserRecord>, RelayError> {
        let users = self.db.users();
        let recipients = match audience {
            Audience::AllActiveUsers => users.active_users().await?,
            Audience::ChannelMembersOnly | Audience::PassthroughFromChannel => {
                users.channel_members().await?
            }
        };
        Ok(recipients)
    }

    async fn fan_out(&self, text: &str, recipients: &[UserRecord]) -> BroadcastReport {
        // Each send owns its inputs so the stream is `Send` inside spawned handlers
        let text: Arc<str> = Arc::from(text);
        let users: Vec<UserId> = recipients.iter().map(|r| r.user_id).collect();
        let sends = users.into_iter().map(|user| {
            let client = self.client.clone();
            let text = Arc::clone(&text);
            async move {
                let result = client.send_message(ChatId::from(user), &text, None).await;
                (user, result)
            }
        });
        let results: Vec<(UserId, Result<(), TelegramError>)> = stream::iter(sends)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = BroadcastReport {
            attempted: results.len(),
            ..Default::default()
        };

        for (user, result) in results {
            match result {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(user = %user, error = %e, "Broadcast delivery failed");
                    if e.is_blocked() && self.deactivate(user).await {
                        report.deactivated += 1;
                    }
                }
            }
        }

        report
    }

    async fn deactivate(&self, user: UserId) -> bool {
        match self.db.users().deactivate(user).await {
            Ok(changed) => {
                if changed {
                    info!(user = %user, "Deactivated user who blocked the bot");
                }
                changed
            }
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to deactivate user");
                false
            }
        }
    }

    async fn record(
        &self,
        body: &str,
        category: SignalCategory,
        actor: Actor,
        sent: usize,
    ) -> Option<i64> {
        let signal = NewSignal {
            body: body.to_string(),
            category,
            sender: actor.user(),
            recipient_count: sent as u64,
            sent_at: unix_now(),
        };

        match self.db.signals().append(&signal).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(category = %category, error = %e, "Failed to write broadcast audit record");
                None
            }
        }
    }
}
