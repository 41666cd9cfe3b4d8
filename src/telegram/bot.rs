//! Relay Bot
//!
//! Main bot implementation that:
//! - Drives new users through registration
//! - Issues and redeems one-time channel invites
//! - Keeps channel membership in sync (polling and pushed changes)
//! - Relays channel posts and admin signals to users
//!
//! Updates are handled as independent tasks, bounded by `max_in_flight`.
//! Private messages from one user are handled one at a time.

use super::commands::{parse_command, Command};
use super::messages;
use super::traits::*;
use crate::admin::{AdminGate, Denial};
use crate::broadcast::{Actor, Audience, BroadcastEngine, DEFAULT_CONCURRENCY};
use crate::error::{RelayError, RelayResult};
use crate::membership::MembershipSync;
use crate::registration::{
    CompletedProfile, Prompt, RegistrationEvent, RegistrationMachine, CANCEL_LABEL,
};
use crate::store::{unix_now, Database, InviteLedger, InviteSettings, NewUser};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Pause after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(3);

/// Recent signals listed in `/stats`.
const STATS_RECENT_SIGNALS: u32 = 5;

/// Relay bot configuration
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Channel whose membership gates signal delivery
    pub channel: ChatId,
    pub channel_name: String,
    pub admins: Vec<UserId>,
    pub page_size: u32,
    pub broadcast_concurrency: usize,
    pub invite: InviteSettings,
    pub poll_timeout_secs: u64,
    pub max_in_flight: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            channel: ChatId(0),
            channel_name: "Signals".to_string(),
            admins: Vec::new(),
            page_size: 10,
            broadcast_concurrency: DEFAULT_CONCURRENCY,
            invite: InviteSettings::default(),
            poll_timeout_secs: 30,
            max_in_flight: 32,
        }
    }
}

/// Relay bot. Cheap to clone; clones share all state.
pub struct RelayBot<C: TelegramClient> {
    inner: Arc<Inner<C>>,
}

impl<C: TelegramClient> Clone for RelayBot<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C: TelegramClient> {
    client: C,
    db: Database,
    config: BotConfig,
    gate: AdminGate,
    registration: RegistrationMachine,
    membership: MembershipSync<C>,
    invites: InviteLedger,
    broadcaster: BroadcastEngine<C>,
    /// Admins whose next plain text message is sent to an audience
    compose: Mutex<HashMap<UserId, Audience>>,
    /// Per-user message locks, dropped once no handler holds them
    conversations: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

impl<C: TelegramClient> RelayBot<C> {
    pub fn new(client: C, db: Database, config: BotConfig) -> Self {
        let gate = AdminGate::new(config.admins.iter().copied());
        let membership = MembershipSync::new(
            client.clone(),
            db.clone(),
            config.channel,
            config.channel_name.clone(),
        );
        let invites = InviteLedger::new(db.clone(), config.invite.clone());
        let broadcaster = BroadcastEngine::new(
            client.clone(),
            db.clone(),
            gate.clone(),
            config.broadcast_concurrency,
        );

        Self {
            inner: Arc::new(Inner {
                client,
                db,
                config,
                gate,
                registration: RegistrationMachine::new(),
                membership,
                invites,
                broadcaster,
                compose: Mutex::new(HashMap::new()),
                conversations: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn invites(&self) -> &InviteLedger {
        &self.inner.invites
    }

    pub fn registration(&self) -> &RegistrationMachine {
        &self.inner.registration
    }

    /// Poll for updates until `shutdown` resolves, then wait for in-flight handlers.
    pub async fn run<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let config = &self.inner.config;
        let semaphore = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();
        let mut offset = 0i64;

        info!(channel = %config.channel, admins = self.inner.gate.len(), "Relay bot started");

        loop {
            let polled = tokio::select! {
                _ = &mut shutdown => break,
                polled = self.inner.client.get_updates(offset, config.poll_timeout_secs) => polled,
            };

            let backoff = match polled {
                Ok(envelopes) => {
                    if envelopes.is_empty() {
                        tokio::task::yield_now().await;
                    }
                    for envelope in envelopes {
                        offset = offset.max(envelope.update_id + 1);
                        let Some(update) = envelope.update else {
                            continue;
                        };

                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            break;
                        };
                        let bot = self.clone();
                        tasks.spawn(async move {
                            bot.handle_update(update).await;
                            drop(permit);
                        });
                    }
                    None
                }
                Err(TelegramError::RateLimited { retry_after }) => {
                    warn!(retry_after, "Rate limited while polling");
                    Some(Duration::from_secs(retry_after))
                }
                Err(e) => {
                    warn!(error = %e, "Error receiving updates, will retry");
                    Some(POLL_ERROR_BACKOFF)
                }
            };

            if let Some(backoff) = backoff {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    warn!(error = %e, "Update handler panicked");
                }
            }
        }

        info!(in_flight = tasks.len(), "Shutting down, waiting for in-flight updates");
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "Update handler panicked");
            }
        }
        info!("Relay bot stopped");
    }

    /// Handle one inbound update. Errors are logged, never propagated.
    pub async fn handle_update(&self, update: Update) {
        match update {
            Update::Message(message) => {
                let user = message.sender.id;
                let conversation = self.conversation(user);
                let guard = conversation.lock().await;

                if let Err(e) = self.handle_message(&message).await {
                    warn!(user = %user, error = %e, "Error handling message");
                    self.reply(user, &messages::internal_error(), None).await;
                }

                drop(guard);
                self.release_conversation(user, conversation);
            }
            Update::ChannelPost(post) => {
                self.inner
                    .broadcaster
                    .forward_channel_post(&post, self.inner.config.channel)
                    .await;
            }
            Update::MemberChange(change) => {
                self.inner.membership.reconcile(&change).await;
            }
        }
    }

    async fn handle_message(&self, message: &InboundMessage) -> RelayResult<()> {
        let sender = &message.sender;
        let user = sender.id;
        let registered = self.inner.db.users().touch_activity(user, unix_now()).await?;

        if self.inner.registration.is_active(user) {
            if let MessageContent::Text(text) = &message.content {
                if let Some(Command::Start { token: Some(token) }) = parse_command(text) {
                    self.redeem_invite(user, &token).await;
                }
            }
            let event = RegistrationEvent::from_content(user, &message.content);
            return self.advance_registration(sender, event).await;
        }

        match &message.content {
            MessageContent::Text(text) => match parse_command(text) {
                Some(command) => self.handle_command(sender, registered, command).await,
                None => self.handle_text(sender, registered, text).await,
            },
            _ if registered => {
                self.reply(user, &messages::use_menu(), None).await;
                Ok(())
            }
            content => {
                let event = RegistrationEvent::from_content(user, content);
                self.advance_registration(sender, event).await
            }
        }
    }

    async fn handle_command(
        &self,
        sender: &Sender,
        registered: bool,
        command: Command,
    ) -> RelayResult<()> {
        let user = sender.id;
        debug!(user = %user, command = ?command, "Handling command");

        if command.is_admin_only() {
            return self.handle_admin_command(user, command).await;
        }

        match command {
            Command::Start { token } => {
                if let Some(token) = token {
                    self.redeem_invite(user, &token).await;
                }
                if registered {
                    self.show_menu(user).await
                } else {
                    self.advance_registration(sender, RegistrationEvent::Start)
                        .await
                }
            }
            Command::Menu => self.show_menu(user).await,
            Command::Profile => match self.inner.db.users().get(user).await? {
                Some(record) => {
                    self.reply(user, &messages::profile(&record), None).await;
                    Ok(())
                }
                None => self.not_registered(user).await,
            },
            Command::Link if registered => self.send_invite_link(user).await,
            Command::Status if registered => {
                let is_member = self.inner.membership.refresh(user).await;
                let text = messages::membership_status(is_member, &self.inner.config.channel_name);
                self.reply(user, &text, None).await;
                Ok(())
            }
            Command::Link | Command::Status => self.not_registered(user).await,
            Command::Cancel => {
                self.handle_cancel(user).await;
                Ok(())
            }
            Command::Help => {
                let text = messages::help(self.inner.gate.is_admin(user));
                self.reply(user, &text, None).await;
                Ok(())
            }
            Command::Unknown(name) => {
                self.reply(user, &messages::unknown_command(&name), None)
                    .await;
                Ok(())
            }
            Command::Admin
            | Command::Stats
            | Command::Users { .. }
            | Command::Signal { .. }
            | Command::Broadcast { .. } => Ok(()),
        }
    }

    async fn handle_admin_command(&self, user: UserId, command: Command) -> RelayResult<()> {
        let Some(action) = command.admin_action() else {
            return Ok(());
        };

        if self.inner.gate.authorize(user, action).is_err() {
            if action.denial() == Denial::Explicit {
                self.reply(user, &messages::not_authorized(), None).await;
            }
            return Ok(());
        }

        let db = &self.inner.db;
        match command {
            Command::Admin => {
                let stats = db.users().stats().await?;
                self.reply(user, &messages::admin_panel(&stats), None).await;
            }
            Command::Stats => {
                let stats = db.users().stats().await?;
                let signals = db.signals().count(None).await?;
                let recent = db.signals().recent(STATS_RECENT_SIGNALS).await?;
                let text = messages::stats_report(&stats, signals, &recent, unix_now());
                self.reply(user, &text, None).await;
            }
            Command::Users { page } => {
                let page_size = self.inner.config.page_size;
                let (users, total) = db.users().page(page, page_size).await?;
                let text = messages::users_page(&users, page, page_size, total);
                self.reply(user, &text, None).await;
            }
            Command::Signal { text } => {
                self.send_or_compose(user, text, Audience::ChannelMembersOnly)
                    .await?;
            }
            Command::Broadcast { text } => {
                self.send_or_compose(user, text, Audience::AllActiveUsers)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn send_or_compose(
        &self,
        user: UserId,
        text: Option<String>,
        audience: Audience,
    ) -> RelayResult<()> {
        match text {
            Some(body) => self.run_broadcast(user, &body, audience).await,
            None => {
                self.compose_lock().insert(user, audience);
                self.reply(user, &messages::compose_prompt(audience), None)
                    .await;
                Ok(())
            }
        }
    }

    async fn run_broadcast(&self, user: UserId, body: &str, audience: Audience) -> RelayResult<()> {
        match self
            .inner
            .broadcaster
            .broadcast(body, audience, Actor::User(user))
            .await
        {
            Ok(report) => {
                self.reply(user, &messages::broadcast_report(&report), None)
                    .await;
                Ok(())
            }
            Err(RelayError::Authorization(_)) => {
                self.reply(user, &messages::not_authorized(), None).await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_text(&self, sender: &Sender, registered: bool, text: &str) -> RelayResult<()> {
        let user = sender.id;

        if text.trim() == CANCEL_LABEL {
            self.handle_cancel(user).await;
            return Ok(());
        }

        let pending = self.compose_lock().remove(&user);
        if let Some(audience) = pending {
            return self.run_broadcast(user, text, audience).await;
        }

        if registered {
            self.reply(user, &messages::use_menu(), None).await;
            return Ok(());
        }

        self.advance_registration(sender, RegistrationEvent::Text(text.to_string()))
            .await
    }

    async fn handle_cancel(&self, user: UserId) {
        let pending = self.compose_lock().remove(&user);
        if pending.is_some() {
            self.reply(user, &messages::compose_cancelled(), None).await;
            return;
        }

        // No conversation in progress either
        let advance = self.inner.registration.advance(user, RegistrationEvent::Cancel);
        let (text, keyboard) = messages::registration_prompt(&advance.prompt);
        self.reply(user, &text, keyboard.as_ref()).await;
    }

    async fn advance_registration(
        &self,
        sender: &Sender,
        event: RegistrationEvent,
    ) -> RelayResult<()> {
        let advance = self.inner.registration.advance(sender.id, event);

        if let Some(profile) = advance.completed() {
            return self.complete_registration(sender, profile, &advance.prompt).await;
        }

        let (text, keyboard) = messages::registration_prompt(&advance.prompt);
        self.reply(sender.id, &text, keyboard.as_ref()).await;
        Ok(())
    }

    /// Persist the finished profile, sync membership, then show the menu.
    async fn complete_registration(
        &self,
        sender: &Sender,
        profile: &CompletedProfile,
        prompt: &Prompt,
    ) -> RelayResult<()> {
        let user = sender.id;
        let new_user = NewUser {
            user_id: user,
            username: sender.username.clone(),
            first_name: sender.first_name.clone(),
            last_name: sender.last_name.clone(),
            phone_number: profile.phone_number.clone(),
            name: profile.name.clone(),
            tier: profile.tier,
        };

        let record = match self.inner.db.users().upsert(&new_user, unix_now()).await {
            Ok(record) => record,
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to store registration");
                self.reply(user, &messages::registration_failed(), Some(&Keyboard::Remove))
                    .await;
                return Ok(());
            }
        };

        let is_member = self.inner.membership.refresh(user).await;

        let (header, keyboard) = messages::registration_prompt(prompt);
        let text = format!("{header}\n\n{}", messages::profile_summary(&record));
        self.reply(user, &text, keyboard.as_ref()).await;
        let menu = messages::main_menu(&record, is_member, &self.inner.config.channel_name);
        self.reply(user, &menu, None).await;
        Ok(())
    }

    async fn show_menu(&self, user: UserId) -> RelayResult<()> {
        match self.inner.db.users().get(user).await? {
            Some(record) => {
                let is_member = self.inner.membership.refresh(user).await;
                let menu = messages::main_menu(&record, is_member, &self.inner.config.channel_name);
                self.reply(user, &menu, None).await;
                Ok(())
            }
            None => self.not_registered(user).await,
        }
    }

    async fn send_invite_link(&self, user: UserId) -> RelayResult<()> {
        let invite = self.inner.invites.issue(user).await?;
        let ttl = humantime::format_duration(self.inner.config.invite.ttl).to_string();
        let text = messages::invite_link(&invite.url, &self.inner.config.channel_name, &ttl);
        self.reply(user, &text, None).await;
        Ok(())
    }

    /// Redeem `/start <token>`. Rejections are reported; the caller carries on.
    async fn redeem_invite(&self, user: UserId, token: &str) {
        match self.inner.invites.redeem(token, user).await {
            Ok(_) => {
                let text = messages::invite_accepted(&self.inner.config.channel_name);
                self.reply(user, &text, None).await;
            }
            Err(e) if e.is_invalid() => {
                info!(user = %user, reason = %e, "Invite rejected");
                self.reply(user, &messages::invite_rejected(&e), None).await;
            }
            Err(e) => {
                warn!(user = %user, error = %e, "Invite redemption failed");
            }
        }
    }

    async fn not_registered(&self, user: UserId) -> RelayResult<()> {
        debug!(user = %user, error = %RelayError::NotFound(user), "Command needs a profile");
        self.reply(user, &messages::please_register(), None).await;
        Ok(())
    }

    /// Send a reply. Failures are logged; a user who blocked the bot is deactivated.
    async fn reply(&self, user: UserId, text: &str, keyboard: Option<&Keyboard>) {
        let Err(e) = self
            .inner
            .client
            .send_message(ChatId::from(user), text, keyboard)
            .await
        else {
            return;
        };

        warn!(user = %user, error = %e, "Failed to send reply");
        if e.is_blocked() {
            if let Err(e) = self.inner.db.users().deactivate(user).await {
                warn!(user = %user, error = %e, "Failed to deactivate user");
            }
        }
    }

    fn compose_lock(&self) -> MutexGuard<'_, HashMap<UserId, Audience>> {
        self.inner
            .compose
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn conversations_lock(&self) -> MutexGuard<'_, HashMap<UserId, Arc<AsyncMutex<()>>>> {
        self.inner
            .conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock serializing `user`'s messages.
    fn conversation(&self, user: UserId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.conversations_lock().entry(user).or_default())
    }

    fn release_conversation(&self, user: UserId, conversation: Arc<AsyncMutex<()>>) {
        let mut conversations = self.conversations_lock();
        // One reference in the map, one here: no other handler is waiting
        if Arc::strong_count(&conversation) == 2 {
            conversations.remove(&user);
        }
    }
}
