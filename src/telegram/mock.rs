//! Mock Telegram Client for Testing
//!
//! Records outbound messages, serves scripted membership answers and queued
//! updates, and can be told to fail sends to specific chats.

use super::traits::*;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Mock Telegram client for testing
#[derive(Clone, Default)]
pub struct MockTelegramClient {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    sent_messages: Vec<SentMessage>,
    send_failures: HashMap<ChatId, TelegramError>,
    memberships: HashMap<UserId, MemberStatus>,
    membership_failures: HashSet<UserId>,
    membership_queries: u32,
    pending_updates: Vec<Update>,
    next_update_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat: ChatId,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl MockTelegramClient {
    /// Create new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Status returned by `get_chat_member` for `user` (default: left)
    pub fn set_membership(&self, user: UserId, status: MemberStatus) {
        self.state.lock().unwrap().memberships.insert(user, status);
    }

    /// Make `get_chat_member` fail with a network error for `user`
    pub fn fail_membership_query(&self, user: UserId) {
        self.state.lock().unwrap().membership_failures.insert(user);
    }

    /// Make every send to `chat` fail with a network error
    pub fn fail_sends_to(&self, chat: ChatId) {
        self.state.lock().unwrap().send_failures.insert(
            chat,
            TelegramError::Network("connection reset".to_string()),
        );
    }

    /// Make every send to `chat` fail as if the user blocked the bot
    pub fn block_bot(&self, chat: ChatId) {
        self.state.lock().unwrap().send_failures.insert(
            chat,
            TelegramError::Forbidden("bot was blocked by the user".to_string()),
        );
    }

    /// Undo `fail_sends_to` / `block_bot` for `chat`
    pub fn restore_sends_to(&self, chat: ChatId) {
        self.state.lock().unwrap().send_failures.remove(&chat);
    }

    /// Queue an update for the next `get_updates` call
    pub fn push_update(&self, update: Update) {
        self.state.lock().unwrap().pending_updates.push(update);
    }

    /// Get sent messages for assertions
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent_messages.clone()
    }

    /// Texts successfully sent to one chat, oldest first
    pub fn sent_to(&self, chat: ChatId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent_messages
            .iter()
            .filter(|m| m.chat == chat)
            .map(|m| m.text.clone())
            .collect()
    }

    /// Most recent message sent to one chat
    pub fn last_sent_to(&self, chat: ChatId) -> Option<SentMessage> {
        self.state
            .lock()
            .unwrap()
            .sent_messages
            .iter()
            .rev()
            .find(|m| m.chat == chat)
            .cloned()
    }

    /// Number of `get_chat_member` calls so far
    pub fn membership_queries(&self) -> u32 {
        self.state.lock().unwrap().membership_queries
    }

    /// Forget sent messages (scripted answers are kept)
    pub fn clear_sent(&self) {
        self.state.lock().unwrap().sent_messages.clear();
    }
}

#[async_trait]
impl TelegramClient for MockTelegramClient {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> TelegramResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.send_failures.get(&chat) {
            return Err(err.clone());
        }
        state.sent_messages.push(SentMessage {
            chat,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn get_chat_member(&self, _chat: ChatId, user: UserId) -> TelegramResult<MemberStatus> {
        let mut state = self.state.lock().unwrap();
        state.membership_queries += 1;
        if state.membership_failures.contains(&user) {
            return Err(TelegramError::Network("getChatMember timed out".to_string()));
        }
        Ok(state
            .memberships
            .get(&user)
            .copied()
            .unwrap_or(MemberStatus::Left))
    }

    async fn get_updates(&self, offset: i64, _timeout_secs: u64) -> TelegramResult<Vec<Envelope>> {
        let mut state = self.state.lock().unwrap();
        let updates: Vec<Update> = state.pending_updates.drain(..).collect();
        let mut envelopes = Vec::with_capacity(updates.len());
        for update in updates {
            let update_id = state.next_update_id.max(offset);
            state.next_update_id = update_id + 1;
            envelopes.push(Envelope {
                update_id,
                update: Some(update),
            });
        }
        Ok(envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_message() {
        let client = MockTelegramClient::new();
        let chat = ChatId(7);

        client.send_message(chat, "Hello", None).await.unwrap();

        assert_eq!(client.sent_to(chat), vec!["Hello".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_send_is_not_recorded() {
        let client = MockTelegramClient::new();
        let chat = ChatId(7);
        client.block_bot(chat);

        let err = client.send_message(chat, "Hello", None).await.unwrap_err();

        assert!(err.is_blocked());
        assert!(client.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_membership_defaults_to_left() {
        let client = MockTelegramClient::new();
        let status = client.get_chat_member(ChatId(-100), UserId(1)).await.unwrap();
        assert_eq!(status, MemberStatus::Left);

        client.set_membership(UserId(1), MemberStatus::Member);
        let status = client.get_chat_member(ChatId(-100), UserId(1)).await.unwrap();
        assert_eq!(status, MemberStatus::Member);
        assert_eq!(client.membership_queries(), 2);
    }

    #[tokio::test]
    async fn test_updates_are_drained_with_increasing_ids() {
        let client = MockTelegramClient::new();
        let post = Update::ChannelPost(ChannelPost {
            chat: ChatId(-100),
            text: Some("BTC long".to_string()),
        });
        client.push_update(post.clone());
        client.push_update(post);

        let batch = client.get_updates(0, 0).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].update_id, 0);
        assert_eq!(batch[1].update_id, 1);

        assert!(client.get_updates(2, 0).await.unwrap().is_empty());
    }
}
