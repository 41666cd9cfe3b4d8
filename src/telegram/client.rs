//! Telegram Bot API client
//!
//! Implements [`TelegramClient`] over HTTPS with long polling. Every call is a
//! JSON `POST {api_base}/bot{token}/{method}`; the response envelope is
//! `{ ok, result, description, error_code, parameters }`.

use super::traits::*;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Update kinds requested from `getUpdates`.
const ALLOWED_UPDATES: [&str; 3] = ["message", "channel_post", "chat_member"];

/// Slack added to the long-poll timeout for the HTTP request itself.
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// Bot API token. Zeroized on drop, never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct BotToken(String);

impl BotToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BotToken(<redacted>)")
    }
}

/// HTTP Bot API client
#[derive(Clone)]
pub struct BotApiClient {
    http: Client,
    api_base: String,
    token: BotToken,
}

impl BotApiClient {
    pub fn new(token: BotToken, api_base: &str, poll_timeout_secs: u64) -> TelegramResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs) + HTTP_TIMEOUT_SLACK)
            .build()
            .map_err(|e| TelegramError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> TelegramResult<T> {
        let url = format!("{}/bot{}/{}", self.api_base, self.token.expose(), method);

        // The URL embeds the token; reqwest errors are stripped of it before logging.
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TelegramError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TelegramError::Network(e.without_url().to_string()))?;

        let envelope: ApiResponse<T> = serde_json::from_slice(&bytes).map_err(|e| {
            TelegramError::InvalidResponse(format!("{method}: HTTP {status}: {e}"))
        })?;

        envelope.into_result(method)
    }
}

#[async_trait]
impl TelegramClient for BotApiClient {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> TelegramResult<()> {
        let mut body = json!({ "chat_id": chat.0, "text": text });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = reply_markup(keyboard);
        }

        let _: Value = self.call("sendMessage", &body).await?;
        Ok(())
    }

    async fn get_chat_member(&self, chat: ChatId, user: UserId) -> TelegramResult<MemberStatus> {
        let body = json!({ "chat_id": chat.0, "user_id": user.0 });
        let member: RawChatMember = self.call("getChatMember", &body).await?;

        MemberStatus::parse(&member.status).ok_or_else(|| {
            TelegramError::InvalidResponse(format!("unknown member status '{}'", member.status))
        })
    }

    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> TelegramResult<Vec<Envelope>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ALLOWED_UPDATES,
        });

        let raw: Vec<RawUpdate> = self.call("getUpdates", &body).await?;
        debug!(count = raw.len(), offset, "Polled updates");

        Ok(raw.into_iter().map(RawUpdate::into_envelope).collect())
    }
}

/// Bot API `reply_markup` object for a keyboard.
pub fn reply_markup(keyboard: &Keyboard) -> Value {
    match keyboard {
        Keyboard::RequestContact {
            share_label,
            cancel_label,
        } => json!({
            "keyboard": [
                [{ "text": share_label, "request_contact": true }],
                [{ "text": cancel_label }],
            ],
            "resize_keyboard": true,
            "one_time_keyboard": true,
        }),
        Keyboard::Choices(choices) => {
            let rows: Vec<Value> = choices.iter().map(|c| json!([{ "text": c }])).collect();
            json!({
                "keyboard": rows,
                "resize_keyboard": true,
                "one_time_keyboard": true,
            })
        }
        Keyboard::Remove => json!({ "remove_keyboard": true }),
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, method: &str) -> TelegramResult<T> {
        if self.ok {
            return self
                .result
                .ok_or_else(|| TelegramError::InvalidResponse(format!("{method}: missing result")));
        }

        let code = self.error_code.unwrap_or_default();
        let description = self.description.unwrap_or_default();
        warn!(method, code, description = %description, "Bot API call failed");

        Err(match code {
            403 => TelegramError::Forbidden(description),
            429 => TelegramError::RateLimited {
                retry_after: self
                    .parameters
                    .and_then(|p| p.retry_after)
                    .unwrap_or(1),
            },
            _ => TelegramError::Api { code, description },
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
}

impl RawUser {
    fn into_sender(self) -> Sender {
        Sender {
            id: UserId(self.id),
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RawContact {
    phone_number: String,
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    from: Option<RawUser>,
    chat: RawChat,
    #[serde(default)]
    date: u64,
    text: Option<String>,
    caption: Option<String>,
    contact: Option<RawContact>,
}

#[derive(Debug, Deserialize)]
struct RawChatMember {
    status: String,
    user: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawChatMemberUpdated {
    chat: RawChat,
    old_chat_member: RawChatMember,
    new_chat_member: RawChatMember,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    message: Option<RawMessage>,
    channel_post: Option<RawMessage>,
    chat_member: Option<RawChatMemberUpdated>,
}

impl RawUpdate {
    fn into_envelope(self) -> Envelope {
        let update_id = self.update_id;
        let update = self.into_update();
        if update.is_none() {
            debug!(update_id, "Skipping unhandled update");
        }
        Envelope { update_id, update }
    }

    fn into_update(self) -> Option<Update> {
        if let Some(message) = self.message {
            // Group chatter is not for us
            if message.chat.kind != "private" {
                return None;
            }
            let sender = message.from?.into_sender();
            let content = match (message.contact, message.text) {
                (Some(contact), _) => MessageContent::Contact {
                    phone_number: contact.phone_number,
                    user_id: contact.user_id.map(UserId),
                },
                (None, Some(text)) => MessageContent::Text(text),
                (None, None) => MessageContent::Other,
            };
            return Some(Update::Message(InboundMessage {
                sender,
                content,
                timestamp: message.date,
            }));
        }

        if let Some(post) = self.channel_post {
            return Some(Update::ChannelPost(ChannelPost {
                chat: ChatId(post.chat.id),
                text: post.text.or(post.caption),
            }));
        }

        if let Some(change) = self.chat_member {
            let user = change.new_chat_member.user?.id;
            let old_status = MemberStatus::parse(&change.old_chat_member.status)?;
            let new_status = MemberStatus::parse(&change.new_chat_member.status)?;
            return Some(Update::MemberChange(MembershipChange {
                chat: ChatId(change.chat.id),
                user: UserId(user),
                old_status,
                new_status,
            }));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Envelope {
        let raw: RawUpdate = serde_json::from_str(json).unwrap();
        raw.into_envelope()
    }

    #[test]
    fn test_private_text_message() {
        let envelope = parse(
            r#"{"update_id": 10, "message": {
                "message_id": 1, "date": 1700000000,
                "from": {"id": 42, "is_bot": false, "first_name": "Ana", "username": "ana"},
                "chat": {"id": 42, "type": "private"},
                "text": "/start abc"
            }}"#,
        );

        assert_eq!(envelope.update_id, 10);
        let Some(Update::Message(message)) = envelope.update else {
            panic!("expected message");
        };
        assert_eq!(message.sender.id, UserId(42));
        assert_eq!(message.sender.username.as_deref(), Some("ana"));
        assert_eq!(message.content, MessageContent::Text("/start abc".to_string()));
        assert_eq!(message.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_contact_message() {
        let envelope = parse(
            r#"{"update_id": 11, "message": {
                "message_id": 2, "date": 1,
                "from": {"id": 42, "is_bot": false, "first_name": "Ana"},
                "chat": {"id": 42, "type": "private"},
                "contact": {"phone_number": "+100", "first_name": "Ana", "user_id": 42}
            }}"#,
        );

        let Some(Update::Message(message)) = envelope.update else {
            panic!("expected message");
        };
        assert_eq!(
            message.content,
            MessageContent::Contact {
                phone_number: "+100".to_string(),
                user_id: Some(UserId(42)),
            }
        );
    }

    #[test]
    fn test_group_message_is_skipped() {
        let envelope = parse(
            r#"{"update_id": 12, "message": {
                "message_id": 3, "date": 1,
                "from": {"id": 42, "is_bot": false, "first_name": "Ana"},
                "chat": {"id": -5, "type": "supergroup"},
                "text": "hi"
            }}"#,
        );
        assert_eq!(envelope.update_id, 12);
        assert_eq!(envelope.update, None);
    }

    #[test]
    fn test_channel_post_caption() {
        let envelope = parse(
            r#"{"update_id": 13, "channel_post": {
                "message_id": 4, "date": 1,
                "chat": {"id": -100, "type": "channel"},
                "caption": "BTC chart"
            }}"#,
        );
        assert_eq!(
            envelope.update,
            Some(Update::ChannelPost(ChannelPost {
                chat: ChatId(-100),
                text: Some("BTC chart".to_string()),
            }))
        );
    }

    #[test]
    fn test_chat_member_subject_is_new_member() {
        let envelope = parse(
            r#"{"update_id": 14, "chat_member": {
                "chat": {"id": -100, "type": "channel"},
                "from": {"id": 1, "is_bot": false, "first_name": "Admin"},
                "date": 1,
                "old_chat_member": {"status": "left", "user": {"id": 42, "is_bot": false, "first_name": "Ana"}},
                "new_chat_member": {"status": "member", "user": {"id": 42, "is_bot": false, "first_name": "Ana"}}
            }}"#,
        );
        assert_eq!(
            envelope.update,
            Some(Update::MemberChange(MembershipChange {
                chat: ChatId(-100),
                user: UserId(42),
                old_status: MemberStatus::Left,
                new_status: MemberStatus::Member,
            }))
        );
    }

    #[test]
    fn test_unknown_update_kind() {
        let envelope = parse(r#"{"update_id": 15, "edited_message": {}}"#);
        assert_eq!(envelope.update, None);
    }

    #[test]
    fn test_error_envelopes() {
        let forbidden: ApiResponse<Value> = serde_json::from_str(
            r#"{"ok": false, "error_code": 403, "description": "Forbidden: bot was blocked by the user"}"#,
        )
        .unwrap();
        assert!(forbidden.into_result("sendMessage").unwrap_err().is_blocked());

        let limited: ApiResponse<Value> = serde_json::from_str(
            r#"{"ok": false, "error_code": 429, "description": "Too Many Requests", "parameters": {"retry_after": 7}}"#,
        )
        .unwrap();
        assert_eq!(
            limited.into_result("sendMessage").unwrap_err(),
            TelegramError::RateLimited { retry_after: 7 }
        );

        let other: ApiResponse<Value> = serde_json::from_str(
            r#"{"ok": false, "error_code": 400, "description": "Bad Request: chat not found"}"#,
        )
        .unwrap();
        assert!(matches!(
            other.into_result("sendMessage").unwrap_err(),
            TelegramError::Api { code: 400, .. }
        ));

        let ok: ApiResponse<bool> = serde_json::from_str(r#"{"ok": true, "result": true}"#).unwrap();
        assert!(ok.into_result("x").unwrap());
    }

    #[test]
    fn test_reply_markup() {
        let markup = reply_markup(&Keyboard::RequestContact {
            share_label: "Share".to_string(),
            cancel_label: "Cancel".to_string(),
        });
        assert_eq!(markup["keyboard"][0][0]["request_contact"], json!(true));
        assert_eq!(markup["keyboard"][1][0]["text"], json!("Cancel"));

        let markup = reply_markup(&Keyboard::Choices(vec!["Basic".into(), "VIP".into()]));
        assert_eq!(markup["keyboard"].as_array().map(Vec::len), Some(2));

        assert_eq!(reply_markup(&Keyboard::Remove), json!({ "remove_keyboard": true }));
    }

    #[test]
    fn test_token_is_redacted() {
        let token = BotToken::new("123:secret");
        assert_eq!(format!("{token:?}"), "BotToken(<redacted>)");
        assert_eq!(token.expose(), "123:secret");
    }
}
