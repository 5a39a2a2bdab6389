//! Telegram Bot API transport.
//!
//! Long polling via `getUpdates` and replies via `sendMessage`. Only text
//! messages are turned into [`InboundEvent`]s; every other update kind is
//! acknowledged and skipped.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::TelegramConfig;
use crate::error::{BotError, Result};
use crate::message::InboundEvent;

/// Delivery side of the messaging platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Updates with `update_id >= offset`, waiting up to the configured
    /// long-poll timeout for new ones.
    async fn fetch_updates(&self, offset: Option<i64>) -> Result<Vec<Update>>;

    async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelegramChat {
    pub id: i64,
}

impl Update {
    /// The text message carried by this update, if there is one from a user.
    pub fn into_event(self) -> Option<InboundEvent> {
        let message = self.message?;
        let text = message.text?;
        let from = message.from?;
        if from.is_bot {
            return None;
        }
        Some(InboundEvent::new(from.id, message.chat.id, text).with_message_id(message.message_id))
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl<T> ApiEnvelope<T> {
    fn into_result(self, method: &str) -> Result<T> {
        if !self.ok {
            let description = self.description.unwrap_or_else(|| "unknown error".into());
            return Err(BotError::Transport(format!(
                "Telegram `{method}` failed: {description}"
            )));
        }
        self.result
            .ok_or_else(|| BotError::Transport(format!("Telegram `{method}` returned no result")))
    }
}

/// Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(token: impl AsRef<str>, api_base: impl AsRef<str>, poll_timeout_secs: u64) -> Result<Self> {
        // The HTTP timeout has to outlive the long poll.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .build()
            .map_err(|err| BotError::Transport(format!("http client error: {err}")))?;
        Ok(Self {
            http,
            base_url: format!(
                "{}/bot{}",
                api_base.as_ref().trim_end_matches('/'),
                token.as_ref()
            ),
            poll_timeout_secs,
        })
    }

    pub fn from_config(cfg: &TelegramConfig) -> Result<Self> {
        let token = cfg
            .token
            .as_deref()
            .ok_or_else(|| BotError::Config("Telegram bot token not set".into()))?;
        Self::new(token, &cfg.api_base, cfg.poll_timeout_secs)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await
            .map_err(|e| BotError::Transport(format!("Telegram request failed: {}", e.without_url())))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| BotError::Transport(format!("Failed to read Telegram response: {}", e.without_url())))?;
        decode_envelope(method, &body)
    }
}

fn decode_envelope<T: DeserializeOwned>(method: &str, body: &[u8]) -> Result<T> {
    let envelope: ApiEnvelope<T> = serde_json::from_slice(body)
        .map_err(|e| BotError::Transport(format!("Failed to parse Telegram `{method}` response: {e}")))?;
    envelope.into_result(method)
}

#[async_trait]
impl Transport for TelegramClient {
    async fn fetch_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let mut body = json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        let updates: Vec<Update> = self.call("getUpdates", body).await?;
        debug!(count = updates.len(), "fetched updates");
        Ok(updates)
    }

    async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<()> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(message_id) = reply_to {
            body["reply_to_message_id"] = json!(message_id);
        }
        let _sent: Value = self.call("sendMessage", body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_update_becomes_event() {
        let raw = r#"{
            "update_id": 1001,
            "message": {
                "message_id": 7,
                "from": {"id": 42, "is_bot": false, "first_name": "A"},
                "chat": {"id": -500, "type": "group"},
                "date": 1700000000,
                "text": "/fw Paris"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let event = update.into_event().unwrap();
        assert_eq!(event.user_id, 42);
        assert_eq!(event.chat_id, -500);
        assert_eq!(event.message_id, Some(7));
        assert_eq!(event.text, "/fw Paris");
    }

    #[test]
    fn non_text_and_bot_updates_are_skipped() {
        let sticker = r#"{"update_id": 1, "message": {"message_id": 1, "from": {"id": 1, "is_bot": false}, "chat": {"id": 1}}}"#;
        let update: Update = serde_json::from_str(sticker).unwrap();
        assert!(update.into_event().is_none());

        let bot = r#"{"update_id": 2, "message": {"message_id": 2, "from": {"id": 9, "is_bot": true}, "chat": {"id": 1}, "text": "hi"}}"#;
        let update: Update = serde_json::from_str(bot).unwrap();
        assert!(update.into_event().is_none());

        let edited = r#"{"update_id": 3, "edited_message": {}}"#;
        let update: Update = serde_json::from_str(edited).unwrap();
        assert!(update.into_event().is_none());
    }

    #[test]
    fn api_errors_surface_description() {
        let envelope: ApiEnvelope<Vec<Update>> =
            serde_json::from_str(r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#)
                .unwrap();
        let err = envelope.into_result("getUpdates").unwrap_err();
        assert!(err.to_string().contains("Unauthorized"));
    }

    #[test]
    fn envelopes_decode_result_types_without_defaults() {
        let raw = br#"{"ok": true, "result": {"message_id": 5, "chat": {"id": 3}, "text": "hi"}}"#;
        let sent: TelegramMessage = decode_envelope("sendMessage", raw).unwrap();
        assert_eq!(sent.message_id, 5);
        assert_eq!(sent.chat.id, 3);

        let missing = decode_envelope::<TelegramMessage>("sendMessage", br#"{"ok": true}"#);
        assert!(matches!(missing, Err(BotError::Transport(_))));
    }

    #[test]
    fn base_url_embeds_token() {
        let client = TelegramClient::new("123:abc", "https://api.telegram.org/", 30).unwrap();
        assert_eq!(client.base_url, "https://api.telegram.org/bot123:abc");
    }
}
