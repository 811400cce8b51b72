//! Telegram Bot channel: message delivery via the Bot API `sendMessage`.

use async_trait::async_trait;
use leadpulse_core::config::TelegramSettings;
use leadpulse_core::error::{LeadPulseError, Result};
use leadpulse_core::traits::{DeliveryGateway, RenderMode};
use serde::{Deserialize, Serialize};

/// Telegram delivery gateway. Retries are left to the caller.
pub struct TelegramGateway {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramGateway {
    pub fn new(bot_token: &str, settings: &TelegramSettings) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// Send a text message to a chat.
    pub async fn send_message(&self, chat_id: &str, text: &str, mode: RenderMode) -> Result<()> {
        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&message_body(chat_id, text, mode))
            .send()
            .await
            .map_err(|e| LeadPulseError::channel(format!("sendMessage failed: {e}")))?;

        let result: TelegramApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| LeadPulseError::channel(format!("Invalid send response: {e}")))?;

        result.into_result().map(|_| ())
    }

    /// Get bot info. Used to verify the token.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| LeadPulseError::channel(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| LeadPulseError::channel(format!("Invalid getMe response: {e}")))?;
        body.into_result()
    }
}

#[async_trait]
impl DeliveryGateway for TelegramGateway {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, channel_id: &str, text: &str, mode: RenderMode) -> Result<()> {
        self.send_message(channel_id, text, mode).await?;
        tracing::debug!("✅ Telegram message sent to {}", channel_id);
        Ok(())
    }
}

/// JSON body for `sendMessage`. Richtext maps to Telegram's HTML parse mode.
pub fn message_body(chat_id: &str, text: &str, mode: RenderMode) -> serde_json::Value {
    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "text": text,
        "disable_web_page_preview": true,
    });
    if mode == RenderMode::RichText {
        body["parse_mode"] = serde_json::Value::String("HTML".into());
    }
    body
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
}

impl<T> TelegramApiResponse<T> {
    /// Map a non-ok response to a channel error.
    pub fn into_result(self) -> Result<T> {
        if !self.ok {
            return Err(LeadPulseError::channel(format!(
                "Telegram API error {}: {}",
                self.error_code.unwrap_or_default(),
                self.description.unwrap_or_default()
            )));
        }
        self.result
            .ok_or_else(|| LeadPulseError::channel("Telegram API returned no result"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_richtext_uses_html_parse_mode() {
        let body = message_body("42", "<b>hi</b>", RenderMode::RichText);
        assert_eq!(body["chat_id"], "42");
        assert_eq!(body["parse_mode"], "HTML");

        let plain = message_body("42", "hi", RenderMode::Plain);
        assert!(plain.get("parse_mode").is_none());
    }

    #[test]
    fn test_api_url() {
        let settings = TelegramSettings {
            bot_token: String::new(),
            api_base: "https://tg.example.com/".into(),
        };
        let gateway = TelegramGateway::new("123:abc", &settings);
        assert_eq!(
            gateway.api_url("sendMessage"),
            "https://tg.example.com/bot123:abc/sendMessage"
        );
        assert_eq!(gateway.name(), "telegram");
    }

    #[test]
    fn test_error_response_is_channel_error() {
        let raw = r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was blocked by the user"}"#;
        let resp: TelegramApiResponse<serde_json::Value> = serde_json::from_str(raw).unwrap();
        let err = resp.into_result().unwrap_err();
        assert!(matches!(err, LeadPulseError::Channel(ref m) if m.contains("403")));
    }

    #[test]
    fn test_ok_response_parses_user() {
        let raw = r#"{"ok":true,"result":{"id":7,"is_bot":true,"first_name":"Pulse","username":"pulse_bot"}}"#;
        let resp: TelegramApiResponse<TelegramUser> = serde_json::from_str(raw).unwrap();
        let user = resp.into_result().unwrap();
        assert_eq!(user.username.as_deref(), Some("pulse_bot"));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_error() {
        let settings = TelegramSettings {
            bot_token: String::new(),
            api_base: "http://127.0.0.1:9".into(),
        };
        let gateway = TelegramGateway::new("t", &settings);
        let result = gateway.send("1", "hello", RenderMode::Plain).await;
        assert!(matches!(result, Err(LeadPulseError::Channel(_))));
    }
}
