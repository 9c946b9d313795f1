//! Minimal Telegram Bot API client covering exactly the calls the relay
//! makes: sendMessage, getUpdates, answerCallbackQuery, editMessageText.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct BotApi {
    client: Client,
    base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

impl BotApi {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base(token, TELEGRAM_API_BASE)
    }

    /// Base URL override, for tests against a local stub.
    pub fn with_base(token: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base: base.into(),
            token: token.into(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: Value) -> Result<T> {
        let response = self
            .client
            .post(self.url(method))
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("telegram {method} request failed"))?;
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .with_context(|| format!("telegram {method} response was not valid JSON"))?;
        if !envelope.ok {
            bail!(
                "telegram {method} rejected: {}",
                envelope.description.unwrap_or_else(|| "no description".into())
            );
        }
        envelope
            .result
            .ok_or_else(|| anyhow!("telegram {method} returned ok without a result"))
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<Value>,
    ) -> Result<Message> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(markup) = reply_markup {
            payload["reply_markup"] = markup;
        }
        self.call("sendMessage", payload).await
    }

    /// Long poll for updates. `timeout_secs` is the server-side hold.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<bool> {
        let mut payload = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            payload["text"] = json!(text);
            payload["show_alert"] = json!(show_alert);
        }
        self.call("answerCallbackQuery", payload).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<Value> {
        self.call(
            "editMessageText",
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": text,
                "parse_mode": "Markdown",
            }),
        )
        .await
    }
}
