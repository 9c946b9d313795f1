//! Outbound adapter: `Notifier` over the Telegram Bot API.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use errand_core::Notifier;

use crate::api::BotApi;

/// Telegram caps message text at 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Best-effort delivery to the operator allow-list. Plain reports fan out
/// to every allowed chat; approval prompts go to the primary (first)
/// operator only, since exactly one human should answer them.
pub struct TelegramNotifier {
    api: BotApi,
    chat_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(api: BotApi, chat_ids: Vec<i64>) -> Self {
        Self { api, chat_ids }
    }

    fn primary_chat(&self) -> Option<i64> {
        self.chat_ids.first().copied()
    }
}

/// Truncate to `limit` characters without splitting a code point.
pub(crate) fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// The two verdict affordances, carrying the request id in their callback
/// data. The decision loop parses these back in `bot::parse_decision`.
pub(crate) fn approval_keyboard(request_id: &str) -> Value {
    json!({
        "inline_keyboard": [[
            { "text": "✅ Approve", "callback_data": format!("approve_{request_id}") },
            { "text": "❌ Reject", "callback_data": format!("reject_{request_id}") },
        ]]
    })
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> bool {
        if self.chat_ids.is_empty() {
            warn!("no allowed chat ids configured; dropping message");
            return false;
        }
        let text = truncate_chars(text, MAX_MESSAGE_CHARS);
        let mut delivered = false;
        for chat_id in &self.chat_ids {
            match self.api.send_message(*chat_id, text, None).await {
                Ok(_) => delivered = true,
                Err(err) => warn!(chat_id, error = %err, "telegram send failed"),
            }
        }
        delivered
    }

    async fn send_with_choice(&self, text: &str, request_id: &str) -> bool {
        let Some(chat_id) = self.primary_chat() else {
            warn!(%request_id, "no allowed chat ids configured; dropping approval request");
            return false;
        };
        let text = truncate_chars(text, MAX_MESSAGE_CHARS);
        match self
            .api
            .send_message(chat_id, text, Some(approval_keyboard(request_id)))
            .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(%request_id, error = %err, "approval prompt send failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        // Multi-byte characters count as one each and never get split.
        assert_eq!(truncate_chars("日本語テスト", 3), "日本語");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn keyboard_carries_the_request_id_both_ways() {
        let keyboard = approval_keyboard("ab12cd34");
        let row = &keyboard["inline_keyboard"][0];
        assert_eq!(row[0]["callback_data"], "approve_ab12cd34");
        assert_eq!(row[1]["callback_data"], "reject_ab12cd34");
    }
}
