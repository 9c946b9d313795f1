//! Inbound operator loop: long-poll the Bot API, enqueue tasks, record
//! approval verdicts, answer admin commands.

use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{info, warn};

use errand_core::{ApprovalChannel, Mailbox, Verdict};

use crate::api::{BotApi, Update};

const LONG_POLL_SECS: u64 = 50;
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What one inbound update means for the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Free-form operator text: a new task for the queue.
    NewTask { chat_id: i64, text: String },
    Start { chat_id: i64 },
    Status { chat_id: i64 },
    Clear { chat_id: i64 },
    /// An approval button tap.
    Decision {
        callback_id: String,
        chat_id: Option<i64>,
        message_id: Option<i64>,
        request_id: String,
        verdict: Verdict,
    },
    /// Sender is not on the allow-list.
    Unauthorized { callback_id: Option<String> },
}

/// Map button callback data back to the approval request it answers.
pub fn parse_decision(data: &str) -> Option<(String, Verdict)> {
    if let Some(id) = data.strip_prefix("approve_") {
        return Some((id.to_string(), Verdict::Approved));
    }
    if let Some(id) = data.strip_prefix("reject_") {
        return Some((id.to_string(), Verdict::Rejected));
    }
    None
}

/// Classify one update against the operator allow-list. Pure, so the
/// whole inbound protocol is testable without a network.
pub fn classify(update: &Update, allowed: &[i64]) -> Option<Inbound> {
    if let Some(callback) = &update.callback_query {
        if !allowed.contains(&callback.from.id) {
            return Some(Inbound::Unauthorized {
                callback_id: Some(callback.id.clone()),
            });
        }
        let (request_id, verdict) = parse_decision(callback.data.as_deref()?)?;
        return Some(Inbound::Decision {
            callback_id: callback.id.clone(),
            chat_id: callback.message.as_ref().map(|m| m.chat.id),
            message_id: callback.message.as_ref().map(|m| m.message_id),
            request_id,
            verdict,
        });
    }

    let message = update.message.as_ref()?;
    let from = message.from.as_ref()?;
    if !allowed.contains(&from.id) {
        return Some(Inbound::Unauthorized { callback_id: None });
    }
    let text = message.text.as_deref()?.trim();
    if text.is_empty() {
        return None;
    }
    let chat_id = message.chat.id;
    Some(match text {
        "/start" => Inbound::Start { chat_id },
        "/status" => Inbound::Status { chat_id },
        "/clear" => Inbound::Clear { chat_id },
        // Unknown commands are ignored rather than queued as tasks.
        _ if text.starts_with('/') => return None,
        _ => Inbound::NewTask {
            chat_id,
            text: text.to_string(),
        },
    })
}

/// The operator-facing bot. Owns the producer side of the mailbox and the
/// resolve side of the approval channel; never touches the busy lock.
pub struct BotLoop {
    api: BotApi,
    allowed: Vec<i64>,
    mailbox: Mailbox,
    approvals: ApprovalChannel,
}

impl BotLoop {
    pub fn new(
        api: BotApi,
        allowed: Vec<i64>,
        mailbox: Mailbox,
        approvals: ApprovalChannel,
    ) -> Self {
        Self {
            api,
            allowed,
            mailbox,
            approvals,
        }
    }

    /// Long-poll updates forever. Individual handler failures are logged
    /// and the loop keeps its cadence.
    pub async fn run(&self) {
        info!(operators = self.allowed.len(), "telegram bot loop started");
        let mut offset = 0i64;
        loop {
            let updates = match self.api.get_updates(offset, LONG_POLL_SECS).await {
                Ok(updates) => updates,
                Err(err) => {
                    warn!(error = %err, "getUpdates failed; backing off");
                    sleep(ERROR_BACKOFF).await;
                    continue;
                }
            };
            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(inbound) = classify(&update, &self.allowed) else {
                    continue;
                };
                if let Err(err) = self.handle(inbound, &update).await {
                    warn!(error = %err, "update handling failed");
                }
            }
        }
    }

    async fn handle(&self, inbound: Inbound, update: &Update) -> Result<()> {
        match inbound {
            Inbound::NewTask { chat_id, text } => {
                let task_id = self.mailbox.enqueue(&text).await?;
                let pending = self.mailbox.pending_count().await?;
                info!(%task_id, pending, "operator task queued");
                self.api
                    .send_message(
                        chat_id,
                        &format!(
                            "📥 *Queued*\n\nTask id: `{task_id}`\nPending: {pending}\n\nThe agent will pick it up shortly."
                        ),
                        None,
                    )
                    .await?;
            }
            Inbound::Start { chat_id } => {
                let pending = self.mailbox.pending_count().await?;
                self.api
                    .send_message(
                        chat_id,
                        &format!(
                            "🤖 *errand relay*\n\nSend any message to queue a task for the agent.\n\nPending: {pending}"
                        ),
                        None,
                    )
                    .await?;
            }
            Inbound::Status { chat_id } => {
                let pending = self.mailbox.pending_count().await?;
                self.api
                    .send_message(chat_id, &format!("📋 Pending tasks: {pending}"), None)
                    .await?;
            }
            Inbound::Clear { chat_id } => {
                let removed = self.mailbox.clear_pending().await?;
                info!(removed, "operator cleared the queue");
                self.api
                    .send_message(
                        chat_id,
                        &format!("🗑️ Cleared {removed} pending task(s)"),
                        None,
                    )
                    .await?;
            }
            Inbound::Decision {
                callback_id,
                chat_id,
                message_id,
                request_id,
                verdict,
            } => {
                self.approvals.resolve(&request_id, verdict).await?;
                info!(%request_id, verdict = verdict.as_str(), "approval verdict recorded");
                if let Err(err) = self.api.answer_callback_query(&callback_id, None, false).await {
                    warn!(error = %err, "callback ack failed");
                }
                if let (Some(chat_id), Some(message_id)) = (chat_id, message_id) {
                    let original = update
                        .callback_query
                        .as_ref()
                        .and_then(|c| c.message.as_ref())
                        .and_then(|m| m.text.as_deref())
                        .unwrap_or_default();
                    let suffix = match verdict {
                        Verdict::Approved => "✅ *Approved*",
                        Verdict::Rejected => "❌ *Rejected*",
                    };
                    if let Err(err) = self
                        .api
                        .edit_message_text(chat_id, message_id, &format!("{original}\n\n{suffix}"))
                        .await
                    {
                        warn!(error = %err, "prompt edit failed");
                    }
                }
            }
            Inbound::Unauthorized { callback_id } => {
                warn!("update from sender outside the allow-list ignored");
                if let Some(callback_id) = callback_id {
                    let _ = self
                        .api
                        .answer_callback_query(&callback_id, Some("Not allowed"), true)
                        .await;
                }
            }
        }
        Ok(())
    }
}
