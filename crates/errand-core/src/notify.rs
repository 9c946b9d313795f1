//! Outbound operator-facing text delivery boundary.

use async_trait::async_trait;
use tracing::debug;

/// Best-effort notification channel to the operator. Implementations log
/// failures and report them as `false`; nothing here ever returns an error
/// or retries — fire and forget, per the relay's delivery model.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Plain text message.
    async fn send(&self, text: &str) -> bool;

    /// Text plus two labeled affordances (approve / reject) that carry the
    /// request id back through the decision channel.
    async fn send_with_choice(&self, text: &str, request_id: &str) -> bool;
}

/// Drops every message. Used when no chat transport is configured so the
/// rest of the system keeps running; approval requests sent through this
/// notifier resolve to rejected, the safe default.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, text: &str) -> bool {
        debug!(len = text.len(), "notifier disabled; dropping message");
        false
    }

    async fn send_with_choice(&self, _text: &str, request_id: &str) -> bool {
        debug!(%request_id, "notifier disabled; dropping approval request");
        false
    }
}
