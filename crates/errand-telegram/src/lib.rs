//! Telegram transport adapter for the errand relay.
//!
//! Outbound, `TelegramNotifier` implements the core `Notifier` boundary.
//! Inbound, `BotLoop` long-polls the Bot API and feeds operator messages
//! into the mailbox and approval button taps into the approval channel.
//! Nothing else in the system knows Telegram exists.

pub mod api;
pub mod bot;
pub mod notifier;

pub use api::BotApi;
pub use bot::{classify, BotLoop, Inbound};
pub use notifier::TelegramNotifier;

/// Parse the comma-separated operator allow-list, as found in
/// `ALLOWED_USER_IDS`. Non-numeric fragments are dropped.
pub fn parse_allowed_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .collect()
}
