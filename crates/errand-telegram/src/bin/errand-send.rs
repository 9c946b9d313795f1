//! Fire-and-forget report from the agent to the operator chat.
//!
//! Exits non-zero when delivery fails so callers can tell the message
//! never left the machine.

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use errand_core::Notifier;
use errand_telegram::{parse_allowed_ids, BotApi, TelegramNotifier};

#[derive(Parser, Debug)]
#[command(name = "errand-send", about = "Send a report to the operator chat")]
struct Cli {
    /// Message text to deliver.
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let token =
        std::env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN is not set")?;
    let chat_ids = parse_allowed_ids(
        &std::env::var("ALLOWED_USER_IDS").context("ALLOWED_USER_IDS is not set")?,
    );
    if chat_ids.is_empty() {
        bail!("ALLOWED_USER_IDS contains no usable chat ids");
    }

    let notifier = TelegramNotifier::new(BotApi::new(token), chat_ids);
    let text = format!("🤖 *Agent report*\n\n{}", cli.message);
    if !notifier.send(&text).await {
        bail!("report could not be delivered to any operator chat");
    }
    Ok(())
}
