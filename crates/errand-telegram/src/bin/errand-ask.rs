//! Blocking approval gate for agent-side scripts.
//!
//! Prints the verdict and exits 0 on approval, 1 on rejection (which
//! includes timeouts and delivery failures), so it slots straight into
//! `errand-ask "dangerous step?" && do_the_step`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use errand_core::{ApprovalChannel, FsStore};
use errand_telegram::{parse_allowed_ids, BotApi, TelegramNotifier};

#[derive(Parser, Debug)]
#[command(name = "errand-ask", about = "Ask the operator for a go/no-go decision")]
struct Cli {
    /// Question to put to the operator.
    question: String,

    /// Task id the question belongs to, shown in the prompt.
    #[arg(long)]
    task: Option<String>,

    /// How long to wait for an answer before giving up.
    #[arg(long, default_value_t = 3600)]
    timeout_secs: u64,

    /// Directory holding the relay state entries.
    #[arg(long, env = "ERRAND_STATE_DIR", default_value = ".")]
    state_dir: PathBuf,
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

    let store = Arc::new(
        FsStore::open(&cli.state_dir)
            .await
            .context("opening state directory")?,
    );
    let notifier = Arc::new(TelegramNotifier::new(BotApi::new(token), chat_ids));
    let channel = ApprovalChannel::new(store, notifier);

    let verdict = channel
        .request(
            &cli.question,
            cli.task.as_deref(),
            Duration::from_secs(cli.timeout_secs),
        )
        .await;

    println!("{}", verdict.as_str());
    if !verdict.is_approved() {
        std::process::exit(1);
    }
    Ok(())
}
