//! errandd — dispatch daemon for the errand task relay.
//!
//! Runs two loops: the Telegram bot loop feeding operator messages into
//! the shared state directory, and the scheduler draining that queue into
//! the local agent runtime one task at a time.

mod activation;
mod config;
mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use errand_core::{ApprovalChannel, FsStore, Mailbox, Notifier, NullNotifier};
use errand_telegram::{BotApi, BotLoop, TelegramNotifier};

use activation::CommandActivator;
use config::{apply_env_overrides, load_config, ErrandConfig};
use scheduler::{Scheduler, SchedulerConfig};

#[derive(Parser, Debug)]
#[command(name = "errandd", version)]
#[command(about = "Dispatch daemon bridging a chat operator and a local agent")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "errand.toml")]
    config: PathBuf,

    /// Override the state directory from the config file.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Run the scheduler only, without the Telegram bot loop.
    #[arg(long)]
    no_bot: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(&cli.config);
    apply_env_overrides(&mut config);
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }

    info!(state_dir = %config.state_dir.display(), "errandd starting");
    let store = Arc::new(
        FsStore::open(&config.state_dir)
            .await
            .context("opening state directory")?,
    );

    let notifier = build_notifier(&config);
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(CommandActivator::new(config.activation.clone())),
        notifier.clone(),
        SchedulerConfig {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            done_poll: Duration::from_secs(config.done_poll_secs),
            max_dispatch_attempts: config.max_dispatch_attempts,
        },
    );

    if !cli.no_bot {
        match bot_loop(&config, store.clone(), notifier.clone()) {
            Some(bot) => {
                tokio::spawn(async move { bot.run().await });
            }
            None => warn!("telegram is not configured; running scheduler only"),
        }
    }

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }
    Ok(())
}

/// Operator notifications go out over Telegram when configured; otherwise
/// a null sink that reports non-delivery, which makes approval requests
/// reject instead of hanging.
fn build_notifier(config: &ErrandConfig) -> Arc<dyn Notifier> {
    match (
        config.telegram.bot_token.as_deref(),
        config.telegram.allowed_user_ids.as_slice(),
    ) {
        (Some(token), ids) if !ids.is_empty() => Arc::new(TelegramNotifier::new(
            BotApi::new(token),
            ids.to_vec(),
        )),
        _ => {
            warn!("telegram token or allow-list missing; notifications disabled");
            Arc::new(NullNotifier)
        }
    }
}

fn bot_loop(
    config: &ErrandConfig,
    store: Arc<FsStore>,
    notifier: Arc<dyn Notifier>,
) -> Option<BotLoop> {
    let token = config.telegram.bot_token.as_deref()?;
    if config.telegram.allowed_user_ids.is_empty() {
        return None;
    }
    let api = BotApi::new(token);
    let store: Arc<dyn errand_core::StateStore> = store;
    let mailbox = Mailbox::new(store.clone());
    let approvals = ApprovalChannel::new(store, notifier);
    Some(BotLoop::new(
        api,
        config.telegram.allowed_user_ids.clone(),
        mailbox,
        approvals,
    ))
}
