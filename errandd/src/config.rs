//! Daemon configuration: TOML file with env-var overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use errand_telegram::parse_allowed_ids;

fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_poll_interval() -> u64 {
    10
}

fn default_task_timeout() -> u64 {
    1800
}

fn default_done_poll() -> u64 {
    2
}

fn default_spawn_wait() -> u64 {
    15
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErrandConfig {
    /// Directory where the relay's state entries live.
    pub state_dir: PathBuf,
    /// Seconds between queue scans while idle.
    pub poll_interval_secs: u64,
    /// Seconds to supervise one dispatched task before abandoning it.
    pub task_timeout_secs: u64,
    /// Seconds between completion-signal checks while supervising.
    pub done_poll_secs: u64,
    /// Drop a task after this many failed dispatch attempts. Unset retries
    /// forever.
    pub max_dispatch_attempts: Option<u32>,
    pub telegram: TelegramSection,
    pub activation: ActivationSection,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelegramSection {
    pub bot_token: Option<String>,
    pub allowed_user_ids: Vec<i64>,
}

/// Shell hooks the daemon runs to bring the agent runtime to life. Each is
/// passed to the system shell; empty means the step is skipped.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivationSection {
    /// Exit 0 when the agent runtime is already up.
    pub probe_command: Option<String>,
    /// Starts the agent runtime when the probe fails.
    pub spawn_command: Option<String>,
    /// Seconds to wait after spawning before probing again.
    pub spawn_wait_secs: u64,
    /// Hands the task text to the running agent. Receives the task via the
    /// ERRAND_TASK_ID and ERRAND_TASK_PAYLOAD environment variables.
    pub inject_command: Option<String>,
}

impl Default for ActivationSection {
    fn default() -> Self {
        Self {
            probe_command: None,
            spawn_command: None,
            spawn_wait_secs: default_spawn_wait(),
            inject_command: None,
        }
    }
}

impl Default for ErrandConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            poll_interval_secs: default_poll_interval(),
            task_timeout_secs: default_task_timeout(),
            done_poll_secs: default_done_poll(),
            max_dispatch_attempts: None,
            telegram: TelegramSection::default(),
            activation: ActivationSection::default(),
        }
    }
}

/// Load the config file, falling back to defaults when it is absent or
/// unparseable. A broken config file must never keep the daemon down.
pub fn load_config(path: &Path) -> ErrandConfig {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "config not readable; using defaults");
            return ErrandConfig::default();
        }
    };
    match toml::from_str(&raw) {
        Ok(config) => config,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "config not parseable; using defaults");
            ErrandConfig::default()
        }
    }
}

/// Environment wins over file so deployments can inject secrets without
/// writing them to disk.
pub fn apply_env_overrides(config: &mut ErrandConfig) {
    if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
        if !token.is_empty() {
            config.telegram.bot_token = Some(token);
        }
    }
    if let Ok(raw) = std::env::var("ALLOWED_USER_IDS") {
        let ids = parse_allowed_ids(&raw);
        if !ids.is_empty() {
            config.telegram.allowed_user_ids = ids;
        }
    }
    if let Ok(dir) = std::env::var("ERRAND_STATE_DIR") {
        if !dir.is_empty() {
            config.state_dir = PathBuf::from(dir);
        }
    }
    if let Ok(raw) = std::env::var("ERRAND_POLL_INTERVAL") {
        match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => config.poll_interval_secs = secs,
            _ => warn!(value = %raw, "ignoring invalid ERRAND_POLL_INTERVAL"),
        }
    }
}
