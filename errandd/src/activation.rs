//! Bringing the agent runtime to life and handing it a task.
//!
//! The daemon does not embed an agent; it runs operator-configured shell
//! hooks: probe (is it up?), spawn (start it), inject (give it the task).
//! Everything here is best-effort bool — a failed hook means "retry later",
//! never a daemon crash.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use errand_core::TaskEntry;

use crate::config::ActivationSection;

#[async_trait]
pub trait Activator: Send + Sync {
    /// Make sure the agent runtime is up, starting it if needed.
    async fn ensure_running(&self) -> bool;
    /// Hand the task to the running agent.
    async fn trigger_input(&self, task: &TaskEntry) -> bool;
}

pub struct CommandActivator {
    hooks: ActivationSection,
}

impl CommandActivator {
    pub fn new(hooks: ActivationSection) -> Self {
        Self { hooks }
    }

    fn shell(command: &str) -> Command {
        #[cfg(unix)]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        };
        #[cfg(not(unix))]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        };
        cmd.stdin(Stdio::null()).stdout(Stdio::null());
        cmd
    }

    async fn run_hook(name: &str, command: &str) -> bool {
        match Self::shell(command).status().await {
            Ok(status) if status.success() => true,
            Ok(status) => {
                debug!(hook = name, %status, "activation hook exited non-zero");
                false
            }
            Err(err) => {
                warn!(hook = name, error = %err, "activation hook failed to run");
                false
            }
        }
    }

    async fn probe(&self) -> Option<bool> {
        let command = self.hooks.probe_command.as_deref()?;
        Some(Self::run_hook("probe", command).await)
    }
}

#[async_trait]
impl Activator for CommandActivator {
    async fn ensure_running(&self) -> bool {
        // No probe configured means the runtime is assumed to be managed
        // externally and always available.
        let Some(up) = self.probe().await else {
            return true;
        };
        if up {
            return true;
        }
        let Some(spawn) = self.hooks.spawn_command.as_deref() else {
            warn!("agent runtime is down and no spawn hook is configured");
            return false;
        };
        info!("agent runtime is down; spawning");
        if !Self::run_hook("spawn", spawn).await {
            return false;
        }
        sleep(Duration::from_secs(self.hooks.spawn_wait_secs)).await;
        match self.probe().await {
            Some(up) => up,
            None => true,
        }
    }

    async fn trigger_input(&self, task: &TaskEntry) -> bool {
        let Some(inject) = self.hooks.inject_command.as_deref() else {
            warn!("no inject hook configured; task cannot be dispatched");
            return false;
        };
        let mut cmd = Self::shell(inject);
        cmd.env("ERRAND_TASK_ID", &task.id)
            .env("ERRAND_TASK_PAYLOAD", &task.payload);
        match cmd.status().await {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!(task_id = %task.id, %status, "inject hook exited non-zero");
                false
            }
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "inject hook failed to run");
                false
            }
        }
    }
}
