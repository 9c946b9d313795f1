//! Consumer-side surface: what the agent runtime calls to drain the
//! mailbox, keep the operator posted, and ask for permission mid-task.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::approval::{ApprovalChannel, Verdict};
use crate::lock::BusyLock;
use crate::mailbox::{Mailbox, TaskEntry};
use crate::notify::Notifier;
use crate::store::StateStore;
use crate::{DONE_KEY, WAITING_KEY};

/// Bundle of middleware handles the agent runtime consumes. The runtime's
/// reasoning loop stays outside; this is the whole contract between the
/// two.
#[derive(Clone)]
pub struct AgentEndpoint {
    store: Arc<dyn StateStore>,
    mailbox: Mailbox,
    lock: BusyLock,
    approval: ApprovalChannel,
    notifier: Arc<dyn Notifier>,
}

impl AgentEndpoint {
    pub fn new(store: Arc<dyn StateStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            mailbox: Mailbox::new(store.clone()),
            lock: BusyLock::new(store.clone()),
            approval: ApprovalChannel::new(store.clone(), notifier.clone()),
            store,
            notifier,
        }
    }

    fn tag(task_id: Option<&str>) -> String {
        task_id.map(|id| format!(" `{id}`")).unwrap_or_default()
    }

    /// Block until a task arrives. `None` timeout waits indefinitely.
    pub async fn wait_for_task(
        &self,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Option<TaskEntry> {
        self.mailbox.blocking_dequeue(poll_interval, timeout).await
    }

    /// Progress report. `step` is a short marker such as "2/5".
    pub async fn report_progress(
        &self,
        step: &str,
        message: &str,
        task_id: Option<&str>,
    ) -> bool {
        let text = format!(
            "📋 *Progress*{}\n\n*{step}*\n\n{message}",
            Self::tag(task_id)
        );
        self.notifier.send(&text).await
    }

    /// Completion report: notify the operator, signal the supervising
    /// scheduler if it is waiting, and free the busy lock. The returned
    /// bool only reflects notification delivery — the local bookkeeping
    /// happens regardless.
    pub async fn report_done(&self, message: &str, task_id: Option<&str>) -> bool {
        let text = format!("✅ *Task finished*{}\n\n{message}", Self::tag(task_id));
        let delivered = self.notifier.send(&text).await;

        match self.store.exists(WAITING_KEY).await {
            Ok(true) => {
                if let Err(err) = self.store.put(DONE_KEY, b"").await {
                    warn!(error = %err, "completion signal could not be written");
                }
            }
            Ok(false) => {}
            Err(err) => warn!(error = %err, "waiting marker check failed"),
        }
        if let Err(err) = self.lock.release().await {
            warn!(error = %err, "busy lock release failed");
        }
        delivered
    }

    /// Ask the operator for a go/no-go; blocks until answered or timeout.
    pub async fn request_approval(
        &self,
        question: &str,
        task_id: Option<&str>,
        timeout: Duration,
    ) -> Verdict {
        self.approval.request(question, task_id, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;
    use crate::store::MemoryStore;
    use crate::BUSY_KEY;

    fn endpoint(store: Arc<MemoryStore>) -> AgentEndpoint {
        AgentEndpoint::new(store, Arc::new(NullNotifier))
    }

    #[tokio::test]
    async fn report_done_signals_supervising_scheduler() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let endpoint = endpoint(store.clone());

        store.put(WAITING_KEY, b"t1").await?;
        store.put(BUSY_KEY, b"t1").await?;

        endpoint.report_done("all good", Some("t1")).await;

        assert!(store.exists(DONE_KEY).await?);
        assert!(!store.exists(BUSY_KEY).await?);
        Ok(())
    }

    #[tokio::test]
    async fn report_done_without_supervisor_skips_signal() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let endpoint = endpoint(store.clone());

        store.put(BUSY_KEY, b"t1").await?;
        endpoint.report_done("pull-mode finish", None).await;

        // No scheduler waiting, so no completion signal is left behind.
        assert!(!store.exists(DONE_KEY).await?);
        assert!(!store.exists(BUSY_KEY).await?);
        Ok(())
    }

    #[tokio::test]
    async fn wait_for_task_drains_mailbox() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let endpoint = endpoint(store.clone());
        Mailbox::new(store).enqueue("fix the tests").await?;

        let task = endpoint
            .wait_for_task(Duration::from_millis(5), Some(Duration::from_secs(1)))
            .await
            .expect("task");
        assert_eq!(task.payload, "fix the tests");
        Ok(())
    }
}
