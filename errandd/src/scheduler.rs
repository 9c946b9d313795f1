//! Dispatch scheduler: drains the mailbox one task at a time, pushes each
//! task into the agent runtime, and supervises it to completion.
//!
//! State the scheduler maintains around a dispatch:
//!   busy lock      — at most one task in flight, systemwide
//!   current marker — id of the in-flight task, for observability
//!   waiting marker — tells the agent a supervisor wants a done signal
//!   done signal    — written by the agent, consumed here

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use errand_core::{
    BusyLock, Mailbox, Notifier, StateStore, TaskEntry, CURRENT_TASK_KEY, DONE_KEY, WAITING_KEY,
};

use crate::activation::Activator;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub task_timeout: Duration,
    pub done_poll: Duration,
    pub max_dispatch_attempts: Option<u32>,
}

/// What one scheduling pass did. Returned so the run loop can pick its
/// cadence and tests can assert on exact outcomes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing pending.
    Idle,
    /// A task is already in flight.
    Busy,
    /// The queue emptied between peek and dequeue.
    LostRace,
    /// Agent runtime could not be reached; task went back to the queue.
    ActivationFailed,
    /// Task exceeded its dispatch attempt budget and was discarded.
    Dropped { task_id: String },
    /// Agent signalled completion within the deadline.
    Completed { task_id: String },
    /// Supervision timed out; the task is assumed lost.
    Abandoned { task_id: String },
}

pub struct Scheduler {
    store: Arc<dyn StateStore>,
    mailbox: Mailbox,
    lock: BusyLock,
    activator: Arc<dyn Activator>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn StateStore>,
        activator: Arc<dyn Activator>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            mailbox: Mailbox::new(store.clone()),
            lock: BusyLock::new(store.clone()),
            store,
            activator,
            notifier,
            config,
        }
    }

    /// One scheduling pass. Storage errors bubble up to the run loop,
    /// which logs and keeps going.
    pub async fn tick(&self) -> Result<TickOutcome, errand_core::StoreError> {
        if !self.mailbox.peek_has_pending().await? {
            return Ok(TickOutcome::Idle);
        }
        if self.lock.is_locked().await? {
            debug!("task in flight; holding the queue");
            return Ok(TickOutcome::Busy);
        }
        let Some(task) = self.mailbox.dequeue_one().await? else {
            return Ok(TickOutcome::LostRace);
        };

        if let Some(max) = self.config.max_dispatch_attempts {
            if task.attempts >= max {
                warn!(task_id = %task.id, attempts = task.attempts, "dispatch attempt budget exhausted; dropping");
                self.notifier
                    .send(&format!(
                        "❌ *Task dropped* `{}`\n\nGave up after {} failed dispatch attempts.",
                        task.id, task.attempts
                    ))
                    .await;
                return Ok(TickOutcome::Dropped { task_id: task.id });
            }
        }

        if !self.activator.ensure_running().await {
            warn!(task_id = %task.id, "agent runtime unavailable; re-queueing");
            self.mailbox.re_enqueue(task).await?;
            return Ok(TickOutcome::ActivationFailed);
        }

        self.dispatch(task).await
    }

    /// Claim the lock, hand the task over, supervise to completion.
    async fn dispatch(&self, task: TaskEntry) -> Result<TickOutcome, errand_core::StoreError> {
        self.store
            .put(CURRENT_TASK_KEY, task.id.as_bytes())
            .await?;
        self.store.put(WAITING_KEY, task.id.as_bytes()).await?;
        if !self.lock.try_acquire(&task.id).await? {
            // Someone grabbed the lock between the check and here. Undo and
            // let the next tick retry.
            self.rollback_markers().await;
            self.mailbox.re_enqueue(task).await?;
            return Ok(TickOutcome::Busy);
        }

        info!(task_id = %task.id, attempts = task.attempts, "dispatching task");
        if !self.activator.trigger_input(&task).await {
            warn!(task_id = %task.id, "task hand-off failed; re-queueing");
            self.rollback_markers().await;
            if let Err(err) = self.lock.release().await {
                warn!(error = %err, "busy lock release failed");
            }
            self.mailbox.re_enqueue(task).await?;
            return Ok(TickOutcome::ActivationFailed);
        }

        let outcome = self.supervise(&task.id).await;
        self.cleanup_after(&task.id).await;
        Ok(outcome)
    }

    /// Wait for the agent's done signal, bounded by the task timeout.
    async fn supervise(&self, task_id: &str) -> TickOutcome {
        let done = errand_core::poll_until(
            self.config.done_poll,
            Some(self.config.task_timeout),
            || async {
                match self.store.take(DONE_KEY).await {
                    Ok(Some(_)) => Some(()),
                    Ok(None) => None,
                    Err(err) => {
                        warn!(error = %err, "completion signal check failed; retrying");
                        None
                    }
                }
            },
        )
        .await;

        match done {
            Some(()) => {
                info!(task_id, "task completed");
                TickOutcome::Completed {
                    task_id: task_id.to_string(),
                }
            }
            None => {
                // Abandonment is log-only; the operator is not told.
                warn!(task_id, timeout = ?self.config.task_timeout, "supervision timed out; abandoning task");
                TickOutcome::Abandoned {
                    task_id: task_id.to_string(),
                }
            }
        }
    }

    async fn rollback_markers(&self) {
        for key in [WAITING_KEY, CURRENT_TASK_KEY] {
            if let Err(err) = self.store.delete(key).await {
                warn!(key, error = %err, "marker rollback failed");
            }
        }
    }

    /// Post-supervision cleanup. The lock is force-released even on
    /// abandonment so one lost task can never wedge the queue.
    async fn cleanup_after(&self, task_id: &str) {
        for key in [WAITING_KEY, CURRENT_TASK_KEY, DONE_KEY] {
            if let Err(err) = self.store.delete(key).await {
                warn!(task_id, key, error = %err, "cleanup delete failed");
            }
        }
        if let Err(err) = self.lock.release().await {
            warn!(task_id, error = %err, "busy lock release failed");
        }
    }

    /// Scheduling loop: tick, then sleep unless a task just finished, in
    /// which case the next pending task is picked up immediately.
    pub async fn run(&self) {
        info!(
            poll_interval = ?self.config.poll_interval,
            task_timeout = ?self.config.task_timeout,
            "scheduler started"
        );
        loop {
            let drain_next = match self.tick().await {
                Ok(outcome) => {
                    debug!(?outcome, "tick");
                    matches!(
                        outcome,
                        TickOutcome::Completed { .. }
                            | TickOutcome::Abandoned { .. }
                            | TickOutcome::Dropped { .. }
                    )
                }
                Err(err) => {
                    warn!(error = %err, "scheduling pass failed");
                    false
                }
            };
            if !drain_next {
                sleep(self.config.poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use errand_core::{MemoryStore, NullNotifier, BUSY_KEY};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockActivator {
        running: AtomicBool,
        inject_ok: AtomicBool,
        injected: AtomicUsize,
    }

    impl MockActivator {
        fn healthy() -> Self {
            Self {
                running: AtomicBool::new(true),
                inject_ok: AtomicBool::new(true),
                injected: AtomicUsize::new(0),
            }
        }

        fn down() -> Self {
            let this = Self::healthy();
            this.running.store(false, Ordering::SeqCst);
            this
        }

        fn inject_fails() -> Self {
            let this = Self::healthy();
            this.inject_ok.store(false, Ordering::SeqCst);
            this
        }
    }

    #[async_trait]
    impl Activator for MockActivator {
        async fn ensure_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        async fn trigger_input(&self, _task: &TaskEntry) -> bool {
            self.injected.fetch_add(1, Ordering::SeqCst);
            self.inject_ok.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn send(&self, _text: &str) -> bool {
            self.sent.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn send_with_choice(&self, _text: &str, _request_id: &str) -> bool {
            true
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_millis(10),
            task_timeout: Duration::from_millis(100),
            done_poll: Duration::from_millis(5),
            max_dispatch_attempts: None,
        }
    }

    fn scheduler_with(
        store: Arc<MemoryStore>,
        activator: Arc<dyn Activator>,
        config: SchedulerConfig,
    ) -> Scheduler {
        Scheduler::new(store, activator, Arc::new(NullNotifier), config)
    }

    #[tokio::test]
    async fn empty_queue_is_idle() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store, Arc::new(MockActivator::healthy()), config());
        assert_eq!(scheduler.tick().await?, TickOutcome::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn held_lock_defers_dispatch() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        Mailbox::new(store.clone()).enqueue("queued task").await?;
        store.put(BUSY_KEY, b"other").await?;

        let activator = Arc::new(MockActivator::healthy());
        let scheduler = scheduler_with(store.clone(), activator.clone(), config());
        assert_eq!(scheduler.tick().await?, TickOutcome::Busy);
        // Nothing was handed over and the task is still queued.
        assert_eq!(activator.injected.load(Ordering::SeqCst), 0);
        assert_eq!(Mailbox::new(store).pending_count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn activation_failure_requeues_with_bumped_attempts() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mailbox = Mailbox::new(store.clone());
        let id = mailbox.enqueue("stubborn task").await?;

        let scheduler = scheduler_with(store.clone(), Arc::new(MockActivator::down()), config());
        assert_eq!(scheduler.tick().await?, TickOutcome::ActivationFailed);

        // The task survives under its original id with the failure counted,
        // and no dispatch state is left behind.
        let entry = mailbox.dequeue_one().await?.expect("task retained");
        assert_eq!(entry.id, id);
        assert_eq!(entry.attempts, 1);
        assert!(!store.exists(BUSY_KEY).await?);
        assert!(!store.exists(WAITING_KEY).await?);
        Ok(())
    }

    #[tokio::test]
    async fn hand_off_failure_rolls_back_dispatch_state() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mailbox = Mailbox::new(store.clone());
        mailbox.enqueue("unreachable task").await?;

        let scheduler =
            scheduler_with(store.clone(), Arc::new(MockActivator::inject_fails()), config());
        assert_eq!(scheduler.tick().await?, TickOutcome::ActivationFailed);

        assert!(!store.exists(BUSY_KEY).await?);
        assert!(!store.exists(CURRENT_TASK_KEY).await?);
        assert!(!store.exists(WAITING_KEY).await?);
        assert_eq!(mailbox.pending_count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn completion_signal_finishes_the_dispatch() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mailbox = Mailbox::new(store.clone());
        let id = mailbox.enqueue("quick task").await?;

        // Stand in for the agent: wait until supervised, then signal done.
        let agent_store = store.clone();
        tokio::spawn(async move {
            loop {
                if agent_store.exists(WAITING_KEY).await.unwrap_or(false) {
                    agent_store.put(DONE_KEY, b"").await.expect("done signal");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        let scheduler = scheduler_with(store.clone(), Arc::new(MockActivator::healthy()), config());
        assert_eq!(
            scheduler.tick().await?,
            TickOutcome::Completed { task_id: id }
        );

        // All dispatch state is gone afterwards.
        assert!(!store.exists(BUSY_KEY).await?);
        assert!(!store.exists(CURRENT_TASK_KEY).await?);
        assert!(!store.exists(WAITING_KEY).await?);
        assert!(!store.exists(DONE_KEY).await?);
        Ok(())
    }

    #[tokio::test]
    async fn supervision_timeout_abandons_and_unlocks() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mailbox = Mailbox::new(store.clone());
        let id = mailbox.enqueue("silent task").await?;

        let notifier = Arc::new(CountingNotifier::default());
        let scheduler = Scheduler::new(
            store.clone(),
            Arc::new(MockActivator::healthy()),
            notifier.clone(),
            config(),
        );
        assert_eq!(
            scheduler.tick().await?,
            TickOutcome::Abandoned { task_id: id }
        );

        // Abandonment is log-only: the operator gets no message.
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 0);
        // The lock must come back even though the agent never reported, so
        // the next queued task can be dispatched.
        assert!(!store.exists(BUSY_KEY).await?);
        let next = mailbox.enqueue("next task").await?;
        let agent_store = store.clone();
        tokio::spawn(async move {
            loop {
                if agent_store.exists(WAITING_KEY).await.unwrap_or(false) {
                    agent_store.put(DONE_KEY, b"").await.expect("done signal");
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });
        assert_eq!(
            scheduler.tick().await?,
            TickOutcome::Completed { task_id: next }
        );
        Ok(())
    }

    #[tokio::test]
    async fn attempt_budget_drops_with_notification() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mailbox = Mailbox::new(store.clone());
        mailbox.enqueue("doomed task").await?;

        let notifier = Arc::new(CountingNotifier::default());
        let mut cfg = config();
        cfg.max_dispatch_attempts = Some(2);
        let scheduler = Scheduler::new(
            store.clone(),
            Arc::new(MockActivator::down()),
            notifier.clone(),
            cfg,
        );

        // Two failed activations, then the drop.
        assert_eq!(scheduler.tick().await?, TickOutcome::ActivationFailed);
        assert_eq!(scheduler.tick().await?, TickOutcome::ActivationFailed);
        match scheduler.tick().await? {
            TickOutcome::Dropped { .. } => {}
            other => panic!("expected drop, got {other:?}"),
        }
        assert_eq!(mailbox.pending_count().await?, 0);
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
