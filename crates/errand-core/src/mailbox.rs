//! Durable pending-task queue with destructive FIFO dequeue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::ids;
use crate::poll::poll_until;
use crate::store::StateStore;
use crate::TASK_PREFIX;

/// A pending task as persisted in the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: String,
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
    /// Dispatch attempts that failed at activation and were re-enqueued.
    #[serde(default)]
    pub attempts: u32,
}

/// Producer/consumer rendezvous over the shared store. Ownership of a task
/// transfers on dequeue; there is no rollback if the consumer crashes
/// afterwards (accepted at-most-once delivery).
#[derive(Clone)]
pub struct Mailbox {
    store: Arc<dyn StateStore>,
}

impl Mailbox {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn key_for(id: &str) -> String {
        format!("{TASK_PREFIX}{id}")
    }

    /// Persist a new task and hand back its id. Non-blocking; storage
    /// errors propagate to the producer.
    pub async fn enqueue(&self, payload: &str) -> Result<String, StoreError> {
        let entry = TaskEntry {
            id: ids::task_id(),
            payload: payload.trim().to_string(),
            enqueued_at: Utc::now(),
            attempts: 0,
        };
        self.put_entry(&entry).await?;
        debug!(task_id = %entry.id, "task enqueued");
        Ok(entry.id)
    }

    /// Put a dequeued task back under its original id with the attempt
    /// counter bumped. Re-using the id keeps the task's place in the queue
    /// instead of sending a failed dispatch to the back of the line.
    pub async fn re_enqueue(&self, mut entry: TaskEntry) -> Result<(), StoreError> {
        entry.attempts += 1;
        debug!(task_id = %entry.id, attempts = entry.attempts, "task re-enqueued");
        self.put_entry(&entry).await
    }

    async fn put_entry(&self, entry: &TaskEntry) -> Result<(), StoreError> {
        let key = Self::key_for(&entry.id);
        let bytes = serde_json::to_vec(entry)
            .map_err(|source| StoreError::Malformed { key: key.clone(), source })?;
        self.store.put(&key, &bytes).await
    }

    /// Non-destructive existence check, so the scheduler never wakes the
    /// consumer for nothing.
    pub async fn peek_has_pending(&self) -> Result<bool, StoreError> {
        Ok(!self.store.list(TASK_PREFIX).await?.is_empty())
    }

    pub async fn pending_count(&self) -> Result<usize, StoreError> {
        Ok(self.store.list(TASK_PREFIX).await?.len())
    }

    /// Claim the oldest pending task, if any.
    ///
    /// Task ids sort by creation time, so walking the sorted key list from
    /// the front is strict FIFO. An entry that vanishes mid-scan was
    /// claimed by someone else; an entry that fails to parse is dropped
    /// with a warning so one bad file cannot wedge the queue.
    pub async fn dequeue_one(&self) -> Result<Option<TaskEntry>, StoreError> {
        for key in self.store.list(TASK_PREFIX).await? {
            let Some(bytes) = self.store.take(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<TaskEntry>(&bytes) {
                Ok(entry) => return Ok(Some(entry)),
                Err(err) => warn!(%key, error = %err, "skipping malformed task entry"),
            }
        }
        Ok(None)
    }

    /// Consumer-side blocking fetch: retry `dequeue_one` at `poll_interval`
    /// cadence until a task arrives or `timeout` elapses. `None` (or zero)
    /// waits indefinitely. This is cooperative polling, not a wakeup
    /// signal, and it is the consumer's single suspension point.
    pub async fn blocking_dequeue(
        &self,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Option<TaskEntry> {
        poll_until(poll_interval, timeout, || async {
            match self.dequeue_one().await {
                Ok(found) => found,
                Err(err) => {
                    warn!(error = %err, "mailbox scan failed; retrying");
                    None
                }
            }
        })
        .await
    }

    /// Drop every pending task. Administrative path, bypasses the
    /// scheduler entirely.
    pub async fn clear_pending(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in self.store.list(TASK_PREFIX).await? {
            if self.store.take(&key).await?.is_some() {
                removed += 1;
            }
        }
        debug!(removed, "pending queue cleared");
        Ok(removed)
    }
}
