//! Single-slot in-flight marker.

use std::sync::Arc;

use crate::error::StoreError;
use crate::store::StateStore;
use crate::BUSY_KEY;

/// Enforces at most one dispatched task at a time. The scheduler acquires;
/// either the consumer's completion report or the scheduler's cleanup path
/// releases. There is deliberately no ownership check on release — this is
/// a coordination aid, not a security boundary.
#[derive(Clone)]
pub struct BusyLock {
    store: Arc<dyn StateStore>,
}

impl BusyLock {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Succeeds only when currently unlocked; atomic with respect to
    /// concurrent acquire attempts.
    pub async fn try_acquire(&self, task_id: &str) -> Result<bool, StoreError> {
        self.store.put_if_absent(BUSY_KEY, task_id.as_bytes()).await
    }

    pub async fn is_locked(&self) -> Result<bool, StoreError> {
        self.store.exists(BUSY_KEY).await
    }

    /// Id of the task currently holding the lock, if any.
    pub async fn holder(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .get(BUSY_KEY)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Idempotent: releasing an unlocked lock is a no-op.
    pub async fn release(&self) -> Result<(), StoreError> {
        self.store.delete(BUSY_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn lock() -> BusyLock {
        BusyLock::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() -> anyhow::Result<()> {
        let lock = lock();
        assert!(lock.try_acquire("t1").await?);
        assert!(!lock.try_acquire("t2").await?);
        assert_eq!(lock.holder().await?.as_deref(), Some("t1"));
        Ok(())
    }

    #[tokio::test]
    async fn release_is_idempotent() -> anyhow::Result<()> {
        let lock = lock();
        lock.release().await?;
        lock.release().await?;
        assert!(!lock.is_locked().await?);

        assert!(lock.try_acquire("t1").await?);
        lock.release().await?;
        lock.release().await?;
        assert!(!lock.is_locked().await?);
        Ok(())
    }

    #[tokio::test]
    async fn reacquire_after_release() -> anyhow::Result<()> {
        let lock = lock();
        assert!(lock.try_acquire("t1").await?);
        lock.release().await?;
        assert!(lock.try_acquire("t2").await?);
        assert_eq!(lock.holder().await?.as_deref(), Some("t2"));
        Ok(())
    }
}
