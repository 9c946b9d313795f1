//! Capability-scoped key-value store the middleware runs against.
//!
//! The mailbox, lock and approval channel only ever see this trait, so the
//! same core logic runs against local files in production and an in-memory
//! map in tests.

use async_trait::async_trait;

use crate::error::StoreError;

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Shared mutable state between the scheduler and the consumer.
///
/// Keys are flat ASCII tokens (`[A-Za-z0-9._-]`). Entries are transient:
/// a key observed by `list` may be gone by the time it is read, and
/// callers must treat that as a lost race, not an error.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create or overwrite an entry.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Atomic create-new. Returns `Ok(false)` when the key already exists.
    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Destructive read. At most one caller observes a given entry.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Idempotent: deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Keys starting with `prefix`, sorted ascending.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("task.000-abc").is_ok());
        assert!(validate_key("busy").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("..").is_ok());
        assert!(validate_key("with space").is_err());
    }
}
