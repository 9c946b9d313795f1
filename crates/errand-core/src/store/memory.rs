use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StoreError;

use super::{validate_key, StateStore};

/// In-memory store for tests and embedded use. A `BTreeMap` keeps the key
/// space sorted, so `list` order matches what `FsStore` produces.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // The map stays consistent even if a panicking test poisoned it.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        self.guard().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StoreError> {
        validate_key(key)?;
        let mut entries = self.guard();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        Ok(self.guard().get(key).cloned())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        Ok(self.guard().remove(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.guard().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        Ok(self.guard().contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .guard()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_is_destructive() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.put("done", b"x").await?;
        assert_eq!(store.take("done").await?, Some(b"x".to_vec()));
        assert_eq!(store.take("done").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn list_is_sorted() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.put("task.c", b"").await?;
        store.put("task.a", b"").await?;
        store.put("task.b", b"").await?;
        store.put("busy", b"").await?;
        assert_eq!(store.list("task.").await?, vec!["task.a", "task.b", "task.c"]);
        Ok(())
    }

    #[tokio::test]
    async fn put_if_absent_refuses_overwrite() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        assert!(store.put_if_absent("busy", b"t1").await?);
        assert!(!store.put_if_absent("busy", b"t2").await?);
        assert_eq!(store.get("busy").await?, Some(b"t1".to_vec()));
        Ok(())
    }
}
