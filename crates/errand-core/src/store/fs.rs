use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;

use super::{validate_key, StateStore};

/// Every entry lives as `.errand_<key>` inside the state directory.
const FILE_PREFIX: &str = ".errand_";
/// Scratch names use a dash so they never parse back as entry keys.
const SCRATCH_PREFIX: &str = ".errand-scratch.";

/// Filesystem-backed store: one dot-file per key in a shared directory.
///
/// The layout is deliberately human-inspectable; every entry is transient
/// and safe to delete by hand. Writes go through a scratch file plus
/// rename so readers never observe a half-written entry, and `take` claims
/// via rename so two readers cannot both win the same entry.
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Open the store, creating the state directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|source| StoreError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{key}"))
    }

    fn scratch_path(&self) -> PathBuf {
        self.dir
            .join(format!("{SCRATCH_PREFIX}{}", Uuid::new_v4().simple()))
    }

    fn io_err(key: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl StateStore for FsStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        let scratch = self.scratch_path();
        fs::write(&scratch, value)
            .await
            .map_err(|e| Self::io_err(key, e))?;
        fs::rename(&scratch, self.entry_path(key))
            .await
            .map_err(|e| Self::io_err(key, e))
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StoreError> {
        validate_key(key)?;
        // create_new is the atomicity guarantee: exactly one concurrent
        // caller gets to create the entry.
        let open = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.entry_path(key))
            .await;
        match open {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(value)
                    .await
                    .map_err(|e| Self::io_err(key, e))?;
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(Self::io_err(key, err)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        match fs::read(self.entry_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_err(key, err)),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        let claim = self.scratch_path();
        match fs::rename(self.entry_path(key), &claim).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Self::io_err(key, err)),
        }
        let bytes = fs::read(&claim).await.map_err(|e| Self::io_err(key, e))?;
        if let Err(err) = fs::remove_file(&claim).await {
            warn!(key, error = %err, "claimed entry could not be removed");
        }
        Ok(Some(bytes))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_err(key, err)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        match fs::metadata(self.entry_path(key)).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Self::io_err(key, err)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut reader = fs::read_dir(&self.dir)
            .await
            .map_err(|e| Self::io_err(prefix, e))?;
        let mut keys = Vec::new();
        loop {
            // A single unreadable directory entry must not abort the scan.
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable directory entry");
                    continue;
                }
            };
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(?name, "skipping non-utf8 entry name");
                continue;
            };
            if let Some(key) = name.strip_prefix(FILE_PREFIX) {
                if key.starts_with(prefix) {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_get_take_roundtrip() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FsStore::open(dir.path()).await?;

        store.put("task.0001", b"hello").await?;
        assert_eq!(store.get("task.0001").await?, Some(b"hello".to_vec()));

        assert_eq!(store.take("task.0001").await?, Some(b"hello".to_vec()));
        assert_eq!(store.take("task.0001").await?, None);
        assert_eq!(store.get("task.0001").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn put_if_absent_is_exclusive() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FsStore::open(dir.path()).await?;

        assert!(store.put_if_absent("busy", b"t1").await?);
        assert!(!store.put_if_absent("busy", b"t2").await?);
        assert_eq!(store.get("busy").await?, Some(b"t1".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FsStore::open(dir.path()).await?;

        store.put("done", b"").await?;
        store.delete("done").await?;
        store.delete("done").await?;
        assert!(!store.exists("done").await?);
        Ok(())
    }

    #[tokio::test]
    async fn list_is_sorted_and_prefix_scoped() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FsStore::open(dir.path()).await?;

        store.put("task.b", b"2").await?;
        store.put("task.a", b"1").await?;
        store.put("approval.x", b"APPROVED").await?;
        // Unrelated files in the same directory are invisible.
        std::fs::write(dir.path().join("notes.txt"), b"ignore me")?;

        assert_eq!(store.list("task.").await?, vec!["task.a", "task.b"]);
        assert_eq!(store.list("approval.").await?, vec!["approval.x"]);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_path_traversal_keys() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FsStore::open(dir.path()).await?;
        assert!(store.put("../escape", b"x").await.is_err());
        Ok(())
    }
}
