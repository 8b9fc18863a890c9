//! Snapshot persistence
//!
//! The residency manager only knows [`SnapshotStore`]: `save` then `load` must
//! hand back exactly the bytes that were saved. Two backends ship here:
//! - [`FsSnapshotStore`]: one `<tenant>.json` file per tenant, atomic writes
//! - [`MemorySnapshotStore`]: in-process map, records every save

use crate::residency::TenantId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Persistence backend errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error for tenant {tenant}: {source}")]
    Io {
        tenant: TenantId,
        #[source]
        source: std::io::Error,
    },

    /// Backend-specific failure
    #[error("Snapshot backend error for tenant {tenant}: {message}")]
    Backend { tenant: TenantId, message: String },
}

/// Durable home for tenant snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist `bytes` as the tenant's latest snapshot
    async fn save(&self, tenant: TenantId, bytes: Vec<u8>) -> Result<(), PersistenceError>;

    /// Latest snapshot, or `None` if the tenant was never saved
    async fn load(&self, tenant: TenantId) -> Result<Option<Vec<u8>>, PersistenceError>;
}

/// Directory of `<tenant>.json` files
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    dir: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, tenant: TenantId) -> PathBuf {
        self.dir.join(format!("{}.json", tenant))
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    /// Write to a temp file then rename over the target
    async fn save(&self, tenant: TenantId, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        let io = |source| PersistenceError::Io { tenant, source };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;

        let target = self.path_for(tenant);
        let temp = target.with_extension("json.tmp");
        tokio::fs::write(&temp, &bytes).await.map_err(io)?;
        tokio::fs::rename(&temp, &target).await.map_err(io)?;

        debug!(tenant = %tenant, bytes = bytes.len(), path = %target.display(), "Snapshot saved");
        Ok(())
    }

    async fn load(&self, tenant: TenantId) -> Result<Option<Vec<u8>>, PersistenceError> {
        match tokio::fs::read(self.path_for(tenant)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Io { tenant, source }),
        }
    }
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<TenantId, Vec<u8>>>,
    saves: Mutex<Vec<TenantId>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every tenant passed to `save`, in call order
    pub async fn save_log(&self) -> Vec<TenantId> {
        self.saves.lock().await.clone()
    }

    pub async fn contains(&self, tenant: TenantId) -> bool {
        self.snapshots.lock().await.contains_key(&tenant)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, tenant: TenantId, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        self.snapshots.lock().await.insert(tenant, bytes);
        self.saves.lock().await.push(tenant);
        Ok(())
    }

    async fn load(&self, tenant: TenantId) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.snapshots.lock().await.get(&tenant).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsSnapshotStore::new(temp_dir.path().join("snapshots"));
        let tenant = TenantId(42);

        assert_eq!(store.load(tenant).await.unwrap(), None);
        store.save(tenant, b"{\"a\":1}".to_vec()).await.unwrap();
        assert_eq!(store.load(tenant).await.unwrap(), Some(b"{\"a\":1}".to_vec()));

        // overwrite, and no temp file left behind
        store.save(tenant, b"2".to_vec()).await.unwrap();
        assert_eq!(store.load(tenant).await.unwrap(), Some(b"2".to_vec()));
        assert!(!temp_dir.path().join("snapshots").join("42.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_memory_records_saves() {
        let store = MemorySnapshotStore::new();
        store.save(TenantId(1), vec![1]).await.unwrap();
        store.save(TenantId(2), vec![2]).await.unwrap();
        store.save(TenantId(1), vec![3]).await.unwrap();
        assert_eq!(store.save_log().await, vec![TenantId(1), TenantId(2), TenantId(1)]);
        assert_eq!(store.load(TenantId(1)).await.unwrap(), Some(vec![3]));
        assert!(!store.contains(TenantId(3)).await);
    }
}
