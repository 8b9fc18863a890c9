//! Residency manager
//!
//! Keeps at most `capacity` tenant stores in memory. Tenants are tracked in
//! recency order of [`ResidencyManager::ensure_resident`] calls; bringing in a
//! new tenant at capacity evicts the least recently used one.
//!
//! # Eviction
//! 1. Take the victim's write lock (waits for in-flight readers and writers)
//! 2. Serialize and `save` the snapshot, awaiting completion
//! 3. Only then drop the in-memory copy and untrack the victim
//!
//! A failed save leaves the victim tracked and resident. Handles that outlive
//! an eviction observe [`ResidencyError::Evicted`] instead of stale data.
//!
//! # Locking
//! The tracker is one async mutex held for the whole of `ensure_resident`,
//! I/O included. Each store has its own `RwLock`, so work on different
//! tenants proceeds in parallel once residency is confirmed.

use crate::snapshot::{PersistenceError, SnapshotStore};
use crate::store::{StoreError, TenantStore};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, RwLockMappedWriteGuard, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Tenant identifier (guild id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub u64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(TenantId)
    }
}

/// Residency errors
#[derive(Debug, Error)]
pub enum ResidencyError {
    /// The injected save/load failed
    #[error("Persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    /// A snapshot could not be produced or restored
    #[error("Snapshot failure for tenant {tenant}: {source}")]
    Snapshot {
        tenant: TenantId,
        #[source]
        source: StoreError,
    },

    /// The handle's tenant was evicted after the handle was issued
    #[error("Tenant {0} is no longer resident")]
    Evicted(TenantId),
}

type Slot = Arc<RwLock<Option<TenantStore>>>;

/// Access to one resident tenant store
///
/// Cheap to clone. Valid until the tenant is evicted; after that every access
/// fails with [`ResidencyError::Evicted`] and the caller should go through
/// `ensure_resident` again.
#[derive(Debug, Clone)]
pub struct TenantHandle {
    tenant: TenantId,
    slot: Slot,
}

impl TenantHandle {
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    pub async fn read(&self) -> Result<RwLockReadGuard<'_, TenantStore>, ResidencyError> {
        RwLockReadGuard::try_map(self.slot.read().await, Option::as_ref)
            .map_err(|_| ResidencyError::Evicted(self.tenant))
    }

    pub async fn write(&self) -> Result<RwLockMappedWriteGuard<'_, TenantStore>, ResidencyError> {
        RwLockWriteGuard::try_map(self.slot.write().await, Option::as_mut)
            .map_err(|_| ResidencyError::Evicted(self.tenant))
    }
}

/// Bounded set of memory-resident tenant stores
pub struct ResidencyManager {
    capacity: NonZeroUsize,
    tracker: Mutex<LruCache<TenantId, Slot>>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl ResidencyManager {
    pub fn new(capacity: NonZeroUsize, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            capacity,
            tracker: Mutex::new(LruCache::new(capacity)),
            snapshots,
        }
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Make `tenant`'s store resident and mark it most recently used
    pub async fn ensure_resident(&self, tenant: TenantId) -> Result<TenantHandle, ResidencyError> {
        let mut tracker = self.tracker.lock().await;

        if let Some(slot) = tracker.get(&tenant) {
            debug!(tenant = %tenant, "Tenant already resident");
            return Ok(TenantHandle {
                tenant,
                slot: Arc::clone(slot),
            });
        }

        if tracker.len() >= self.capacity.get() {
            self.evict_lru(&mut tracker).await?;
        }

        let store = self.restore(tenant).await?;
        let slot: Slot = Arc::new(RwLock::new(Some(store)));
        let displaced = tracker.push(tenant, Arc::clone(&slot));
        debug_assert!(displaced.is_none(), "tracker overflowed capacity");
        debug_assert!(tracker.len() <= self.capacity.get());

        info!(
            tenant = %tenant,
            resident = tracker.len(),
            capacity = self.capacity.get(),
            "Tenant made resident"
        );
        Ok(TenantHandle { tenant, slot })
    }

    /// Tracked tenants, least recently used first
    pub async fn tracked(&self) -> Vec<TenantId> {
        self.tracker
            .lock()
            .await
            .iter()
            .rev()
            .map(|(tenant, _)| *tenant)
            .collect()
    }

    /// Whether `tenant` is resident, without touching recency
    pub async fn is_resident(&self, tenant: TenantId) -> bool {
        self.tracker.lock().await.contains(&tenant)
    }

    /// Save every resident store without releasing any of them
    ///
    /// For orderly shutdown; returns the number of snapshots written.
    pub async fn flush_all(&self) -> Result<usize, ResidencyError> {
        let tracker = self.tracker.lock().await;
        let mut saved = 0usize;
        for (tenant, slot) in tracker.iter() {
            let guard = slot.read().await;
            if let Some(store) = guard.as_ref() {
                self.save(*tenant, store).await?;
                saved += 1;
            }
        }
        info!(saved = saved, "Flushed resident tenants");
        Ok(saved)
    }

    async fn evict_lru(&self, tracker: &mut LruCache<TenantId, Slot>) -> Result<(), ResidencyError> {
        let Some((victim, slot)) = tracker
            .peek_lru()
            .map(|(tenant, slot)| (*tenant, Arc::clone(slot)))
        else {
            return Ok(());
        };

        let mut guard = slot.write().await;
        if let Some(store) = guard.as_ref() {
            if let Err(e) = self.save(victim, store).await {
                warn!(tenant = %victim, error = %e, "Eviction aborted, snapshot not saved");
                return Err(e);
            }
        }
        *guard = None;
        drop(guard);
        tracker.pop_lru();

        info!(tenant = %victim, "Tenant evicted");
        Ok(())
    }

    async fn save(&self, tenant: TenantId, store: &TenantStore) -> Result<(), ResidencyError> {
        let bytes = store
            .serialize_snapshot()
            .map_err(|source| ResidencyError::Snapshot { tenant, source })?;
        self.snapshots.save(tenant, bytes).await?;
        Ok(())
    }

    async fn restore(&self, tenant: TenantId) -> Result<TenantStore, ResidencyError> {
        match self.snapshots.load(tenant).await? {
            Some(bytes) => {
                let store = TenantStore::restore_snapshot(&bytes)
                    .map_err(|source| ResidencyError::Snapshot { tenant, source })?;
                debug!(tenant = %tenant, bytes = bytes.len(), "Restored tenant snapshot");
                Ok(store)
            }
            None => {
                debug!(tenant = %tenant, "No snapshot, starting empty store");
                Ok(TenantStore::new())
            }
        }
    }
}
