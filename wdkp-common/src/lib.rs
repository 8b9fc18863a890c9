//! # WDKP Common Library
//!
//! Shared code for the WDKP bot:
//! - Lua-literal addon dump parser
//! - Standings, loot and history entity model
//! - Per-tenant indexed store with snapshots
//! - Staged ingestion pipeline with per-addon strategies
//! - LRU residency manager over pluggable snapshot storage
//! - Configuration loading

pub mod config;
pub mod error;
pub mod ingest;
pub mod lua;
pub mod model;
pub mod residency;
pub mod roles;
pub mod snapshot;
pub mod store;
pub mod time;

pub use error::{Error, Result};
pub use ingest::{AddonVariant, BuildError, BuildReport, IngestEvent, IngestSettings, Ingestor};
pub use residency::{ResidencyError, ResidencyManager, TenantHandle, TenantId};
pub use snapshot::{FsSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use store::{StoreError, TenantStore, UploadMetadata};
