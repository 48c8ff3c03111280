//! Generic query cache for server-derived data.
//!
//! This module is domain-agnostic:
//! - `QueryStore` holds the in-memory values, per-key snapshots for in-flight
//!   mutations, and broadcasts every change to subscribers
//! - `CacheLayer` adds read-through fetching with stale time and offline mode
//! - `SqliteStorage` persists last known-good server values across restarts

mod layer;
mod storage;
pub(crate) mod store;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, CachedEntity, NoopStorage, SqliteStorage};
pub use store::{
  CacheEvent, Change, ConflictPolicy, Entry, EntryOrigin, MutationId, QueryStore, StoreError,
};
pub use traits::{hash_key, CacheResult, CacheSource, QueryKey};
