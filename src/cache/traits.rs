//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::hash::Hash;

/// Identity of a piece of server-derived data held in the cache.
///
/// Implementors are usually small enums (resource type + id). The store keys
/// its in-memory map by the value itself; persistent storage uses
/// `cache_hash()`.
pub trait QueryKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {
  /// Stable, fixed-length key for persistent storage.
  fn cache_hash(&self) -> String {
    hash_key(&self.canonical())
  }

  /// Canonical string form the hash is computed from (e.g. "schedules:123").
  fn canonical(&self) -> String;

  /// Human readable description, used in logs and error messages.
  fn description(&self) -> String;
}

/// SHA256 hex digest of a canonical key string.
pub fn hash_key(input: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Create a result holding a speculative value from an in-flight mutation.
  pub fn optimistic(data: T, written_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Optimistic,
      cached_at: Some(written_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, considered stale but network fetch in progress or failed
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
  /// Speculative value written by a mutation that has not settled yet
  Optimistic,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_hash_key_is_stable_hex() {
    let a = hash_key("schedules:1");
    let b = hash_key("schedules:1");
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert_ne!(a, hash_key("schedules:2"));
  }

  #[test]
  fn test_from_cache_marks_staleness() {
    let now = Utc::now();
    assert_eq!(
      CacheResult::from_cache(1, now, false).source,
      CacheSource::CacheFresh
    );
    assert_eq!(
      CacheResult::from_cache(1, now, true).source,
      CacheSource::CacheStale
    );
  }
}
