//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::store::QueryStore;
use super::traits::{CacheResult, QueryKey};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the network client,
/// providing transparent caching with offline support. Mutations share the
/// same `QueryStore`, so reads made while a mutation is in flight see the
/// optimistic value.
pub struct CacheLayer<K: QueryKey, S: CacheStorage> {
  store: QueryStore<K>,
  storage: Arc<S>,
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl<K: QueryKey, S: CacheStorage> CacheLayer<K, S> {
  /// Create a new cache layer over the given store and storage backend.
  pub fn new(store: QueryStore<K>, storage: S) -> Self {
    Self {
      store,
      storage: Arc::new(storage),
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// The shared in-memory store.
  pub fn store(&self) -> &QueryStore<K> {
    &self.store
  }

  /// Check if cached data is stale based on cached_at timestamp.
  fn is_stale(&self, cached_at: DateTime<Utc>) -> bool {
    Utc::now() - cached_at > self.stale_time
  }

  /// Fetch a value with cache-first strategy.
  ///
  /// 1. A mutation is in flight on the key - return the optimistic value
  /// 2. Fresh, valid cache (memory, then disk) - return immediately
  /// 3. Otherwise fetch from network and update both caches
  /// 4. On network failure, return whatever is cached (offline mode)
  pub async fn fetch<T, F, Fut>(&self, key: &K, fetcher: F) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if let Some(result) = self.optimistic_value(key)? {
      return Ok(result);
    }

    let key_hash = key.cache_hash();

    if let Some(entry) = self.store.entry(key)? {
      if !entry.invalidated && !self.is_stale(entry.updated_at) {
        return Ok(CacheResult::from_cache(
          decode(key, entry.value)?,
          entry.updated_at,
          false,
        ));
      }
    } else if let Some(persisted) = self.storage.load(&key_hash)? {
      // Seed memory from disk so offline fallback and subscribers see it
      self
        .store
        .hydrate(key, persisted.value.clone(), persisted.cached_at)?;
      if !self.is_stale(persisted.cached_at) {
        debug!(key = %key.description(), "serving persisted cache");
        return Ok(CacheResult::from_cache(
          decode(key, persisted.value)?,
          persisted.cached_at,
          false,
        ));
      }
    }

    match fetcher().await {
      Ok(data) => {
        let value = serde_json::to_value(&data)
          .map_err(|e| eyre!("Failed to encode {}: {}", key.description(), e))?;
        self.store.set_server_value(key, value.clone())?;
        self
          .storage
          .store(&key_hash, &key.description(), &value)?;

        // A mutation may have started while we were waiting on the network
        if let Some(result) = self.optimistic_value(key)? {
          return Ok(result);
        }
        Ok(CacheResult::from_network(data))
      }
      Err(err) => match self.store.entry(key)? {
        Some(entry) => {
          warn!(key = %key.description(), error = %err, "fetch failed, serving cached data");
          Ok(CacheResult::offline(
            decode(key, entry.value)?,
            entry.updated_at,
          ))
        }
        None => Err(err),
      },
    }
  }

  /// Mark a key for refetch on the next `fetch`.
  pub fn invalidate(&self, key: &K) -> Result<bool> {
    Ok(self.store.invalidate(key)?)
  }

  fn optimistic_value<T: DeserializeOwned>(&self, key: &K) -> Result<Option<CacheResult<T>>> {
    if !self.store.has_pending(key)? {
      return Ok(None);
    }
    match self.store.entry(key)? {
      Some(entry) => Ok(Some(CacheResult::optimistic(
        decode(key, entry.value)?,
        entry.updated_at,
      ))),
      None => Ok(None),
    }
  }
}

fn decode<K: QueryKey, T: DeserializeOwned>(key: &K, value: Value) -> Result<T> {
  serde_json::from_value(value).map_err(|e| eyre!("Failed to decode {}: {}", key.description(), e))
}

impl<K: QueryKey, S: CacheStorage> Clone for CacheLayer<K, S> {
  fn clone(&self) -> Self {
    Self {
      store: self.store.clone(),
      storage: Arc::clone(&self.storage),
      stale_time: self.stale_time,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::store::tests::TestKey;
  use crate::cache::store::Transform;
  use crate::cache::{CacheSource, NoopStorage, SqliteStorage};
  use std::sync::atomic::{AtomicU32, Ordering};

  fn layer() -> CacheLayer<TestKey, SqliteStorage> {
    CacheLayer::new(QueryStore::new(), SqliteStorage::in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_fetch_miss_goes_to_network_then_hits_cache() {
    let layer = layer();
    let calls = AtomicU32::new(0);

    for expected in [CacheSource::Network, CacheSource::CacheFresh] {
      let result = layer
        .fetch(&TestKey::List, || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok::<_, color_eyre::Report>(vec![1, 2, 3])
        })
        .await
        .unwrap();
      assert_eq!(result.source, expected);
      assert_eq!(result.data, vec![1, 2, 3]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_invalidated_entry_is_refetched() {
    let layer = layer();
    layer
      .fetch(&TestKey::List, || async { Ok::<_, color_eyre::Report>(vec![1]) })
      .await
      .unwrap();
    layer.invalidate(&TestKey::List).unwrap();

    let result = layer
      .fetch(&TestKey::List, || async { Ok::<_, color_eyre::Report>(vec![1, 2]) })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, vec![1, 2]);
    assert!(!layer.store().is_invalidated(&TestKey::List).unwrap());
  }

  #[tokio::test]
  async fn test_network_failure_serves_offline() {
    let layer = layer().with_stale_time(Duration::hours(1));
    layer
      .fetch(&TestKey::Flag(1), || async { Ok::<_, color_eyre::Report>(true) })
      .await
      .unwrap();
    layer.invalidate(&TestKey::Flag(1)).unwrap();

    let result = layer
      .fetch(&TestKey::Flag(1), || async {
        Err::<bool, _>(eyre!("connection refused"))
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert!(result.data);
  }

  #[tokio::test]
  async fn test_network_failure_without_cache_errors() {
    let layer = CacheLayer::new(QueryStore::<TestKey>::new(), NoopStorage);
    let result = layer
      .fetch(&TestKey::Flag(1), || async { Err::<bool, _>(eyre!("down")) })
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_persisted_value_hydrates_new_store() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage
      .store(&TestKey::List.cache_hash(), "list", &serde_json::json!([4, 5]))
      .unwrap();
    let layer = CacheLayer::new(QueryStore::new(), storage);

    let result = layer
      .fetch(&TestKey::List, || async { Ok::<_, color_eyre::Report>(vec![0]) })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.data, vec![4, 5]);
    assert_eq!(
      layer.store().get::<Vec<i32>>(&TestKey::List).unwrap(),
      Some(vec![4, 5])
    );
  }

  #[tokio::test]
  async fn test_pending_mutation_skips_fetch() {
    let layer = layer();
    layer
      .fetch(&TestKey::Flag(1), || async { Ok::<_, color_eyre::Report>(false) })
      .await
      .unwrap();
    let to_true: Transform =
      Box::new(|_: Option<&Value>| Ok::<_, serde_json::Error>(Some(Value::Bool(true))));
    let begun = layer
      .store()
      .begin(vec![(TestKey::Flag(1), to_true)])
      .unwrap();
    layer.invalidate(&TestKey::Flag(1)).unwrap();

    // A fetch attempt would fall back to Offline, not Optimistic
    let result = layer
      .fetch(&TestKey::Flag(1), || async {
        Err::<bool, _>(eyre!("must not fetch while a mutation is in flight"))
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Optimistic);
    assert!(result.data);

    layer.store().rollback(begun.id, &[TestKey::Flag(1)]);
  }
}
