//! In-memory query store shared by queries and mutations.
//!
//! Every write goes through `QueryStore` so that pending snapshots, versions
//! and subscriber notifications stay consistent. Optimistic writes are
//! grouped: all keys touched by one mutation are written under a single lock
//! and their events are sent only after the lock is released.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use super::traits::QueryKey;

/// Identifier handed out to each optimistic mutation.
pub type MutationId = u64;

/// A speculative transform from the current cached value to the optimistic
/// one. Returning `None` leaves the key untouched.
pub(crate) type Transform =
  Box<dyn FnOnce(Option<&Value>) -> serde_json::Result<Option<Value>> + Send>;

const EVENT_CAPACITY: usize = 256;

/// What happens when a mutation targets a key that already has one in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
  /// Last write wins. The newer mutation takes over the key's snapshot and
  /// inherits its baseline.
  #[default]
  Supersede,
  /// Refuse the newer mutation before it writes anything.
  Reject,
}

/// Where the current value of an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
  Server,
  Optimistic,
}

/// A cached value with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
  pub value: Value,
  /// Store-wide monotonic write counter
  pub version: u64,
  pub updated_at: DateTime<Utc>,
  pub origin: EntryOrigin,
  /// Marked for refetch
  pub invalidated: bool,
}

/// Kind of change announced to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
  /// A new value was written
  Written { version: u64, origin: EntryOrigin },
  /// A snapshot was written back after a failed mutation
  Restored { version: u64 },
  /// The entry was marked for refetch
  Invalidated,
  /// The entry no longer exists
  Removed,
}

/// Notification sent to every subscriber after a change is applied.
#[derive(Debug, Clone)]
pub struct CacheEvent<K> {
  pub key: K,
  pub change: Change,
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("cache lock poisoned")]
  Poisoned,
  #[error("failed to convert cached value for {key}: {source}")]
  Serde {
    key: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("{key} already has a mutation in flight")]
  Conflict { key: String },
}

/// Snapshot retained while a key has speculative data in it.
#[derive(Debug)]
struct PendingSlot {
  /// Most recent mutation that wrote this key
  owner: MutationId,
  /// Last known-good entry (None when the key was absent)
  baseline: Option<Entry>,
}

#[derive(Debug)]
struct Inner<K> {
  entries: HashMap<K, Entry>,
  pending: HashMap<K, PendingSlot>,
  next_version: u64,
  next_mutation: MutationId,
}

impl<K: QueryKey> Inner<K> {
  fn bump_version(&mut self) -> u64 {
    self.next_version += 1;
    self.next_version
  }

  fn server_entry(&mut self, value: Value) -> Entry {
    Entry {
      value,
      version: self.bump_version(),
      updated_at: Utc::now(),
      origin: EntryOrigin::Server,
      invalidated: false,
    }
  }
}

/// Result of starting a mutation: its id and the values it wrote.
#[derive(Debug, Clone)]
pub(crate) struct Begun<K> {
  pub id: MutationId,
  pub written: Vec<(K, Value)>,
}

/// Shared, clonable handle to the process-wide query cache.
pub struct QueryStore<K: QueryKey> {
  inner: Arc<Mutex<Inner<K>>>,
  events: broadcast::Sender<CacheEvent<K>>,
  policy: ConflictPolicy,
}

impl<K: QueryKey> QueryStore<K> {
  /// Create an empty store with the default conflict policy.
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      inner: Arc::new(Mutex::new(Inner {
        entries: HashMap::new(),
        pending: HashMap::new(),
        next_version: 0,
        next_mutation: 0,
      })),
      events,
      policy: ConflictPolicy::default(),
    }
  }

  /// Set the policy for mutations racing on the same key.
  pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn policy(&self) -> ConflictPolicy {
    self.policy
  }

  /// Subscribe to change notifications for every key.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<K>> {
    self.events.subscribe()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Inner<K>>, StoreError> {
    self.inner.lock().map_err(|_| StoreError::Poisoned)
  }

  // begin stages every transform before writing, so a panic under the lock
  // leaves entries and slots consistent
  fn lock_for_release(&self) -> MutexGuard<'_, Inner<K>> {
    self.inner.lock().unwrap_or_else(|poisoned| {
      warn!("cache lock poisoned, recovering to release snapshots");
      self.inner.clear_poison();
      poisoned.into_inner()
    })
  }

  fn notify(&self, events: Vec<CacheEvent<K>>) {
    for event in events {
      trace!(key = %event.key.description(), change = ?event.change, "cache event");
      // No subscribers is fine
      let _ = self.events.send(event);
    }
  }

  /// Get a copy of the entry for a key.
  pub fn entry(&self, key: &K) -> Result<Option<Entry>, StoreError> {
    Ok(self.lock()?.entries.get(key).cloned())
  }

  /// Get the typed value for a key.
  pub fn get<T: DeserializeOwned>(&self, key: &K) -> Result<Option<T>, StoreError> {
    match self.entry(key)? {
      Some(entry) => serde_json::from_value(entry.value)
        .map(Some)
        .map_err(|source| StoreError::Serde {
          key: key.description(),
          source,
        }),
      None => Ok(None),
    }
  }

  /// Store a server-confirmed value.
  ///
  /// While a mutation is in flight on the key the value only replaces the
  /// snapshot baseline, so the speculative value stays visible and a later
  /// rollback restores the newest known-good data.
  pub fn set_server<T: Serialize>(&self, key: &K, value: &T) -> Result<(), StoreError> {
    let value = serde_json::to_value(value).map_err(|source| StoreError::Serde {
      key: key.description(),
      source,
    })?;
    self.set_server_value(key, value)
  }

  pub(crate) fn set_server_value(&self, key: &K, value: Value) -> Result<(), StoreError> {
    let mut events = Vec::new();
    {
      let mut inner = self.lock()?;
      let entry = inner.server_entry(value);
      if let Some(slot) = inner.pending.get_mut(key) {
        debug!(key = %key.description(), "server data arrived during mutation, updating baseline");
        slot.baseline = Some(entry);
      } else {
        events.push(CacheEvent {
          key: key.clone(),
          change: Change::Written {
            version: entry.version,
            origin: EntryOrigin::Server,
          },
        });
        inner.entries.insert(key.clone(), entry);
      }
    }
    self.notify(events);
    Ok(())
  }

  /// Seed a missing entry with persisted data, keeping its original timestamp.
  ///
  /// Returns false (and writes nothing) when the key already has an entry.
  pub(crate) fn hydrate(
    &self,
    key: &K,
    value: Value,
    cached_at: DateTime<Utc>,
  ) -> Result<bool, StoreError> {
    let version = {
      let mut inner = self.lock()?;
      if inner.entries.contains_key(key) || inner.pending.contains_key(key) {
        return Ok(false);
      }
      let mut entry = inner.server_entry(value);
      entry.updated_at = cached_at;
      let version = entry.version;
      inner.entries.insert(key.clone(), entry);
      version
    };
    self.notify(vec![CacheEvent {
      key: key.clone(),
      change: Change::Written {
        version,
        origin: EntryOrigin::Server,
      },
    }]);
    Ok(true)
  }

  /// Drop a key from the cache. Returns whether an entry existed.
  pub fn remove(&self, key: &K) -> Result<bool, StoreError> {
    let existed = self.lock()?.entries.remove(key).is_some();
    if existed {
      self.notify(vec![CacheEvent {
        key: key.clone(),
        change: Change::Removed,
      }]);
    }
    Ok(existed)
  }

  /// Mark a key for refetch. Returns whether an entry existed.
  pub fn invalidate(&self, key: &K) -> Result<bool, StoreError> {
    let existed = match self.lock()?.entries.get_mut(key) {
      Some(entry) => {
        entry.invalidated = true;
        true
      }
      None => false,
    };
    if existed {
      self.notify(vec![CacheEvent {
        key: key.clone(),
        change: Change::Invalidated,
      }]);
    }
    Ok(existed)
  }

  pub fn is_invalidated(&self, key: &K) -> Result<bool, StoreError> {
    Ok(
      self
        .lock()?
        .entries
        .get(key)
        .map(|e| e.invalidated)
        .unwrap_or(false),
    )
  }

  /// Whether a mutation currently holds a snapshot for the key.
  pub fn has_pending(&self, key: &K) -> Result<bool, StoreError> {
    Ok(self.lock()?.pending.contains_key(key))
  }

  /// Number of keys with a retained snapshot.
  pub fn pending_count(&self) -> Result<usize, StoreError> {
    Ok(self.lock()?.pending.len())
  }

  /// Start a mutation: snapshot every target and write the optimistic values.
  ///
  /// Transforms run in order against a staged view, so a key targeted twice
  /// sees its own earlier output. Nothing is written if any transform fails or
  /// the conflict policy rejects a key.
  pub(crate) fn begin(&self, targets: Vec<(K, Transform)>) -> Result<Begun<K>, StoreError> {
    let mut events = Vec::new();
    let begun = {
      let mut inner = self.lock()?;

      if self.policy == ConflictPolicy::Reject {
        if let Some((key, _)) = targets.iter().find(|(k, _)| inner.pending.contains_key(k)) {
          return Err(StoreError::Conflict {
            key: key.description(),
          });
        }
      }

      let mut staged: Vec<(K, Value)> = Vec::with_capacity(targets.len());
      for (key, transform) in targets {
        let current = staged
          .iter()
          .find(|(k, _)| *k == key)
          .map(|(_, v)| v)
          .or_else(|| inner.entries.get(&key).map(|e| &e.value));
        let next = transform(current).map_err(|source| StoreError::Serde {
          key: key.description(),
          source,
        })?;
        let Some(next) = next else {
          continue;
        };
        match staged.iter_mut().find(|(k, _)| *k == key) {
          Some(slot) => slot.1 = next,
          None => staged.push((key, next)),
        }
      }

      inner.next_mutation += 1;
      let id = inner.next_mutation;

      for (key, value) in &staged {
        let baseline = inner.entries.get(key).cloned();
        match inner.pending.get_mut(key) {
          Some(slot) => {
            debug!(key = %key.description(), previous = slot.owner, mutation = id, "superseding in-flight mutation");
            slot.owner = id;
          }
          None => {
            inner.pending.insert(key.clone(), PendingSlot { owner: id, baseline });
          }
        }
        let version = inner.bump_version();
        inner.entries.insert(
          key.clone(),
          Entry {
            value: value.clone(),
            version,
            updated_at: Utc::now(),
            origin: EntryOrigin::Optimistic,
            invalidated: false,
          },
        );
        events.push(CacheEvent {
          key: key.clone(),
          change: Change::Written {
            version,
            origin: EntryOrigin::Optimistic,
          },
        });
      }

      Begun { id, written: staged }
    };
    self.notify(events);
    Ok(begun)
  }

  /// Settle a mutation whose remote call succeeded.
  ///
  /// `confirmed` holds server data to merge; keys written optimistically
  /// without confirmed data keep their speculative value, now accepted.
  /// Every touched key plus `invalidate` is marked for refetch.
  pub(crate) fn commit(
    &self,
    id: MutationId,
    written: &[(K, Value)],
    confirmed: Vec<(K, Value)>,
    invalidate: &[K],
  ) -> Result<(), StoreError> {
    let mut accepted: Vec<(K, Value)> = written.to_vec();
    for (key, value) in confirmed {
      match accepted.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => accepted.push((key, value)),
      }
    }

    let mut events = Vec::new();
    {
      let mut inner = self.lock()?;
      for (key, value) in accepted.iter() {
        let owner = inner.pending.get(key).map(|slot| slot.owner);
        let entry = inner.server_entry(value.clone());
        match owner {
          Some(owner) if owner != id => {
            // A newer mutation owns the key; its rollback must land on our result
            if let Some(slot) = inner.pending.get_mut(key) {
              slot.baseline = Some(entry);
            }
          }
          owned => {
            if owned.is_some() {
              inner.pending.remove(key);
            }
            events.push(CacheEvent {
              key: key.clone(),
              change: Change::Written {
                version: entry.version,
                origin: EntryOrigin::Server,
              },
            });
            inner.entries.insert(key.clone(), entry);
          }
        }
      }

      let stale = accepted.iter().map(|(k, _)| k).chain(invalidate.iter());
      for key in stale {
        if let Some(entry) = inner.entries.get_mut(key) {
          if !entry.invalidated {
            entry.invalidated = true;
            events.push(CacheEvent {
              key: key.clone(),
              change: Change::Invalidated,
            });
          }
        }
      }
    }
    self.notify(events);
    Ok(())
  }

  /// Settle a failed mutation: restore snapshots it still owns.
  ///
  /// Keys taken over by a newer mutation are left untouched. Returns the
  /// number of keys restored. Works on a poisoned store too, so pending keys
  /// are never stranded.
  pub(crate) fn rollback(&self, id: MutationId, keys: &[K]) -> usize {
    let mut events = Vec::new();
    {
      let mut inner = self.lock_for_release();
      for key in keys {
        let owned = matches!(inner.pending.get(key), Some(slot) if slot.owner == id);
        if !owned {
          debug!(key = %key.description(), mutation = id, "snapshot superseded, skipping restore");
          continue;
        }
        let Some(slot) = inner.pending.remove(key) else {
          continue;
        };
        match slot.baseline {
          Some(mut entry) => {
            entry.version = inner.bump_version();
            events.push(CacheEvent {
              key: key.clone(),
              change: Change::Restored {
                version: entry.version,
              },
            });
            inner.entries.insert(key.clone(), entry);
          }
          None => {
            inner.entries.remove(key);
            events.push(CacheEvent {
              key: key.clone(),
              change: Change::Removed,
            });
          }
        }
      }
    }
    let restored = events.len();
    self.notify(events);
    restored
  }
}

impl<K: QueryKey> Default for QueryStore<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K: QueryKey> Clone for QueryStore<K> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      events: self.events.clone(),
      policy: self.policy,
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use serde_json::json;

  #[derive(Debug, Clone, PartialEq, Eq, Hash)]
  pub(crate) enum TestKey {
    Flag(u32),
    List,
  }

  impl QueryKey for TestKey {
    fn canonical(&self) -> String {
      match self {
        Self::Flag(id) => format!("flag:{}", id),
        Self::List => "list".to_string(),
      }
    }

    fn description(&self) -> String {
      self.canonical()
    }
  }

  fn set_to(value: Value) -> Transform {
    Box::new(move |_: Option<&Value>| Ok::<_, serde_json::Error>(Some(value)))
  }

  /// Panic on another thread while it holds the store lock.
  pub(crate) fn poison<K: QueryKey>(store: &QueryStore<K>) {
    let inner = Arc::clone(&store.inner);
    let _ = std::thread::spawn(move || {
      let _guard = inner.lock();
      panic!("panicked while holding the cache lock");
    })
    .join();
  }

  fn increment() -> Transform {
    Box::new(|cur: Option<&Value>| {
      let n = cur.and_then(Value::as_i64).unwrap_or(0);
      Ok::<_, serde_json::Error>(Some(json!(n + 1)))
    })
  }

  #[test]
  fn test_set_and_get_typed() {
    let store = QueryStore::new();
    store.set_server(&TestKey::Flag(1), &true).unwrap();

    assert_eq!(store.get::<bool>(&TestKey::Flag(1)).unwrap(), Some(true));
    assert_eq!(store.get::<bool>(&TestKey::Flag(2)).unwrap(), None);
  }

  #[test]
  fn test_get_wrong_type_is_serde_error() {
    let store = QueryStore::new();
    store.set_server(&TestKey::Flag(1), &"yes").unwrap();

    let err = store.get::<bool>(&TestKey::Flag(1)).unwrap_err();
    assert!(matches!(err, StoreError::Serde { .. }));
  }

  #[test]
  fn test_invalidate_and_remove() {
    let store = QueryStore::new();
    assert!(!store.invalidate(&TestKey::List).unwrap());

    store.set_server(&TestKey::List, &vec![1, 2]).unwrap();
    assert!(store.invalidate(&TestKey::List).unwrap());
    assert!(store.is_invalidated(&TestKey::List).unwrap());

    // A fresh server write clears the flag
    store.set_server(&TestKey::List, &vec![1, 2, 3]).unwrap();
    assert!(!store.is_invalidated(&TestKey::List).unwrap());

    assert!(store.remove(&TestKey::List).unwrap());
    assert_eq!(store.entry(&TestKey::List).unwrap(), None);
  }

  #[test]
  fn test_begin_writes_all_targets_and_snapshots() {
    let store = QueryStore::new();
    store.set_server(&TestKey::Flag(1), &false).unwrap();

    let begun = store
      .begin(vec![
        (TestKey::Flag(1), set_to(json!(true))),
        (TestKey::Flag(2), set_to(json!(true))),
      ])
      .unwrap();

    assert_eq!(begun.written.len(), 2);
    assert_eq!(store.pending_count().unwrap(), 2);
    let entry = store.entry(&TestKey::Flag(1)).unwrap().unwrap();
    assert_eq!(entry.value, json!(true));
    assert_eq!(entry.origin, EntryOrigin::Optimistic);
  }

  #[test]
  fn test_begin_failed_transform_writes_nothing() {
    let store = QueryStore::new();
    store.set_server(&TestKey::Flag(1), &false).unwrap();

    let bad: Transform =
      Box::new(|_: Option<&Value>| serde_json::from_str::<Value>("not json").map(Some));
    let err = store
      .begin(vec![(TestKey::Flag(1), set_to(json!(true))), (TestKey::Flag(2), bad)])
      .unwrap_err();

    assert!(matches!(err, StoreError::Serde { .. }));
    assert_eq!(store.get::<bool>(&TestKey::Flag(1)).unwrap(), Some(false));
    assert_eq!(store.pending_count().unwrap(), 0);
  }

  #[test]
  fn test_same_key_twice_chains_transforms() {
    let store = QueryStore::new();
    store.set_server(&TestKey::Flag(1), &1).unwrap();

    let begun = store
      .begin(vec![(TestKey::Flag(1), increment()), (TestKey::Flag(1), increment())])
      .unwrap();

    assert_eq!(begun.written, vec![(TestKey::Flag(1), json!(3))]);
    store.rollback(begun.id, &[TestKey::Flag(1)]);
    assert_eq!(store.get::<i64>(&TestKey::Flag(1)).unwrap(), Some(1));
  }

  #[test]
  fn test_skipped_transform_takes_no_snapshot() {
    let store = QueryStore::new();
    let skip: Transform = Box::new(|_: Option<&Value>| Ok::<_, serde_json::Error>(None));
    let begun = store
      .begin(vec![(TestKey::Flag(1), skip), (TestKey::Flag(2), set_to(json!(1)))])
      .unwrap();

    assert_eq!(begun.written, vec![(TestKey::Flag(2), json!(1))]);
    assert!(!store.has_pending(&TestKey::Flag(1)).unwrap());
    assert_eq!(store.entry(&TestKey::Flag(1)).unwrap(), None);
  }

  #[test]
  fn test_rollback_restores_absent_key() {
    let store = QueryStore::new();
    let begun = store
      .begin(vec![(TestKey::Flag(9), set_to(json!(true)))])
      .unwrap();

    assert_eq!(store.rollback(begun.id, &[TestKey::Flag(9)]), 1);
    assert_eq!(store.entry(&TestKey::Flag(9)).unwrap(), None);
    assert_eq!(store.pending_count().unwrap(), 0);
  }

  #[test]
  fn test_rollback_releases_snapshots_on_poisoned_store() {
    let store = QueryStore::new();
    store.set_server(&TestKey::Flag(1), &1).unwrap();
    let begun = store.begin(vec![(TestKey::Flag(1), increment())]).unwrap();

    poison(&store);
    let err = store
      .commit(begun.id, &begun.written, Vec::new(), &[])
      .unwrap_err();
    assert!(matches!(err, StoreError::Poisoned));

    assert_eq!(store.rollback(begun.id, &[TestKey::Flag(1)]), 1);
    assert_eq!(store.pending_count().unwrap(), 0);
    assert_eq!(store.get::<i64>(&TestKey::Flag(1)).unwrap(), Some(1));
  }

  #[test]
  fn test_rollback_restores_entry_verbatim() {
    let store = QueryStore::new();
    store.set_server(&TestKey::List, &vec![1]).unwrap();
    store.invalidate(&TestKey::List).unwrap();
    let before = store.entry(&TestKey::List).unwrap().unwrap();

    let begun = store.begin(vec![(TestKey::List, set_to(json!([])))]).unwrap();
    store.rollback(begun.id, &[TestKey::List]);

    let after = store.entry(&TestKey::List).unwrap().unwrap();
    assert_eq!(after.value, before.value);
    assert_eq!(after.origin, before.origin);
    assert_eq!(after.updated_at, before.updated_at);
    assert!(after.invalidated);
    assert!(after.version > before.version);
  }

  #[test]
  fn test_commit_discards_snapshot_and_invalidates() {
    let store = QueryStore::new();
    store.set_server(&TestKey::Flag(1), &false).unwrap();
    store.set_server(&TestKey::List, &vec![1]).unwrap();

    let begun = store
      .begin(vec![(TestKey::Flag(1), set_to(json!(true)))])
      .unwrap();
    store
      .commit(begun.id, &begun.written, Vec::new(), &[TestKey::List])
      .unwrap();

    assert_eq!(store.pending_count().unwrap(), 0);
    let entry = store.entry(&TestKey::Flag(1)).unwrap().unwrap();
    assert_eq!(entry.value, json!(true));
    assert_eq!(entry.origin, EntryOrigin::Server);
    assert!(entry.invalidated);
    assert!(store.is_invalidated(&TestKey::List).unwrap());
  }

  #[test]
  fn test_commit_merges_confirmed_values() {
    let store = QueryStore::new();
    let begun = store
      .begin(vec![(TestKey::Flag(1), set_to(json!("guess")))])
      .unwrap();
    store
      .commit(
        begun.id,
        &begun.written,
        vec![(TestKey::Flag(1), json!("server")), (TestKey::List, json!([7]))],
        &[],
      )
      .unwrap();

    assert_eq!(
      store.get::<String>(&TestKey::Flag(1)).unwrap().as_deref(),
      Some("server")
    );
    assert_eq!(store.get::<Vec<i32>>(&TestKey::List).unwrap(), Some(vec![7]));
  }

  #[test]
  fn test_supersede_inherits_baseline() {
    let store = QueryStore::new();
    store.set_server(&TestKey::Flag(1), &0).unwrap();

    let first = store.begin(vec![(TestKey::Flag(1), set_to(json!(1)))]).unwrap();
    let second = store.begin(vec![(TestKey::Flag(1), set_to(json!(2)))]).unwrap();
    assert_eq!(store.pending_count().unwrap(), 1);

    // The superseded mutation fails: the newer speculation stays visible
    assert_eq!(store.rollback(first.id, &[TestKey::Flag(1)]), 0);
    assert_eq!(store.get::<i64>(&TestKey::Flag(1)).unwrap(), Some(2));

    // The owner fails: back to the value from before either mutation
    assert_eq!(store.rollback(second.id, &[TestKey::Flag(1)]), 1);
    assert_eq!(store.get::<i64>(&TestKey::Flag(1)).unwrap(), Some(0));
    assert_eq!(store.pending_count().unwrap(), 0);
  }

  #[test]
  fn test_superseded_commit_advances_baseline() {
    let store = QueryStore::new();
    store.set_server(&TestKey::Flag(1), &0).unwrap();

    let first = store.begin(vec![(TestKey::Flag(1), set_to(json!(1)))]).unwrap();
    let second = store.begin(vec![(TestKey::Flag(1), set_to(json!(2)))]).unwrap();

    store
      .commit(first.id, &first.written, Vec::new(), &[])
      .unwrap();
    assert_eq!(store.get::<i64>(&TestKey::Flag(1)).unwrap(), Some(2));

    store.rollback(second.id, &[TestKey::Flag(1)]);
    assert_eq!(store.get::<i64>(&TestKey::Flag(1)).unwrap(), Some(1));
  }

  #[test]
  fn test_reject_policy_refuses_second_mutation() {
    let store = QueryStore::new().with_policy(ConflictPolicy::Reject);
    store.set_server(&TestKey::Flag(1), &0).unwrap();

    let first = store.begin(vec![(TestKey::Flag(1), set_to(json!(1)))]).unwrap();
    let err = store
      .begin(vec![
        (TestKey::Flag(2), set_to(json!(5))),
        (TestKey::Flag(1), set_to(json!(2))),
      ])
      .unwrap_err();

    assert!(matches!(err, StoreError::Conflict { .. }));
    assert_eq!(store.get::<i64>(&TestKey::Flag(1)).unwrap(), Some(1));
    assert_eq!(store.entry(&TestKey::Flag(2)).unwrap(), None);

    store.rollback(first.id, &[TestKey::Flag(1)]);
    assert_eq!(store.get::<i64>(&TestKey::Flag(1)).unwrap(), Some(0));
  }

  #[test]
  fn test_server_write_during_mutation_updates_baseline() {
    let store = QueryStore::new();
    store.set_server(&TestKey::Flag(1), &0).unwrap();

    let begun = store.begin(vec![(TestKey::Flag(1), set_to(json!(1)))]).unwrap();
    store.set_server(&TestKey::Flag(1), &5).unwrap();
    assert_eq!(store.get::<i64>(&TestKey::Flag(1)).unwrap(), Some(1));

    store.rollback(begun.id, &[TestKey::Flag(1)]);
    assert_eq!(store.get::<i64>(&TestKey::Flag(1)).unwrap(), Some(5));
  }

  #[tokio::test]
  async fn test_subscribers_see_batch_after_write() {
    let store = QueryStore::new();
    let mut rx = store.subscribe();

    store
      .begin(vec![
        (TestKey::Flag(1), set_to(json!(true))),
        (TestKey::Flag(2), set_to(json!(true))),
      ])
      .unwrap();

    for expected in [TestKey::Flag(1), TestKey::Flag(2)] {
      let event = rx.recv().await.unwrap();
      assert_eq!(event.key, expected);
      assert!(matches!(
        event.change,
        Change::Written {
          origin: EntryOrigin::Optimistic,
          ..
        }
      ));
      // Every key of the batch is already visible when the first event lands
      assert!(store.entry(&TestKey::Flag(2)).unwrap().is_some());
    }
  }
}
