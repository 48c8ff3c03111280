//! Optimistic mutations: write first, ask the server second, undo on failure.
//!
//! ```ignore
//! let schedule = OptimisticMutation::new(&store)
//!   .optimistic(key.clone(), |current: Option<Vec<Schedule>>| {
//!     let mut list = current.unwrap_or_default();
//!     toggle(&mut list, &id);
//!     list
//!   })
//!   .run(async move { client.set_schedule_active(site, &id, active).await })
//!   .await?;
//! ```
//!
//! `start()` performs the snapshot and optimistic writes synchronously, so a
//! UI can render the speculative state before the request is even sent.
//! The returned `PendingMutation` rolls back if it is dropped unsettled.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, info, warn};

use super::error::MutationError;
use crate::cache::store::Transform;
use crate::cache::{MutationId, QueryKey, QueryStore, StoreError};

/// Builder for an optimistic mutation over one or more cache keys.
pub struct OptimisticMutation<K: QueryKey> {
  store: QueryStore<K>,
  targets: Vec<(K, Transform)>,
  invalidates: Vec<K>,
}

impl<K: QueryKey> OptimisticMutation<K> {
  pub fn new(store: &QueryStore<K>) -> Self {
    Self {
      store: store.clone(),
      targets: Vec::new(),
      invalidates: Vec::new(),
    }
  }

  /// Add a key with a pure transform from its current value (None when not
  /// cached) to the optimistic value.
  pub fn optimistic<T, F>(mut self, key: K, transform: F) -> Self
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce(Option<T>) -> T + Send + 'static,
  {
    let transform: Transform = Box::new(move |current: Option<&Value>| {
      let current = current
        .map(|v| serde_json::from_value::<T>(v.clone()))
        .transpose()?;
      serde_json::to_value(transform(current)).map(Some)
    });
    self.targets.push((key, transform));
    self
  }

  /// Like `optimistic`, but only for a key that is already cached. An absent
  /// key is left alone and gets no snapshot.
  pub fn update_cached<T, F>(mut self, key: K, transform: F) -> Self
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce(T) -> T + Send + 'static,
  {
    let transform: Transform = Box::new(move |current: Option<&Value>| match current {
      Some(v) => {
        let current = serde_json::from_value::<T>(v.clone())?;
        serde_json::to_value(transform(current)).map(Some)
      }
      None => Ok(None),
    });
    self.targets.push((key, transform));
    self
  }

  /// Also mark `key` for refetch when the mutation commits.
  pub fn invalidates(mut self, key: K) -> Self {
    self.invalidates.push(key);
    self
  }

  /// Snapshot every target and write the optimistic values.
  pub fn start(self) -> Result<PendingMutation<K>, StoreError> {
    let begun = self.store.begin(self.targets)?;
    debug!(
      mutation = begun.id,
      keys = begun.written.len(),
      "optimistic values written"
    );
    Ok(PendingMutation {
      store: self.store,
      id: begun.id,
      written: begun.written,
      invalidates: self.invalidates,
      armed: true,
    })
  }

  /// Start the mutation and settle it with the remote operation.
  pub async fn run<R, E, Fut>(self, remote: Fut) -> Result<R, MutationError<E>>
  where
    Fut: Future<Output = Result<R, E>>,
  {
    self.start()?.settle(remote).await
  }

  /// Like `run`, merging server-confirmed data into the cache on success.
  pub async fn run_and_merge<R, E, Fut, M>(self, remote: Fut, merge: M) -> Result<R, MutationError<E>>
  where
    Fut: Future<Output = Result<R, E>>,
    M: FnOnce(&R, &mut Confirmed<'_, K>),
  {
    self.start()?.settle_and_merge(remote, merge).await
  }
}

/// A mutation whose optimistic values are in the cache.
///
/// Must be settled with the remote result. Dropping it first rolls back.
pub struct PendingMutation<K: QueryKey> {
  store: QueryStore<K>,
  id: MutationId,
  written: Vec<(K, Value)>,
  invalidates: Vec<K>,
  armed: bool,
}

impl<K: QueryKey> PendingMutation<K> {
  pub fn id(&self) -> MutationId {
    self.id
  }

  /// Keys that received an optimistic value.
  pub fn keys(&self) -> impl Iterator<Item = &K> {
    self.written.iter().map(|(k, _)| k)
  }

  /// Await the remote operation and commit or roll back.
  pub async fn settle<R, E, Fut>(self, remote: Fut) -> Result<R, MutationError<E>>
  where
    Fut: Future<Output = Result<R, E>>,
  {
    self.settle_and_merge(remote, |_, _| {}).await
  }

  /// Await the remote operation; on success let `merge` record the
  /// server-confirmed values before committing.
  pub async fn settle_and_merge<R, E, Fut, M>(
    mut self,
    remote: Fut,
    merge: M,
  ) -> Result<R, MutationError<E>>
  where
    Fut: Future<Output = Result<R, E>>,
    M: FnOnce(&R, &mut Confirmed<'_, K>),
  {
    let result = remote.await;

    match result {
      Ok(response) => {
        let mut confirmed = Confirmed::new(&self.written);
        merge(&response, &mut confirmed);
        let values = confirmed.values;
        let committed = self
          .store
          .commit(self.id, &self.written, values, &self.invalidates);
        self.armed = false;
        if let Err(err) = committed {
          // The server took the change; release the keys and refetch them
          self.restore("commit failed");
          for (key, _) in &self.written {
            if let Err(err) = self.store.invalidate(key) {
              warn!(key = %key.description(), error = %err, "failed to invalidate after commit error");
            }
          }
          return Err(err.into());
        }
        info!(mutation = self.id, "mutation committed");
        Ok(response)
      }
      Err(err) => {
        self.armed = false;
        self.restore("remote operation failed");
        Err(MutationError::Remote(err))
      }
    }
  }

  /// Abandon the mutation and restore the snapshots now.
  pub fn rollback(mut self) {
    self.armed = false;
    self.restore("rolled back by caller");
  }

  fn restore(&self, reason: &str) {
    let keys: Vec<K> = self.written.iter().map(|(k, _)| k.clone()).collect();
    let restored = self.store.rollback(self.id, &keys);
    warn!(mutation = self.id, restored, reason, "mutation rolled back");
  }
}

impl<K: QueryKey> Drop for PendingMutation<K> {
  fn drop(&mut self) {
    if self.armed {
      self.restore("dropped before settling");
    }
  }
}

/// Server-confirmed values collected during a successful settle.
///
/// Also exposes what this mutation wrote, so a merge can patch its own
/// optimistic value instead of whatever the cache holds by the time the
/// server answers.
pub struct Confirmed<'a, K> {
  written: &'a [(K, Value)],
  values: Vec<(K, Value)>,
}

impl<'a, K: QueryKey> Confirmed<'a, K> {
  fn new(written: &'a [(K, Value)]) -> Self {
    Self {
      written,
      values: Vec::new(),
    }
  }

  /// The optimistic value this mutation wrote to `key`, if any.
  pub fn written<T: DeserializeOwned>(&self, key: &K) -> Option<T> {
    let (_, value) = self.written.iter().find(|(k, _)| k == key)?;
    match serde_json::from_value(value.clone()) {
      Ok(value) => Some(value),
      Err(err) => {
        warn!(key = %key.description(), error = %err, "written value has a different type");
        None
      }
    }
  }

  /// Record the server's value for `key`.
  ///
  /// A value that fails to encode is skipped; the key is invalidated on
  /// commit anyway, so the next read refetches it.
  pub fn set<T: Serialize>(&mut self, key: K, value: &T) {
    match serde_json::to_value(value) {
      Ok(value) => self.values.push((key, value)),
      Err(err) => warn!(key = %key.description(), error = %err, "skipping unencodable server value"),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

/// Apply `transform` to `key` optimistically, run `remote_op`, and commit or
/// roll back.
pub async fn attempt_optimistic_update<K, T, F, R, E, Fut>(
  store: &QueryStore<K>,
  key: K,
  transform: F,
  remote_op: Fut,
) -> Result<R, MutationError<E>>
where
  K: QueryKey,
  T: Serialize + DeserializeOwned,
  F: FnOnce(Option<T>) -> T + Send + 'static,
  Fut: Future<Output = Result<R, E>>,
{
  OptimisticMutation::new(store)
    .optimistic(key, transform)
    .run(remote_op)
    .await
}
