//! Async query abstraction for data fetching with caching support.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that
//! encapsulates async data fetching, loading states, and error handling.
//! A query can also watch a key in the `QueryStore`: optimistic writes and
//! rollbacks show up in `data()` on the next `poll()`, and invalidations
//! trigger a background refetch.
//!
//! # Example
//!
//! ```ignore
//! let client = cached_client.clone();
//! let mut query = Query::new(move || {
//!     let client = client.clone();
//!     async move { client.schedules(site_id).await.map_err(|e| e.to_string()) }
//! })
//! .watching(cached_client.store(), HostingQueryKey::UpdateSchedules { site_id });
//!
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//! ```

use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

use crate::cache::{Change, QueryKey, QueryStore};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is fetching and has no data yet
  Loading,
  /// Query is fetching in the background, previous data still shown
  Refetching(T),
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_fetching(&self) -> bool {
    matches!(self, QueryState::Loading | QueryState::Refetching(_))
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) | QueryState::Refetching(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// A boxed future that returns a Result<T, String>
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// What changed in the watched store key since the last poll
struct WatchUpdate<T> {
  /// Latest value, if the key was written or restored
  data: Option<T>,
  /// The key was invalidated or removed and no mutation holds it
  refetch: bool,
}

type WatchFn<T> = Box<dyn FnMut() -> WatchUpdate<T> + Send>;

/// Async query for data fetching with state management.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure)
/// - Loading/success/error states
/// - Async result handling via channels
/// - Optional stale time tracking and store subscription
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, String>>>,
  watch: Option<WatchFn<T>>,
  fetched_at: Option<Instant>,
  stale_time: Duration,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query with the given fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It will be called
  /// each time `fetch()` or `refetch()` is invoked.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      watch: None,
      fetched_at: None,
      stale_time: Duration::from_secs(60), // Default 1 minute
    }
  }

  /// Set the stale time for this query.
  ///
  /// After this duration, the data is considered stale and `is_stale()` returns true.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  /// Keep `data()` in sync with `key` in the store.
  pub fn watching<K>(mut self, store: &QueryStore<K>, key: K) -> Self
  where
    K: QueryKey,
    T: DeserializeOwned,
  {
    let mut events = store.subscribe();
    let store = store.clone();
    let mut wants_refetch = false;

    self.watch = Some(Box::new(move || {
      let mut changed = false;
      loop {
        match events.try_recv() {
          Ok(event) if event.key == key => match event.change {
            Change::Invalidated | Change::Removed => wants_refetch = true,
            Change::Written { .. } | Change::Restored { .. } => changed = true,
          },
          Ok(_) => {}
          // Missed events: re-read to be safe
          Err(broadcast::error::TryRecvError::Lagged(_)) => changed = true,
          Err(_) => break,
        }
      }

      let data = if changed {
        store.get::<T>(&key).ok().flatten()
      } else {
        None
      };
      let pending = store.has_pending(&key).unwrap_or(true);
      let refetch = wants_refetch && !pending;
      if refetch {
        wants_refetch = false;
      }
      WatchUpdate { data, refetch }
    }));
    self
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the data if the query has any.
  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  /// Check if the query is loading without data.
  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  /// Check if the query succeeded.
  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  /// Check if the query failed.
  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  /// Get the error message if the query failed.
  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Check if the data is stale (older than stale_time).
  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) => self
        .fetched_at
        .map(|t| t.elapsed() > self.stale_time)
        .unwrap_or(true),
      _ => false,
    }
  }

  /// Start fetching data if not already fetching.
  pub fn fetch(&mut self) {
    if self.state.is_fetching() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    // Cancel any pending fetch by dropping the receiver
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for results from a pending fetch and the watched store key.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = self.poll_fetch();

    if let Some(watch) = self.watch.as_mut() {
      let update = watch();
      if let Some(data) = update.data {
        self.state = match self.state {
          QueryState::Loading | QueryState::Refetching(_) => QueryState::Refetching(data),
          _ => QueryState::Success(data),
        };
        changed = true;
      }
      if update.refetch && !self.state.is_fetching() {
        self.start_fetch();
        changed = true;
      }
    }

    changed
  }

  fn poll_fetch(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.state = QueryState::Success(data);
        self.fetched_at = Some(Instant::now());
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = match std::mem::replace(&mut self.state, QueryState::Idle) {
      QueryState::Success(data) | QueryState::Refetching(data) => QueryState::Refetching(data),
      _ => QueryState::Loading,
    };

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

// Query is not Clone because the fetcher is boxed and receiver is owned.

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}
