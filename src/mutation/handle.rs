//! Poll-based handle for running a mutation from a UI event loop.
//!
//! Mirrors `Query<T>`: the optimistic writes happen before `spawn` returns,
//! the remote call runs on a tokio task, and `poll()` reports when it settled.

use std::fmt::Display;
use std::future::Future;
use tokio::sync::mpsc;

use super::error::MutationError;

/// Lifecycle of a single optimistic mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationState<R> {
  /// Not started
  Idle,
  /// Optimistic values are in the cache, waiting for the server
  Optimistic,
  /// Server accepted the change
  Committed(R),
  /// Server rejected the change (or it was cancelled); snapshots restored
  RolledBack(String),
}

impl<R> MutationState<R> {
  pub fn is_pending(&self) -> bool {
    matches!(self, MutationState::Optimistic)
  }

  pub fn is_settled(&self) -> bool {
    matches!(
      self,
      MutationState::Committed(_) | MutationState::RolledBack(_)
    )
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      MutationState::RolledBack(e) => Some(e),
      _ => None,
    }
  }
}

/// A mutation running in the background.
pub struct Mutation<R> {
  state: MutationState<R>,
  receiver: Option<mpsc::UnboundedReceiver<Result<R, String>>>,
}

impl<R: Send + 'static> Mutation<R> {
  pub fn idle() -> Self {
    Self {
      state: MutationState::Idle,
      receiver: None,
    }
  }

  /// Run a started mutation's settle future on a background task.
  pub fn spawn<E, Fut>(settle: Fut) -> Self
  where
    E: Display,
    Fut: Future<Output = Result<R, MutationError<E>>> + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
      let result = settle.await.map_err(|e| e.to_string());
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
    Self {
      state: MutationState::Optimistic,
      receiver: Some(rx),
    }
  }

  /// A mutation that failed before it could start (e.g. a conflict).
  pub fn failed(error: impl Display) -> Self {
    Self {
      state: MutationState::RolledBack(error.to_string()),
      receiver: None,
    }
  }

  pub fn state(&self) -> &MutationState<R> {
    &self.state
  }

  pub fn is_pending(&self) -> bool {
    self.state.is_pending()
  }

  /// Poll for the settle result.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(response)) => {
        self.state = MutationState::Committed(response);
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = MutationState::RolledBack(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Task dropped without sending; its pending guard already rolled back
        self.state = MutationState::RolledBack(MutationError::<String>::Cancelled.to_string());
        self.receiver = None;
        true
      }
    }
  }
}

impl<R: std::fmt::Debug> std::fmt::Debug for Mutation<R> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Mutation")
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::store::tests::TestKey;
  use crate::cache::QueryStore;
  use crate::mutation::OptimisticMutation;
  use std::time::Duration;

  #[tokio::test]
  async fn test_mutation_commit() {
    let mut mutation: Mutation<u32> = Mutation::spawn(async { Ok::<_, MutationError<String>>(7) });
    assert!(mutation.is_pending());

    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(mutation.poll());
    assert_eq!(mutation.state(), &MutationState::Committed(7));
    assert!(!mutation.poll());
  }

  #[tokio::test]
  async fn test_mutation_rollback_reports_error() {
    let store = QueryStore::new();
    store.set_server(&TestKey::Flag(1), &false).unwrap();

    let pending = OptimisticMutation::new(&store)
      .optimistic(TestKey::Flag(1), |v: Option<bool>| !v.unwrap_or(false))
      .start()
      .unwrap();
    let mut mutation: Mutation<()> = Mutation::spawn(pending.settle(async {
      Err::<(), _>("site is locked".to_string())
    }));
    assert_eq!(store.get::<bool>(&TestKey::Flag(1)).unwrap(), Some(true));

    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(mutation.poll());
    assert_eq!(mutation.state().error(), Some("site is locked"));
    assert_eq!(store.get::<bool>(&TestKey::Flag(1)).unwrap(), Some(false));
  }

  #[test]
  fn test_failed_is_settled() {
    let mutation: Mutation<()> = Mutation::failed("conflict");
    assert!(mutation.state().is_settled());
    assert_eq!(mutation.state().error(), Some("conflict"));
  }
}
