use thiserror::Error;

use crate::cache::StoreError;

/// Why an optimistic mutation did not commit.
///
/// `E` is the error type of the remote operation. Every variant means the
/// cache is back to its pre-mutation state (or was never touched).
#[derive(Debug, Error)]
pub enum MutationError<E> {
  /// The remote operation failed; optimistic writes were rolled back
  #[error("{0}")]
  Remote(E),
  /// Another mutation is in flight on the key and the store rejects races
  #[error("{key} already has a mutation in flight")]
  Conflict { key: String },
  /// The cache could not be read or written
  #[error("cache error: {0}")]
  Cache(#[source] StoreError),
  /// The mutation was dropped before it settled
  #[error("mutation was cancelled before it settled")]
  Cancelled,
}

impl<E> MutationError<E> {
  /// The remote error, if the server call is what failed.
  pub fn remote(&self) -> Option<&E> {
    match self {
      MutationError::Remote(e) => Some(e),
      _ => None,
    }
  }

  pub fn is_conflict(&self) -> bool {
    matches!(self, MutationError::Conflict { .. })
  }

  /// Change the remote error type, keeping every other variant.
  pub fn map_remote<F, E2>(self, f: F) -> MutationError<E2>
  where
    F: FnOnce(E) -> E2,
  {
    match self {
      MutationError::Remote(e) => MutationError::Remote(f(e)),
      MutationError::Conflict { key } => MutationError::Conflict { key },
      MutationError::Cache(e) => MutationError::Cache(e),
      MutationError::Cancelled => MutationError::Cancelled,
    }
  }
}

impl<E> From<StoreError> for MutationError<E> {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::Conflict { key } => MutationError::Conflict { key },
      other => MutationError::Cache(other),
    }
  }
}
