//! Optimistic mutations over the query cache.
//!
//! Lifecycle: `idle -> optimistic -> (committed | rolled back)`. Every
//! feature that changes server state goes through `OptimisticMutation`
//! instead of writing the cache directly.

mod error;
mod handle;
mod optimistic;

pub use error::MutationError;
pub use handle::{Mutation, MutationState};
pub use optimistic::{attempt_optimistic_update, Confirmed, OptimisticMutation, PendingMutation};
