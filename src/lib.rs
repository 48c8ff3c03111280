//! Optimistic updates over a shared query cache, and a hosting client
//! built on them.

pub mod cache;
pub mod config;
pub mod hosting;
pub mod logging;
pub mod mutation;
pub mod query;
