//! WordPress.com-style hosting API: update schedules, site ownership and
//! domains.

mod cached_client;
mod client;
mod keys;
mod types;

pub use cached_client::{into_report, CachedHostingClient, MutationFuture};
pub use client::{HostingApi, HostingClient, TransferResponse};
pub use keys::HostingQueryKey;
pub use types::{BulkAction, Domain, Schedule, SiteOwner};
