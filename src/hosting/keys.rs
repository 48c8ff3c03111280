//! Query keys for hosting resources.

use crate::cache::QueryKey;

/// Query key types for hosting API calls.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HostingQueryKey {
  /// Update schedules of a site
  UpdateSchedules { site_id: u64 },
  /// Owner of a site
  SiteOwner { site_id: u64 },
  /// Every domain the user has
  Domains,
  /// Domains attached to a single site
  SiteDomains { site_id: u64 },
}

impl QueryKey for HostingQueryKey {
  fn canonical(&self) -> String {
    match self {
      Self::UpdateSchedules { site_id } => format!("update_schedules:{}", site_id),
      Self::SiteOwner { site_id } => format!("site_owner:{}", site_id),
      Self::Domains => "domains".to_string(),
      Self::SiteDomains { site_id } => format!("site_domains:{}", site_id),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::UpdateSchedules { site_id } => format!("update schedules for site {}", site_id),
      Self::SiteOwner { site_id } => format!("owner of site {}", site_id),
      Self::Domains => "all domains".to_string(),
      Self::SiteDomains { site_id } => format!("domains for site {}", site_id),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_hash_distinguishes_resources_for_same_site() {
    let schedules = HostingQueryKey::UpdateSchedules { site_id: 7 };
    let owner = HostingQueryKey::SiteOwner { site_id: 7 };
    assert_ne!(schedules.cache_hash(), owner.cache_hash());
    assert_eq!(
      schedules.cache_hash(),
      HostingQueryKey::UpdateSchedules { site_id: 7 }.cache_hash()
    );
  }

  #[test]
  fn test_description() {
    assert_eq!(
      HostingQueryKey::SiteDomains { site_id: 3 }.description(),
      "domains for site 3"
    );
    assert_eq!(HostingQueryKey::Domains.description(), "all domains");
  }
}
