use serde::{Deserialize, Serialize};

/// A scheduled plugin-update run for a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
  pub id: String,
  pub hook: String,
  pub interval: String, // "daily" or "weekly"
  /// Next run, unix seconds
  pub timestamp: i64,
  pub active: bool,
  #[serde(default)]
  pub plugins: Vec<String>,
}

/// Current owner of a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteOwner {
  pub id: u64,
  pub login: String,
  pub email: String,
  pub display_name: String,
  /// Email of the user a transfer was started for, awaiting confirmation
  #[serde(default)]
  pub pending_transfer_to: Option<String>,
}

/// A registered domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
  pub domain: String,
  /// Site the domain is attached to, if any
  pub blog_id: Option<u64>,
  pub auto_renew: bool,
  pub expiry: Option<String>,
  #[serde(default)]
  pub primary_domain: bool,
}

/// Actions that can be applied to many domains at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
  SetAutoRenew(bool),
}

impl BulkAction {
  /// Path segment of the bulk-actions endpoint
  pub fn endpoint(&self) -> &'static str {
    match self {
      BulkAction::SetAutoRenew(_) => "set-auto-renew",
    }
  }

  /// Apply the action to a cached domain
  pub fn apply(&self, domain: &mut Domain) {
    match self {
      BulkAction::SetAutoRenew(enabled) => domain.auto_renew = *enabled,
    }
  }
}
