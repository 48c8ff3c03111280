//! Cached hosting client: reads go through the cache layer, writes are
//! applied optimistically and rolled back if the server refuses them.

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use tracing::info;

use crate::cache::{CacheLayer, CacheStorage, NoopStorage, QueryStore, SqliteStorage};
use crate::config::Config;
use crate::mutation::{MutationError, OptimisticMutation};

use super::client::{HostingApi, HostingClient, TransferResponse};
use super::keys::HostingQueryKey;
use super::types::{BulkAction, Domain, Schedule, SiteOwner};

/// Settles a started mutation. The optimistic values are already visible.
pub type MutationFuture<R> = BoxFuture<'static, Result<R, MutationError<Report>>>;

/// Hosting client with transparent caching and optimistic writes.
#[derive(Clone)]
pub struct CachedHostingClient<A: HostingApi = HostingClient> {
  inner: A,
  cache: CacheLayer<HostingQueryKey, Box<dyn CacheStorage>>,
}

impl CachedHostingClient<HostingClient> {
  /// Create a cached client from configuration.
  pub fn new(config: &Config) -> Result<Self> {
    Self::from_config(HostingClient::new(config)?, config)
  }
}

impl<A: HostingApi> CachedHostingClient<A> {
  /// Wrap `inner` with the cache settings from `config`.
  pub fn from_config(inner: A, config: &Config) -> Result<Self> {
    let storage: Box<dyn CacheStorage> = if config.cache.persist {
      Box::new(SqliteStorage::open()?)
    } else {
      Box::new(NoopStorage)
    };
    let store = QueryStore::new().with_policy(config.cache.conflict_policy);
    let cache = CacheLayer::new(store, storage).with_stale_time(config.cache.stale_time()?);
    Ok(Self { inner, cache })
  }

  pub fn with_cache(inner: A, cache: CacheLayer<HostingQueryKey, Box<dyn CacheStorage>>) -> Self {
    Self { inner, cache }
  }

  /// The store shared by reads, mutations and subscribers.
  pub fn store(&self) -> &QueryStore<HostingQueryKey> {
    self.cache.store()
  }

  /// Update schedules of a site.
  pub async fn schedules(&self, site_id: u64) -> Result<Vec<Schedule>> {
    let key = HostingQueryKey::UpdateSchedules { site_id };
    let result = self
      .cache
      .fetch(&key, || self.inner.get_schedules(site_id))
      .await?;
    Ok(result.data)
  }

  /// Owner of a site.
  pub async fn site_owner(&self, site_id: u64) -> Result<SiteOwner> {
    let key = HostingQueryKey::SiteOwner { site_id };
    let result = self
      .cache
      .fetch(&key, || self.inner.get_site_owner(site_id))
      .await?;
    Ok(result.data)
  }

  /// Every domain of the current user.
  pub async fn domains(&self) -> Result<Vec<Domain>> {
    let result = self
      .cache
      .fetch(&HostingQueryKey::Domains, || self.inner.get_domains())
      .await?;
    Ok(result.data)
  }

  /// Domains attached to one site.
  pub async fn site_domains(&self, site_id: u64) -> Result<Vec<Domain>> {
    let key = HostingQueryKey::SiteDomains { site_id };
    let result = self
      .cache
      .fetch(&key, || {
        let domains = self.inner.get_domains();
        async move {
          let domains = domains.await?;
          Ok::<_, Report>(
            domains
              .into_iter()
              .filter(|d| d.blog_id == Some(site_id))
              .collect::<Vec<_>>(),
          )
        }
      })
      .await?;
    Ok(result.data)
  }

  /// Drop cached data for a key so the next read refetches it.
  pub fn invalidate(&self, key: &HostingQueryKey) -> Result<bool> {
    self.cache.invalidate(key)
  }

  /// Flip a schedule between active and paused.
  ///
  /// The schedule list must already be cached; the flipped state is written
  /// before this returns.
  pub fn start_toggle_schedule(
    &self,
    site_id: u64,
    schedule_id: &str,
  ) -> Result<MutationFuture<Schedule>> {
    let key = HostingQueryKey::UpdateSchedules { site_id };
    let current = self
      .store()
      .get::<Vec<Schedule>>(&key)?
      .and_then(|list| list.into_iter().find(|s| s.id == schedule_id))
      .ok_or_else(|| eyre!("Schedule {} is not loaded for site {}", schedule_id, site_id))?;
    let active = !current.active;

    let id = schedule_id.to_string();
    let pending = OptimisticMutation::new(self.store())
      .update_cached(key.clone(), move |list: Vec<Schedule>| {
        set_schedule_active(list, &id, active)
      })
      .start()?;

    info!(site_id, schedule = schedule_id, active, "toggling schedule");
    let remote = self
      .inner
      .set_schedule_active(site_id, schedule_id.to_string(), active);
    Ok(
      async move {
        pending
          .settle_and_merge(remote, move |updated: &Schedule, confirmed| {
            // Patch our own write; a newer toggle may own the visible list
            if let Some(list) = confirmed.written::<Vec<Schedule>>(&key) {
              confirmed.set(key, &replace_schedule(list, updated));
            }
          })
          .await
      }
      .boxed(),
    )
  }

  /// Load the schedules if needed, then toggle and wait for the server.
  pub async fn toggle_schedule_active(&self, site_id: u64, schedule_id: &str) -> Result<Schedule> {
    self.schedules(site_id).await?;
    self
      .start_toggle_schedule(site_id, schedule_id)?
      .await
      .map_err(into_report)
  }

  /// Start an owner transfer. The cached owner shows the pending transfer
  /// until the server answers; on success the owner is refetched.
  pub fn start_transfer_site_owner(
    &self,
    site_id: u64,
    new_owner: &str,
  ) -> Result<MutationFuture<TransferResponse>> {
    let new_owner = new_owner.trim().to_string();
    if !new_owner.contains('@') {
      return Err(eyre!("{} is not an email address", new_owner));
    }

    let key = HostingQueryKey::SiteOwner { site_id };
    let email = new_owner.clone();
    let pending = OptimisticMutation::new(self.store())
      .update_cached(key.clone(), move |mut owner: SiteOwner| {
        owner.pending_transfer_to = Some(email);
        owner
      })
      .invalidates(key)
      .start()?;

    info!(site_id, new_owner = %new_owner, "transferring site owner");
    let remote = self.inner.transfer_site_owner(site_id, new_owner);
    Ok(async move { pending.settle(remote).await }.boxed())
  }

  pub async fn transfer_site_owner(&self, site_id: u64, new_owner: &str) -> Result<TransferResponse> {
    self
      .start_transfer_site_owner(site_id, new_owner)?
      .await
      .map_err(into_report)
  }

  /// Turn auto-renew on or off for several domains at once.
  ///
  /// Updates the all-domains list and the per-site list of every site the
  /// domains belong to, all in one mutation.
  pub fn start_set_domains_auto_renew(
    &self,
    domains: &[String],
    enabled: bool,
  ) -> Result<MutationFuture<()>> {
    if domains.is_empty() {
      return Err(eyre!("No domains given"));
    }
    let action = BulkAction::SetAutoRenew(enabled);
    let names: HashSet<String> = domains.iter().cloned().collect();

    let sites: HashSet<u64> = self
      .store()
      .get::<Vec<Domain>>(&HostingQueryKey::Domains)?
      .unwrap_or_default()
      .iter()
      .filter(|d| names.contains(&d.domain))
      .filter_map(|d| d.blog_id)
      .collect();

    let mut mutation = OptimisticMutation::new(self.store()).update_cached(
      HostingQueryKey::Domains,
      {
        let names = names.clone();
        move |list: Vec<Domain>| apply_bulk(list, &names, action)
      },
    );
    for site_id in sites {
      let names = names.clone();
      mutation = mutation.update_cached(
        HostingQueryKey::SiteDomains { site_id },
        move |list: Vec<Domain>| apply_bulk(list, &names, action),
      );
    }
    let pending = mutation.start()?;

    info!(count = domains.len(), enabled, "setting domain auto-renew");
    let remote = self.inner.bulk_domain_action(domains.to_vec(), action);
    Ok(async move { pending.settle(remote).await }.boxed())
  }

  pub async fn set_domains_auto_renew(&self, domains: &[String], enabled: bool) -> Result<()> {
    self
      .start_set_domains_auto_renew(domains, enabled)?
      .await
      .map_err(into_report)
  }
}

/// Flatten a mutation failure into a report, keeping the server's error as is.
pub fn into_report(err: MutationError<Report>) -> Report {
  match err {
    MutationError::Remote(report) => report,
    other => Report::new(other),
  }
}

fn set_schedule_active(mut list: Vec<Schedule>, id: &str, active: bool) -> Vec<Schedule> {
  for schedule in list.iter_mut().filter(|s| s.id == id) {
    schedule.active = active;
  }
  list
}

fn replace_schedule(mut list: Vec<Schedule>, updated: &Schedule) -> Vec<Schedule> {
  if let Some(slot) = list.iter_mut().find(|s| s.id == updated.id) {
    *slot = updated.clone();
  }
  list
}

fn apply_bulk(mut list: Vec<Domain>, names: &HashSet<String>, action: BulkAction) -> Vec<Domain> {
  for domain in list.iter_mut().filter(|d| names.contains(&d.domain)) {
    action.apply(domain);
  }
  list
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ConflictPolicy;
  use crate::config::CacheConfig;
  use chrono::Duration;
  use futures::future::ready;
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
  use std::sync::{Arc, Mutex};
  use tokio::sync::oneshot;

  #[derive(Clone, Default)]
  struct FakeApi {
    fail: Arc<AtomicBool>,
    writes: Arc<AtomicU32>,
    /// Held schedule toggles, answered in call order: true accepts, false fails
    toggle_gates: Arc<Mutex<VecDeque<oneshot::Receiver<bool>>>>,
  }

  impl FakeApi {
    fn result<T: Send + 'static>(&self, value: T) -> BoxFuture<'static, Result<T>> {
      let out = if self.fail.load(Ordering::SeqCst) {
        Err(eyre!("HTTP 500"))
      } else {
        Ok(value)
      };
      ready(out).boxed()
    }
  }

  fn schedule(id: &str, active: bool) -> Schedule {
    Schedule {
      id: id.to_string(),
      hook: "wp_update_plugins".to_string(),
      interval: "daily".to_string(),
      timestamp: 1_700_000_000,
      active,
      plugins: vec![],
    }
  }

  fn domain(name: &str, blog_id: Option<u64>, auto_renew: bool) -> Domain {
    Domain {
      domain: name.to_string(),
      blog_id,
      auto_renew,
      expiry: None,
      primary_domain: false,
    }
  }

  fn owner() -> SiteOwner {
    SiteOwner {
      id: 1,
      login: "admin".to_string(),
      email: "admin@example.com".to_string(),
      display_name: "Admin".to_string(),
      pending_transfer_to: None,
    }
  }

  impl HostingApi for FakeApi {
    fn get_schedules(&self, _site_id: u64) -> BoxFuture<'static, Result<Vec<Schedule>>> {
      self.result(vec![schedule("a", true), schedule("b", false)])
    }

    fn set_schedule_active(
      &self,
      _site_id: u64,
      schedule_id: String,
      active: bool,
    ) -> BoxFuture<'static, Result<Schedule>> {
      self.writes.fetch_add(1, Ordering::SeqCst);
      let mut updated = schedule(&schedule_id, active);
      updated.timestamp = 1_800_000_000;
      match self.toggle_gates.lock().unwrap().pop_front() {
        Some(gate) => async move {
          match gate.await {
            Ok(true) => Ok(updated),
            _ => Err(eyre!("HTTP 500")),
          }
        }
        .boxed(),
        None => self.result(updated),
      }
    }

    fn get_site_owner(&self, _site_id: u64) -> BoxFuture<'static, Result<SiteOwner>> {
      self.result(owner())
    }

    fn transfer_site_owner(
      &self,
      _site_id: u64,
      _new_owner: String,
    ) -> BoxFuture<'static, Result<TransferResponse>> {
      self.writes.fetch_add(1, Ordering::SeqCst);
      self.result(TransferResponse {
        transfer: true,
        email_sent: true,
      })
    }

    fn get_domains(&self) -> BoxFuture<'static, Result<Vec<Domain>>> {
      self.result(vec![
        domain("a.blog", Some(1), false),
        domain("b.blog", Some(2), false),
        domain("c.blog", None, true),
      ])
    }

    fn bulk_domain_action(
      &self,
      _domains: Vec<String>,
      _action: BulkAction,
    ) -> BoxFuture<'static, Result<()>> {
      self.writes.fetch_add(1, Ordering::SeqCst);
      self.result(())
    }
  }

  fn client() -> (CachedHostingClient<FakeApi>, FakeApi) {
    let api = FakeApi::default();
    let storage: Box<dyn CacheStorage> = Box::new(NoopStorage);
    let cache = CacheLayer::new(QueryStore::new(), storage).with_stale_time(Duration::hours(1));
    (CachedHostingClient::with_cache(api.clone(), cache), api)
  }

  fn cached_schedule(client: &CachedHostingClient<FakeApi>, id: &str) -> Schedule {
    client
      .store()
      .get::<Vec<Schedule>>(&HostingQueryKey::UpdateSchedules { site_id: 7 })
      .unwrap()
      .unwrap()
      .into_iter()
      .find(|s| s.id == id)
      .unwrap()
  }

  #[tokio::test]
  async fn test_toggle_is_visible_before_server_answers() {
    let (client, _) = client();
    client.schedules(7).await.unwrap();

    let settle = client.start_toggle_schedule(7, "a").unwrap();
    assert!(!cached_schedule(&client, "a").active);
    assert!(client
      .store()
      .has_pending(&HostingQueryKey::UpdateSchedules { site_id: 7 })
      .unwrap());

    let updated = settle.await.unwrap();
    assert!(!updated.active);
    // Server copy is merged in
    assert_eq!(cached_schedule(&client, "a").timestamp, 1_800_000_000);
    assert_eq!(cached_schedule(&client, "b"), schedule("b", false));
  }

  #[tokio::test]
  async fn test_toggle_rolls_back_on_server_error() {
    let (client, api) = client();
    client.schedules(7).await.unwrap();
    api.fail.store(true, Ordering::SeqCst);

    let err = client.toggle_schedule_active(7, "b").await.unwrap_err();
    assert_eq!(err.to_string(), "HTTP 500");
    assert_eq!(cached_schedule(&client, "b"), schedule("b", false));
  }

  #[tokio::test]
  async fn test_toggle_twice_returns_to_original() {
    let (client, _) = client();
    client.schedules(7).await.unwrap();
    for _ in 0..2 {
      client.start_toggle_schedule(7, "a").unwrap().await.unwrap();
    }
    assert!(cached_schedule(&client, "a").active);
  }

  #[tokio::test]
  async fn test_rejected_toggle_restores_after_earlier_toggle_commits() {
    let (client, api) = client();
    client.schedules(7).await.unwrap();
    let (accept_a, gate_a) = oneshot::channel();
    let (accept_b, gate_b) = oneshot::channel();
    api.toggle_gates.lock().unwrap().extend([gate_a, gate_b]);

    let toggle_a = client.start_toggle_schedule(7, "a").unwrap();
    let toggle_b = client.start_toggle_schedule(7, "b").unwrap();
    assert!(!cached_schedule(&client, "a").active);
    assert!(cached_schedule(&client, "b").active);

    accept_a.send(true).unwrap();
    assert!(!toggle_a.await.unwrap().active);
    // b still shows its own speculation until it settles
    assert!(cached_schedule(&client, "b").active);

    accept_b.send(false).unwrap();
    let err = toggle_b.await.unwrap_err();
    assert_eq!(into_report(err).to_string(), "HTTP 500");

    let b = cached_schedule(&client, "b");
    assert!(!b.active);
    let a = cached_schedule(&client, "a");
    assert!(!a.active);
    assert_eq!(a.timestamp, 1_800_000_000);
    assert_eq!(client.store().pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_from_config_applies_cache_settings() {
    let config = Config {
      cache: CacheConfig {
        stale_secs: 120,
        persist: false,
        conflict_policy: ConflictPolicy::Reject,
      },
      ..Config::default()
    };
    let inner = HostingClient::with_token(&config, "token".to_string()).unwrap();
    let client = CachedHostingClient::from_config(inner, &config).unwrap();
    assert_eq!(client.store().policy(), ConflictPolicy::Reject);

    let client = CachedHostingClient::from_config(FakeApi::default(), &config).unwrap();
    client.schedules(7).await.unwrap();
    let _first = client.start_toggle_schedule(7, "a").unwrap();
    let second = client.start_toggle_schedule(7, "b").err().unwrap();
    assert!(second.to_string().contains("already has a mutation in flight"));
    assert_eq!(cached_schedule(&client, "b"), schedule("b", false));

    let bad = Config {
      cache: CacheConfig {
        stale_secs: -5,
        ..config.cache.clone()
      },
      ..config.clone()
    };
    assert!(CachedHostingClient::from_config(FakeApi::default(), &bad).is_err());
  }

  #[tokio::test]
  async fn test_toggle_unknown_schedule_errors_without_request() {
    let (client, api) = client();
    client.schedules(7).await.unwrap();
    assert!(client.start_toggle_schedule(7, "missing").is_err());
    assert_eq!(api.writes.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_transfer_marks_owner_and_invalidates() {
    let (client, _) = client();
    client.site_owner(7).await.unwrap();
    let key = HostingQueryKey::SiteOwner { site_id: 7 };

    let settle = client
      .start_transfer_site_owner(7, " new@example.com ")
      .unwrap();
    let shown = client.store().get::<SiteOwner>(&key).unwrap().unwrap();
    assert_eq!(shown.pending_transfer_to.as_deref(), Some("new@example.com"));

    let response = settle.await.unwrap();
    assert!(response.email_sent);
    assert!(client.store().is_invalidated(&key).unwrap());
  }

  #[tokio::test]
  async fn test_transfer_rejects_non_email() {
    let (client, api) = client();
    assert!(client.transfer_site_owner(7, "bob").await.is_err());
    assert_eq!(api.writes.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_transfer_failure_restores_owner() {
    let (client, api) = client();
    client.site_owner(7).await.unwrap();
    api.fail.store(true, Ordering::SeqCst);

    assert!(client
      .transfer_site_owner(7, "new@example.com")
      .await
      .is_err());
    let owner_now = client
      .store()
      .get::<SiteOwner>(&HostingQueryKey::SiteOwner { site_id: 7 })
      .unwrap()
      .unwrap();
    assert_eq!(owner_now, owner());
  }

  #[tokio::test]
  async fn test_auto_renew_updates_every_cached_list() {
    let (client, _) = client();
    client.domains().await.unwrap();
    client.site_domains(1).await.unwrap();
    client.site_domains(2).await.unwrap();

    client
      .set_domains_auto_renew(&["a.blog".to_string()], true)
      .await
      .unwrap();

    // Read the store directly: committed keys are invalidated, so a fetch
    // would go back to the fake server
    let store = client.store();
    let list = |key| store.get::<Vec<Domain>>(&key).unwrap().unwrap();
    let all = list(HostingQueryKey::Domains);
    assert!(all.iter().find(|d| d.domain == "a.blog").unwrap().auto_renew);
    assert!(!all.iter().find(|d| d.domain == "b.blog").unwrap().auto_renew);
    assert!(list(HostingQueryKey::SiteDomains { site_id: 1 })[0].auto_renew);
    assert!(!list(HostingQueryKey::SiteDomains { site_id: 2 })[0].auto_renew);
    assert!(store.is_invalidated(&HostingQueryKey::Domains).unwrap());
  }

  #[tokio::test]
  async fn test_auto_renew_failure_restores_all_lists() {
    let (client, api) = client();
    client.domains().await.unwrap();
    client.site_domains(1).await.unwrap();
    client.site_domains(2).await.unwrap();
    api.fail.store(true, Ordering::SeqCst);

    let names = vec!["a.blog".to_string(), "b.blog".to_string()];
    assert!(client.set_domains_auto_renew(&names, true).await.is_err());

    let store = client.store();
    for key in [
      HostingQueryKey::Domains,
      HostingQueryKey::SiteDomains { site_id: 1 },
      HostingQueryKey::SiteDomains { site_id: 2 },
    ] {
      let list = store.get::<Vec<Domain>>(&key).unwrap().unwrap();
      assert!(list
        .iter()
        .filter(|d| names.contains(&d.domain))
        .all(|d| !d.auto_renew));
      assert!(!store.has_pending(&key).unwrap());
    }
  }

  #[tokio::test]
  async fn test_dropped_mutation_future_rolls_back() {
    let (client, _) = client();
    client.schedules(7).await.unwrap();

    let settle = client.start_toggle_schedule(7, "a").unwrap();
    drop(settle);
    assert!(cached_schedule(&client, "a").active);
  }

  #[test]
  fn test_into_report_keeps_remote_message() {
    let report = into_report(MutationError::Remote(eyre!("HTTP 403: nope")));
    assert_eq!(report.to_string(), "HTTP 403: nope");
    let report = into_report(MutationError::Cancelled);
    assert!(report.to_string().contains("cancelled"));
  }
}
