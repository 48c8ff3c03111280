use crate::config::Config;
use crate::hosting::types::{BulkAction, Domain, Schedule, SiteOwner};
use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Error body returned by the API on failure
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
  #[serde(default)]
  error: Option<String>,
  #[serde(default)]
  message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AllDomainsResponse {
  domains: Vec<Domain>,
}

/// Response of the owner transfer endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransferResponse {
  pub transfer: bool,
  #[serde(default)]
  pub email_sent: bool,
}

#[derive(Debug, Deserialize)]
struct BulkActionResponse {
  success: bool,
}

/// Hosting REST API client
#[derive(Clone)]
pub struct HostingClient {
  http: reqwest::Client,
  base: Url,
  token: String,
}

impl HostingClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    Self::with_token(config, token)
  }

  pub fn with_token(config: &Config, token: String) -> Result<Self> {
    // Url::join drops the last path segment unless the base ends with '/'
    let mut url = config.api.url.clone();
    if !url.ends_with('/') {
      url.push('/');
    }
    let base = Url::parse(&url).map_err(|e| eyre!("Invalid API url {}: {}", config.api.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .user_agent(concat!("w9s/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base, token })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
    let url = self.endpoint(path)?;
    debug!(%url, "GET");
    let response = self
      .http
      .get(url)
      .bearer_auth(&self.token)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?;
    Self::parse(path, response).await
  }

  async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
    let url = self.endpoint(path)?;
    debug!(%url, "POST");
    let response = self
      .http
      .post(url)
      .bearer_auth(&self.token)
      .json(body)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?;
    Self::parse(path, response).await
  }

  async fn parse<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
      return response
        .json::<T>()
        .await
        .map_err(|e| eyre!("Failed to parse response from {}: {}", path, e));
    }

    let body = response.text().await.unwrap_or_default();
    Err(eyre!("{}", describe_failure(status, &body)))
  }

  /// List the update schedules of a site
  pub async fn get_schedules(&self, site_id: u64) -> Result<Vec<Schedule>> {
    self
      .get(&format!("wpcom/v2/sites/{}/update-schedules", site_id))
      .await
  }

  /// Activate or pause a schedule
  pub async fn set_schedule_active(
    &self,
    site_id: u64,
    schedule_id: &str,
    active: bool,
  ) -> Result<Schedule> {
    self
      .post(
        &format!(
          "wpcom/v2/sites/{}/update-schedules/{}/active",
          site_id, schedule_id
        ),
        &json!({ "active": active }),
      )
      .await
  }

  /// Get the owner of a site
  pub async fn get_site_owner(&self, site_id: u64) -> Result<SiteOwner> {
    self
      .get(&format!("wpcom/v2/sites/{}/site-owner", site_id))
      .await
  }

  /// Start transferring a site to another user (confirmed by email)
  pub async fn transfer_site_owner(&self, site_id: u64, new_owner: &str) -> Result<TransferResponse> {
    let response: TransferResponse = self
      .post(
        &format!("wpcom/v2/sites/{}/site-owner-transfer", site_id),
        &json!({ "new_site_owner": new_owner }),
      )
      .await?;
    if !response.transfer {
      return Err(eyre!("Site owner transfer to {} was not started", new_owner));
    }
    Ok(response)
  }

  /// List every domain of the current user
  pub async fn get_domains(&self) -> Result<Vec<Domain>> {
    let response: AllDomainsResponse = self.get("rest/v1.1/all-domains").await?;
    Ok(response.domains)
  }

  /// Apply an action to several domains at once
  pub async fn bulk_domain_action(&self, domains: &[String], action: BulkAction) -> Result<()> {
    let body = match action {
      BulkAction::SetAutoRenew(enabled) => json!({ "domains": domains, "auto_renew": enabled }),
    };
    let response: BulkActionResponse = self
      .post(
        &format!("wpcom/v2/domains/bulk-actions/{}", action.endpoint()),
        &body,
      )
      .await?;
    if !response.success {
      return Err(eyre!("Bulk action {} was rejected", action.endpoint()));
    }
    Ok(())
  }
}

/// The remote operations the cached client needs.
///
/// Futures are boxed and `'static` so they can be handed to a spawned task.
pub trait HostingApi: Clone + Send + Sync + 'static {
  fn get_schedules(&self, site_id: u64) -> BoxFuture<'static, Result<Vec<Schedule>>>;

  fn set_schedule_active(
    &self,
    site_id: u64,
    schedule_id: String,
    active: bool,
  ) -> BoxFuture<'static, Result<Schedule>>;

  fn get_site_owner(&self, site_id: u64) -> BoxFuture<'static, Result<SiteOwner>>;

  fn transfer_site_owner(
    &self,
    site_id: u64,
    new_owner: String,
  ) -> BoxFuture<'static, Result<TransferResponse>>;

  fn get_domains(&self) -> BoxFuture<'static, Result<Vec<Domain>>>;

  fn bulk_domain_action(
    &self,
    domains: Vec<String>,
    action: BulkAction,
  ) -> BoxFuture<'static, Result<()>>;
}

impl HostingApi for HostingClient {
  fn get_schedules(&self, site_id: u64) -> BoxFuture<'static, Result<Vec<Schedule>>> {
    let client = self.clone();
    async move { client.get_schedules(site_id).await }.boxed()
  }

  fn set_schedule_active(
    &self,
    site_id: u64,
    schedule_id: String,
    active: bool,
  ) -> BoxFuture<'static, Result<Schedule>> {
    let client = self.clone();
    async move {
      client
        .set_schedule_active(site_id, &schedule_id, active)
        .await
    }
    .boxed()
  }

  fn get_site_owner(&self, site_id: u64) -> BoxFuture<'static, Result<SiteOwner>> {
    let client = self.clone();
    async move { client.get_site_owner(site_id).await }.boxed()
  }

  fn transfer_site_owner(
    &self,
    site_id: u64,
    new_owner: String,
  ) -> BoxFuture<'static, Result<TransferResponse>> {
    let client = self.clone();
    async move { client.transfer_site_owner(site_id, &new_owner).await }.boxed()
  }

  fn get_domains(&self) -> BoxFuture<'static, Result<Vec<Domain>>> {
    let client = self.clone();
    async move { client.get_domains().await }.boxed()
  }

  fn bulk_domain_action(
    &self,
    domains: Vec<String>,
    action: BulkAction,
  ) -> BoxFuture<'static, Result<()>> {
    let client = self.clone();
    async move { client.bulk_domain_action(&domains, action).await }.boxed()
  }
}

/// Build a readable message from a failed response
fn describe_failure(status: StatusCode, body: &str) -> String {
  let detail = serde_json::from_str::<ApiErrorBody>(body)
    .ok()
    .and_then(|b| b.message.or(b.error));
  match detail {
    Some(detail) => format!("HTTP {}: {}", status.as_u16(), detail),
    None => format!("HTTP {}", status.as_u16()),
  }
}
