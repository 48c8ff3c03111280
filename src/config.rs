use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::ConflictPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  /// Site used when --site is not given
  pub default_site: Option<u64>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the REST API
  #[serde(default = "default_api_url")]
  pub url: String,
  /// Request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_api_url() -> String {
  "https://public-api.wordpress.com".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds before cached data is refetched
  #[serde(default = "default_stale_secs")]
  pub stale_secs: i64,
  /// Keep last known-good data on disk for offline use
  #[serde(default = "default_true")]
  pub persist: bool,
  /// How racing mutations on the same key are resolved
  #[serde(default)]
  pub conflict_policy: ConflictPolicy,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_secs: default_stale_secs(),
      persist: true,
      conflict_policy: ConflictPolicy::default(),
    }
  }
}

impl CacheConfig {
  /// `stale_secs` as a duration. Negative or out-of-range values are rejected.
  pub fn stale_time(&self) -> Result<chrono::Duration> {
    if self.stale_secs < 0 {
      return Err(eyre!("cache.stale_secs must not be negative, got {}", self.stale_secs));
    }
    chrono::Duration::try_seconds(self.stale_secs)
      .ok_or_else(|| eyre!("cache.stale_secs is too large: {}", self.stale_secs))
  }
}

fn default_stale_secs() -> i64 {
  300
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive used when W9S_LOG is not set
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Directory for TUI log files (default: platform data dir)
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      dir: None,
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./w9s.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/w9s/config.yaml
  ///
  /// With no file found, defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("w9s.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("w9s").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config.cache.stale_time()?;

    Ok(config)
  }

  /// Resolve the site to operate on.
  pub fn site(&self, override_site: Option<u64>) -> Result<u64> {
    override_site
      .or(self.default_site)
      .ok_or_else(|| eyre!("No site given. Pass --site or set default_site in the config file."))
  }

  /// Get the API token from environment variables.
  ///
  /// Checks W9S_API_TOKEN first, then WPCOM_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("W9S_API_TOKEN")
      .or_else(|_| std::env::var("WPCOM_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set W9S_API_TOKEN or WPCOM_API_TOKEN environment variable.")
      })
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      default_site: None,
      cache: CacheConfig::default(),
      log: LogConfig::default(),
    }
  }
}
