//! Tracing setup.
//!
//! The TUI owns the terminal, so it logs to a daily rolling file. The CLI
//! subcommands log to stderr.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

/// Environment variable holding a filter directive, e.g. `w9s=debug`
pub const LOG_ENV: &str = "W9S_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
  File,
  Stderr,
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until exit; dropping it flushes the file
/// writer.
pub fn init(config: &LogConfig, target: LogTarget) -> Result<Option<WorkerGuard>> {
  let filter = build_filter(std::env::var(LOG_ENV).ok().as_deref(), &config.level);

  match target {
    LogTarget::Stderr => {
      tracing_subscriber::registry()
        .with(filter)
        .with(
          fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact(),
        )
        .try_init()
        .map_err(|e| eyre!("Failed to install logger: {}", e))?;
      Ok(None)
    }
    LogTarget::File => {
      let dir = log_dir(config)?;
      std::fs::create_dir_all(&dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(&dir, "w9s.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::registry()
        .with(filter)
        .with(
          fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer),
        )
        .try_init()
        .map_err(|e| eyre!("Failed to install logger: {}", e))?;
      Ok(Some(guard))
    }
  }
}

/// Pick the filter: the environment wins, then the configured level.
/// An unparsable directive falls back to `info`.
fn build_filter(env: Option<&str>, configured: &str) -> EnvFilter {
  env
    .and_then(|directive| EnvFilter::try_new(directive).ok())
    .or_else(|| EnvFilter::try_new(configured).ok())
    .unwrap_or_else(|| EnvFilter::new("info"))
}

fn log_dir(config: &LogConfig) -> Result<PathBuf> {
  match &config.dir {
    Some(dir) => Ok(dir.clone()),
    None => dirs::data_dir()
      .map(|d| d.join("w9s").join("logs"))
      .ok_or_else(|| eyre!("Could not determine data directory for logs")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_env_directive_wins() {
    let filter = build_filter(Some("w9s=trace"), "warn");
    assert_eq!(filter.to_string(), "w9s=trace");
  }

  #[test]
  fn test_bad_directives_fall_back() {
    assert_eq!(build_filter(None, "debug").to_string(), "debug");
    assert_eq!(build_filter(Some("w9s=loud"), "warn").to_string(), "warn");
    assert_eq!(build_filter(None, "w9s=loud").to_string(), "info");
  }

  #[test]
  fn test_configured_log_dir() {
    let config = LogConfig {
      level: "info".to_string(),
      dir: Some(PathBuf::from("/tmp/w9s-logs")),
    };
    assert_eq!(log_dir(&config).unwrap(), PathBuf::from("/tmp/w9s-logs"));
  }
}
