//! Cache storage trait and SQLite implementation.
//!
//! Only server-confirmed values are persisted. The store never hands
//! optimistic values to this layer, so a crash mid-mutation can't leave
//! speculative data on disk.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A single persisted value.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntity {
  /// The cached JSON value
  pub value: Value,
  /// When the value was cached
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Store (or replace) the value for a key hash.
  fn store(&self, key_hash: &str, description: &str, value: &Value) -> Result<()>;

  /// Load the value for a key hash.
  fn load(&self, key_hash: &str) -> Result<Option<CachedEntity>>;

  /// Delete the value for a key hash.
  fn delete(&self, key_hash: &str) -> Result<()>;
}

impl<S: CacheStorage + ?Sized> CacheStorage for Box<S> {
  fn store(&self, key_hash: &str, description: &str, value: &Value) -> Result<()> {
    (**self).store(key_hash, description, value)
  }

  fn load(&self, key_hash: &str) -> Result<Option<CachedEntity>> {
    (**self).load(key_hash)
  }

  fn delete(&self, key_hash: &str) -> Result<()> {
    (**self).delete(key_hash)
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn store(&self, _key_hash: &str, _description: &str, _value: &Value) -> Result<()> {
    Ok(()) // Discard
  }

  fn load(&self, _key_hash: &str) -> Result<Option<CachedEntity>> {
    Ok(None) // Always miss
  }

  fn delete(&self, _key_hash: &str) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Create a new SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Create a new SQLite storage at the given path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Create a throwaway in-memory storage.
  pub fn in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("w9s").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Last known-good server value per query key
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_description TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl CacheStorage for SqliteStorage {
  fn store(&self, key_hash: &str, description: &str, value: &Value) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let data = serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize value: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache (query_hash, query_description, data, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![key_hash, description, data],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", description, e))?;

    Ok(())
  }

  fn load(&self, key_hash: &str) -> Result<Option<CachedEntity>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, cached_at FROM query_cache WHERE query_hash = ?",
        params![key_hash],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to load cached value: {}", e))?;

    match row {
      Some((data, cached_at_str)) => {
        let value: Value = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cached value: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntity { value, cached_at }))
      }
      None => Ok(None),
    }
  }

  fn delete(&self, key_hash: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM query_cache WHERE query_hash = ?",
        params![key_hash],
      )
      .map_err(|e| eyre!("Failed to delete cached value: {}", e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
