//! SQLite-backed key-value store.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use super::kv::KvStore;
use crate::error::StoreError;

/// Current schema version of the store database.
const CURRENT_VERSION: i32 = 1;

/// How long to wait for another process holding the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_VALUE: &str = "SELECT value FROM kv_store WHERE key = ?1";

const UPSERT_VALUE: &str = "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
   ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

/// SQLite-based key-value store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::Unavailable(format!(
          "Failed to create data directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StoreError::Unavailable(format!(
        "Failed to open store at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Open an in-memory store (for testing).
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    migrate(&conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|dir| dir.join("galley").join("galley.db"))
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::Unavailable(format!("Lock poisoned: {}", e)))
  }
}

impl KvStore for SqliteStore {
  fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
    let conn = self.conn()?;
    let value = conn
      .query_row(SELECT_VALUE, params![key], |row| row.get(0))
      .optional()?;
    Ok(value)
  }

  fn set_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
    let conn = self.conn()?;
    conn.execute(UPSERT_VALUE, params![key, value])?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
    Ok(())
  }

  fn update(
    &self,
    key: &str,
    f: &mut dyn FnMut(Option<String>) -> Result<Option<String>, StoreError>,
  ) -> Result<(), StoreError> {
    let mut conn = self.conn()?;
    // Write lock is held from the read to the commit
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = tx
      .query_row(SELECT_VALUE, params![key], |row| row.get(0))
      .optional()?;

    if let Some(value) = f(current)? {
      tx.execute(UPSERT_VALUE, params![key, value])?;
    }
    tx.commit()?;
    Ok(())
  }
}

fn get_version(conn: &Connection) -> Result<i32, StoreError> {
  Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Run all pending migrations.
fn migrate(conn: &Connection) -> Result<(), StoreError> {
  let current = get_version(conn)?;

  for version in (current + 1)..=CURRENT_VERSION {
    match version {
      1 => conn.execute_batch(SCHEMA_V1)?,
      _ => {
        return Err(StoreError::Unavailable(format!(
          "Unknown migration version: {version}"
        )))
      }
    }
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))?;
  }

  Ok(())
}

const SCHEMA_V1: &str = r#"
-- Named JSON documents (queue, cache snapshots)
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::KvStoreExt;

  #[test]
  fn test_set_and_get() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.set("inventory", &vec!["rice", "beans"]).unwrap();

    let raw = store.get_raw("inventory").unwrap().unwrap();
    let loaded: Vec<String> = serde_json::from_str(&raw).unwrap();
    assert_eq!(loaded, vec!["rice", "beans"]);
  }

  #[test]
  fn test_missing_key() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.get_raw("sync_queue").unwrap().is_none());
  }

  #[test]
  fn test_upsert_replaces_value() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.set_raw("k", "1").unwrap();
    store.set_raw("k", "2").unwrap();
    assert_eq!(store.get_raw("k").unwrap().as_deref(), Some("2"));

    store.remove("k").unwrap();
    assert!(store.get_raw("k").unwrap().is_none());
  }

  #[test]
  fn test_migration_idempotent() {
    let conn = Connection::open_in_memory().unwrap();
    migrate(&conn).unwrap();
    migrate(&conn).unwrap();
    assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
  }

  #[test]
  fn test_update_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("galley.db");
    let first = SqliteStore::open(&path).unwrap();
    let second = SqliteStore::open(&path).unwrap();

    first.set_raw("count", "1").unwrap();
    for store in [&second, &first] {
      store
        .update("count", &mut |current| {
          let n: u32 = current.as_deref().unwrap_or("0").parse().unwrap();
          Ok(Some((n + 1).to_string()))
        })
        .unwrap();
    }

    assert_eq!(first.get_raw("count").unwrap().as_deref(), Some("3"));
  }

  #[test]
  fn test_update_error_rolls_back() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.set_raw("k", "kept").unwrap();
    let result = store.update("k", &mut |_| Err(StoreError::Unavailable("abort".to_string())));
    assert!(result.is_err());
    assert_eq!(store.get_raw("k").unwrap().as_deref(), Some("kept"));
  }

  #[test]
  fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("galley.db");

    {
      let store = SqliteStore::open(&path).unwrap();
      store.set_raw("sync_queue", "[]").unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.get_raw("sync_queue").unwrap().as_deref(), Some("[]"));
  }
}
