//! Key-value store trait and the in-memory implementation.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StoreError;

/// Trait for key-value storage backends.
///
/// A missing key is `Ok(None)`, never an error. Writes that cannot reach the
/// medium fail with [`StoreError::Unavailable`].
pub trait KvStore: Send + Sync {
  /// Read the raw document stored under `key`.
  fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError>;

  /// Replace the document stored under `key`.
  fn set_raw(&self, key: &str, value: &str) -> Result<(), StoreError>;

  /// Delete `key`. Deleting a missing key succeeds.
  fn remove(&self, key: &str) -> Result<(), StoreError>;

  /// Read-modify-write of `key` as one step.
  ///
  /// `f` receives the current document and returns the replacement, or
  /// `None` to leave the slot untouched. An error from `f` aborts the write.
  /// Backends shared between processes must hold their write lock across
  /// the whole call.
  fn update(
    &self,
    key: &str,
    f: &mut dyn FnMut(Option<String>) -> Result<Option<String>, StoreError>,
  ) -> Result<(), StoreError> {
    if let Some(value) = f(self.get_raw(key)?)? {
      self.set_raw(key, &value)?;
    }
    Ok(())
  }
}

/// Typed JSON writes on top of any [`KvStore`].
///
/// Reads go through [`crate::store::Versioned::decode`] instead, which also
/// understands documents written before versioning.
pub trait KvStoreExt: KvStore {
  fn set<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    self.set_raw(key, &raw)
  }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

/// Store that keeps everything in process memory.
///
/// Used for tests and when persistent storage is disabled or unavailable.
#[derive(Default)]
pub struct MemoryStore {
  slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
    self
      .slots
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
  }
}

impl KvStore for MemoryStore {
  fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
    Ok(self.slots().get(key).cloned())
  }

  fn set_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
    self.slots().insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.slots().remove(key);
    Ok(())
  }

  fn update(
    &self,
    key: &str,
    f: &mut dyn FnMut(Option<String>) -> Result<Option<String>, StoreError>,
  ) -> Result<(), StoreError> {
    let mut slots = self.slots();
    if let Some(value) = f(slots.get(key).cloned())? {
      slots.insert(key.to_string(), value);
    }
    Ok(())
  }
}

/// Store whose medium is gone: every operation fails with
/// [`StoreError::Unavailable`] carrying `reason`.
///
/// Stands in for the database when it is disabled or cannot be opened, so
/// the queue and cache run memory-only and say so.
#[derive(Debug, Clone, Default)]
pub struct UnavailableStore {
  reason: String,
}

impl UnavailableStore {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
    }
  }

  fn error(&self) -> StoreError {
    StoreError::Unavailable(self.reason.clone())
  }
}

impl KvStore for UnavailableStore {
  fn get_raw(&self, _key: &str) -> Result<Option<String>, StoreError> {
    Err(self.error())
  }

  fn set_raw(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
    Err(self.error())
  }

  fn remove(&self, _key: &str) -> Result<(), StoreError> {
    Err(self.error())
  }

  fn update(
    &self,
    _key: &str,
    _f: &mut dyn FnMut(Option<String>) -> Result<Option<String>, StoreError>,
  ) -> Result<(), StoreError> {
    Err(self.error())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  #[test]
  fn test_missing_key_is_none() {
    let store = MemoryStore::new();
    assert!(store.get_raw("nothing-here").unwrap().is_none());
  }

  #[test]
  fn test_set_overwrites() {
    let store = MemoryStore::new();
    let mut prices = BTreeMap::new();
    prices.insert("flour".to_string(), 1.2);
    store.set("prices", &prices).unwrap();

    prices.insert("flour".to_string(), 1.4);
    store.set("prices", &prices).unwrap();

    let raw = store.get_raw("prices").unwrap().unwrap();
    let loaded: BTreeMap<String, f64> = serde_json::from_str(&raw).unwrap();
    assert_eq!(loaded.get("flour"), Some(&1.4));
  }

  #[test]
  fn test_remove() {
    let store = MemoryStore::new();
    store.set_raw("k", "1").unwrap();
    store.remove("k").unwrap();
    store.remove("k").unwrap();
    assert!(store.get_raw("k").unwrap().is_none());
  }

  #[test]
  fn test_unavailable_store_reports_reason() {
    let store = UnavailableStore::new("disk full");
    let err = store.set("k", &1).unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(ref reason) if reason == "disk full"));
    assert!(store.get_raw("k").is_err());
  }

  #[test]
  fn test_update_sees_current_value() {
    let store = MemoryStore::new();
    store.set_raw("n", "1").unwrap();
    store
      .update("n", &mut |current| {
        let n: u32 = current.as_deref().unwrap_or("0").parse().unwrap();
        Ok(Some((n + 1).to_string()))
      })
      .unwrap();
    assert_eq!(store.get_raw("n").unwrap().as_deref(), Some("2"));
  }

  #[test]
  fn test_update_error_leaves_slot() {
    let store = MemoryStore::new();
    store.set_raw("n", "1").unwrap();
    let result = store.update("n", &mut |_| Err(StoreError::Unavailable("nope".to_string())));
    assert!(result.is_err());
    assert_eq!(store.get_raw("n").unwrap().as_deref(), Some("1"));
  }

  #[test]
  fn test_dyn_store_has_typed_access() {
    let store: Box<dyn KvStore> = Box::new(MemoryStore::new());
    store.set("n", &42u32).unwrap();
    assert_eq!(store.get_raw("n").unwrap().as_deref(), Some("42"));
  }
}
