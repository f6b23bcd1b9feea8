//! Cache manager: last-known-good snapshots of remote reads.

use chrono::{DateTime, Duration, Utc};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::{CacheResult, CachedSnapshot};
use crate::error::RemoteError;
use crate::remote::{InventoryItem, Pricing};
use crate::store::{KvStore, KvStoreExt, MemoryStore, Versioned};
use crate::sync::Clock;

pub const INVENTORY_KEY: &str = "cache:inventory";
pub const PRICING_KEY: &str = "cache:pricing";

/// Current on-disk schema of cache snapshots.
const CACHE_SCHEMA_VERSION: u32 = 1;

/// Stores remote snapshots for offline reads.
///
/// Writes replace the whole snapshot. Failures never reach the caller:
/// unwritable storage falls back to process memory and unreadable entries
/// read as empty.
pub struct CacheManager<S: KvStore + ?Sized> {
  storage: Arc<S>,
  fallback: MemoryStore,
  clock: Arc<dyn Clock>,
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl<S: KvStore + ?Sized> CacheManager<S> {
  /// Create a new cache manager with the given storage backend.
  pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
    Self {
      storage,
      fallback: MemoryStore::new(),
      clock,
      stale_time: Duration::minutes(60),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Check if cached data is stale based on cached_at timestamp.
  pub fn is_stale(&self, cached_at: DateTime<Utc>) -> bool {
    self.clock.now() - cached_at > self.stale_time
  }

  /// Replace the snapshot under `key`.
  pub fn cache<V: Serialize>(&self, key: &str, value: &V) {
    let doc = Versioned::new(CACHE_SCHEMA_VERSION, self.clock.now(), value);

    match self.storage.set(key, &doc) {
      Ok(()) => {
        // A newer persisted copy supersedes anything held in memory
        if let Err(e) = self.fallback.remove(key) {
          debug!("Failed to clear in-memory copy of {}: {}", key, e);
        }
      }
      Err(e) => {
        warn!("Failed to persist cache {}, keeping it in memory: {}", key, e);
        if let Err(e) = self.fallback.set(key, &doc) {
          warn!("Failed to cache {} in memory: {}", key, e);
        }
      }
    }
  }

  /// Snapshot under `key` with its timestamp, if one can be read.
  pub fn load_snapshot<V: DeserializeOwned>(&self, key: &str) -> Option<CachedSnapshot<V>> {
    let raw = self
      .fallback
      .get_raw(key)
      .ok()
      .flatten()
      .or_else(|| match self.storage.get_raw(key) {
        Ok(raw) => raw,
        Err(e) => {
          warn!("Failed to read cache {}: {}", key, e);
          None
        }
      })?;

    match Versioned::<V>::decode(key, &raw, CACHE_SCHEMA_VERSION) {
      Ok(doc) => Some(CachedSnapshot {
        value: doc.data,
        cached_at: doc.saved_at,
      }),
      Err(e) => {
        warn!("Ignoring unreadable cache {}: {}", key, e);
        None
      }
    }
  }

  /// When the snapshot under `key` was written, if there is a readable one.
  pub fn cached_at(&self, key: &str) -> Option<DateTime<Utc>> {
    self
      .load_snapshot::<IgnoredAny>(key)
      .map(|snapshot| snapshot.cached_at)
  }

  /// Cached value under `key`, or the empty default.
  pub fn load_cached<V: DeserializeOwned + Default>(&self, key: &str) -> V {
    self
      .load_snapshot(key)
      .map(|snapshot| snapshot.value)
      .unwrap_or_default()
  }

  pub fn cache_inventory(&self, items: &[InventoryItem]) {
    self.cache(INVENTORY_KEY, &items);
  }

  pub fn load_cached_inventory(&self) -> Vec<InventoryItem> {
    self.load_cached(INVENTORY_KEY)
  }

  pub fn cache_pricing(&self, pricing: &Pricing) {
    self.cache(PRICING_KEY, pricing);
  }

  pub fn load_cached_pricing(&self) -> Pricing {
    self.load_cached(PRICING_KEY)
  }

  /// Await `fetch` and cache the inventory it returns; on failure serve the
  /// cached snapshot, or an empty list if there is none.
  pub async fn refresh_inventory<Fut>(&self, fetch: Fut) -> CacheResult<Vec<InventoryItem>>
  where
    Fut: Future<Output = Result<Vec<InventoryItem>, RemoteError>>,
  {
    match fetch.await {
      Ok(items) => {
        self.cache_inventory(&items);
        CacheResult::from_network(items)
      }
      Err(e) => self.serve_cached(INVENTORY_KEY, &e),
    }
  }

  /// Same as [`Self::refresh_inventory`] for the pricing table.
  pub async fn refresh_pricing<Fut>(&self, fetch: Fut) -> CacheResult<Pricing>
  where
    Fut: Future<Output = Result<Pricing, RemoteError>>,
  {
    match fetch.await {
      Ok(pricing) => {
        self.cache_pricing(&pricing);
        CacheResult::from_network(pricing)
      }
      Err(e) => self.serve_cached(PRICING_KEY, &e),
    }
  }

  fn serve_cached<V: DeserializeOwned + Default>(
    &self,
    key: &str,
    error: &RemoteError,
  ) -> CacheResult<V> {
    debug!("Fetch for {} failed, serving cache: {}", key, error);
    match self.load_snapshot(key) {
      Some(snapshot) => {
        let stale = self.is_stale(snapshot.cached_at);
        CacheResult::from_cache(snapshot.value, snapshot.cached_at, stale)
      }
      None => CacheResult::missing(V::default()),
    }
  }
}
