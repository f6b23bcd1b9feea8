//! Core types for the caching system.

use chrono::{DateTime, Utc};

/// A cached value together with when it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSnapshot<T> {
  pub value: T,
  /// Epoch for snapshots written before timestamps were recorded
  pub cached_at: DateTime<Utc>,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Network failed and nothing was cached; `data` is an empty default.
  pub fn missing(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Missing,
      cached_at: None,
    }
  }

  /// Whether the data was served without reaching the network.
  pub fn is_offline(&self) -> bool {
    self.source != CacheSource::Network
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Network unavailable, cached data is recent
  CacheFresh,
  /// Network unavailable, cached data is older than the stale time
  CacheStale,
  /// Network unavailable and nothing cached
  Missing,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Network => write!(f, "live"),
      Self::CacheFresh => write!(f, "cached"),
      Self::CacheStale => write!(f, "cached, stale"),
      Self::Missing => write!(f, "unavailable"),
    }
  }
}
