//! Queued mutation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A mutation waiting to be replayed against the remote backend.
///
/// Only `id`, `data` and `synced` are required on disk; the bookkeeping
/// fields default so queues written by older clients still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem<T> {
  /// Caller-assigned identifier. Not required to be unique.
  pub id: String,
  /// Opaque payload handed to the replayer
  pub data: T,
  pub synced: bool,
  #[serde(default)]
  pub enqueued_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub synced_at: Option<DateTime<Utc>>,
  /// Replay attempts that did not succeed
  #[serde(default)]
  pub attempts: u32,
  /// Attempts the remote explicitly refused
  #[serde(default)]
  pub rejections: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
  /// Earliest time the next replay may happen (set after a rejection)
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_attempt_at: Option<DateTime<Utc>>,
  /// Excluded from automatic replay until requeued
  #[serde(default)]
  pub quarantined: bool,
  /// Position handle assigned by the queue; distinguishes duplicate ids.
  /// Persisted so every process sharing the store agrees on it. 0 means
  /// not yet assigned.
  #[serde(default, skip_serializing_if = "is_unassigned")]
  pub(crate) seq: u64,
}

/// Coarse lifecycle state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
  Pending,
  Waiting,
  Quarantined,
  Synced,
}

impl std::fmt::Display for ItemState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Pending => write!(f, "pending"),
      Self::Waiting => write!(f, "backoff"),
      Self::Quarantined => write!(f, "quarantined"),
      Self::Synced => write!(f, "synced"),
    }
  }
}

impl<T> SyncItem<T> {
  pub fn new(id: impl Into<String>, data: T, enqueued_at: DateTime<Utc>) -> Self {
    Self {
      id: id.into(),
      data,
      synced: false,
      enqueued_at,
      synced_at: None,
      attempts: 0,
      rejections: 0,
      last_error: None,
      next_attempt_at: None,
      quarantined: false,
      seq: 0,
    }
  }

  /// Whether replay may pick this item up at `now`.
  pub fn is_replayable(&self, now: DateTime<Utc>) -> bool {
    !self.synced && !self.quarantined && self.next_attempt_at.map_or(true, |at| at <= now)
  }

  pub fn state(&self, now: DateTime<Utc>) -> ItemState {
    if self.synced {
      ItemState::Synced
    } else if self.quarantined {
      ItemState::Quarantined
    } else if self.is_replayable(now) {
      ItemState::Pending
    } else {
      ItemState::Waiting
    }
  }
}

fn is_unassigned(seq: &u64) -> bool {
  *seq == 0
}

/// Derive an id from the enqueue time and payload: `<millis>-<12 hex>`.
///
/// A process-local counter is mixed into the digest so identical payloads
/// enqueued within the same millisecond still get distinct ids.
pub fn derive_id<T: Serialize>(now: DateTime<Utc>, data: &T) -> String {
  let mut hasher = Sha256::new();
  hasher.update(serde_json::to_vec(data).unwrap_or_default());
  hasher.update(ID_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
  let digest = hex::encode(hasher.finalize());
  format!("{}-{}", now.timestamp_millis(), &digest[..12])
}
