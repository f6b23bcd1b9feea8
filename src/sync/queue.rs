//! Sync queue storage and management.
//!
//! The store slot is the source of truth. Every change re-reads the slot,
//! applies itself and writes the result back in one store update, so several
//! processes sharing a database never overwrite each other's entries. The
//! in-memory copy mirrors the slot as of the last change or [`SyncQueue::reload`].
//! If the store stops accepting writes the queue keeps working in memory for
//! the rest of the session.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::item::SyncItem;
use super::replay::{FailureOutcome, RetryPolicy};
use crate::error::{RemoteError, StoreError};
use crate::store::{KvStore, Versioned};

/// Store slot holding the queue.
pub const QUEUE_KEY: &str = "sync_queue";

/// Current on-disk schema of the queue document.
pub const QUEUE_SCHEMA_VERSION: u32 = 1;

/// Ordered queue of mutations awaiting remote confirmation.
pub struct SyncQueue<T, S: KvStore + ?Sized> {
  store: Arc<S>,
  clock: Arc<dyn Clock>,
  items: Vec<SyncItem<T>>,
  memory_only: bool,
}

impl<T, S> SyncQueue<T, S>
where
  T: Clone + Serialize + DeserializeOwned,
  S: KvStore + ?Sized,
{
  /// Load the persisted queue from `store`.
  ///
  /// An unreadable store yields an empty, memory-only queue. A queue written
  /// by a newer schema is an error so it is never clobbered.
  pub fn open(store: Arc<S>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
    let mut queue = Self {
      store,
      clock,
      items: Vec::new(),
      memory_only: false,
    };

    let raw = match queue.store.get_raw(QUEUE_KEY) {
      Ok(raw) => raw,
      Err(StoreError::Unavailable(e)) => {
        warn!("Sync queue storage unavailable, keeping changes in memory only: {}", e);
        queue.memory_only = true;
        None
      }
      Err(e) => return Err(e),
    };

    let (items, schema_version) = decode_items(raw.as_deref())?;
    queue.items = items;

    if schema_version < QUEUE_SCHEMA_VERSION {
      info!(
        "Upgrading sync queue from schema {} to {}",
        schema_version, QUEUE_SCHEMA_VERSION
      );
      queue.modify(|_, _| Some(()));
    }

    debug!("Loaded sync queue with {} items", queue.items.len());
    Ok(queue)
  }

  /// Re-read the slot to pick up changes made through other handles.
  ///
  /// Keeps the current copy if the slot cannot be read.
  pub fn reload(&mut self) {
    if self.memory_only {
      return;
    }

    match self
      .store
      .get_raw(QUEUE_KEY)
      .and_then(|raw| decode_items(raw.as_deref()))
    {
      Ok((items, _)) => self.items = items,
      Err(e) => warn!("Failed to reload sync queue, keeping the in-memory copy: {}", e),
    }
  }

  /// Append an item and persist. Duplicate ids are kept as separate entries.
  pub fn enqueue(&mut self, item: SyncItem<T>) {
    debug!("Enqueued {}", item.id);
    self.modify(|items, _| {
      let mut entry = item.clone();
      entry.seq = next_seq(items);
      items.push(entry);
      Some(())
    });
  }

  /// All items in insertion order.
  pub fn load_queue(&self) -> Vec<SyncItem<T>> {
    self.items.clone()
  }

  pub fn items(&self) -> &[SyncItem<T>] {
    &self.items
  }

  /// Mark the first entry with `id` as synced.
  ///
  /// Returns false (and changes nothing) if there is no such entry or it is
  /// already synced.
  pub fn mark_synced(&mut self, id: &str) -> bool {
    self
      .modify(|items, now| match items.iter_mut().find(|item| item.id == id) {
        Some(item) if !item.synced => {
          settle(item, now);
          Some(())
        }
        _ => None,
      })
      .is_some()
  }

  /// Items not yet synced, in insertion order. Includes quarantined items.
  pub fn pending_items(&self) -> Vec<SyncItem<T>> {
    self.items.iter().filter(|item| !item.synced).cloned().collect()
  }

  /// Items replay may attempt right now, in insertion order.
  pub fn replayable_items(&self) -> Vec<SyncItem<T>> {
    let now = self.clock.now();
    self
      .items
      .iter()
      .filter(|item| item.is_replayable(now))
      .cloned()
      .collect()
  }

  pub fn quarantined_items(&self) -> Vec<SyncItem<T>> {
    self
      .items
      .iter()
      .filter(|item| !item.synced && item.quarantined)
      .cloned()
      .collect()
  }

  /// Mark the entry `seq` holding `id` as synced.
  pub(crate) fn record_success(&mut self, seq: u64, id: &str) -> bool {
    self
      .modify(|items, now| match find_entry(items, seq, id) {
        Some(item) if !item.synced => {
          settle(item, now);
          Some(())
        }
        _ => None,
      })
      .is_some()
  }

  /// Record a failed replay of the entry `seq` holding `id` and apply
  /// `policy`.
  pub(crate) fn record_failure(
    &mut self,
    seq: u64,
    id: &str,
    error: &RemoteError,
    policy: &RetryPolicy,
  ) -> Option<FailureOutcome> {
    self.modify(|items, now| {
      let item = find_entry(items, seq, id)?;
      if item.synced {
        return None;
      }

      item.attempts += 1;
      item.last_error = Some(error.to_string());

      let outcome = if error.is_transient() {
        FailureOutcome::Retry
      } else {
        item.rejections += 1;
        if policy.should_quarantine(item.rejections) {
          item.quarantined = true;
          item.next_attempt_at = None;
          FailureOutcome::Quarantined
        } else {
          item.next_attempt_at = Some(now + policy.backoff(item.rejections));
          FailureOutcome::Backoff
        }
      };
      Some(outcome)
    })
  }

  /// Release the first quarantined entry with `id` back into replay.
  pub fn requeue(&mut self, id: &str) -> bool {
    let released = self
      .modify(|items, _| {
        let item = items
          .iter_mut()
          .find(|item| item.id == id && !item.synced && item.quarantined)?;
        item.quarantined = false;
        item.rejections = 0;
        item.next_attempt_at = None;
        Some(())
      })
      .is_some();

    if released {
      info!("Requeued quarantined item {}", id);
    }
    released
  }

  /// Drop synced entries settled more than `retention` ago.
  pub fn compact(&mut self, retention: Duration) -> usize {
    let cutoff = self.clock.now() - retention;
    let removed = self
      .modify(|items, _| {
        let before = items.len();
        items.retain(|item| !(item.synced && item.synced_at.map_or(true, |at| at <= cutoff)));
        let removed = before - items.len();
        (removed > 0).then_some(removed)
      })
      .unwrap_or(0);

    if removed > 0 {
      debug!("Compacted {} synced items", removed);
    }
    removed
  }

  pub fn stats(&self) -> QueueStats {
    let mut stats = QueueStats::default();
    for item in &self.items {
      if item.synced {
        stats.synced += 1;
        continue;
      }
      stats.pending += 1;
      if item.quarantined {
        stats.quarantined += 1;
      }
      stats.oldest_pending = Some(match stats.oldest_pending {
        Some(oldest) => oldest.min(item.enqueued_at),
        None => item.enqueued_at,
      });
    }
    stats
  }

  /// Whether persistence has been abandoned for this session.
  pub fn is_memory_only(&self) -> bool {
    self.memory_only
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  /// Apply `op` to the stored queue and write the result back.
  ///
  /// `op` returns `None` when it changed nothing, and the slot is then left
  /// as is. The in-memory copy is replaced by what the store held plus the
  /// change. Once the store fails, `op` runs on the in-memory copy only.
  fn modify<R>(
    &mut self,
    mut op: impl FnMut(&mut Vec<SyncItem<T>>, DateTime<Utc>) -> Option<R>,
  ) -> Option<R> {
    let now = self.clock.now();
    if self.memory_only {
      return op(&mut self.items, now);
    }

    let mut applied = None;
    let result = self.store.update(QUEUE_KEY, &mut |raw: Option<String>| {
      let (mut items, _) = decode_items::<T>(raw.as_deref())?;
      let outcome = op(&mut items, now);
      let encoded = match outcome {
        Some(_) => Some(serde_json::to_string(&Versioned::new(
          QUEUE_SCHEMA_VERSION,
          now,
          &items,
        ))?),
        None => None,
      };
      applied = Some((items, outcome));
      Ok(encoded)
    });

    if let Err(e) = result {
      warn!("Failed to persist sync queue, continuing in memory only: {}", e);
      self.memory_only = true;
    }

    match applied {
      Some((items, outcome)) => {
        self.items = items;
        outcome
      }
      // The slot could not be read at all
      None => op(&mut self.items, now),
    }
  }
}

/// Decode the queue slot, giving every entry a distinct `seq`.
///
/// Entries without one (legacy documents) are numbered after the highest
/// existing `seq`, in order, so every reader assigns the same numbers.
fn decode_items<T: DeserializeOwned>(
  raw: Option<&str>,
) -> Result<(Vec<SyncItem<T>>, u32), StoreError> {
  let Some(raw) = raw else {
    return Ok((Vec::new(), QUEUE_SCHEMA_VERSION));
  };

  let doc: Versioned<Vec<SyncItem<T>>> = Versioned::decode(QUEUE_KEY, raw, QUEUE_SCHEMA_VERSION)?;
  let mut items = doc.data;
  let mut next = next_seq(&items);
  let mut seen = HashSet::new();
  for item in &mut items {
    if item.seq == 0 || !seen.insert(item.seq) {
      item.seq = next;
      seen.insert(next);
      next += 1;
    }
  }
  Ok((items, doc.schema_version))
}

fn next_seq<T>(items: &[SyncItem<T>]) -> u64 {
  items.iter().map(|item| item.seq).max().unwrap_or(0) + 1
}

fn find_entry<'a, T>(
  items: &'a mut [SyncItem<T>],
  seq: u64,
  id: &str,
) -> Option<&'a mut SyncItem<T>> {
  items.iter_mut().find(|item| item.seq == seq && item.id == id)
}

fn settle<T>(item: &mut SyncItem<T>, now: DateTime<Utc>) {
  item.synced = true;
  item.synced_at = Some(now);
  item.next_attempt_at = None;
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
  /// Unsynced items, quarantined ones included
  pub pending: usize,
  pub synced: usize,
  pub quarantined: usize,
  pub oldest_pending: Option<DateTime<Utc>>,
}
