//! Connectivity-aware replay of the sync queue.
//!
//! The orchestrator is either idle or running a single replay pass. A pass
//! starts on an online transition, on a periodic tick, or on request, and is
//! skipped while offline or while another pass is in flight.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::connectivity::ConnectivityEvent;
use super::item::{derive_id, SyncItem};
use super::queue::{QueueStats, SyncQueue};
use super::replay::{FailureOutcome, PassSummary, Replayer, RetryPolicy};
use crate::store::KvStore;

/// Whether a replay pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Syncing,
}

/// Observable sync status for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
  pub online: bool,
  pub syncing: bool,
  /// Unsynced items, quarantined ones included
  pub pending: usize,
  pub quarantined: usize,
  /// Queue is no longer being persisted this session
  pub memory_only: bool,
  pub last_sync: Option<DateTime<Utc>>,
  pub last_pass: Option<PassSummary>,
}

impl SyncStatus {
  /// Short human-readable summary, e.g. "3 changes pending".
  pub fn badge(&self) -> String {
    let changes = match self.pending {
      1 => "1 change pending".to_string(),
      n => format!("{n} changes pending"),
    };

    match (self.online, self.syncing, self.pending) {
      (false, _, 0) => "Offline".to_string(),
      (false, _, _) => format!("Offline · {changes}"),
      (true, true, _) => format!("Syncing · {changes}"),
      (true, false, 0) => "All changes synced".to_string(),
      (true, false, _) => changes,
    }
  }
}

/// Coordinates when queued mutations are replayed.
pub struct SyncOrchestrator<T, S: KvStore + ?Sized, R> {
  queue: Mutex<SyncQueue<T, S>>,
  replayer: R,
  policy: RetryPolicy,
  retention: Duration,
  online: AtomicBool,
  syncing: AtomicBool,
  last_sync: Mutex<Option<(DateTime<Utc>, PassSummary)>>,
  status_tx: watch::Sender<SyncStatus>,
}

impl<T, S, R> SyncOrchestrator<T, S, R>
where
  T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
  S: KvStore + ?Sized + 'static,
  R: Replayer<T> + 'static,
{
  /// Create an orchestrator over `queue`. It starts offline.
  pub fn new(queue: SyncQueue<T, S>, replayer: R, policy: RetryPolicy, retention: Duration) -> Self {
    let (status_tx, _) = watch::channel(SyncStatus::default());
    let orchestrator = Self {
      queue: Mutex::new(queue),
      replayer,
      policy,
      retention,
      online: AtomicBool::new(false),
      syncing: AtomicBool::new(false),
      last_sync: Mutex::new(None),
      status_tx,
    };
    orchestrator.publish();
    orchestrator
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::Acquire)
  }

  pub fn is_syncing(&self) -> bool {
    self.syncing.load(Ordering::Acquire)
  }

  pub fn state(&self) -> SyncState {
    if self.is_syncing() {
      SyncState::Syncing
    } else {
      SyncState::Idle
    }
  }

  pub fn status(&self) -> SyncStatus {
    self.status_tx.borrow().clone()
  }

  /// Receive every status change.
  pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
    self.status_tx.subscribe()
  }

  pub fn pending_items(&self) -> Vec<SyncItem<T>> {
    self.queue().pending_items()
  }

  pub fn quarantined_items(&self) -> Vec<SyncItem<T>> {
    self.queue().quarantined_items()
  }

  pub fn load_queue(&self) -> Vec<SyncItem<T>> {
    self.queue().load_queue()
  }

  pub fn stats(&self) -> QueueStats {
    self.queue().stats()
  }

  pub fn enqueue(&self, item: SyncItem<T>) {
    self.queue().enqueue(item);
    self.publish();
  }

  /// Enqueue `data` under a freshly derived id and return the id.
  pub fn enqueue_new(&self, data: T) -> String {
    let id = {
      let mut queue = self.queue();
      let now = queue.now();
      let id = derive_id(now, &data);
      queue.enqueue(SyncItem::new(id.clone(), data, now));
      id
    };
    self.publish();
    id
  }

  pub fn requeue(&self, id: &str) -> bool {
    let released = self.queue().requeue(id);
    self.publish();
    released
  }

  /// Drop synced items older than the retention window.
  /// Pick up queue changes written through other handles on the same store.
  pub fn reload(&self) {
    self.queue().reload();
    self.publish();
  }

  pub fn compact(&self) -> usize {
    let removed = self.queue().compact(self.retention);
    self.publish();
    removed
  }

  /// Set connectivity. Returns whether it changed.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.online.swap(online, Ordering::AcqRel) != online;
    if changed {
      self.publish();
    }
    changed
  }

  /// React to a connectivity transition; returns the number of items synced.
  pub async fn handle(&self, event: ConnectivityEvent) -> usize {
    match event {
      ConnectivityEvent::Online => {
        if self.set_online(true) {
          info!("Connectivity restored, replaying queued changes");
          return self.sync_now().await;
        }
        0
      }
      ConnectivityEvent::Offline => {
        if self.set_online(false) {
          info!("Connectivity lost, changes will be queued locally");
        }
        0
      }
    }
  }

  /// Replay pending items; returns how many became synced.
  ///
  /// Returns 0 without touching the queue when offline or when a pass is
  /// already running.
  pub async fn sync_now(&self) -> usize {
    self.run_pass().await.map_or(0, |summary| summary.synced)
  }

  /// Run one replay pass. `None` if the pass was skipped.
  pub async fn run_pass(&self) -> Option<PassSummary> {
    if !self.is_online() {
      debug!("Offline, skipping sync");
      return None;
    }
    let Some(guard) = SyncGuard::acquire(&self.syncing) else {
      debug!("Sync already in flight, skipping");
      return None;
    };
    self.publish();

    let batch = {
      let mut queue = self.queue();
      // Other processes may have enqueued or settled entries since our last change
      queue.reload();
      queue.replayable_items()
    };
    let total = batch.len();
    let mut summary = PassSummary::default();

    for item in batch {
      if !self.is_online() {
        info!(
          "Went offline during sync, {} changes left for later",
          total - summary.attempted
        );
        break;
      }

      summary.attempted += 1;
      let seq = item.seq;
      let id = item.id.clone();

      match self.replayer.replay(item).await {
        Ok(()) => {
          if self.queue().record_success(seq, &id) {
            debug!("Synced {}", id);
            summary.synced += 1;
          }
        }
        Err(e) => {
          let outcome = self.queue().record_failure(seq, &id, &e, &self.policy);
          match outcome {
            Some(FailureOutcome::Quarantined) => {
              warn!("Quarantined {} after repeated rejections: {}", id, e)
            }
            Some(_) => warn!("Replay of {} failed: {}", id, e),
            None => debug!("{} left the queue during replay", id),
          }
          if let Some(outcome) = outcome {
            summary.record(outcome);
          }
        }
      }
      self.publish();
    }

    summary.compacted = self.queue().compact(self.retention);
    let finished_at = self.queue().now();
    *self.last_sync() = Some((finished_at, summary));
    drop(guard);
    self.publish();

    if summary.attempted > 0 {
      info!("Sync pass finished: {}", summary);
    }
    Some(summary)
  }

  /// Run the orchestrator in the background: a pass every `every`, plus one
  /// on each online transition received from `events`.
  pub fn spawn(
    self: Arc<Self>,
    mut events: mpsc::UnboundedReceiver<ConnectivityEvent>,
    every: std::time::Duration,
  ) -> SyncHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      let mut events_open = true;

      loop {
        tokio::select! {
          _ = &mut shutdown_rx => break,
          _ = ticker.tick() => {
            self.sync_now().await;
          }
          event = events.recv(), if events_open => match event {
            Some(event) => {
              self.handle(event).await;
            }
            None => {
              debug!("Connectivity channel closed, continuing on timer only");
              events_open = false;
            }
          },
        }
      }

      debug!("Sync loop stopped");
    });

    SyncHandle {
      shutdown: Some(shutdown_tx),
      task,
    }
  }

  fn queue(&self) -> MutexGuard<'_, SyncQueue<T, S>> {
    self.queue.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn last_sync(&self) -> MutexGuard<'_, Option<(DateTime<Utc>, PassSummary)>> {
    self.last_sync.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn publish(&self) {
    let (stats, memory_only) = {
      let queue = self.queue();
      (queue.stats(), queue.is_memory_only())
    };
    let last = *self.last_sync();

    let status = SyncStatus {
      online: self.is_online(),
      syncing: self.is_syncing(),
      pending: stats.pending,
      quarantined: stats.quarantined,
      memory_only,
      last_sync: last.map(|(at, _)| at),
      last_pass: last.map(|(_, summary)| summary),
    };

    self.status_tx.send_if_modified(|current| {
      if *current == status {
        false
      } else {
        *current = status;
        true
      }
    });
  }
}

/// Holds the in-flight flag for the duration of a pass.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for SyncGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Handle to a running orchestrator loop.
///
/// Dropping the handle aborts the loop, abandoning any in-flight pass; items
/// not yet marked synced stay pending.
pub struct SyncHandle {
  shutdown: Option<oneshot::Sender<()>>,
  task: JoinHandle<()>,
}

impl SyncHandle {
  /// Stop the loop after the current pass and wait for it to exit.
  pub async fn shutdown(mut self) {
    if let Some(tx) = self.shutdown.take() {
      let _ = tx.send(());
    }
    if let Err(e) = (&mut self.task).await {
      if !e.is_cancelled() {
        warn!("Sync loop ended abnormally: {}", e);
      }
    }
  }
}

impl Drop for SyncHandle {
  fn drop(&mut self) {
    self.task.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::RemoteError;
  use crate::store::MemoryStore;
  use crate::sync::clock::SystemClock;
  use futures::future::BoxFuture;
  use std::collections::HashMap;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration as StdDuration;

  type Calls = Arc<Mutex<HashMap<String, usize>>>;

  fn orchestrator<R: Replayer<String> + 'static>(
    replayer: R,
  ) -> SyncOrchestrator<String, MemoryStore, R> {
    let queue = SyncQueue::open(Arc::new(MemoryStore::new()), Arc::new(SystemClock)).unwrap();
    SyncOrchestrator::new(queue, replayer, RetryPolicy::default(), Duration::hours(24))
  }

  fn item(id: &str) -> SyncItem<String> {
    SyncItem::new(id, format!("meal-{id}"), Utc::now())
  }

  /// Replayer that records calls, waits a little, and fails ids starting with "fail".
  fn recording(
    calls: &Calls,
  ) -> impl Fn(SyncItem<String>) -> BoxFuture<'static, Result<(), RemoteError>> + Send + Sync + 'static
  {
    let calls = Arc::clone(calls);
    move |item: SyncItem<String>| {
      let calls = Arc::clone(&calls);
      Box::pin(async move {
        *calls.lock().unwrap().entry(item.id.clone()).or_default() += 1;
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        if item.id.starts_with("fail") {
          Err(RemoteError::NetworkUnavailable("unreachable".to_string()))
        } else {
          Ok(())
        }
      })
    }
  }

  #[tokio::test]
  async fn test_offline_sync_is_noop() {
    let calls = Calls::default();
    let orch = orchestrator(recording(&calls));
    orch.enqueue(item("A"));
    let before = orch.load_queue();

    assert_eq!(orch.sync_now().await, 0);
    assert_eq!(orch.load_queue(), before);
    assert!(calls.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_partial_failure_continues() {
    let calls = Calls::default();
    let orch = orchestrator(recording(&calls));
    orch.enqueue(item("A"));
    orch.enqueue(item("fail-B"));
    orch.enqueue(item("C"));
    orch.set_online(true);

    assert_eq!(orch.sync_now().await, 2);

    let queue = orch.load_queue();
    assert!(queue[0].synced);
    assert!(!queue[1].synced);
    assert!(queue[2].synced);

    let pending = orch.pending_items();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "fail-B");
    assert_eq!(pending[0].attempts, 1);
  }

  #[tokio::test]
  async fn test_pass_replays_entries_enqueued_elsewhere() {
    let calls = Calls::default();
    let store = Arc::new(MemoryStore::new());
    let queue = SyncQueue::open(Arc::clone(&store), Arc::new(SystemClock)).unwrap();
    let orch = SyncOrchestrator::new(
      queue,
      recording(&calls),
      RetryPolicy::default(),
      Duration::hours(24),
    );

    let mut cli: SyncQueue<String, MemoryStore> =
      SyncQueue::open(Arc::clone(&store), Arc::new(SystemClock)).unwrap();
    cli.enqueue(item("A"));
    orch.set_online(true);

    assert_eq!(orch.sync_now().await, 1);
    assert_eq!(calls.lock().unwrap().get("A"), Some(&1));

    cli.reload();
    assert!(cli.pending_items().is_empty());
  }

  #[tokio::test]
  async fn test_success_then_failure_scenario() {
    let calls = Calls::default();
    let orch = orchestrator(recording(&calls));
    orch.enqueue(item("A"));
    orch.enqueue(item("fail-B"));
    orch.set_online(true);

    assert_eq!(orch.sync_now().await, 1);
    let queue = orch.load_queue();
    assert!(queue[0].synced);
    assert!(!queue[1].synced);
    assert!(orch.pending_items().iter().any(|i| i.id == "fail-B"));
  }

  #[tokio::test]
  async fn test_concurrent_sync_never_replays_twice() {
    let calls = Calls::default();
    let orch = orchestrator(recording(&calls));
    for id in ["A", "B", "C"] {
      orch.enqueue(item(id));
    }
    orch.set_online(true);

    let (first, second) = tokio::join!(orch.sync_now(), orch.sync_now());
    assert_eq!(first + second, 3);
    assert!(first == 0 || second == 0);

    assert_eq!(orch.sync_now().await, 0);
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    assert!(calls.values().all(|&n| n == 1));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_sync_across_threads() {
    let calls = Calls::default();
    let orch = Arc::new(orchestrator(recording(&calls)));
    for n in 0..20 {
      orch.enqueue(item(&format!("item-{n}")));
    }
    orch.set_online(true);

    let tasks: Vec<_> = (0..8)
      .map(|_| {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.sync_now().await })
      })
      .collect();

    let mut total = 0;
    for task in tasks {
      total += task.await.unwrap();
    }
    total += orch.sync_now().await;

    assert_eq!(total, 20);
    assert!(calls.lock().unwrap().values().all(|&n| n == 1));
    assert!(orch.pending_items().is_empty());
  }

  #[tokio::test]
  async fn test_going_offline_mid_pass_stops() {
    let calls = Calls::default();
    let orch = orchestrator(recording(&calls));
    orch.enqueue(item("A"));
    orch.enqueue(item("B"));
    orch.set_online(true);

    let (synced, _) = tokio::join!(orch.sync_now(), async {
      orch.set_online(false);
    });

    assert_eq!(synced, 1);
    assert_eq!(orch.pending_items().len(), 1);
    assert!(!calls.lock().unwrap().contains_key("B"));
  }

  #[tokio::test]
  async fn test_rejections_quarantine_and_requeue() {
    let rejecting = |_item: SyncItem<String>| async {
      Err::<(), _>(RemoteError::RemoteRejected {
        status: Some(422),
        message: "unknown recipe".to_string(),
      })
    };
    let queue = SyncQueue::open(Arc::new(MemoryStore::new()), Arc::new(SystemClock)).unwrap();
    let policy = RetryPolicy {
      max_rejections: 1,
      ..RetryPolicy::default()
    };
    let orch = SyncOrchestrator::new(queue, rejecting, policy, Duration::hours(24));
    orch.enqueue(item("bad"));
    orch.set_online(true);

    let summary = orch.run_pass().await.unwrap();
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.quarantined, 1);
    assert_eq!(orch.status().quarantined, 1);

    // Quarantined items are skipped, not dropped
    let summary = orch.run_pass().await.unwrap();
    assert_eq!(summary.attempted, 0);
    assert_eq!(orch.pending_items().len(), 1);

    assert!(orch.requeue("bad"));
    let summary = orch.run_pass().await.unwrap();
    assert_eq!(summary.attempted, 1);
  }

  #[tokio::test]
  async fn test_status_reflects_queue() {
    let calls = Calls::default();
    let orch = orchestrator(recording(&calls));
    let status = orch.subscribe();

    orch.enqueue(item("A"));
    orch.enqueue(item("B"));
    orch.enqueue(item("fail-C"));
    assert_eq!(status.borrow().pending, 3);
    assert_eq!(orch.status().badge(), "Offline · 3 changes pending");

    orch.set_online(true);
    orch.sync_now().await;

    let current = orch.status();
    assert!(current.online);
    assert!(!current.syncing);
    assert_eq!(current.pending, 1);
    assert_eq!(current.badge(), "1 change pending");
    assert_eq!(current.last_pass.unwrap().synced, 2);
    assert_eq!(orch.state(), SyncState::Idle);
  }

  #[tokio::test]
  async fn test_enqueue_new_derives_id() {
    let calls = Calls::default();
    let orch = orchestrator(recording(&calls));
    let id = orch.enqueue_new("galley inventory count".to_string());
    assert_eq!(orch.pending_items()[0].id, id);
  }

  #[tokio::test]
  async fn test_online_event_triggers_sync() {
    let calls = Calls::default();
    let orch = Arc::new(orchestrator(recording(&calls)));
    orch.enqueue(item("A"));
    let mut status = orch.subscribe();

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = Arc::clone(&orch).spawn(rx, StdDuration::from_secs(3600));
    tx.send(ConnectivityEvent::Online).unwrap();

    tokio::time::timeout(
      StdDuration::from_secs(5),
      status.wait_for(|s| s.online && s.pending == 0),
    )
    .await
    .unwrap()
    .unwrap();

    tx.send(ConnectivityEvent::Offline).unwrap();
    tokio::time::timeout(StdDuration::from_secs(5), status.wait_for(|s| !s.online))
      .await
      .unwrap()
      .unwrap();

    handle.shutdown().await;
    assert_eq!(calls.lock().unwrap().get("A"), Some(&1));
  }

  #[tokio::test(start_paused = true)]
  async fn test_periodic_tick_retries() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let flaky = move |_item: SyncItem<String>| {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          Err(RemoteError::NetworkUnavailable("connection reset".to_string()))
        } else {
          Ok(())
        }
      }
    };

    let queue = SyncQueue::open(Arc::new(MemoryStore::new()), Arc::new(SystemClock)).unwrap();
    let orch = Arc::new(SyncOrchestrator::new(
      queue,
      flaky,
      RetryPolicy::default(),
      Duration::hours(24),
    ));
    orch.enqueue(item("A"));
    orch.set_online(true);

    let (_tx, rx) = mpsc::unbounded_channel();
    let handle = Arc::clone(&orch).spawn(rx, StdDuration::from_secs(30));

    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(orch.pending_items().len(), 1);

    tokio::time::sleep(StdDuration::from_secs(30)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(orch.pending_items().is_empty());

    handle.shutdown().await;
  }

  #[test]
  fn test_badge() {
    let mut status = SyncStatus::default();
    assert_eq!(status.badge(), "Offline");

    status.online = true;
    assert_eq!(status.badge(), "All changes synced");

    status.pending = 3;
    assert_eq!(status.badge(), "3 changes pending");

    status.syncing = true;
    assert_eq!(status.badge(), "Syncing · 3 changes pending");
  }
}
