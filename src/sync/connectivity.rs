//! Connectivity detection by polling.
//!
//! A terminal process has no "online"/"offline" events to listen to, so a
//! probe is polled at a fixed interval and only transitions are reported.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// A change in network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
  Online,
  Offline,
}

/// Checks whether the remote backend is reachable.
pub trait Probe: Send + Sync {
  fn check(&self) -> impl Future<Output = bool> + Send;
}

/// Ask `probe` once, counting no answer within `limit` as unreachable.
pub async fn check_within<P: Probe>(probe: &P, limit: Duration) -> bool {
  match tokio::time::timeout(limit, probe.check()).await {
    Ok(reachable) => reachable,
    Err(_) => {
      debug!("No answer from the backend within {:?}", limit);
      false
    }
  }
}

/// Polls a [`Probe`] and turns its answers into transition events.
pub struct ConnectivityMonitor<P> {
  probe: P,
  every: Duration,
  last: Option<bool>,
}

impl<P: Probe + 'static> ConnectivityMonitor<P> {
  pub fn new(probe: P, every: Duration) -> Self {
    Self {
      probe,
      every,
      last: None,
    }
  }

  /// Record a probe result. The first result always produces an event;
  /// after that only changes do.
  pub fn observe(&mut self, reachable: bool) -> Option<ConnectivityEvent> {
    if self.last == Some(reachable) {
      return None;
    }
    self.last = Some(reachable);
    Some(if reachable {
      ConnectivityEvent::Online
    } else {
      ConnectivityEvent::Offline
    })
  }

  /// Poll in the background until the receiving side goes away.
  pub fn spawn(mut self, tx: mpsc::UnboundedSender<ConnectivityEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.every);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;
        let reachable = self.probe.check().await;
        if let Some(event) = self.observe(reachable) {
          debug!("Connectivity changed: {:?}", event);
          if tx.send(event).is_err() {
            break;
          }
        }
      }
    })
  }
}
