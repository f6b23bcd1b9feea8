//! Replay contract and retry policy.

use chrono::Duration;
use std::future::Future;

use super::item::SyncItem;
use crate::error::RemoteError;

/// Resubmits one queued mutation to the remote backend.
///
/// Any `Fn(SyncItem<T>) -> impl Future<Output = Result<(), RemoteError>>`
/// closure is a replayer, which is how tests and ad-hoc callers plug in.
pub trait Replayer<T>: Send + Sync {
  fn replay(&self, item: SyncItem<T>) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

impl<T, F, Fut> Replayer<T> for F
where
  F: Fn(SyncItem<T>) -> Fut + Send + Sync,
  Fut: Future<Output = Result<(), RemoteError>> + Send,
{
  fn replay(&self, item: SyncItem<T>) -> impl Future<Output = Result<(), RemoteError>> + Send {
    self(item)
  }
}

/// How failed replays are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Rejections after which an item is quarantined; 0 never quarantines
  pub max_rejections: u32,
  /// Delay after the first rejection, doubled for each further one
  pub backoff_base: Duration,
  pub backoff_max: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_rejections: 5,
      backoff_base: Duration::seconds(30),
      backoff_max: Duration::hours(1),
    }
  }
}

impl RetryPolicy {
  /// Delay before the next attempt of an item rejected `rejections` times.
  pub fn backoff(&self, rejections: u32) -> Duration {
    let shift = rejections.saturating_sub(1).min(30);
    self
      .backoff_base
      .checked_mul(1_i32 << shift)
      .map_or(self.backoff_max, |d| d.min(self.backoff_max))
  }

  pub fn should_quarantine(&self, rejections: u32) -> bool {
    self.max_rejections > 0 && rejections >= self.max_rejections
  }
}

/// What happened to an item after a failed replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
  /// Transient failure; retried on the next pass
  Retry,
  /// Rejected; waits for its backoff to expire
  Backoff,
  /// Rejected too often; held until requeued
  Quarantined,
}

/// Tally of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
  pub attempted: usize,
  pub synced: usize,
  /// Transient failures left for the next pass
  pub failed: usize,
  pub rejected: usize,
  pub quarantined: usize,
  pub compacted: usize,
}

impl PassSummary {
  pub fn record(&mut self, outcome: FailureOutcome) {
    match outcome {
      FailureOutcome::Retry => self.failed += 1,
      FailureOutcome::Backoff => self.rejected += 1,
      FailureOutcome::Quarantined => {
        self.rejected += 1;
        self.quarantined += 1;
      }
    }
  }
}

impl std::fmt::Display for PassSummary {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{} attempted, {} synced, {} failed, {} rejected",
      self.attempted, self.synced, self.failed, self.rejected
    )?;
    if self.quarantined > 0 {
      write!(f, " ({} quarantined)", self.quarantined)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.backoff(1), Duration::seconds(30));
    assert_eq!(policy.backoff(2), Duration::seconds(60));
    assert_eq!(policy.backoff(3), Duration::seconds(120));
    assert_eq!(policy.backoff(8), Duration::hours(1));
    assert_eq!(policy.backoff(500), Duration::hours(1));
  }

  #[test]
  fn test_quarantine_threshold() {
    let policy = RetryPolicy::default();
    assert!(!policy.should_quarantine(4));
    assert!(policy.should_quarantine(5));

    let never = RetryPolicy {
      max_rejections: 0,
      ..RetryPolicy::default()
    };
    assert!(!never.should_quarantine(1_000));
  }

  #[test]
  fn test_summary_display() {
    let mut summary = PassSummary {
      attempted: 3,
      synced: 1,
      ..PassSummary::default()
    };
    summary.record(FailureOutcome::Retry);
    summary.record(FailureOutcome::Quarantined);
    assert_eq!(
      summary.to_string(),
      "3 attempted, 1 synced, 1 failed, 1 rejected (1 quarantined)"
    );
  }
}
