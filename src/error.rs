//! Typed errors for the storage and remote layers.
//!
//! Application code wraps these in `color_eyre::Report`; the sync and cache
//! layers match on them to decide between degrading, retrying and
//! quarantining.

use thiserror::Error;

/// Errors from the local key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The persistent medium cannot be read or written (disk full, locked,
  /// permissions, storage disabled). Callers degrade to memory-only.
  #[error("storage unavailable: {0}")]
  Unavailable(String),

  #[error("failed to (de)serialize stored value: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A persisted blob was written by a newer schema than this build knows.
  #[error("slot '{key}' has schema version {found}, expected at most {expected}")]
  SchemaMismatch {
    key: String,
    found: u32,
    expected: u32,
  },
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> Self {
    Self::Unavailable(e.to_string())
  }
}

/// Errors from the remote backend, for both replayed writes and reads.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
  /// The backend could not be reached or answered with a transient status.
  #[error("network unavailable: {0}")]
  NetworkUnavailable(String),

  /// The backend was reached and refused the request.
  #[error("remote rejected request{}: {message}", .status.as_ref().map(|s| format!(" ({s})")).unwrap_or_default())]
  RemoteRejected {
    status: Option<u16>,
    message: String,
  },

  #[error("failed to decode remote response: {0}")]
  Decode(String),
}

impl RemoteError {
  /// Whether retrying later without changes could succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::NetworkUnavailable(_))
  }

  /// Classify an HTTP status code that is not a success.
  pub fn from_status(status: u16, body: &str) -> Self {
    match status {
      408 | 429 | 500..=599 => Self::NetworkUnavailable(format!("HTTP {status}: {body}")),
      _ => Self::RemoteRejected {
        status: Some(status),
        message: body.to_string(),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_classification() {
    assert!(RemoteError::from_status(503, "down").is_transient());
    assert!(RemoteError::from_status(429, "slow down").is_transient());
    assert!(RemoteError::from_status(408, "timeout").is_transient());

    let rejected = RemoteError::from_status(409, "duplicate key");
    assert!(!rejected.is_transient());
    assert_eq!(
      rejected,
      RemoteError::RemoteRejected {
        status: Some(409),
        message: "duplicate key".to_string()
      }
    );
  }

  #[test]
  fn test_rejected_display() {
    let err = RemoteError::RemoteRejected {
      status: Some(422),
      message: "bad quantity".to_string(),
    };
    assert_eq!(err.to_string(), "remote rejected request (422): bad quantity");

    let err = RemoteError::RemoteRejected {
      status: None,
      message: "nope".to_string(),
    };
    assert_eq!(err.to_string(), "remote rejected request: nope");
  }
}
