//! Schema-version envelope for persisted documents.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// A persisted document tagged with the schema version that wrote it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Versioned<T> {
  pub schema_version: u32,
  /// When the document was written
  pub saved_at: DateTime<Utc>,
  pub data: T,
}

impl<T> Versioned<T> {
  pub fn new(schema_version: u32, saved_at: DateTime<Utc>, data: T) -> Self {
    Self {
      schema_version,
      saved_at,
      data,
    }
  }
}

impl<T: DeserializeOwned> Versioned<T> {
  /// Decode a stored document.
  ///
  /// Documents written before versioning existed carry no envelope; they are
  /// returned as version 0 with an epoch `saved_at`. Documents from a newer
  /// schema than `current` are refused so they are never overwritten.
  pub fn decode(key: &str, raw: &str, current: u32) -> Result<Self, StoreError> {
    let value: Value = serde_json::from_str(raw)?;

    match envelope_version(&value) {
      Some(found) if found > u64::from(current) => Err(StoreError::SchemaMismatch {
        key: key.to_string(),
        found: u32::try_from(found).unwrap_or(u32::MAX),
        expected: current,
      }),
      Some(_) => Ok(serde_json::from_value(value)?),
      None => Ok(Self {
        schema_version: 0,
        saved_at: DateTime::<Utc>::default(),
        data: serde_json::from_value(value)?,
      }),
    }
  }
}

fn envelope_version(value: &Value) -> Option<u64> {
  let obj = value.as_object()?;
  if !obj.contains_key("data") {
    return None;
  }
  obj.get("schema_version").and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  #[test]
  fn test_decode_envelope() {
    let raw = r#"{"schema_version":1,"saved_at":"2026-03-01T08:00:00Z","data":[1,2,3]}"#;
    let doc: Versioned<Vec<u8>> = Versioned::decode("slot", raw, 1).unwrap();
    assert_eq!(doc.schema_version, 1);
    assert_eq!(doc.data, vec![1, 2, 3]);
  }

  #[test]
  fn test_decode_bare_document_is_version_zero() {
    let doc: Versioned<BTreeMap<String, f64>> =
      Versioned::decode("cache:pricing", r#"{"milk":2.5}"#, 1).unwrap();
    assert_eq!(doc.schema_version, 0);
    assert_eq!(doc.data.get("milk"), Some(&2.5));
  }

  #[test]
  fn test_decode_newer_version_refused() {
    let raw = r#"{"schema_version":7,"saved_at":"2026-03-01T08:00:00Z","data":[]}"#;
    let err = Versioned::<Vec<u8>>::decode("sync_queue", raw, 1).unwrap_err();
    assert!(matches!(
      err,
      StoreError::SchemaMismatch {
        found: 7,
        expected: 1,
        ..
      }
    ));
  }
}
