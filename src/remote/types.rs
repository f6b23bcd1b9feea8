use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ingredient name to unit price
pub type Pricing = BTreeMap<String, f64>;

/// A stock line in the galley inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub name: String,
  #[serde(default)]
  pub quantity: f64,
  #[serde(default)]
  pub unit: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<String>,
}

/// Kind of write a queued mutation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
  Insert,
  Update,
  Upsert,
  Delete,
}

impl MutationKind {
  /// Whether the mutation targets an existing row by key
  pub fn needs_key(self) -> bool {
    matches!(self, Self::Update | Self::Delete)
  }
}

impl std::fmt::Display for MutationKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Insert => write!(f, "insert"),
      Self::Update => write!(f, "update"),
      Self::Upsert => write!(f, "upsert"),
      Self::Delete => write!(f, "delete"),
    }
  }
}

impl std::str::FromStr for MutationKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "insert" => Ok(Self::Insert),
      "update" => Ok(Self::Update),
      "upsert" => Ok(Self::Upsert),
      "delete" => Ok(Self::Delete),
      other => Err(format!("unknown mutation kind '{}'", other)),
    }
  }
}

/// A write against one backend table, as stored in the sync queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
  pub table: String,
  pub kind: MutationKind,
  /// Primary key of the target row (update and delete)
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub key: Option<String>,
  #[serde(default)]
  pub record: serde_json::Value,
}

impl Mutation {
  pub fn insert(table: impl Into<String>, record: serde_json::Value) -> Self {
    Self {
      table: table.into(),
      kind: MutationKind::Insert,
      key: None,
      record,
    }
  }

  pub fn update(table: impl Into<String>, key: impl Into<String>, record: serde_json::Value) -> Self {
    Self {
      table: table.into(),
      kind: MutationKind::Update,
      key: Some(key.into()),
      record,
    }
  }

  pub fn delete(table: impl Into<String>, key: impl Into<String>) -> Self {
    Self {
      table: table.into(),
      kind: MutationKind::Delete,
      key: Some(key.into()),
      record: serde_json::Value::Null,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_kind_parse() {
    assert_eq!("UPSERT".parse::<MutationKind>(), Ok(MutationKind::Upsert));
    assert!("merge".parse::<MutationKind>().is_err());
    assert!(MutationKind::Delete.needs_key());
    assert!(!MutationKind::Insert.needs_key());
  }

  #[test]
  fn test_mutation_wire_shape() {
    let m = Mutation::update("meal_plans", "42", json!({"servings": 14}));
    let value = serde_json::to_value(&m).unwrap();
    assert_eq!(
      value,
      json!({"table": "meal_plans", "kind": "update", "key": "42", "record": {"servings": 14}})
    );
  }

  #[test]
  fn test_inventory_defaults() {
    let item: InventoryItem = serde_json::from_str(r#"{"name":"rice"}"#).unwrap();
    assert_eq!(item.quantity, 0.0);
    assert!(item.unit.is_empty());
  }
}
