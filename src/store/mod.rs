//! Local key-value persistence.
//!
//! Everything the sync layer keeps across sessions lives in a handful of
//! named slots, each holding a JSON document:
//! - `sync_queue`: pending mutations
//! - `cache:inventory`, `cache:pricing`: last-known-good remote snapshots

mod kv;
mod sqlite;
mod versioned;

pub use kv::{KvStore, KvStoreExt, MemoryStore, UnavailableStore};
pub use sqlite::SqliteStore;
pub use versioned::Versioned;

