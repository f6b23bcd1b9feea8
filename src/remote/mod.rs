//! Hosted database backend: queued writes are replayed through it and the
//! inventory and pricing snapshots are read from it.

mod client;
mod types;

pub use client::RestClient;
pub use types::{InventoryItem, Mutation, MutationKind, Pricing};
