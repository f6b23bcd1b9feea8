//! Offline read cache for remote data.
//!
//! Snapshots of remote reads are kept in the key-value store so the app can
//! show the last known inventory and prices while the vessel is offline:
//! - Each snapshot carries a schema version and the time it was stored
//! - Reads never fail; missing or unreadable snapshots read as empty
//! - Writes that cannot be persisted are kept in memory for the session

mod layer;
mod traits;

pub use layer::{CacheManager, INVENTORY_KEY, PRICING_KEY};
pub use traits::CacheResult;
