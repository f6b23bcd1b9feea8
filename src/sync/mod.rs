//! Local-first write queue with opportunistic replay.
//!
//! Mutations made while the backend is unreachable are queued locally and
//! replayed when connectivity returns or on a periodic tick:
//! - [`SyncQueue`]: ordered, persisted queue of [`SyncItem`]s
//! - [`SyncOrchestrator`]: decides when to replay and exposes [`SyncStatus`]
//! - [`ConnectivityMonitor`]: turns a polled [`Probe`] into online/offline events
//!
//! Failed replays are never dropped. Transient failures retry on the next
//! pass; rejected mutations back off and are eventually quarantined until
//! someone requeues them.

mod clock;
mod connectivity;
mod item;
mod orchestrator;
mod queue;
mod replay;

pub use clock::{Clock, SystemClock};
pub use connectivity::{check_within, ConnectivityEvent, ConnectivityMonitor, Probe};
pub use item::{ItemState, SyncItem};
pub use orchestrator::{SyncHandle, SyncOrchestrator, SyncStatus};
pub use queue::SyncQueue;
pub use replay::{Replayer, RetryPolicy};
