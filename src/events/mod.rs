//! Event store.
//!
//! Custody events live in an append-only store with a per-chain index
//! ordered by business time. When the ledger is durable every mutation is
//! written to the log as a single checksummed batch before it is indexed.

mod log;
pub mod rules;
mod store;

pub use log::EventLog;
pub use store::{EventCursor, EventStore};
