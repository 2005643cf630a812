//! Subscriptions to committed ledger mutations.
//!
//! Each subscriber owns a bounded channel. A mutation is published after it
//! commits as its events in append order followed by the resulting chain
//! states. Subscribers that fall behind are dropped rather than slowing the
//! writer.
//!
//! # Example
//!
//! ```ignore
//! let handle = ledger.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::chains(vec![chain.id]),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(LedgerNotification::EventRecorded { event }) => println!("event {}", event.id),
//!         Ok(LedgerNotification::ChainChanged { chain }) => println!("{:?}", chain.status),
//!         Ok(LedgerNotification::Dropped { .. }) | Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    ChainSummary, DropReason, EventSummary, LedgerNotification, SubscriptionConfig,
    SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};
