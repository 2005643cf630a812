//! Chain registry.
//!
//! The registry is a projection: every chain value is the result of applying
//! that chain's events in insertion order, and can be rebuilt from the log.

mod manager;
pub(crate) mod projection;

pub use manager::ChainRegistry;
