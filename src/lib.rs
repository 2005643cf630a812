//! # Custody Ledger
//!
//! A chain-of-custody and mass-balance ledger for palm-oil supply chains.
//! Physical lots are tracked as custody chains; everything that happens to a
//! lot is an immutable event, and chain state is a projection of those events.
//!
//! ## Core Concepts
//!
//! - **Chains**: lots of one product with a total and a remaining quantity
//! - **Events**: append-only provenance records, optionally persisted to a log
//! - **Split/Merge**: partition one lot or combine several while conserving mass
//! - **Mass balance**: input = output + waste over a chain's lineage, within tolerance
//!
//! ## Example
//!
//! ```ignore
//! use custody_ledger::{Ledger, LedgerConfig, CreateChainInput, ProductType, Quantity, SplitRequest, Unit};
//!
//! let ledger = Ledger::open(LedgerConfig::durable("./custody"))?;
//!
//! let ffb = ledger.create_chain(
//!     CreateChainInput::new("CHAIN-001", ProductType::Ffb, Quantity::whole(1000), Unit::Kilogram)
//!         .from_plot("PLOT-7"),
//! )?;
//!
//! let children = ledger.split(ffb.id, SplitRequest::new([Quantity::whole(600), Quantity::whole(400)]))?;
//!
//! let report = ledger.validate_mass_balance(children[0].id)?;
//! assert!(report.is_valid);
//! ```

pub mod api;
pub mod balance;
pub mod cancel;
pub mod config;
mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod locks;
pub mod quantity;
pub mod reference;
pub mod registry;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use api::{ApiError, ApiRequest, ChainQuery, ChainView, CustodyApi, RecordEventResponse};
pub use balance::{Discrepancy, DiscrepancyKind, MassBalanceReport, MassBalanceValidator};
pub use cancel::CancelToken;
pub use config::{LedgerConfig, YieldTable};
pub use error::{ErrorKind, LedgerError, Result};
pub use events::{EventCursor, EventStore};
pub use ledger::{Ledger, RecordedEvent};
pub use locks::{ChainGuard, ChainLocks};
pub use quantity::{ParseQuantityError, Quantity, Unit};
pub use reference::{Facility, InMemoryDirectory, OpenDirectory, Plot, ReferenceDirectory, User};
pub use registry::ChainRegistry;
pub use subscriptions::{
    ChainSummary, DropReason, EventSummary, LedgerNotification, SubscriptionConfig,
    SubscriptionFilter, SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::*;
