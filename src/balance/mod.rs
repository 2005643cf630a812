//! Mass-balance validation and lineage queries.
//!
//! Reports are derived views: they are recomputed from the registry and the
//! event store on every call and never cached. A report with discrepancies is
//! a normal result, not an error.

pub(crate) mod lineage;
mod report;
mod validator;

pub use lineage::{Direction, TraversalLimits};
pub use report::{Discrepancy, DiscrepancyKind, MassBalanceReport};
pub use validator::MassBalanceValidator;
