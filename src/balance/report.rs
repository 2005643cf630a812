use crate::quantity::{Quantity, Unit};
use crate::types::{ChainId, EventId};
use serde::{Deserialize, Serialize};

/// What a discrepancy is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Input differs from output plus waste by more than the tolerance.
    MassImbalance,
    /// A transformation output is off its expected yield.
    YieldVariance,
    /// An event produced more than it consumed and no yield factor covers it.
    OutputExceedsInput,
    /// Nothing entered the component.
    ZeroInput,
}

/// A single mass-balance finding. Quantities are in kilograms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub expected: Quantity,
    pub actual: Quantity,
    /// `actual - expected`.
    pub variance: Quantity,
    pub description: String,
    pub chain_id: Option<ChainId>,
    pub event_id: Option<EventId>,
}

/// Conservation metrics for the lineage component of one chain.
///
/// Recomputed on every request; never stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MassBalanceReport {
    pub chain_id: ChainId,
    pub chain_code: String,
    pub is_valid: bool,
    pub total_input: Quantity,
    pub total_output: Quantity,
    pub total_waste: Quantity,
    /// `total_output / total_input`, or 0 without input.
    pub efficiency: f64,
    pub tolerance: Quantity,
    /// Always kilograms.
    pub unit: Unit,
    pub chains_examined: usize,
    pub origin_chain_ids: Vec<ChainId>,
    pub discrepancies: Vec<Discrepancy>,
}

impl MassBalanceReport {
    /// `total_input - (total_output + total_waste)`.
    pub fn imbalance(&self) -> Quantity {
        self.total_input - (self.total_output + self.total_waste)
    }

    pub fn has(&self, kind: DiscrepancyKind) -> bool {
        self.discrepancies.iter().any(|d| d.kind == kind)
    }
}
