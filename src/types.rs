//! Core types for the custody ledger.

use crate::error::{LedgerError, Result};
use crate::quantity::{Quantity, Unit};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Opaque identifier for a custody chain.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({})", self.0)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a custody event. Ids grow with insertion order, so they
/// double as the ledger-wide write sequence.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl EventId {
    pub fn next(self) -> Self {
        EventId(self.0 + 1)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Broad class of a product.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    RawMaterial,
    Intermediate,
    Refined,
}

/// Palm-oil product carried by a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProductType {
    /// Fresh fruit bunches.
    #[serde(rename = "FFB")]
    Ffb,
    /// Crude palm oil.
    #[serde(rename = "CPO")]
    Cpo,
    /// Palm kernels.
    #[serde(rename = "PK")]
    PalmKernel,
    /// Palm kernel oil.
    #[serde(rename = "PKO")]
    Pko,
    /// Palm kernel cake.
    #[serde(rename = "PKC")]
    Pkc,
    /// Refined, bleached and deodorised palm oil.
    #[serde(rename = "RBDPO")]
    Rbdpo,
    /// Palm fatty acid distillate.
    #[serde(rename = "PFAD")]
    Pfad,
}

impl ProductType {
    pub const ALL: [ProductType; 7] = [
        ProductType::Ffb,
        ProductType::Cpo,
        ProductType::PalmKernel,
        ProductType::Pko,
        ProductType::Pkc,
        ProductType::Rbdpo,
        ProductType::Pfad,
    ];

    pub fn code(self) -> &'static str {
        match self {
            ProductType::Ffb => "FFB",
            ProductType::Cpo => "CPO",
            ProductType::PalmKernel => "PK",
            ProductType::Pko => "PKO",
            ProductType::Pkc => "PKC",
            ProductType::Rbdpo => "RBDPO",
            ProductType::Pfad => "PFAD",
        }
    }

    pub fn category(self) -> ProductCategory {
        match self {
            ProductType::Ffb => ProductCategory::RawMaterial,
            ProductType::Cpo | ProductType::PalmKernel => ProductCategory::Intermediate,
            ProductType::Pko | ProductType::Pkc | ProductType::Rbdpo | ProductType::Pfad => {
                ProductCategory::Refined
            }
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ProductType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        ProductType::ALL
            .iter()
            .copied()
            .find(|p| p.code().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| LedgerError::Validation(format!("unknown product type: {}", wanted)))
    }
}

/// Lifecycle status of a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Active,
    Split,
    Merged,
    Consumed,
    Closed,
}

impl ChainStatus {
    /// Terminal chains accept no further events.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChainStatus::Active)
    }
}

/// Kind of custody event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Creation,
    Transportation,
    Processing,
    Transformation,
    Aggregation,
    Disaggregation,
}

/// Supply-chain phase in which an event happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessStep {
    Harvesting,
    Collecting,
    Processing,
    Storing,
    Shipping,
    Receiving,
}

/// Physical state of the lot after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Active,
    Inactive,
    Destroyed,
    Recalled,
    Expired,
}

impl Disposition {
    /// Dispositions that take a lot out of circulation.
    pub fn is_closing(self) -> bool {
        matches!(
            self,
            Disposition::Destroyed | Disposition::Recalled | Disposition::Expired
        )
    }
}

/// Weak reference to a facility owned by the reference-data layer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FacilityRef(pub String);

/// Weak reference to a plot of land.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlotRef(pub String);

/// Weak reference to a user.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRef(pub String);

macro_rules! ref_from_str {
    ($($ty:ident),*) => {
        $(
            impl From<&str> for $ty {
                fn from(s: &str) -> Self {
                    $ty(s.to_string())
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )*
    };
}

ref_from_str!(FacilityRef, PlotRef, UserRef);

/// Current state of a traceable lot, derived from its events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodyChain {
    pub id: ChainId,
    pub chain_code: String,
    pub product_type: ProductType,
    pub source_plot: Option<PlotRef>,
    pub source_facility: Option<FacilityRef>,
    pub destination_facility: Option<FacilityRef>,
    pub total_quantity: Quantity,
    pub remaining_quantity: Quantity,
    pub unit: Unit,
    pub status: ChainStatus,
    pub quality_grade: Option<String>,
    pub batch_number: Option<String>,
    pub harvest_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub parent_chain_ids: BTreeSet<ChainId>,
    pub child_chain_ids: BTreeSet<ChainId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of events applied to this chain.
    pub event_count: u64,
}

impl CustodyChain {
    /// Origin chains have no parents.
    pub fn is_origin(&self) -> bool {
        self.parent_chain_ids.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.child_chain_ids.is_empty()
    }
}

/// Everything needed to bring a chain into existence. Carried by the first
/// event of every chain so the registry can be rebuilt from the log alone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainGenesis {
    pub chain_code: String,
    pub product_type: ProductType,
    pub total_quantity: Quantity,
    pub unit: Unit,
    pub source_plot: Option<PlotRef>,
    pub source_facility: Option<FacilityRef>,
    pub destination_facility: Option<FacilityRef>,
    pub quality_grade: Option<String>,
    pub batch_number: Option<String>,
    pub harvest_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub parent_chain_ids: Vec<ChainId>,
}

/// A chain produced by a processing or transformation event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedOutput {
    pub chain_id: ChainId,
    pub product_type: ProductType,
    pub quantity: Quantity,
    pub unit: Unit,
}

/// How an event links chains in the lineage graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LineageLink {
    /// The event creates the chain it is attached to.
    Genesis(ChainGenesis),
    /// Mass left the chain into split children.
    SplitInto { children: Vec<ChainId> },
    /// Mass left the chain into a merged chain.
    MergedInto { target: ChainId },
    /// Part of the consumed mass became new products.
    Transformed { outputs: Vec<DerivedOutput> },
}

/// Immutable record of something that happened to a chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodyEvent {
    pub id: EventId,
    pub chain_id: ChainId,
    pub event_type: EventType,
    /// Business time supplied by the caller.
    pub event_time: DateTime<Utc>,
    /// Ledger write time.
    pub recorded_at: DateTime<Utc>,
    pub business_step: BusinessStep,
    pub disposition: Disposition,
    pub quantity: Option<Quantity>,
    pub unit: Unit,
    pub facility: Option<FacilityRef>,
    pub recorded_by: Option<UserRef>,
    pub lineage: Option<LineageLink>,
    pub notes: Option<String>,
}

impl CustodyEvent {
    pub fn genesis(&self) -> Option<&ChainGenesis> {
        match &self.lineage {
            Some(LineageLink::Genesis(g)) => Some(g),
            _ => None,
        }
    }

    /// Quantity of derived outputs declared by this event, in kilograms.
    /// `None` when the sum does not fit.
    pub fn output_kg(&self) -> Option<Quantity> {
        match &self.lineage {
            Some(LineageLink::Transformed { outputs }) => outputs.iter().try_fold(Quantity::ZERO, |acc, o| {
                acc.checked_add(o.unit.convert(o.quantity, Unit::Kilogram)?)
            }),
            _ => Some(Quantity::ZERO),
        }
    }
}

/// Input for creating an origin chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChainInput {
    pub chain_code: String,
    pub product_type: ProductType,
    pub total_quantity: Quantity,
    #[serde(default)]
    pub unit: Unit,
    #[serde(default)]
    pub source_plot: Option<PlotRef>,
    #[serde(default)]
    pub source_facility: Option<FacilityRef>,
    #[serde(default)]
    pub destination_facility: Option<FacilityRef>,
    #[serde(default)]
    pub quality_grade: Option<String>,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub harvest_date: Option<NaiveDate>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recorded_by: Option<UserRef>,
}

impl CreateChainInput {
    pub fn new(
        chain_code: impl Into<String>,
        product_type: ProductType,
        total_quantity: Quantity,
        unit: Unit,
    ) -> Self {
        Self {
            chain_code: chain_code.into(),
            product_type,
            total_quantity,
            unit,
            source_plot: None,
            source_facility: None,
            destination_facility: None,
            quality_grade: None,
            batch_number: None,
            harvest_date: None,
            expiry_date: None,
            event_time: None,
            recorded_by: None,
        }
    }

    pub fn from_plot(mut self, plot: impl Into<String>) -> Self {
        self.source_plot = Some(PlotRef(plot.into()));
        self
    }

    pub fn at_facility(mut self, facility: impl Into<String>) -> Self {
        self.source_facility = Some(FacilityRef(facility.into()));
        self
    }

    pub fn destined_for(mut self, facility: impl Into<String>) -> Self {
        self.destination_facility = Some(FacilityRef(facility.into()));
        self
    }

    pub fn with_batch(mut self, batch_number: impl Into<String>) -> Self {
        self.batch_number = Some(batch_number.into());
        self
    }

    pub fn with_quality_grade(mut self, grade: impl Into<String>) -> Self {
        self.quality_grade = Some(grade.into());
        self
    }

    pub fn harvested_on(mut self, date: NaiveDate) -> Self {
        self.harvest_date = Some(date);
        self
    }

    pub fn recorded_by(mut self, user: impl Into<String>) -> Self {
        self.recorded_by = Some(UserRef(user.into()));
        self
    }
}

/// A product declared as the output of a processing or transformation event.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    pub product_type: ProductType,
    pub quantity: Quantity,
    #[serde(default)]
    pub unit: Option<Unit>,
    #[serde(default)]
    pub chain_code: Option<String>,
    #[serde(default)]
    pub destination_facility: Option<FacilityRef>,
}

impl OutputSpec {
    pub fn new(product_type: ProductType, quantity: Quantity) -> Self {
        Self {
            product_type,
            quantity,
            unit: None,
            chain_code: None,
            destination_facility: None,
        }
    }
}

/// Input for recording an event against an existing chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEventInput {
    pub chain_id: ChainId,
    pub event_type: EventType,
    pub business_step: BusinessStep,
    pub disposition: Disposition,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub quantity: Option<Quantity>,
    #[serde(default)]
    pub unit: Option<Unit>,
    #[serde(default)]
    pub facility: Option<FacilityRef>,
    #[serde(default)]
    pub recorded_by: Option<UserRef>,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecordEventInput {
    pub fn new(
        chain_id: ChainId,
        event_type: EventType,
        business_step: BusinessStep,
        disposition: Disposition,
    ) -> Self {
        Self {
            chain_id,
            event_type,
            business_step,
            disposition,
            event_time: None,
            quantity: None,
            unit: None,
            facility: None,
            recorded_by: None,
            outputs: Vec::new(),
            notes: None,
        }
    }

    pub fn at(mut self, event_time: DateTime<Utc>) -> Self {
        self.event_time = Some(event_time);
        self
    }

    pub fn with_quantity(mut self, quantity: Quantity) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn in_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn at_facility(mut self, facility: impl Into<String>) -> Self {
        self.facility = Some(FacilityRef(facility.into()));
        self
    }

    pub fn recorded_by(mut self, user: impl Into<String>) -> Self {
        self.recorded_by = Some(UserRef(user.into()));
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// One child of a split.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitAllocation {
    pub quantity: Quantity,
    #[serde(default)]
    pub chain_code: Option<String>,
    #[serde(default)]
    pub destination_facility: Option<FacilityRef>,
    #[serde(default)]
    pub batch_number: Option<String>,
}

impl SplitAllocation {
    pub fn new(quantity: Quantity) -> Self {
        Self {
            quantity,
            chain_code: None,
            destination_facility: None,
            batch_number: None,
        }
    }
}

/// Request to split a chain into children.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRequest {
    pub allocations: Vec<SplitAllocation>,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub facility: Option<FacilityRef>,
    #[serde(default)]
    pub recorded_by: Option<UserRef>,
}

impl SplitRequest {
    pub fn new(quantities: impl IntoIterator<Item = Quantity>) -> Self {
        Self {
            allocations: quantities.into_iter().map(SplitAllocation::new).collect(),
            event_time: None,
            facility: None,
            recorded_by: None,
        }
    }

    /// Split `amount` by integer weights; the rounding remainder goes to the
    /// last child.
    pub fn proportional(amount: Quantity, weights: &[u64]) -> Result<Self> {
        let shares = amount.apportion(weights).ok_or_else(|| {
            LedgerError::Validation(
                "proportional split needs a non-negative amount and a positive total weight".into(),
            )
        })?;
        Ok(Self::new(shares))
    }

    pub fn with_allocations(allocations: Vec<SplitAllocation>) -> Self {
        Self {
            allocations,
            event_time: None,
            facility: None,
            recorded_by: None,
        }
    }

    pub fn recorded_by(mut self, user: impl Into<String>) -> Self {
        self.recorded_by = Some(UserRef(user.into()));
        self
    }

    /// Total mass requested by all allocations.
    pub fn total(&self) -> Option<Quantity> {
        Quantity::checked_sum(self.allocations.iter().map(|a| a.quantity))
    }
}

/// Request to merge chains into one.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub chain_ids: Vec<ChainId>,
    pub destination_facility: FacilityRef,
    #[serde(default)]
    pub chain_code: Option<String>,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recorded_by: Option<UserRef>,
}

impl MergeRequest {
    pub fn new(chain_ids: Vec<ChainId>, destination_facility: impl Into<String>) -> Self {
        Self {
            chain_ids,
            destination_facility: FacilityRef(destination_facility.into()),
            chain_code: None,
            event_time: None,
            recorded_by: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.chain_code = Some(code.into());
        self
    }
}

/// Ledger statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub chain_count: usize,
    pub active_chains: usize,
    pub event_count: usize,
    pub log_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_type_parsing() {
        assert_eq!("ffb".parse::<ProductType>().unwrap(), ProductType::Ffb);
        assert_eq!(" CPO ".parse::<ProductType>().unwrap(), ProductType::Cpo);
        assert_eq!("PK".parse::<ProductType>().unwrap(), ProductType::PalmKernel);
        assert!(matches!(
            "olive".parse::<ProductType>(),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(ProductType::Ffb.category(), ProductCategory::RawMaterial);
        assert_eq!(ProductType::Pko.category(), ProductCategory::Refined);
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(serde_json::to_string(&ProductType::PalmKernel).unwrap(), "\"PK\"");
        assert_eq!(serde_json::to_string(&EventType::Disaggregation).unwrap(), "\"disaggregation\"");
        assert_eq!(serde_json::to_string(&ChainStatus::Consumed).unwrap(), "\"consumed\"");
        let step: BusinessStep = serde_json::from_str("\"receiving\"").unwrap();
        assert_eq!(step, BusinessStep::Receiving);
        assert!(serde_json::from_str::<EventType>("\"teleportation\"").is_err());
    }

    #[test]
    fn test_hash_renders_as_hex() {
        let hash = Hash::from_bytes(b"CHAIN-001");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash.to_string(), hex);
        assert_ne!(Hash::from_bytes(b"CHAIN-002").to_hex(), hex);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ChainStatus::Active.is_terminal());
        for status in [ChainStatus::Split, ChainStatus::Merged, ChainStatus::Consumed, ChainStatus::Closed] {
            assert!(status.is_terminal());
        }
        assert!(Disposition::Recalled.is_closing());
        assert!(!Disposition::Inactive.is_closing());
    }
}
