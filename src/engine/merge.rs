//! Aggregation: several chains of one product combined into a new chain.

use super::{common, EventDraft, Mutation};
use crate::error::{LedgerError, Result};
use crate::quantity::{Quantity, Unit};
use crate::reference::ReferenceDirectory;
use crate::registry::ChainRegistry;
use crate::types::{
    BusinessStep, ChainGenesis, ChainStatus, CustodyChain, EventType, LineageLink, MergeRequest,
};
use chrono::Utc;
use std::sync::Arc;

/// Plan merging `sources` into one new chain at the request's destination.
///
/// Every source gives up all of its remaining mass. Sources stated in
/// different units are merged in kilograms.
pub(crate) fn plan_merge(
    sources: &[Arc<CustodyChain>],
    request: &MergeRequest,
    registry: &ChainRegistry,
    directory: &dyn ReferenceDirectory,
) -> Result<Mutation> {
    if sources.len() < 2 {
        return Err(LedgerError::EmptySet {
            required: 2,
            got: sources.len(),
        });
    }
    if let Some(inactive) = sources.iter().find(|c| c.status != ChainStatus::Active) {
        return Err(LedgerError::InvalidEvent(format!(
            "chain {} is {:?} and cannot be merged",
            inactive.chain_code, inactive.status
        )));
    }
    let product_type = sources[0].product_type;
    if let Some(other) = sources.iter().find(|c| c.product_type != product_type) {
        return Err(LedgerError::ProductTypeMismatch {
            expected: product_type,
            found: other.product_type,
        });
    }
    if let Some(empty) = sources.iter().find(|c| c.remaining_quantity.is_zero()) {
        return Err(LedgerError::InsufficientQuantity {
            chain: empty.chain_code.clone(),
            requested: empty.remaining_quantity,
            available: Quantity::ZERO,
        });
    }

    directory.require_facility(&request.destination_facility)?;
    if let Some(user) = &request.recorded_by {
        directory.require_user(user)?;
    }

    let unit = common(sources.iter().map(|c| c.unit)).unwrap_or(Unit::Kilogram);
    let total = Quantity::checked_sum(sources.iter().map(|c| {
        if c.unit == unit {
            c.remaining_quantity
        } else {
            c.unit.to_kg(c.remaining_quantity)
        }
    }))
    .ok_or_else(|| LedgerError::Validation("merged total overflows".into()))?;

    let mut mutation = Mutation::new();
    let id = registry.allocate_id();
    let code = mutation.claim_code(registry, request.chain_code.as_deref(), "MRG", id.0 as usize)?;
    let event_time = request.event_time.unwrap_or_else(Utc::now);
    let facility = Some(request.destination_facility.clone());

    for source in sources {
        let draft = EventDraft::new(
            EventType::Aggregation,
            BusinessStep::Storing,
            event_time,
            -source.remaining_quantity,
            source.unit,
        )
        .at(facility.clone())
        .by(request.recorded_by.clone());
        mutation.apply(source, Some(LineageLink::MergedInto { target: id }), draft)?;
    }

    let mut parents: Vec<_> = sources.iter().map(|c| c.id).collect();
    parents.sort();
    let genesis = ChainGenesis {
        chain_code: code,
        product_type,
        total_quantity: total,
        unit,
        source_plot: common(sources.iter().map(|c| c.source_plot.clone())).flatten(),
        source_facility: common(sources.iter().map(|c| c.destination_facility.clone())).flatten(),
        destination_facility: facility.clone(),
        quality_grade: common(sources.iter().map(|c| c.quality_grade.clone())).flatten(),
        batch_number: common(sources.iter().map(|c| c.batch_number.clone())).flatten(),
        harvest_date: sources.iter().filter_map(|c| c.harvest_date).min(),
        expiry_date: sources.iter().filter_map(|c| c.expiry_date).min(),
        parent_chain_ids: parents,
    };
    let draft = EventDraft::new(EventType::Aggregation, BusinessStep::Receiving, event_time, total, unit)
        .at(facility)
        .by(request.recorded_by.clone());
    mutation.create(id, genesis, draft)?;

    Ok(mutation)
}
