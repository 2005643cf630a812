//! Disaggregation: one chain divided into child lots.

use super::{EventDraft, Mutation};
use crate::error::{LedgerError, Result};
use crate::reference::ReferenceDirectory;
use crate::registry::ChainRegistry;
use crate::types::{
    BusinessStep, ChainGenesis, CustodyChain, EventType, LineageLink, SplitRequest,
};
use chrono::Utc;

/// Plan splitting `source` into one child per allocation.
///
/// Children inherit the parent's product and provenance; the parent is
/// debited by the allocation total in a single disaggregation event.
pub(crate) fn plan_split(
    source: &CustodyChain,
    request: &SplitRequest,
    registry: &ChainRegistry,
    directory: &dyn ReferenceDirectory,
) -> Result<Mutation> {
    if request.allocations.is_empty() {
        return Err(LedgerError::EmptySet {
            required: 1,
            got: 0,
        });
    }
    if let Some(bad) = request.allocations.iter().find(|a| !a.quantity.is_positive()) {
        return Err(LedgerError::Validation(format!(
            "split quantities must be positive, got {}",
            bad.quantity
        )));
    }
    if source.status.is_terminal() {
        return Err(LedgerError::InvalidEvent(format!(
            "chain {} is {:?} and cannot be split",
            source.chain_code, source.status
        )));
    }

    let total = request
        .total()
        .ok_or_else(|| LedgerError::Validation("split total overflows".into()))?;
    if total > source.remaining_quantity {
        return Err(LedgerError::InsufficientQuantity {
            chain: source.chain_code.clone(),
            requested: total,
            available: source.remaining_quantity,
        });
    }

    if let Some(facility) = &request.facility {
        directory.require_facility(facility)?;
    }
    if let Some(user) = &request.recorded_by {
        directory.require_user(user)?;
    }

    let mut mutation = Mutation::new();
    let event_time = request.event_time.unwrap_or_else(Utc::now);
    let facility = request.facility.clone().or_else(|| source.destination_facility.clone());

    let mut children = Vec::with_capacity(request.allocations.len());
    for (i, allocation) in request.allocations.iter().enumerate() {
        if let Some(dest) = &allocation.destination_facility {
            directory.require_facility(dest)?;
        }
        let code = mutation.claim_code(
            registry,
            allocation.chain_code.as_deref(),
            &source.chain_code,
            i + 1,
        )?;
        let id = registry.allocate_id();
        children.push((
            id,
            ChainGenesis {
                chain_code: code,
                product_type: source.product_type,
                total_quantity: allocation.quantity,
                unit: source.unit,
                source_plot: source.source_plot.clone(),
                source_facility: facility.clone(),
                destination_facility: allocation
                    .destination_facility
                    .clone()
                    .or_else(|| source.destination_facility.clone()),
                quality_grade: source.quality_grade.clone(),
                batch_number: allocation
                    .batch_number
                    .clone()
                    .or_else(|| source.batch_number.clone()),
                harvest_date: source.harvest_date,
                expiry_date: source.expiry_date,
                parent_chain_ids: vec![source.id],
            },
        ));
    }

    let draft = EventDraft::new(
        EventType::Disaggregation,
        BusinessStep::Processing,
        event_time,
        -total,
        source.unit,
    )
    .at(facility.clone())
    .by(request.recorded_by.clone());
    let link = LineageLink::SplitInto {
        children: children.iter().map(|(id, _)| *id).collect(),
    };
    mutation.apply(source, Some(link), draft)?;

    for (id, genesis) in children {
        let draft = EventDraft::new(
            EventType::Disaggregation,
            BusinessStep::Storing,
            event_time,
            genesis.total_quantity,
            genesis.unit,
        )
        .at(facility.clone())
        .by(request.recorded_by.clone());
        mutation.create(id, genesis, draft)?;
    }

    Ok(mutation)
}
