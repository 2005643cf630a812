//! Deriving chain state from events.
//!
//! The same functions run when planning a mutation and when replaying the log,
//! so a chain rebuilt from disk is identical to the one that was committed.

use crate::error::{LedgerError, Result};
use crate::quantity::Quantity;
use crate::types::{ChainGenesis, ChainId, ChainStatus, CustodyChain, CustodyEvent, LineageLink};

/// Build a new chain from its genesis event.
pub(crate) fn chain_from_genesis(
    id: ChainId,
    genesis: &ChainGenesis,
    event: &CustodyEvent,
) -> Result<CustodyChain> {
    if !genesis.total_quantity.is_positive() {
        return Err(LedgerError::Validation(format!(
            "chain {} must start with a positive quantity, got {}",
            genesis.chain_code, genesis.total_quantity
        )));
    }

    Ok(CustodyChain {
        id,
        chain_code: genesis.chain_code.clone(),
        product_type: genesis.product_type,
        source_plot: genesis.source_plot.clone(),
        source_facility: genesis.source_facility.clone(),
        destination_facility: genesis.destination_facility.clone(),
        total_quantity: genesis.total_quantity,
        remaining_quantity: genesis.total_quantity,
        unit: genesis.unit,
        status: ChainStatus::Active,
        quality_grade: genesis.quality_grade.clone(),
        batch_number: genesis.batch_number.clone(),
        harvest_date: genesis.harvest_date,
        expiry_date: genesis.expiry_date,
        parent_chain_ids: genesis.parent_chain_ids.iter().copied().collect(),
        child_chain_ids: Default::default(),
        created_at: event.recorded_at,
        updated_at: event.recorded_at,
        event_count: 1,
    })
}

/// Apply a non-genesis event to an existing chain.
pub(crate) fn apply_event(chain: &mut CustodyChain, event: &CustodyEvent) -> Result<()> {
    if event.genesis().is_some() {
        return Err(LedgerError::Corruption(format!(
            "genesis event {} applied to existing chain {}",
            event.id, chain.chain_code
        )));
    }
    if chain.status.is_terminal() {
        return Err(LedgerError::InvalidEvent(format!(
            "chain {} is {:?} and accepts no further events",
            chain.chain_code, chain.status
        )));
    }

    if let Some(quantity) = event.quantity {
        let delta = event.unit.convert(quantity, chain.unit).ok_or_else(|| {
            LedgerError::Validation(format!(
                "{} {} cannot be expressed exactly in {}",
                quantity, event.unit, chain.unit
            ))
        })?;
        update_remaining(chain, delta)?;
    }

    let merged = match &event.lineage {
        Some(LineageLink::SplitInto { children }) => {
            chain.child_chain_ids.extend(children.iter().copied());
            false
        }
        Some(LineageLink::Transformed { outputs }) => {
            chain.child_chain_ids.extend(outputs.iter().map(|o| o.chain_id));
            false
        }
        Some(LineageLink::MergedInto { target }) => {
            chain.child_chain_ids.insert(*target);
            true
        }
        Some(LineageLink::Genesis(_)) | None => false,
    };

    chain.status = if merged {
        if !chain.remaining_quantity.is_zero() {
            return Err(LedgerError::InvalidEvent(format!(
                "merge must take all remaining mass of {}",
                chain.chain_code
            )));
        }
        ChainStatus::Merged
    } else if chain.remaining_quantity.is_zero() {
        if chain.child_chain_ids.is_empty() {
            ChainStatus::Consumed
        } else {
            ChainStatus::Split
        }
    } else if event.disposition.is_closing() {
        ChainStatus::Closed
    } else {
        ChainStatus::Active
    };

    chain.updated_at = event.recorded_at;
    chain.event_count += 1;
    Ok(())
}

/// The single place remaining quantity changes; keeps `0 <= remaining <= total`.
pub(crate) fn update_remaining(chain: &mut CustodyChain, delta: Quantity) -> Result<()> {
    let updated = chain
        .remaining_quantity
        .checked_add(delta)
        .ok_or_else(|| LedgerError::Validation("quantity overflow".into()))?;

    if updated.is_negative() {
        return Err(LedgerError::InsufficientQuantity {
            chain: chain.chain_code.clone(),
            requested: -delta,
            available: chain.remaining_quantity,
        });
    }
    if updated > chain.total_quantity {
        return Err(LedgerError::InvalidEvent(format!(
            "adding {} to {} would exceed its total of {}",
            delta, chain.chain_code, chain.total_quantity
        )));
    }

    chain.remaining_quantity = updated;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Unit;
    use crate::types::{BusinessStep, Disposition, EventId, EventType, ProductType};
    use chrono::Utc;

    fn genesis_event(total: i64) -> (ChainGenesis, CustodyEvent) {
        let genesis = ChainGenesis {
            chain_code: "CHAIN-001".into(),
            product_type: ProductType::Ffb,
            total_quantity: Quantity::whole(total),
            unit: Unit::Kilogram,
            source_plot: None,
            source_facility: None,
            destination_facility: None,
            quality_grade: None,
            batch_number: None,
            harvest_date: None,
            expiry_date: None,
            parent_chain_ids: vec![],
        };
        let event = event(EventType::Creation, Some(Quantity::whole(total)), None);
        (genesis, event)
    }

    fn event(event_type: EventType, quantity: Option<Quantity>, lineage: Option<LineageLink>) -> CustodyEvent {
        let now = Utc::now();
        CustodyEvent {
            id: EventId(0),
            chain_id: ChainId(1),
            event_type,
            event_time: now,
            recorded_at: now,
            business_step: BusinessStep::Processing,
            disposition: Disposition::Active,
            quantity,
            unit: Unit::Kilogram,
            facility: None,
            recorded_by: None,
            lineage,
            notes: None,
        }
    }

    fn chain(total: i64) -> CustodyChain {
        let (genesis, event) = genesis_event(total);
        chain_from_genesis(ChainId(1), &genesis, &event).unwrap()
    }

    #[test]
    fn test_genesis_requires_positive_total() {
        let (genesis, event) = genesis_event(0);
        assert!(matches!(
            chain_from_genesis(ChainId(1), &genesis, &event),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_consumption_to_zero_without_children_is_consumed() {
        let mut c = chain(100);
        apply_event(&mut c, &event(EventType::Processing, Some(Quantity::whole(-100)), None)).unwrap();
        assert_eq!(c.status, ChainStatus::Consumed);
        assert_eq!(c.event_count, 2);
    }

    #[test]
    fn test_split_to_zero_is_split() {
        let mut c = chain(100);
        let link = LineageLink::SplitInto { children: vec![ChainId(2), ChainId(3)] };
        apply_event(&mut c, &event(EventType::Disaggregation, Some(Quantity::whole(-100)), Some(link))).unwrap();
        assert_eq!(c.status, ChainStatus::Split);
        assert_eq!(c.child_chain_ids.len(), 2);
    }

    #[test]
    fn test_overdraw_is_rejected_without_change() {
        let mut c = chain(100);
        let err = apply_event(&mut c, &event(EventType::Processing, Some(Quantity::whole(-101)), None)).unwrap_err();
        match err {
            LedgerError::InsufficientQuantity { requested, available, .. } => {
                assert_eq!(requested, Quantity::whole(101));
                assert_eq!(available, Quantity::whole(100));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(c.remaining_quantity, Quantity::whole(100));
    }

    #[test]
    fn test_addition_cannot_exceed_total() {
        let mut c = chain(100);
        apply_event(&mut c, &event(EventType::Processing, Some(Quantity::whole(-10)), None)).unwrap();
        apply_event(&mut c, &event(EventType::Processing, Some(Quantity::whole(5)), None)).unwrap();
        assert_eq!(c.remaining_quantity, Quantity::whole(95));
        assert!(matches!(
            apply_event(&mut c, &event(EventType::Processing, Some(Quantity::whole(6)), None)),
            Err(LedgerError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_terminal_chain_rejects_events() {
        let mut c = chain(100);
        apply_event(&mut c, &event(EventType::Processing, Some(Quantity::whole(-100)), None)).unwrap();
        assert!(matches!(
            apply_event(&mut c, &event(EventType::Transportation, None, None)),
            Err(LedgerError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_closing_disposition_closes() {
        let mut c = chain(100);
        let mut recall = event(EventType::Processing, None, None);
        recall.disposition = Disposition::Recalled;
        apply_event(&mut c, &recall).unwrap();
        assert_eq!(c.status, ChainStatus::Closed);
        assert_eq!(c.remaining_quantity, Quantity::whole(100));
    }

    #[test]
    fn test_tonne_event_on_kg_chain() {
        let mut c = chain(2000);
        let mut e = event(EventType::Processing, Some(Quantity::whole(-1)), None);
        e.unit = Unit::Tonne;
        apply_event(&mut c, &e).unwrap();
        assert_eq!(c.remaining_quantity, Quantity::whole(1000));
    }
}
