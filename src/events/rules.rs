//! Which events may be recorded, and with what quantities.

use crate::error::{LedgerError, Result};
use crate::quantity::Quantity;
use crate::types::{BusinessStep, Disposition, EventType};

/// Business steps allowed for each event type.
pub fn allowed_steps(event_type: EventType) -> &'static [BusinessStep] {
    use BusinessStep::*;
    match event_type {
        EventType::Creation => &[Harvesting, Collecting, Receiving],
        EventType::Transportation => &[Collecting, Shipping, Receiving],
        EventType::Processing => &[Processing, Storing],
        EventType::Transformation => &[Processing],
        EventType::Aggregation => &[Collecting, Processing, Storing, Receiving],
        EventType::Disaggregation => &[Processing, Storing, Shipping],
    }
}

/// Dispositions allowed for each event type.
pub fn allowed_dispositions(event_type: EventType) -> &'static [Disposition] {
    use Disposition::*;
    match event_type {
        EventType::Transportation => &[Active, Inactive, Recalled],
        EventType::Processing => &[Active, Inactive, Destroyed, Recalled, Expired],
        EventType::Creation
        | EventType::Transformation
        | EventType::Aggregation
        | EventType::Disaggregation => &[Active],
    }
}

pub fn check_combination(
    event_type: EventType,
    business_step: BusinessStep,
    disposition: Disposition,
) -> Result<()> {
    if !allowed_steps(event_type).contains(&business_step) {
        return Err(LedgerError::InvalidEvent(format!(
            "business step {:?} is not allowed for {:?} events",
            business_step, event_type
        )));
    }
    if !allowed_dispositions(event_type).contains(&disposition) {
        return Err(LedgerError::InvalidEvent(format!(
            "disposition {:?} is not allowed for {:?} events",
            disposition, event_type
        )));
    }
    Ok(())
}

/// Event types only the ledger itself writes (chain creation, split, merge).
pub fn is_reserved(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::Creation | EventType::Aggregation | EventType::Disaggregation
    )
}

/// Event types whose negative quantity is consumed mass.
pub fn consumes_mass(event_type: EventType) -> bool {
    matches!(event_type, EventType::Processing | EventType::Transformation)
}

/// Validate a caller-supplied event's quantity and outputs.
pub fn check_quantity(
    event_type: EventType,
    quantity: Option<Quantity>,
    output_count: usize,
) -> Result<()> {
    let quantity = quantity.unwrap_or(Quantity::ZERO);

    if event_type == EventType::Transformation && !quantity.is_negative() {
        return Err(LedgerError::InvalidEvent(
            "transformation events must consume a negative quantity of input".into(),
        ));
    }
    if quantity.is_negative() && !consumes_mass(event_type) {
        return Err(LedgerError::InvalidEvent(format!(
            "{:?} events cannot remove mass",
            event_type
        )));
    }
    if quantity.is_positive() && !matches!(event_type, EventType::Transportation | EventType::Processing) {
        return Err(LedgerError::InvalidEvent(format!(
            "{:?} events cannot add mass",
            event_type
        )));
    }
    if output_count > 0 && !(consumes_mass(event_type) && quantity.is_negative()) {
        return Err(LedgerError::InvalidEvent(
            "outputs require a processing or transformation event that consumes input".into(),
        ));
    }
    Ok(())
}
