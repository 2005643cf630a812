//! Chain creation and recorded events, including transformation outputs.

use super::{EventDraft, Mutation};
use crate::error::{LedgerError, Result};
use crate::events::rules;
use crate::quantity::{Quantity, Unit};
use crate::reference::ReferenceDirectory;
use crate::registry::ChainRegistry;
use crate::types::{
    BusinessStep, ChainGenesis, CreateChainInput, CustodyChain, DerivedOutput, EventType,
    LineageLink, RecordEventInput,
};
use chrono::Utc;

/// Plan an origin chain and its implicit creation event.
pub(crate) fn plan_creation(
    input: &CreateChainInput,
    registry: &ChainRegistry,
    directory: &dyn ReferenceDirectory,
) -> Result<Mutation> {
    if !input.total_quantity.is_positive() {
        return Err(LedgerError::Validation(format!(
            "total quantity must be positive, got {}",
            input.total_quantity
        )));
    }
    if let Some(plot) = &input.source_plot {
        directory.require_plot(plot)?;
    }
    for facility in [&input.source_facility, &input.destination_facility].into_iter().flatten() {
        directory.require_facility(facility)?;
    }
    if let Some(user) = &input.recorded_by {
        directory.require_user(user)?;
    }
    if let (Some(harvest), Some(expiry)) = (input.harvest_date, input.expiry_date) {
        if expiry < harvest {
            return Err(LedgerError::Validation(
                "expiry date precedes harvest date".into(),
            ));
        }
    }

    let mut mutation = Mutation::new();
    let code = mutation.claim_code(registry, Some(&input.chain_code), "", 0)?;
    let id = registry.allocate_id();

    let step = if input.source_plot.is_some() {
        BusinessStep::Harvesting
    } else {
        BusinessStep::Receiving
    };
    let draft = EventDraft::new(
        EventType::Creation,
        step,
        input.event_time.unwrap_or_else(Utc::now),
        input.total_quantity,
        input.unit,
    )
    .at(input.source_facility.clone())
    .by(input.recorded_by.clone());

    let genesis = ChainGenesis {
        chain_code: code,
        product_type: input.product_type,
        total_quantity: input.total_quantity,
        unit: input.unit,
        source_plot: input.source_plot.clone(),
        source_facility: input.source_facility.clone(),
        destination_facility: input.destination_facility.clone(),
        quality_grade: input.quality_grade.clone(),
        batch_number: input.batch_number.clone(),
        harvest_date: input.harvest_date,
        expiry_date: input.expiry_date,
        parent_chain_ids: Vec::new(),
    };
    mutation.create(id, genesis, draft)?;
    Ok(mutation)
}

/// Plan a caller-recorded event against `chain`.
pub(crate) fn plan_record(
    chain: &CustodyChain,
    input: &RecordEventInput,
    registry: &ChainRegistry,
    directory: &dyn ReferenceDirectory,
) -> Result<Mutation> {
    if rules::is_reserved(input.event_type) {
        return Err(LedgerError::InvalidEvent(format!(
            "{:?} events are written by the ledger and cannot be recorded directly",
            input.event_type
        )));
    }
    rules::check_combination(input.event_type, input.business_step, input.disposition)?;
    rules::check_quantity(input.event_type, input.quantity, input.outputs.len())?;

    if let Some(facility) = &input.facility {
        directory.require_facility(facility)?;
    }
    if let Some(user) = &input.recorded_by {
        directory.require_user(user)?;
    }

    let mut mutation = Mutation::new();
    let event_time = input.event_time.unwrap_or_else(Utc::now);

    let declared = input.outputs.iter().try_fold(Quantity::ZERO, |acc, spec| {
        let unit = spec.unit.unwrap_or(chain.unit);
        acc.checked_add(unit.convert(spec.quantity, Unit::Kilogram)?)
    });
    if declared.is_none() {
        return Err(LedgerError::Validation(
            "declared outputs exceed the representable quantity".into(),
        ));
    }

    let mut outputs = Vec::with_capacity(input.outputs.len());
    let mut children = Vec::with_capacity(input.outputs.len());
    for (i, spec) in input.outputs.iter().enumerate() {
        if !spec.quantity.is_positive() {
            return Err(LedgerError::Validation(format!(
                "output quantity must be positive, got {}",
                spec.quantity
            )));
        }
        if let Some(facility) = &spec.destination_facility {
            directory.require_facility(facility)?;
        }

        let prefix = format!("{}-{}", chain.chain_code, spec.product_type.code());
        let code = mutation.claim_code(registry, spec.chain_code.as_deref(), &prefix, i + 1)?;
        let id = registry.allocate_id();
        let unit = spec.unit.unwrap_or(chain.unit);

        outputs.push(DerivedOutput {
            chain_id: id,
            product_type: spec.product_type,
            quantity: spec.quantity,
            unit,
        });
        children.push((
            id,
            ChainGenesis {
                chain_code: code,
                product_type: spec.product_type,
                total_quantity: spec.quantity,
                unit,
                source_plot: chain.source_plot.clone(),
                source_facility: input.facility.clone().or_else(|| chain.destination_facility.clone()),
                destination_facility: spec.destination_facility.clone(),
                quality_grade: None,
                batch_number: chain.batch_number.clone(),
                harvest_date: chain.harvest_date,
                expiry_date: None,
                parent_chain_ids: vec![chain.id],
            },
        ));
    }

    let mut draft = EventDraft::new(
        input.event_type,
        input.business_step,
        event_time,
        input.quantity.unwrap_or_default(),
        input.unit.unwrap_or(chain.unit),
    )
    .at(input.facility.clone())
    .by(input.recorded_by.clone());
    draft.quantity = input.quantity;
    draft.disposition = input.disposition;
    draft.notes = input.notes.clone();

    let lineage = (!outputs.is_empty()).then(|| LineageLink::Transformed { outputs });
    mutation.apply(chain, lineage, draft)?;

    for (id, genesis) in children {
        let draft = EventDraft::new(
            EventType::Transformation,
            BusinessStep::Processing,
            event_time,
            genesis.total_quantity,
            genesis.unit,
        )
        .at(input.facility.clone())
        .by(input.recorded_by.clone());
        mutation.create(id, genesis, draft)?;
    }

    Ok(mutation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{InMemoryDirectory, OpenDirectory};
    use crate::types::{ChainStatus, Disposition, OutputSpec, ProductType};

    fn origin(registry: &ChainRegistry) -> CustodyChain {
        let input = CreateChainInput::new("CHAIN-001", ProductType::Ffb, Quantity::whole(1000), Unit::Kilogram);
        let mutation = plan_creation(&input, registry, &OpenDirectory).unwrap();
        let chain = mutation.chains[0].clone();
        registry.install(mutation.chains);
        chain
    }

    #[test]
    fn test_creation_plan() {
        let registry = ChainRegistry::new();
        let input = CreateChainInput::new("CHAIN-001", ProductType::Ffb, Quantity::whole(1000), Unit::Kilogram)
            .from_plot("PLOT-7");
        let mutation = plan_creation(&input, &registry, &OpenDirectory).unwrap();

        assert_eq!(mutation.events.len(), 1);
        let event = &mutation.events[0];
        assert_eq!(event.event_type, EventType::Creation);
        assert_eq!(event.business_step, BusinessStep::Harvesting);
        assert_eq!(event.quantity, Some(Quantity::whole(1000)));
        assert!(event.genesis().is_some());
        assert_eq!(mutation.chains[0].remaining_quantity, Quantity::whole(1000));
        // Nothing is visible until commit
        assert!(registry.is_empty());
    }

    #[test]
    fn test_creation_validation() {
        let registry = ChainRegistry::new();
        let zero = CreateChainInput::new("C", ProductType::Ffb, Quantity::ZERO, Unit::Kilogram);
        assert!(matches!(
            plan_creation(&zero, &registry, &OpenDirectory),
            Err(LedgerError::Validation(_))
        ));

        let blank = CreateChainInput::new("  ", ProductType::Ffb, Quantity::whole(1), Unit::Kilogram);
        assert!(matches!(
            plan_creation(&blank, &registry, &OpenDirectory),
            Err(LedgerError::Validation(_))
        ));

        let directory = InMemoryDirectory::new();
        let unknown_mill = CreateChainInput::new("C", ProductType::Ffb, Quantity::whole(1), Unit::Kilogram)
            .at_facility("MILL-404");
        assert!(matches!(
            plan_creation(&unknown_mill, &registry, &directory),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_transformation_creates_output_chains() {
        let registry = ChainRegistry::new();
        let source = origin(&registry);

        let input = RecordEventInput::new(
            source.id,
            EventType::Transformation,
            BusinessStep::Processing,
            Disposition::Active,
        )
        .with_quantity(Quantity::whole(-1000))
        .with_output(OutputSpec::new(ProductType::Cpo, Quantity::whole(200)))
        .with_output(OutputSpec::new(ProductType::PalmKernel, Quantity::whole(50)));

        let mutation = plan_record(&source, &input, &registry, &OpenDirectory).unwrap();
        assert_eq!(mutation.events.len(), 3);
        assert_eq!(mutation.created.len(), 2);

        let derived_source = mutation.chain(source.id).unwrap();
        assert_eq!(derived_source.status, ChainStatus::Split);
        assert_eq!(derived_source.child_chain_ids.len(), 2);

        let cpo = mutation.chain(mutation.created[0]).unwrap();
        assert_eq!(cpo.chain_code, "CHAIN-001-CPO-1");
        assert_eq!(cpo.product_type, ProductType::Cpo);
        assert!(cpo.parent_chain_ids.contains(&source.id));

        let pk = mutation.chain(mutation.created[1]).unwrap();
        assert_eq!(pk.chain_code, "CHAIN-001-PK-2");
        assert_eq!(mutation.events[0].output_kg(), Some(Quantity::whole(250)));
    }

    #[test]
    fn test_reserved_and_invalid_events() {
        let registry = ChainRegistry::new();
        let source = origin(&registry);

        let split = RecordEventInput::new(source.id, EventType::Disaggregation, BusinessStep::Processing, Disposition::Active);
        assert!(matches!(
            plan_record(&source, &split, &registry, &OpenDirectory),
            Err(LedgerError::InvalidEvent(_))
        ));

        let bad_step = RecordEventInput::new(source.id, EventType::Transportation, BusinessStep::Harvesting, Disposition::Active);
        assert!(matches!(
            plan_record(&source, &bad_step, &registry, &OpenDirectory),
            Err(LedgerError::InvalidEvent(_))
        ));

        let overdraw = RecordEventInput::new(source.id, EventType::Processing, BusinessStep::Processing, Disposition::Active)
            .with_quantity(Quantity::whole(-1001));
        assert!(matches!(
            plan_record(&source, &overdraw, &registry, &OpenDirectory),
            Err(LedgerError::InsufficientQuantity { .. })
        ));
    }

    #[test]
    fn test_overflowing_outputs_are_rejected() {
        let registry = ChainRegistry::new();
        let source = origin(&registry);
        let huge = Quantity::from_raw(i64::MAX / 2 + 1);

        let input = RecordEventInput::new(
            source.id,
            EventType::Transformation,
            BusinessStep::Processing,
            Disposition::Active,
        )
        .with_quantity(Quantity::whole(-1000))
        .with_output(OutputSpec::new(ProductType::Cpo, huge))
        .with_output(OutputSpec::new(ProductType::PalmKernel, huge));
        assert!(matches!(
            plan_record(&source, &input, &registry, &OpenDirectory),
            Err(LedgerError::Validation(_))
        ));

        let mut tonnes = OutputSpec::new(ProductType::Cpo, Quantity::from_raw(i64::MAX / 10));
        tonnes.unit = Some(Unit::Tonne);
        let input = RecordEventInput::new(
            source.id,
            EventType::Transformation,
            BusinessStep::Processing,
            Disposition::Active,
        )
        .with_quantity(Quantity::whole(-1000))
        .with_output(tonnes);
        assert!(matches!(
            plan_record(&source, &input, &registry, &OpenDirectory),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(registry.len(), 1);
    }
}
