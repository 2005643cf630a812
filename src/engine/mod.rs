//! Split/merge engine.
//!
//! Every mutation is planned as a [`Mutation`]: the events to append plus the
//! chain states they derive. Planning runs against locked chain snapshots and
//! touches nothing shared; the ledger then commits the plan as one unit or
//! not at all.

mod merge;
mod record;
mod split;

pub(crate) use merge::plan_merge;
pub(crate) use record::{plan_creation, plan_record};
pub(crate) use split::plan_split;

use crate::error::{LedgerError, Result};
use crate::quantity::{Quantity, Unit};
use crate::registry::{projection, ChainRegistry};
use crate::types::{
    BusinessStep, ChainGenesis, ChainId, CustodyChain, CustodyEvent, Disposition, EventId,
    EventType, FacilityRef, LineageLink, UserRef,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Longest accepted chain code.
const MAX_CODE_LEN: usize = 64;

/// A chain code introduced by a mutation.
#[derive(Clone, Debug)]
pub(crate) struct NewCode {
    pub code: String,
    /// Generated codes that collide at commit time signal a race, not bad input.
    pub generated: bool,
}

/// Planned events and derived chain states for one mutation.
#[derive(Debug)]
pub(crate) struct Mutation {
    /// Event drafts in append order; ids are assigned at commit.
    pub events: Vec<CustodyEvent>,
    /// Derived state of every chain touched, in first-touch order.
    pub chains: Vec<CustodyChain>,
    pub new_codes: Vec<NewCode>,
    /// Chains created by this mutation, in creation order.
    pub created: Vec<ChainId>,
    /// Ledger write time shared by all events of the mutation.
    recorded_at: DateTime<Utc>,
}

impl Mutation {
    pub(crate) fn new() -> Self {
        Self {
            events: Vec::new(),
            chains: Vec::new(),
            new_codes: Vec::new(),
            created: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    /// Add a genesis event and the chain it creates.
    fn create(&mut self, id: ChainId, genesis: ChainGenesis, draft: EventDraft) -> Result<()> {
        let event = draft.build(id, Some(LineageLink::Genesis(genesis.clone())), self.recorded_at);
        let chain = projection::chain_from_genesis(id, &genesis, &event)?;
        self.chains.push(chain);
        self.created.push(id);
        self.events.push(event);
        Ok(())
    }

    /// Add an event to an existing chain, deriving its next state.
    fn apply(&mut self, base: &CustodyChain, lineage: Option<LineageLink>, draft: EventDraft) -> Result<()> {
        let event = draft.build(base.id, lineage, self.recorded_at);
        match self.chains.iter_mut().find(|c| c.id == base.id) {
            Some(chain) => projection::apply_event(chain, &event)?,
            None => {
                let mut chain = base.clone();
                projection::apply_event(&mut chain, &event)?;
                self.chains.push(chain);
            }
        }
        self.events.push(event);
        Ok(())
    }

    fn has_code(&self, code: &str) -> bool {
        self.new_codes.iter().any(|c| c.code == code)
    }

    /// Accept a caller-supplied code or generate `<prefix>-<n>` from `start`.
    fn claim_code(
        &mut self,
        registry: &ChainRegistry,
        supplied: Option<&str>,
        prefix: &str,
        start: usize,
    ) -> Result<String> {
        let new_code = match supplied {
            Some(code) => {
                let code = validate_code(code)?;
                if registry.is_code_taken(&code) || self.has_code(&code) {
                    return Err(LedgerError::Validation(format!(
                        "chain code already in use: {}",
                        code
                    )));
                }
                NewCode {
                    code,
                    generated: false,
                }
            }
            None => {
                let mut n = start;
                let code = loop {
                    let candidate = format!("{}-{}", prefix, n);
                    if !registry.is_code_taken(&candidate) && !self.has_code(&candidate) {
                        break candidate;
                    }
                    n += 1;
                };
                NewCode {
                    code,
                    generated: true,
                }
            }
        };
        let code = new_code.code.clone();
        self.new_codes.push(new_code);
        Ok(code)
    }

    /// The derived state of a chain touched by this mutation.
    #[cfg(test)]
    pub(crate) fn chain(&self, id: ChainId) -> Option<&CustodyChain> {
        self.chains.iter().find(|c| c.id == id)
    }
}

pub(crate) fn validate_code(code: &str) -> Result<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(LedgerError::Validation("chain code must not be empty".into()));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(LedgerError::Validation(format!(
            "chain code longer than {} characters",
            MAX_CODE_LEN
        )));
    }
    Ok(code.to_string())
}

/// Event fields known before the target chain and write time are fixed.
#[derive(Clone, Debug)]
struct EventDraft {
    event_type: EventType,
    business_step: BusinessStep,
    disposition: Disposition,
    event_time: DateTime<Utc>,
    quantity: Option<Quantity>,
    unit: Unit,
    facility: Option<FacilityRef>,
    recorded_by: Option<UserRef>,
    notes: Option<String>,
}

impl EventDraft {
    fn new(
        event_type: EventType,
        business_step: BusinessStep,
        event_time: DateTime<Utc>,
        quantity: Quantity,
        unit: Unit,
    ) -> Self {
        Self {
            event_type,
            business_step,
            disposition: Disposition::Active,
            event_time,
            quantity: Some(quantity),
            unit,
            facility: None,
            recorded_by: None,
            notes: None,
        }
    }

    fn at(mut self, facility: Option<FacilityRef>) -> Self {
        self.facility = facility;
        self
    }

    fn by(mut self, user: Option<UserRef>) -> Self {
        self.recorded_by = user;
        self
    }

    fn build(self, chain_id: ChainId, lineage: Option<LineageLink>, recorded_at: DateTime<Utc>) -> CustodyEvent {
        CustodyEvent {
            id: EventId(0),
            chain_id,
            event_type: self.event_type,
            event_time: self.event_time,
            recorded_at,
            business_step: self.business_step,
            disposition: self.disposition,
            quantity: self.quantity,
            unit: self.unit,
            facility: self.facility,
            recorded_by: self.recorded_by,
            lineage,
            notes: self.notes,
        }
    }
}

/// The single value shared by every item, if there is one.
fn common<T: Clone + PartialEq>(mut items: impl Iterator<Item = T>) -> Option<T> {
    let first = items.next()?;
    items.all(|item| item == first).then_some(first)
}

/// Distinct ids preserving first-seen order.
pub(crate) fn distinct(ids: &[ChainId]) -> Vec<ChainId> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
