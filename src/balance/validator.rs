use super::lineage::{self, TraversalLimits};
use super::report::{Discrepancy, DiscrepancyKind, MassBalanceReport};
use crate::cancel::CancelToken;
use crate::config::{LedgerConfig, YieldTable};
use crate::error::{LedgerError, Result};
use crate::events::{rules, EventStore};
use crate::quantity::{Quantity, Unit};
use crate::registry::ChainRegistry;
use crate::types::{ChainId, ChainStatus, CustodyEvent, LineageLink, ProductType};
use std::sync::Arc;

/// Recomputes conservation metrics over a chain's lineage component.
#[derive(Clone, Debug)]
pub struct MassBalanceValidator {
    tolerance_ratio: f64,
    limits: TraversalLimits,
    yields: YieldTable,
}

/// A consuming event that declared outputs, kept for the yield checks.
struct Transformation {
    chain_id: ChainId,
    input_product: ProductType,
    consumed: Quantity,
    produced: Quantity,
    event: Arc<CustodyEvent>,
}

impl MassBalanceValidator {
    pub fn new(tolerance_ratio: f64, limits: TraversalLimits, yields: YieldTable) -> Self {
        Self {
            tolerance_ratio,
            limits,
            yields,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(
            config.tolerance_ratio,
            TraversalLimits {
                max_depth: config.max_traversal_depth,
                max_nodes: config.max_traversal_nodes,
            },
            config.yields.clone(),
        )
    }

    pub fn limits(&self) -> TraversalLimits {
        self.limits
    }

    /// Validate the component containing `chain_id`. All figures are in kg.
    pub fn validate(
        &self,
        registry: &ChainRegistry,
        store: &EventStore,
        chain_id: ChainId,
        cancel: &CancelToken,
    ) -> Result<MassBalanceReport> {
        let chains = lineage::component(registry, chain_id, self.limits, cancel)?;
        let target = Arc::clone(&chains[0]);

        let mut input = Quantity::ZERO;
        let mut output = Quantity::ZERO;
        let mut waste = Quantity::ZERO;
        let mut origins = Vec::new();
        let mut transformations = Vec::new();

        for chain in &chains {
            cancel.check()?;
            if chain.is_origin() {
                input = add(input, chain.unit.to_kg(chain.total_quantity))?;
                origins.push(chain.id);
            }
            // Mass left on a closed chain was destroyed, recalled or expired
            let held = chain.unit.to_kg(chain.remaining_quantity);
            if chain.status == ChainStatus::Closed {
                waste = add(waste, held)?;
            } else {
                output = add(output, held)?;
            }

            for event in store.events_for(chain.id).iter() {
                let Some(quantity) = event.quantity else {
                    continue;
                };
                let kg = event.unit.to_kg(quantity);
                if kg.is_positive() && event.genesis().is_none() {
                    input = add(input, kg)?;
                }
                if kg.is_negative() && rules::consumes_mass(event.event_type) {
                    let consumed = kg.abs();
                    let produced = event.output_kg().ok_or_else(overflow)?;
                    // Excess output is left to the imbalance and yield checks
                    let lost = consumed.checked_sub(produced).ok_or_else(overflow)?;
                    if lost.is_positive() {
                        waste = add(waste, lost)?;
                    }
                    if matches!(event.lineage, Some(LineageLink::Transformed { .. })) {
                        transformations.push(Transformation {
                            chain_id: chain.id,
                            input_product: chain.product_type,
                            consumed,
                            produced,
                            event: Arc::clone(event),
                        });
                    }
                }
            }
        }
        origins.sort();

        let tolerance = input.mul_ratio(self.tolerance_ratio);
        let mut discrepancies = Vec::new();

        if input.is_zero() {
            discrepancies.push(Discrepancy {
                kind: DiscrepancyKind::ZeroInput,
                expected: Quantity::ZERO,
                actual: Quantity::ZERO,
                variance: Quantity::ZERO,
                description: format!("no mass entered the lineage of {}", target.chain_code),
                chain_id: Some(target.id),
                event_id: None,
            });
        }

        let accounted = add(output, waste)?;
        let imbalance = accounted - input;
        if imbalance.abs() > tolerance {
            discrepancies.push(Discrepancy {
                kind: DiscrepancyKind::MassImbalance,
                expected: input,
                actual: accounted,
                variance: imbalance,
                description: format!(
                    "input {} kg does not match output {} kg plus waste {} kg",
                    input, output, waste
                ),
                chain_id: Some(target.id),
                event_id: None,
            });
        }

        for t in &transformations {
            cancel.check()?;
            self.check_yields(t, &mut discrepancies);
        }

        for d in &discrepancies {
            tracing::warn!(
                chain = %target.chain_code,
                kind = ?d.kind,
                expected = %d.expected,
                actual = %d.actual,
                "mass balance discrepancy"
            );
        }

        let efficiency = if input.is_zero() {
            0.0
        } else {
            output.ratio_to(input)
        };

        Ok(MassBalanceReport {
            chain_id: target.id,
            chain_code: target.chain_code.clone(),
            is_valid: discrepancies.is_empty(),
            total_input: input,
            total_output: output,
            total_waste: waste,
            efficiency,
            tolerance,
            unit: Unit::Kilogram,
            chains_examined: chains.len(),
            origin_chain_ids: origins,
            discrepancies,
        })
    }

    /// Compare each output to its expected yield. Each event is judged
    /// against a tolerance scaled to its own consumed mass.
    fn check_yields(&self, t: &Transformation, discrepancies: &mut Vec<Discrepancy>) {
        let Some(LineageLink::Transformed { outputs }) = &t.event.lineage else {
            return;
        };
        let tolerance = t.consumed.mul_ratio(self.tolerance_ratio);
        let mut uncovered = false;

        for out in outputs {
            let actual = out.unit.to_kg(out.quantity);
            match self.yields.get(t.input_product, out.product_type) {
                Some(factor) => {
                    let expected = t.consumed.mul_ratio(factor);
                    let variance = actual - expected;
                    if variance.abs() > tolerance {
                        discrepancies.push(Discrepancy {
                            kind: DiscrepancyKind::YieldVariance,
                            expected,
                            actual,
                            variance,
                            description: format!(
                                "{} from {} kg {} expected near {} kg at yield {}, recorded {} kg",
                                out.product_type,
                                t.consumed,
                                t.input_product,
                                expected,
                                factor,
                                actual
                            ),
                            chain_id: Some(t.chain_id),
                            event_id: Some(t.event.id),
                        });
                    }
                }
                None => uncovered = true,
            }
        }

        let produced = t.produced;
        if uncovered && produced > t.consumed {
            discrepancies.push(Discrepancy {
                kind: DiscrepancyKind::OutputExceedsInput,
                expected: t.consumed,
                actual: produced,
                variance: produced - t.consumed,
                description: format!(
                    "event {} produced {} kg from {} kg of input",
                    t.event.id, produced, t.consumed
                ),
                chain_id: Some(t.chain_id),
                event_id: Some(t.event.id),
            });
        }
    }
}

fn add(a: Quantity, b: Quantity) -> Result<Quantity> {
    a.checked_add(b).ok_or_else(overflow)
}

fn overflow() -> LedgerError {
    LedgerError::Validation("mass balance total overflows".into())
}
