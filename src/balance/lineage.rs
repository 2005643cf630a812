//! Walking the lineage graph.
//!
//! Nodes are chains, edges run parent to child. The graph is acyclic by
//! construction; finding a cycle while walking means the log was tampered with.

use crate::cancel::CancelToken;
use crate::error::{LedgerError, Result};
use crate::registry::ChainRegistry;
use crate::types::{ChainId, CustodyChain};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Bounds on how much of the graph one request may visit.
#[derive(Clone, Copy, Debug)]
pub struct TraversalLimits {
    pub max_depth: usize,
    pub max_nodes: usize,
}

/// Direction of a one-way walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ancestors,
    Descendants,
}

impl Direction {
    fn next(self, chain: &CustodyChain) -> Vec<ChainId> {
        match self {
            Direction::Ancestors => chain.parent_chain_ids.iter().copied().collect(),
            Direction::Descendants => chain.child_chain_ids.iter().copied().collect(),
        }
    }
}

fn dangling(from: &CustodyChain, id: ChainId) -> LedgerError {
    LedgerError::Corruption(format!(
        "chain {} links to unknown chain {}",
        from.chain_code, id
    ))
}

/// Every chain connected to `start` through parent or child links, `start`
/// first, then breadth first.
pub(crate) fn component(
    registry: &ChainRegistry,
    start: ChainId,
    limits: TraversalLimits,
    cancel: &CancelToken,
) -> Result<Vec<Arc<CustodyChain>>> {
    let root = registry.require(start)?;
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([(Arc::clone(&root), 0usize)]);
    let mut found = Vec::new();

    while let Some((chain, depth)) = queue.pop_front() {
        cancel.check()?;
        let neighbours = chain
            .parent_chain_ids
            .iter()
            .chain(chain.child_chain_ids.iter())
            .copied();
        for id in neighbours {
            if !seen.insert(id) {
                continue;
            }
            if depth + 1 > limits.max_depth {
                return Err(LedgerError::GraphTooLarge {
                    limit: limits.max_depth,
                    visited: seen.len(),
                });
            }
            if seen.len() > limits.max_nodes {
                return Err(LedgerError::GraphTooLarge {
                    limit: limits.max_nodes,
                    visited: seen.len(),
                });
            }
            let next = registry.get(id).ok_or_else(|| dangling(&chain, id))?;
            queue.push_back((next, depth + 1));
        }
        found.push(chain);
    }

    tracing::debug!(chain = %start, chains = found.len(), "walked lineage component");
    Ok(found)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

struct Frame {
    chain: Arc<CustodyChain>,
    next: Vec<ChainId>,
    pos: usize,
}

/// All chains reachable from `start` in one direction, in depth-first
/// discovery order, excluding `start`.
pub(crate) fn walk(
    registry: &ChainRegistry,
    start: ChainId,
    direction: Direction,
    limits: TraversalLimits,
    cancel: &CancelToken,
) -> Result<Vec<Arc<CustodyChain>>> {
    let root = registry.require(start)?;
    let mut marks = HashMap::from([(start, Mark::InProgress)]);
    let mut stack = vec![Frame {
        next: direction.next(&root),
        chain: root,
        pos: 0,
    }];
    let mut found = Vec::new();

    while let Some(frame) = stack.last_mut() {
        let Some(&id) = frame.next.get(frame.pos) else {
            marks.insert(frame.chain.id, Mark::Done);
            stack.pop();
            continue;
        };
        frame.pos += 1;

        match marks.get(&id) {
            Some(Mark::InProgress) => {
                return Err(LedgerError::Corruption(format!(
                    "lineage cycle through chain {}",
                    id
                )));
            }
            Some(Mark::Done) => continue,
            None => {}
        }

        cancel.check()?;
        let chain = registry.get(id).ok_or_else(|| dangling(&frame.chain, id))?;
        if stack.len() > limits.max_depth {
            return Err(LedgerError::GraphTooLarge {
                limit: limits.max_depth,
                visited: found.len(),
            });
        }
        if found.len() >= limits.max_nodes {
            return Err(LedgerError::GraphTooLarge {
                limit: limits.max_nodes,
                visited: found.len(),
            });
        }

        marks.insert(id, Mark::InProgress);
        found.push(Arc::clone(&chain));
        stack.push(Frame {
            next: direction.next(&chain),
            chain,
            pos: 0,
        });
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::{Quantity, Unit};
    use crate::types::{ChainStatus, ProductType};
    use chrono::Utc;
    use std::collections::BTreeSet;

    const LIMITS: TraversalLimits = TraversalLimits {
        max_depth: 64,
        max_nodes: 1_000,
    };

    fn chain(id: u64, parents: &[u64], children: &[u64]) -> CustodyChain {
        let now = Utc::now();
        CustodyChain {
            id: ChainId(id),
            chain_code: format!("C{}", id),
            product_type: ProductType::Ffb,
            source_plot: None,
            source_facility: None,
            destination_facility: None,
            total_quantity: Quantity::whole(1),
            remaining_quantity: Quantity::whole(1),
            unit: Unit::Kilogram,
            status: ChainStatus::Active,
            quality_grade: None,
            batch_number: None,
            harvest_date: None,
            expiry_date: None,
            parent_chain_ids: parents.iter().map(|p| ChainId(*p)).collect::<BTreeSet<_>>(),
            child_chain_ids: children.iter().map(|c| ChainId(*c)).collect::<BTreeSet<_>>(),
            created_at: now,
            updated_at: now,
            event_count: 1,
        }
    }

    /// 1 -> {2, 3}, {2, 3} -> 4 (diamond), 5 -> 4.
    fn diamond() -> ChainRegistry {
        let registry = ChainRegistry::new();
        registry.install(vec![
            chain(1, &[], &[2, 3]),
            chain(2, &[1], &[4]),
            chain(3, &[1], &[4]),
            chain(4, &[2, 3, 5], &[]),
            chain(5, &[], &[4]),
            chain(6, &[], &[]),
        ]);
        registry
    }

    fn ids(chains: &[Arc<CustodyChain>]) -> Vec<u64> {
        let mut ids: Vec<u64> = chains.iter().map(|c| c.id.0).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_component_spans_both_directions() {
        let registry = diamond();
        let found = component(&registry, ChainId(2), LIMITS, &CancelToken::new()).unwrap();
        assert_eq!(found[0].id, ChainId(2));
        assert_eq!(ids(&found), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_walks_visit_shared_nodes_once() {
        let registry = diamond();
        let cancel = CancelToken::new();
        let down = walk(&registry, ChainId(1), Direction::Descendants, LIMITS, &cancel).unwrap();
        assert_eq!(ids(&down), vec![2, 3, 4]);

        let up = walk(&registry, ChainId(4), Direction::Ancestors, LIMITS, &cancel).unwrap();
        assert_eq!(ids(&up), vec![1, 2, 3, 5]);

        assert!(walk(&registry, ChainId(6), Direction::Ancestors, LIMITS, &cancel).unwrap().is_empty());
    }

    #[test]
    fn test_cycle_is_corruption() {
        let registry = ChainRegistry::new();
        registry.install(vec![chain(1, &[2], &[2]), chain(2, &[1], &[1])]);
        assert!(matches!(
            walk(&registry, ChainId(1), Direction::Descendants, LIMITS, &CancelToken::new()),
            Err(LedgerError::Corruption(_))
        ));
    }

    #[test]
    fn test_limits() {
        let registry = diamond();
        let cancel = CancelToken::new();
        let shallow = TraversalLimits { max_depth: 1, max_nodes: 100 };
        assert!(matches!(
            component(&registry, ChainId(1), shallow, &cancel),
            Err(LedgerError::GraphTooLarge { limit: 1, .. })
        ));

        let small = TraversalLimits { max_depth: 100, max_nodes: 2 };
        assert!(matches!(
            walk(&registry, ChainId(1), Direction::Descendants, small, &cancel),
            Err(LedgerError::GraphTooLarge { limit: 2, .. })
        ));
    }

    #[test]
    fn test_cancelled_walk() {
        let registry = diamond();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            component(&registry, ChainId(1), LIMITS, &cancel),
            Err(LedgerError::Cancelled)
        ));
    }
}
