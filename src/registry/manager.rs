//! Current state of every chain.

use super::projection;
use crate::error::{LedgerError, Result};
use crate::types::{ChainId, ChainStatus, CustodyChain, CustodyEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Projection of chain state derived from the event store.
///
/// Readers get `Arc` snapshots and never wait on mutations; writers replace
/// whole chain values when a batch commits.
pub struct ChainRegistry {
    chains: RwLock<HashMap<ChainId, Arc<CustodyChain>>>,
    codes: RwLock<HashMap<String, ChainId>>,
    next_id: AtomicU64,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
            codes: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve an id for a chain about to be planned. Ids of abandoned plans
    /// are simply never used.
    pub(crate) fn allocate_id(&self) -> ChainId {
        ChainId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Get a chain by id.
    pub fn get(&self, id: ChainId) -> Option<Arc<CustodyChain>> {
        self.chains.read().get(&id).cloned()
    }

    /// Get a chain by id or fail with `ChainNotFound`.
    pub fn require(&self, id: ChainId) -> Result<Arc<CustodyChain>> {
        self.get(id).ok_or_else(|| LedgerError::chain_not_found(id))
    }

    /// Look a chain up by its human-readable code.
    pub fn find_by_code(&self, code: &str) -> Option<Arc<CustodyChain>> {
        let id = *self.codes.read().get(code)?;
        self.get(id)
    }

    pub fn is_code_taken(&self, code: &str) -> bool {
        self.codes.read().contains_key(code)
    }

    /// All chains ordered by id.
    pub fn list(&self) -> Vec<Arc<CustodyChain>> {
        let mut chains: Vec<_> = self.chains.read().values().cloned().collect();
        chains.sort_by_key(|c| c.id);
        chains
    }

    pub fn len(&self) -> usize {
        self.chains.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_with_status(&self, status: ChainStatus) -> usize {
        self.chains
            .read()
            .values()
            .filter(|c| c.status == status)
            .count()
    }

    /// Install derived chain states from a committed batch.
    pub(crate) fn install(&self, chains: Vec<CustodyChain>) -> Vec<Arc<CustodyChain>> {
        let mut installed = Vec::with_capacity(chains.len());
        let mut map = self.chains.write();
        let mut codes = self.codes.write();
        for chain in chains {
            self.next_id.fetch_max(chain.id.0 + 1, Ordering::SeqCst);
            codes.insert(chain.chain_code.clone(), chain.id);
            let chain = Arc::new(chain);
            map.insert(chain.id, Arc::clone(&chain));
            installed.push(chain);
        }
        installed
    }

    /// Re-derive state from one event read back from the log.
    pub(crate) fn replay(&self, event: &CustodyEvent) -> Result<()> {
        let chain = match event.genesis() {
            Some(genesis) => {
                if self.get(event.chain_id).is_some() || self.is_code_taken(&genesis.chain_code) {
                    return Err(LedgerError::Corruption(format!(
                        "chain {} created twice in the log",
                        genesis.chain_code
                    )));
                }
                projection::chain_from_genesis(event.chain_id, genesis, event)?
            }
            None => {
                let current = self.get(event.chain_id).ok_or_else(|| {
                    LedgerError::Corruption(format!(
                        "event {} refers to unknown chain {}",
                        event.id, event.chain_id
                    ))
                })?;
                let mut chain = (*current).clone();
                projection::apply_event(&mut chain, event)?;
                chain
            }
        };
        self.install(vec![chain]);
        Ok(())
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}
