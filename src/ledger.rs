//! The ledger: one authority over chains, events and their validation.

use crate::balance::lineage::{self, Direction};
use crate::balance::{MassBalanceReport, MassBalanceValidator};
use crate::cancel::CancelToken;
use crate::config::LedgerConfig;
use crate::engine::{self, Mutation};
use crate::error::{LedgerError, Result};
use crate::events::{EventCursor, EventLog, EventStore};
use crate::locks::ChainLocks;
use crate::reference::{OpenDirectory, ReferenceDirectory};
use crate::registry::ChainRegistry;
use crate::subscriptions::{
    SubscriptionConfig, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
    SubscriptionManager,
};
use crate::types::{
    BusinessStep, ChainId, ChainStatus, CreateChainInput, CustodyChain, CustodyEvent,
    Disposition, EventId, EventType, Hash, LedgerStats, MergeRequest, RecordEventInput,
    SplitRequest, UserRef,
};
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

const LOG_FILE: &str = "events.log";
const LOCK_FILE: &str = "LOCK";

/// Result of recording an event.
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    /// The event as appended to the target chain.
    pub event: Arc<CustodyEvent>,
    /// The target chain after the event.
    pub chain: Arc<CustodyChain>,
    /// Chains created from declared outputs, in declaration order.
    pub outputs: Vec<Arc<CustodyChain>>,
}

/// Events and chain states installed by one commit.
struct Committed {
    events: Vec<Arc<CustodyEvent>>,
    chains: Vec<Arc<CustodyChain>>,
    created: Vec<ChainId>,
}

impl Committed {
    fn chain(&self, id: ChainId) -> Result<Arc<CustodyChain>> {
        self.chains
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| LedgerError::chain_not_found(id))
    }

    fn created(&self) -> Result<Vec<Arc<CustodyChain>>> {
        self.created.iter().map(|id| self.chain(*id)).collect()
    }
}

/// Chain-of-custody ledger.
///
/// Mutations lock the chains they touch, plan their events against that
/// locked state, then commit the whole batch under a short global write
/// lock. Readers never take chain locks.
pub struct Ledger {
    config: LedgerConfig,

    /// Held for the lifetime of a durable ledger.
    _lock_file: Option<File>,

    store: EventStore,
    registry: ChainRegistry,
    locks: ChainLocks,
    validator: MassBalanceValidator,
    directory: Arc<dyn ReferenceDirectory>,
    subscriptions: SubscriptionManager,

    /// Serializes id assignment, log writes and installs.
    write_lock: Mutex<()>,
}

impl Ledger {
    /// A ledger without durability that accepts any reference.
    pub fn in_memory() -> Self {
        Self::build(LedgerConfig::in_memory(), None, EventStore::in_memory(), Arc::new(OpenDirectory))
    }

    /// Open the ledger described by `config`, replaying its log if durable.
    pub fn open(config: LedgerConfig) -> Result<Self> {
        Self::open_with_directory(config, Arc::new(OpenDirectory))
    }

    /// Open with a directory that resolves and checks references.
    pub fn open_with_directory(
        config: LedgerConfig,
        directory: Arc<dyn ReferenceDirectory>,
    ) -> Result<Self> {
        config.validate()?;

        let Some(path) = config.path.clone() else {
            return Ok(Self::build(config, None, EventStore::in_memory(), directory));
        };

        fs::create_dir_all(&path)?;
        let lock_file = Self::acquire_lock(&path)?;
        let (log, batches) = EventLog::open(path.join(LOG_FILE), config.sync_interval)?;

        let ledger = Self::build(config, Some(lock_file), EventStore::durable(log), directory);
        let mut replayed = 0usize;
        for batch in batches {
            for event in ledger.store.restore(batch)? {
                ledger.registry.replay(&event)?;
                replayed += 1;
            }
        }

        tracing::debug!(
            path = %path.display(),
            events = replayed,
            chains = ledger.registry.len(),
            "replayed custody log"
        );
        Ok(ledger)
    }

    fn build(
        config: LedgerConfig,
        lock_file: Option<File>,
        store: EventStore,
        directory: Arc<dyn ReferenceDirectory>,
    ) -> Self {
        Self {
            locks: ChainLocks::new(config.lock_timeout()),
            validator: MassBalanceValidator::from_config(&config),
            config,
            _lock_file: lock_file,
            store,
            registry: ChainRegistry::new(),
            directory,
            subscriptions: SubscriptionManager::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| LedgerError::Locked)?;
        Ok(lock_file)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn directory(&self) -> &dyn ReferenceDirectory {
        self.directory.as_ref()
    }

    // --- Mutations ---

    /// Create an origin chain with its creation event.
    pub fn create_chain(&self, input: CreateChainInput) -> Result<Arc<CustodyChain>> {
        let mutation = engine::plan_creation(&input, &self.registry, self.directory())?;
        let committed = self.commit(mutation)?;
        committed.created()?.into_iter().next().ok_or_else(|| {
            LedgerError::Validation("chain creation produced no chain".into())
        })
    }

    /// Append a caller-recorded event to a chain.
    pub fn record_event(&self, input: RecordEventInput) -> Result<RecordedEvent> {
        let _guard = self.locks.acquire(&[input.chain_id])?;
        let chain = self.registry.require(input.chain_id)?;

        let mutation = engine::plan_record(&chain, &input, &self.registry, self.directory())?;
        let committed = self.commit(mutation)?;

        let event = committed
            .events
            .first()
            .cloned()
            .ok_or_else(|| LedgerError::InvalidEvent("no event was recorded".into()))?;
        Ok(RecordedEvent {
            event,
            chain: committed.chain(input.chain_id)?,
            outputs: committed.created()?,
        })
    }

    /// Take a chain with remaining mass out of circulation.
    ///
    /// `disposition` must be one of destroyed, recalled or expired.
    pub fn close_chain(
        &self,
        chain_id: ChainId,
        disposition: Disposition,
        recorded_by: Option<UserRef>,
        notes: Option<String>,
    ) -> Result<Arc<CustodyChain>> {
        if !disposition.is_closing() {
            return Err(LedgerError::Validation(format!(
                "{:?} does not close a chain",
                disposition
            )));
        }
        let mut input = RecordEventInput::new(
            chain_id,
            EventType::Processing,
            BusinessStep::Storing,
            disposition,
        );
        input.recorded_by = recorded_by;
        input.notes = notes;
        Ok(self.record_event(input)?.chain)
    }

    /// Split a chain; returns the children in allocation order.
    pub fn split(&self, chain_id: ChainId, request: SplitRequest) -> Result<Vec<Arc<CustodyChain>>> {
        let _guard = self.locks.acquire(&[chain_id])?;
        let source = self.registry.require(chain_id)?;

        let mutation = engine::plan_split(&source, &request, &self.registry, self.directory())?;
        self.commit(mutation)?.created()
    }

    /// Merge chains of one product into a new chain.
    pub fn merge(&self, request: MergeRequest) -> Result<Arc<CustodyChain>> {
        let ids = engine::distinct(&request.chain_ids);
        if ids.len() < 2 {
            return Err(LedgerError::EmptySet {
                required: 2,
                got: ids.len(),
            });
        }

        let _guard = self.locks.acquire(&ids)?;
        let sources = ids
            .iter()
            .map(|id| self.registry.require(*id))
            .collect::<Result<Vec<_>>>()?;

        let mutation = engine::plan_merge(&sources, &request, &self.registry, self.directory())?;
        let committed = self.commit(mutation)?;
        committed.created()?.into_iter().next().ok_or_else(|| {
            LedgerError::Validation("merge produced no chain".into())
        })
    }

    /// Install a planned mutation as one unit, or fail leaving no trace.
    fn commit(&self, mutation: Mutation) -> Result<Committed> {
        let _write = self.write_lock.lock();

        for new_code in &mutation.new_codes {
            if self.registry.is_code_taken(&new_code.code) {
                return Err(if new_code.generated {
                    LedgerError::ConcurrencyConflict(format!(
                        "generated chain code {} was claimed concurrently",
                        new_code.code
                    ))
                } else {
                    LedgerError::Validation(format!("chain code already in use: {}", new_code.code))
                });
            }
        }

        let created = mutation.created;
        let events = self.store.append_batch(mutation.events)?;
        let chains = self.registry.install(mutation.chains);

        if let (Some(first), Some(last)) = (events.first(), events.last()) {
            tracing::info!(
                first_event = %first.id,
                last_event = %last.id,
                chains = chains.len(),
                created = created.len(),
                "committed custody mutation"
            );
        }
        self.subscriptions.publish(&events, &chains);

        Ok(Committed {
            events,
            chains,
            created,
        })
    }

    // --- Queries ---

    pub fn get_chain(&self, id: ChainId) -> Result<Arc<CustodyChain>> {
        self.registry.require(id)
    }

    pub fn find_by_code(&self, code: &str) -> Option<Arc<CustodyChain>> {
        self.registry.find_by_code(code)
    }

    /// All chains ordered by id.
    pub fn list_chains(&self) -> Vec<Arc<CustodyChain>> {
        self.registry.list()
    }

    /// Chains in one status, ordered by id.
    pub fn chains_with_status(&self, status: ChainStatus) -> Vec<Arc<CustodyChain>> {
        self.registry
            .list()
            .into_iter()
            .filter(|c| c.status == status)
            .collect()
    }

    pub fn get_event(&self, id: EventId) -> Result<Arc<CustodyEvent>> {
        self.store.get(id).ok_or(LedgerError::EventNotFound(id))
    }

    /// Cursor over a chain's events ordered by `(event_time, id)`.
    pub fn list_events(&self, chain_id: ChainId) -> Result<EventCursor> {
        self.registry.require(chain_id)?;
        Ok(self.store.list(chain_id))
    }

    pub fn list_events_cancellable(&self, chain_id: ChainId, cancel: CancelToken) -> Result<EventCursor> {
        Ok(self.list_events(chain_id)?.with_cancellation(cancel))
    }

    pub fn validate_mass_balance(&self, chain_id: ChainId) -> Result<MassBalanceReport> {
        self.validate_mass_balance_cancellable(chain_id, &CancelToken::new())
    }

    pub fn validate_mass_balance_cancellable(
        &self,
        chain_id: ChainId,
        cancel: &CancelToken,
    ) -> Result<MassBalanceReport> {
        self.validator
            .validate(&self.registry, &self.store, chain_id, cancel)
    }

    /// Every chain `chain_id` was derived from.
    pub fn ancestors(&self, chain_id: ChainId) -> Result<Vec<Arc<CustodyChain>>> {
        lineage::walk(
            &self.registry,
            chain_id,
            Direction::Ancestors,
            self.validator.limits(),
            &CancelToken::new(),
        )
    }

    /// Every chain derived from `chain_id`.
    pub fn descendants(&self, chain_id: ChainId) -> Result<Vec<Arc<CustodyChain>>> {
        lineage::walk(
            &self.registry,
            chain_id,
            Direction::Descendants,
            self.validator.limits(),
            &CancelToken::new(),
        )
    }

    /// SHA-256 over every event in the chain's lineage component, in id
    /// order. Changes whenever any connected chain records an event.
    pub fn custody_digest(&self, chain_id: ChainId) -> Result<Hash> {
        let chains = lineage::component(
            &self.registry,
            chain_id,
            self.validator.limits(),
            &CancelToken::new(),
        )?;
        let mut events: Vec<Arc<CustodyEvent>> = chains
            .iter()
            .flat_map(|c| self.store.events_for(c.id).iter().cloned().collect::<Vec<_>>())
            .collect();
        events.sort_by_key(|e| e.id);

        let mut hasher = Sha256::new();
        for event in &events {
            let bytes = rmp_serde::to_vec_named(event.as_ref())?;
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(&bytes);
        }
        Ok(Hash(hasher.finalize().into()))
    }

    // --- Notifications ---

    /// Receive notifications for mutations committed from now on.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> SubscriptionHandle {
        self.subscriptions.subscribe(SubscriptionConfig {
            buffer_size: self.config.notification_buffer,
            filter,
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    // --- Maintenance ---

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            chain_count: self.registry.len(),
            active_chains: self.registry.count_with_status(ChainStatus::Active),
            event_count: self.store.len(),
            log_bytes: self.store.log_size(),
        }
    }

    /// Flush the log to disk.
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    pub fn is_durable(&self) -> bool {
        self.store.is_durable()
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
