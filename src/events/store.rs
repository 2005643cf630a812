//! In-memory event index over the (optionally durable) log.

use super::log::EventLog;
use crate::cancel::CancelToken;
use crate::error::{LedgerError, Result};
use crate::types::{ChainId, CustodyEvent, EventId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Events of one chain ordered by `(event_time, id)`. Shared with cursors;
/// appends copy the list only while a cursor still holds the old one.
type ChainEvents = Arc<Vec<Arc<CustodyEvent>>>;

/// Append-only event store: the single source of truth for the ledger.
pub struct EventStore {
    /// Durable backing log, if any.
    log: Option<EventLog>,

    /// All events in insertion order.
    all: RwLock<Vec<Arc<CustodyEvent>>>,

    /// Per-chain ordered views.
    by_chain: RwLock<HashMap<ChainId, ChainEvents>>,

    /// Last assigned event id.
    last_id: Mutex<EventId>,
}

impl EventStore {
    /// Store without durability.
    pub fn in_memory() -> Self {
        Self::with_log(None)
    }

    /// Store writing every batch to `log` before it becomes visible.
    pub fn durable(log: EventLog) -> Self {
        Self::with_log(Some(log))
    }

    fn with_log(log: Option<EventLog>) -> Self {
        Self {
            log,
            all: RwLock::new(Vec::new()),
            by_chain: RwLock::new(HashMap::new()),
            last_id: Mutex::new(EventId(0)),
        }
    }

    /// Assign ids, persist and index a batch of events as one unit.
    ///
    /// Nothing becomes visible unless the whole batch was written.
    pub(crate) fn append_batch(&self, mut drafts: Vec<CustodyEvent>) -> Result<Vec<Arc<CustodyEvent>>> {
        let mut last_id = self.last_id.lock();

        let mut id = *last_id;
        for event in drafts.iter_mut() {
            id = id.next();
            event.id = id;
        }

        if let Some(log) = &self.log {
            log.append_batch(&drafts)?;
        }
        *last_id = id;

        let events: Vec<Arc<CustodyEvent>> = drafts.into_iter().map(Arc::new).collect();
        self.index(&events);
        Ok(events)
    }

    /// Index events read back from the log during replay.
    pub(crate) fn restore(&self, events: Vec<CustodyEvent>) -> Result<Vec<Arc<CustodyEvent>>> {
        let mut last_id = self.last_id.lock();
        for event in &events {
            if event.id <= *last_id {
                return Err(LedgerError::Corruption(format!(
                    "event id {} replayed out of order (last {})",
                    event.id, *last_id
                )));
            }
            *last_id = event.id;
        }

        let events: Vec<Arc<CustodyEvent>> = events.into_iter().map(Arc::new).collect();
        self.index(&events);
        Ok(events)
    }

    fn index(&self, events: &[Arc<CustodyEvent>]) {
        self.all.write().extend(events.iter().cloned());

        let mut by_chain = self.by_chain.write();
        for event in events {
            let list = Arc::make_mut(by_chain.entry(event.chain_id).or_default());
            let key = (event.event_time, event.id);
            let position = list.partition_point(|e| (e.event_time, e.id) <= key);
            list.insert(position, Arc::clone(event));
        }
    }

    /// Get an event by id.
    pub fn get(&self, id: EventId) -> Option<Arc<CustodyEvent>> {
        let all = self.all.read();
        all.binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|idx| Arc::clone(&all[idx]))
    }

    /// Snapshot of a chain's events, ordered by `(event_time, id)`.
    pub fn events_for(&self, chain_id: ChainId) -> ChainEvents {
        self.by_chain
            .read()
            .get(&chain_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Cursor over a chain's events.
    pub fn list(&self, chain_id: ChainId) -> EventCursor {
        EventCursor::new(self.events_for(chain_id))
    }

    /// Snapshot of every event in insertion order.
    pub fn all(&self) -> Vec<Arc<CustodyEvent>> {
        self.all.read().clone()
    }

    pub fn len(&self) -> usize {
        self.all.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_id(&self) -> EventId {
        *self.last_id.lock()
    }

    pub fn is_durable(&self) -> bool {
        self.log.is_some()
    }

    /// Bytes written to the backing log (0 in memory).
    pub fn log_size(&self) -> u64 {
        self.log.as_ref().map_or(0, |log| log.size())
    }

    pub fn sync(&self) -> Result<()> {
        match &self.log {
            Some(log) => log.sync(),
            None => Ok(()),
        }
    }
}

/// Lazy, finite, restartable cursor over a snapshot of a chain's events.
///
/// Events appended after the cursor was created are not visible to it;
/// calling `restart` rewinds over the same snapshot.
pub struct EventCursor {
    events: ChainEvents,
    position: usize,
    cancel: Option<CancelToken>,
    cancelled: bool,
}

impl EventCursor {
    fn new(events: ChainEvents) -> Self {
        Self {
            events,
            position: 0,
            cancel: None,
            cancelled: false,
        }
    }

    /// Stop with `Cancelled` once `token` fires.
    pub fn with_cancellation(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Rewind to the first event.
    pub fn restart(&mut self) {
        self.position = 0;
        self.cancelled = false;
    }

    /// Total events in the snapshot.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Iterator for EventCursor {
    type Item = Result<Arc<CustodyEvent>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancelled {
            return None;
        }
        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                self.cancelled = true;
                return Some(Err(LedgerError::Cancelled));
            }
        }
        let event = self.events.get(self.position)?;
        self.position += 1;
        Some(Ok(Arc::clone(event)))
    }
}
