//! Subscription types for live ledger updates.

use crate::quantity::{Quantity, Unit};
use crate::types::{ChainId, ChainStatus, CustodyChain, CustodyEvent, EventId, EventType};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered notifications before the subscriber is dropped.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::default(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug)]
pub struct SubscriptionFilter {
    /// Only these chains (None = every chain).
    pub chain_ids: Option<Vec<ChainId>>,

    /// Only these event types (None = every type).
    pub event_types: Option<Vec<EventType>>,

    /// Include recorded events.
    pub include_events: bool,

    /// Include chain state changes.
    pub include_chain_changes: bool,
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl SubscriptionFilter {
    /// Everything the ledger publishes.
    pub fn all() -> Self {
        Self {
            chain_ids: None,
            event_types: None,
            include_events: true,
            include_chain_changes: true,
        }
    }

    /// Events and state changes of specific chains.
    pub fn chains(chain_ids: Vec<ChainId>) -> Self {
        Self {
            chain_ids: Some(chain_ids),
            ..Self::all()
        }
    }

    /// Recorded events of specific types only.
    pub fn event_types(types: Vec<EventType>) -> Self {
        Self {
            event_types: Some(types),
            include_chain_changes: false,
            ..Self::all()
        }
    }

    pub(crate) fn matches_chain(&self, chain_id: ChainId) -> bool {
        self.chain_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&chain_id))
    }

    pub(crate) fn matches_event(&self, event: &CustodyEvent) -> bool {
        self.include_events
            && self.matches_chain(event.chain_id)
            && self
                .event_types
                .as_ref()
                .map_or(true, |types| types.contains(&event.event_type))
    }
}

/// Notifications emitted by the ledger after a mutation commits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerNotification {
    /// A custody event was appended.
    EventRecorded { event: EventSummary },

    /// A chain was created or its state changed.
    ChainChanged { chain: ChainSummary },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Summary of a recorded event.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: EventId,
    pub chain_id: ChainId,
    pub event_type: EventType,
    pub quantity: Option<Quantity>,
    pub unit: Unit,
}

impl EventSummary {
    pub fn from_event(event: &CustodyEvent) -> Self {
        Self {
            id: event.id,
            chain_id: event.chain_id,
            event_type: event.event_type,
            quantity: event.quantity,
            unit: event.unit,
        }
    }
}

/// Summary of a chain's state after a change.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub id: ChainId,
    pub chain_code: String,
    pub status: ChainStatus,
    pub remaining_quantity: Quantity,
    pub unit: Unit,
}

impl ChainSummary {
    pub fn from_chain(chain: &CustodyChain) -> Self {
        Self {
            id: chain.id,
            chain_code: chain.chain_code.clone(),
            status: chain.status,
            remaining_quantity: chain.remaining_quantity,
            unit: chain.unit,
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive notifications.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub receiver: crossbeam_channel::Receiver<LedgerNotification>,
}

impl SubscriptionHandle {
    /// Receive the next notification (blocking).
    pub fn recv(&self) -> Result<LedgerNotification, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a notification (non-blocking).
    pub fn try_recv(&self) -> Result<LedgerNotification, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<LedgerNotification, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
