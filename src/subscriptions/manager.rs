//! Subscription manager for broadcasting ledger notifications.

use crate::types::{CustodyChain, CustodyEvent};
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{
    ChainSummary, DropReason, EventSummary, LedgerNotification, SubscriptionConfig,
    SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};

struct Subscription {
    filter: SubscriptionFilter,
    sender: Sender<LedgerNotification>,
}

impl Subscription {
    /// Returns false if the buffer is full or the receiver is gone.
    fn try_send(&self, notification: LedgerNotification) -> bool {
        self.sender.try_send(notification).is_ok()
    }
}

/// Manages subscriptions and broadcasts notifications.
pub struct SubscriptionManager {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription. Only mutations committed after this call
    /// are delivered.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscriptions.write().insert(
            id,
            Subscription {
                filter: config.filter,
                sender,
            },
        );

        SubscriptionHandle { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            let _ = sub.sender.try_send(LedgerNotification::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Publish one committed mutation: its events in append order, then the
    /// resulting chain states.
    pub fn publish(&self, events: &[Arc<CustodyEvent>], chains: &[Arc<CustodyChain>]) {
        if self.subscriptions.read().is_empty() {
            return;
        }

        let mut to_remove = Vec::new();
        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                let delivered = events
                    .iter()
                    .filter(|e| sub.filter.matches_event(e))
                    .all(|e| {
                        sub.try_send(LedgerNotification::EventRecorded {
                            event: EventSummary::from_event(e),
                        })
                    })
                    && (!sub.filter.include_chain_changes
                        || chains
                            .iter()
                            .filter(|c| sub.filter.matches_chain(c.id))
                            .all(|c| {
                                sub.try_send(LedgerNotification::ChainChanged {
                                    chain: ChainSummary::from_chain(c),
                                })
                            }));
                if !delivered {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::warn!(subscription = id.0, "dropping slow subscriber");
                    let _ = sub.sender.try_send(LedgerNotification::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
