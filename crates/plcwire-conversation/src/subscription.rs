// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Live subscriptions of one connection.
//!
//! Every established field is delivered one of two ways:
//!
//! - **Polled**: a task re-reads the field on a timer. Cyclic fields deliver
//!   every read; change-of-state fields deliver only when the value differs
//!   from the last delivered one.
//! - **Passive**: the field waits for unsolicited frames routed to it by
//!   address (event fields, and change-of-state fields the device notifies
//!   natively).

use crate::engine::ConversationEngine;
use crate::protocol::{Notification, Protocol};
use dashmap::DashMap;
use parking_lot::Mutex;
use plcwire_core::{
    Exchange, FieldAddress, FieldError, FieldOperation, RequestItem, SubscriptionEvent,
    SubscriptionId, SubscriptionKind, Value,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

// =============================================================================
// Registry rows
// =============================================================================

/// How an established field receives values.
#[derive(Debug)]
pub enum Delivery {
    /// A poll task owns the delivery.
    Polled(JoinHandle<()>),
    /// Values arrive through [`SubscriptionRegistry::route`].
    Passive,
}

/// One established subscription field.
#[derive(Debug)]
pub struct ActiveField {
    /// Field name.
    pub name: String,
    /// Subscribed address, possibly a wildcard.
    pub address: FieldAddress,
    /// Delivery model.
    pub kind: SubscriptionKind,
    /// Delivery mechanism.
    pub delivery: Delivery,
    registered: bool,
    last_routed: Mutex<HashMap<FieldAddress, Value>>,
}

impl ActiveField {
    /// Creates an established field.
    pub fn new(
        name: impl Into<String>,
        address: FieldAddress,
        kind: SubscriptionKind,
        delivery: Delivery,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            kind,
            delivery,
            registered: false,
            last_routed: Mutex::new(HashMap::new()),
        }
    }

    /// Marks the field as held by the device, which must be told when the
    /// field goes away.
    pub fn registered_on_device(mut self) -> Self {
        self.registered = true;
        self
    }

    /// Whether the device holds a subscription for this field.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Whether a routed value should reach the subscriber. Change-of-state
    /// fields only pass values that differ from the last one routed for the
    /// same concrete address.
    fn admits(&self, notification: &Notification) -> bool {
        if !matches!(self.kind, SubscriptionKind::ChangeOfState) {
            return true;
        }
        let mut last = self.last_routed.lock();
        if last.get(&notification.address) == Some(&notification.value) {
            return false;
        }
        last.insert(notification.address.clone(), notification.value.clone());
        true
    }

    fn stop(&self) {
        if let Delivery::Polled(task) = &self.delivery {
            task.abort();
        }
    }
}

#[derive(Debug)]
struct ActiveSubscription {
    sender: mpsc::Sender<SubscriptionEvent>,
    fields: Vec<ActiveField>,
}

// =============================================================================
// SubscriptionRegistry
// =============================================================================

/// Subscriptions keyed by ID.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    active: DashMap<SubscriptionId, ActiveSubscription>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh subscription ID.
    pub fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Stores the established fields of a subscription.
    pub fn insert(
        &self,
        id: SubscriptionId,
        sender: mpsc::Sender<SubscriptionEvent>,
        fields: Vec<ActiveField>,
    ) {
        info!(subscription = %id, fields = fields.len(), "subscription established");
        self.active.insert(id, ActiveSubscription { sender, fields });
    }

    /// Delivers an unsolicited value to every passive field whose address
    /// covers it. Returns the number of deliveries.
    pub fn route(&self, notification: &Notification) -> usize {
        let mut delivered = 0;
        for entry in self.active.iter() {
            let (id, subscription) = entry.pair();
            for field in &subscription.fields {
                if !matches!(field.delivery, Delivery::Passive)
                    || !field.address.matches(&notification.address)
                    || !field.admits(notification)
                {
                    continue;
                }
                let event = SubscriptionEvent::new(
                    field.name.clone(),
                    notification.address.clone(),
                    notification.value.clone(),
                );
                match subscription.sender.try_send(event) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(subscription = %id, field = %field.name, "subscriber lagging; dropping event")
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(subscription = %id, field = %field.name, "subscriber gone")
                    }
                }
            }
        }
        delivered
    }

    /// Tears down one field, or the whole subscription when `field` is
    /// `None`. Returns the number of fields removed.
    ///
    /// Values already queued stay readable; the delivery channel ends once
    /// the last field of the subscription is gone.
    pub fn remove(&self, id: SubscriptionId, field: Option<&str>) -> usize {
        self.take(id, field).len()
    }

    /// Like [`remove`](Self::remove), but hands back the stopped fields.
    pub fn take(&self, id: SubscriptionId, field: Option<&str>) -> Vec<ActiveField> {
        let removed = match field {
            None => self
                .active
                .remove(&id)
                .map(|(_, subscription)| subscription.fields)
                .unwrap_or_default(),
            Some(name) => {
                let (removed, now_empty) = match self.active.get_mut(&id) {
                    Some(mut subscription) => {
                        let (removed, kept) = std::mem::take(&mut subscription.fields)
                            .into_iter()
                            .partition::<Vec<_>, _>(|f| f.name == name);
                        subscription.fields = kept;
                        (removed, subscription.fields.is_empty())
                    }
                    None => (Vec::new(), false),
                };
                if now_empty {
                    self.active.remove(&id);
                }
                removed
            }
        };
        removed.iter().for_each(ActiveField::stop);
        if !removed.is_empty() {
            info!(subscription = %id, field = ?field, removed = removed.len(), "unsubscribed");
        }
        removed
    }

    /// Tears down every subscription. Returns the number of fields removed.
    pub fn clear(&self) -> usize {
        let ids: Vec<SubscriptionId> = self.active.iter().map(|e| *e.key()).collect();
        ids.into_iter().map(|id| self.remove(id, None)).sum()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns `true` when nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Names of the live fields of a subscription.
    pub fn field_names(&self, id: SubscriptionId) -> Vec<String> {
        self.active
            .get(&id)
            .map(|s| s.fields.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default()
    }
}

// =============================================================================
// Polling
// =============================================================================

/// What a poll task does with each read value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Deliver every read.
    Every,
    /// Deliver only values that differ from the last delivered one.
    OnChange,
}

/// Spawns a task that reads `address` every `interval` and delivers the
/// values tagged with `name`.
pub fn spawn_poller<P: Protocol>(
    engine: Arc<ConversationEngine<P>>,
    name: String,
    address: FieldAddress,
    interval: Duration,
    mode: PollMode,
    sender: mpsc::Sender<SubscriptionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<Value> = None;
        debug!(field = %name, address = %address, interval_ms = interval.as_millis() as u64, ?mode, "poller started");

        loop {
            ticker.tick().await;
            let item = RequestItem::new(name.clone(), address.clone(), FieldOperation::Read);
            let outcome = engine.exchange(Exchange::single(item)).await.pop();

            match outcome {
                Some(Ok(Some(value))) => {
                    if mode == PollMode::OnChange && last.as_ref() == Some(&value) {
                        continue;
                    }
                    last = Some(value.clone());
                    let event = SubscriptionEvent::new(name.clone(), address.clone(), value);
                    if sender.send(event).await.is_err() {
                        break;
                    }
                }
                Some(Ok(None)) | None => {}
                Some(Err(FieldError::ConnectionClosed)) => break,
                Some(Err(e)) => {
                    debug!(field = %name, error = %e, "poll read failed");
                }
            }
        }
        debug!(field = %name, "poller stopped");
    })
}

// =============================================================================
// Tests
// =============================================================================
