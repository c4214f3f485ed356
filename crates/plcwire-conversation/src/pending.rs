// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Pending-request registry.
//!
//! Every outbound exchange registers a pending entry *before* its frame is
//! written, so a fast reply can never arrive ahead of its waiter.
//!
//! ```text
//!   caller                       registry                      dispatch loop
//!     │ register(key, predicate)    │                                │
//!     │────────────────────────────►│ entries[key] = waiter          │
//!     │ transport.send(frame)       │                                │
//!     │                             │◄──── route(frame) ─────────────│
//!     │                             │ classify + remove (one lock)   │
//!     │◄──── Completion ────────────│                                │
//! ```
//!
//! Removal and completion are separated by the lock: whichever of the
//! dispatch loop, the timeout, a cancel or a close removes the entry first
//! owns its completion, and every later attempt finds nothing to do.

use crate::predicate::{classify, AbortInfo, BoxPredicate, Classification};
use parking_lot::Mutex;
use plcwire_core::{FieldError, FieldResult};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};

// =============================================================================
// Deadline
// =============================================================================

/// Absolute deadline of one exchange plus the timeout it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Creates a deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    /// The instant the exchange expires.
    #[inline]
    pub fn at(&self) -> Instant {
        self.at
    }

    /// The configured timeout.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns `true` once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// The error reported for an expired exchange.
    pub fn expired_error(&self) -> FieldError {
        FieldError::timeout(self.timeout)
    }
}

// =============================================================================
// Completion
// =============================================================================

/// How a pending entry was resolved.
#[derive(Debug)]
pub enum Completion<F> {
    /// A frame matched with the expected payload.
    Matched(F),
    /// A frame matched with the protocol's abort payload.
    Aborted(AbortInfo),
    /// The entry was resolved without a frame.
    Failed(FieldError),
}

/// What the dispatch loop should do with a frame after routing.
#[derive(Debug)]
pub enum Routing<K, F> {
    /// The frame resolved the entry registered under this key.
    Completed(K),
    /// The frame repeats a reply for an already resolved key.
    Duplicate(K),
    /// No pending or recent entry wanted the frame.
    Unmatched(F),
}

// =============================================================================
// Registry
// =============================================================================

struct PendingEntry<F> {
    seq: u64,
    predicate: BoxPredicate<F>,
    tx: oneshot::Sender<Completion<F>>,
    registered_at: Instant,
}

struct RegistryState<K, F> {
    entries: HashMap<K, PendingEntry<F>>,
    recent: VecDeque<(K, BoxPredicate<F>)>,
    next_seq: u64,
    closed: bool,
}

/// Outstanding exchanges of one connection, keyed by correlation key.
///
/// At most one entry exists per key. A caller whose key is occupied waits
/// until the key is released or its own deadline passes.
pub struct PendingRegistry<K, F> {
    state: Mutex<RegistryState<K, F>>,
    released: Notify,
    max_pending: usize,
    history: usize,
}

impl<K, F> PendingRegistry<K, F>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    F: Send + 'static,
{
    /// Creates a registry.
    ///
    /// `max_pending` bounds the number of outstanding entries; `history` is
    /// how many resolved keys are remembered to recognize late duplicates.
    pub fn new(max_pending: usize, history: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                recent: VecDeque::with_capacity(history),
                next_seq: 0,
                closed: false,
            }),
            released: Notify::new(),
            max_pending: max_pending.max(1),
            history,
        }
    }

    /// Registers a waiter for `key`.
    ///
    /// Waits while the key is occupied or the registry is full. Fails with
    /// [`FieldError::Timeout`] if that wait outlives `deadline` and with
    /// [`FieldError::ConnectionClosed`] once the registry is closed.
    pub async fn register(
        self: &Arc<Self>,
        key: K,
        predicate: BoxPredicate<F>,
        deadline: Deadline,
    ) -> FieldResult<PendingHandle<K, F>> {
        loop {
            // Created before the check so a release between the check and
            // the await still wakes this waiter.
            let released = self.released.notified();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(FieldError::ConnectionClosed);
                }

                let blocked = if state.entries.contains_key(&key) {
                    Some("key in use")
                } else if state.entries.len() >= self.max_pending {
                    Some("registry full")
                } else {
                    None
                };

                match blocked {
                    None => {
                        let seq = state.next_seq;
                        state.next_seq += 1;
                        let (tx, rx) = oneshot::channel();
                        debug!(
                            key = ?key,
                            predicate = %predicate.describe(),
                            outstanding = state.entries.len() + 1,
                            "registered pending entry"
                        );
                        state.entries.insert(
                            key.clone(),
                            PendingEntry {
                                seq,
                                predicate,
                                tx,
                                registered_at: Instant::now(),
                            },
                        );
                        return Ok(PendingHandle {
                            registry: Arc::clone(self),
                            key,
                            seq,
                            rx,
                            armed: true,
                        });
                    }
                    Some(reason) => {
                        debug!(key = ?key, reason, "waiting to register pending entry");
                    }
                }
            }

            if tokio::time::timeout_at(deadline.at(), released).await.is_err() {
                return Err(deadline.expired_error());
            }
        }
    }

    /// Routes a decoded frame to the entry it resolves.
    ///
    /// With a `hint` only the entry registered under that key is tested.
    pub fn route(&self, frame: F, hint: Option<&K>) -> Routing<K, F> {
        let mut state = self.state.lock();

        let classification = match hint {
            Some(key) => match state.entries.get(key) {
                Some(entry) => classify(
                    &frame,
                    std::iter::once((key, entry.seq, entry.predicate.as_ref())),
                ),
                None => Classification::NoMatch,
            },
            None => classify(
                &frame,
                state
                    .entries
                    .iter()
                    .map(|(k, e)| (k, e.seq, e.predicate.as_ref())),
            ),
        };

        let (key, abort) = match classification {
            Classification::NoMatch => {
                let duplicate = state
                    .recent
                    .iter()
                    .rev()
                    .find(|(k, p)| hint.map_or(true, |h| h == k) && p.test(&frame).is_match())
                    .map(|(k, _)| k.clone());
                drop(state);
                return match duplicate {
                    Some(key) => Routing::Duplicate(key),
                    None => Routing::Unmatched(frame),
                };
            }
            Classification::Success(key) => (key, None),
            Classification::Abort(key, info) => (key, Some(info)),
        };

        let Some(entry) = state.entries.remove(&key) else {
            return Routing::Unmatched(frame);
        };
        let PendingEntry {
            predicate,
            tx,
            registered_at,
            ..
        } = entry;
        Self::remember(&mut state.recent, self.history, key.clone(), predicate);
        drop(state);
        self.released.notify_waiters();

        trace!(
            key = ?key,
            aborted = abort.is_some(),
            elapsed_us = registered_at.elapsed().as_micros() as u64,
            "completing pending entry"
        );

        let completion = match abort {
            None => Completion::Matched(frame),
            Some(info) => Completion::Aborted(info),
        };
        if tx.send(completion).is_err() {
            debug!(key = ?key, "waiter went away before completion");
        }
        Routing::Completed(key)
    }

    /// Resolves the entry for `key` with [`FieldError::Cancelled`].
    pub fn cancel(&self, key: &K) -> bool {
        let entry = self.state.lock().entries.remove(key);
        match entry {
            Some(entry) => {
                self.released.notify_waiters();
                debug!(key = ?key, "cancelled pending entry");
                let _ = entry.tx.send(Completion::Failed(FieldError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Fails every outstanding entry with [`FieldError::ConnectionClosed`]
    /// and refuses new registrations. Returns the number of entries failed.
    pub fn close(&self) -> usize {
        let drained: Vec<(K, PendingEntry<F>)> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.recent.clear();
            state.entries.drain().collect()
        };
        self.released.notify_waiters();

        let count = drained.len();
        for (key, entry) in drained {
            debug!(key = ?key, "failing pending entry on close");
            let _ = entry.tx.send(Completion::Failed(FieldError::ConnectionClosed));
        }
        count
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of outstanding entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` when nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the keys of outstanding entries (for diagnostics).
    pub fn keys(&self) -> Vec<K> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Removes the entry only if it is still the one registered as `seq`.
    fn remove_own(&self, key: &K, seq: u64, remember: bool) -> bool {
        let mut state = self.state.lock();
        if state.entries.get(key).map(|e| e.seq) != Some(seq) {
            return false;
        }
        let removed = state.entries.remove(key);
        if let (true, Some(entry)) = (remember, removed) {
            Self::remember(&mut state.recent, self.history, key.clone(), entry.predicate);
        }
        drop(state);
        self.released.notify_waiters();
        true
    }

    fn remember(
        recent: &mut VecDeque<(K, BoxPredicate<F>)>,
        history: usize,
        key: K,
        predicate: BoxPredicate<F>,
    ) {
        if history == 0 {
            return;
        }
        while recent.len() >= history {
            recent.pop_front();
        }
        recent.push_back((key, predicate));
    }
}

impl<K, F> fmt::Debug for PendingRegistry<K, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PendingRegistry")
            .field("outstanding", &state.entries.len())
            .field("closed", &state.closed)
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

// =============================================================================
// Handle
// =============================================================================

/// The caller's side of one pending entry.
///
/// Dropping an unresolved handle removes its entry, so an abandoned
/// exchange never leaves a stale waiter behind.
pub struct PendingHandle<K, F>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    F: Send + 'static,
{
    registry: Arc<PendingRegistry<K, F>>,
    key: K,
    seq: u64,
    rx: oneshot::Receiver<Completion<F>>,
    armed: bool,
}

impl<K, F> PendingHandle<K, F>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    F: Send + 'static,
{
    /// The key this handle was registered under.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Removes the entry without waiting, e.g. after a failed send.
    pub fn release(mut self) {
        self.armed = false;
        self.registry.remove_own(&self.key, self.seq, false);
    }

    /// Waits for the entry to be resolved or for `deadline` to pass.
    pub async fn wait(mut self, deadline: Deadline) -> Completion<F> {
        let completion = match tokio::time::timeout_at(deadline.at(), &mut self.rx).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(_)) => Completion::Failed(FieldError::Cancelled),
            Err(_) => {
                if self.registry.remove_own(&self.key, self.seq, true) {
                    debug!(key = ?self.key, timeout_ms = deadline.timeout().as_millis() as u64, "pending entry timed out");
                    Completion::Failed(deadline.expired_error())
                } else {
                    // Someone else removed the entry first and owns the
                    // completion; it is already on its way.
                    match (&mut self.rx).await {
                        Ok(completion) => completion,
                        Err(_) => Completion::Failed(FieldError::Cancelled),
                    }
                }
            }
        };
        self.armed = false;
        completion
    }
}

impl<K, F> Drop for PendingHandle<K, F>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    F: Send + 'static,
{
    fn drop(&mut self) {
        if self.armed && self.registry.remove_own(&self.key, self.seq, false) {
            debug!(key = ?self.key, "exchange dropped: removed pending entry");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
