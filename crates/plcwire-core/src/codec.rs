// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Codec and transport capabilities.
//!
//! Protocol drivers supply a [`Codec`] that turns an [`Exchange`] plus its
//! correlation key into wire bytes and decodes inbound bytes into a typed
//! frame. Connections own a [`Transport`] that sends whole frames and pushes
//! inbound frames into an [`InboundSink`].
//!
//! ```text
//! Exchange ──► Codec::encode ──► Transport::send ──► [wire]
//!                                                      │
//! InboundSink ◄── Transport reader ◄───────────────────┘
//!      │
//!      └──► dispatch loop ──► Codec::decode ──► predicate matching
//! ```

use crate::error::{CodecResult, ConnectionResult};
use crate::request::RequestItem;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::hash::Hash;
use tokio::sync::mpsc;

// =============================================================================
// Exchange
// =============================================================================

/// The unit sent on the wire: one field, or several fields batched into a
/// single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    items: Vec<RequestItem>,
}

impl Exchange {
    /// Creates an exchange carrying one field.
    pub fn single(item: RequestItem) -> Self {
        Self { items: vec![item] }
    }

    /// Creates an exchange carrying several fields in one frame.
    pub fn batch(items: Vec<RequestItem>) -> Self {
        Self { items }
    }

    /// Returns the carried fields in order.
    #[inline]
    pub fn items(&self) -> &[RequestItem] {
        &self.items
    }

    /// Returns the first carried field.
    #[inline]
    pub fn first(&self) -> Option<&RequestItem> {
        self.items.first()
    }

    /// Number of carried fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when no field is carried.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns `true` when more than one field is carried.
    #[inline]
    pub fn is_batch(&self) -> bool {
        self.items.len() > 1
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Encodes exchanges into wire bytes and decodes wire bytes into frames.
///
/// Implementations must be deterministic and free of side effects.
pub trait Codec: Send + Sync + 'static {
    /// Correlation key type.
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Decoded inbound frame type.
    type Frame: fmt::Debug + Send + Sync + 'static;

    /// Serializes an exchange tagged with its correlation key.
    fn encode(&self, exchange: &Exchange, key: &Self::Key) -> CodecResult<Bytes>;

    /// Decodes one complete inbound frame.
    fn decode(&self, bytes: &[u8]) -> CodecResult<Self::Frame>;
}

// =============================================================================
// Transport
// =============================================================================

/// Events pushed by a transport into its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// One complete inbound frame.
    Frame(Bytes),

    /// The physical link went away.
    Closed {
        /// Optional reason for logging
        reason: Option<String>,
    },
}

/// Push-style delivery handle given to a transport.
#[derive(Debug, Clone)]
pub struct InboundSink {
    tx: mpsc::Sender<InboundEvent>,
}

impl InboundSink {
    /// Creates a sink and the receiver the dispatch loop reads from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<InboundEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Delivers one inbound frame. Returns `false` if the connection is gone.
    pub async fn on_frame(&self, frame: impl Into<Bytes>) -> bool {
        self.tx.send(InboundEvent::Frame(frame.into())).await.is_ok()
    }

    /// Reports that the link closed.
    pub async fn on_close(&self, reason: Option<String>) {
        let _ = self.tx.send(InboundEvent::Closed { reason }).await;
    }

    /// Returns `true` while the dispatch loop is still receiving.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// A physical or simulated link carrying whole frames.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Writes one frame as an atomic unit.
    async fn send(&self, frame: Bytes) -> ConnectionResult<()>;

    /// Starts pushing inbound frames into `sink`.
    fn bind(&self, sink: InboundSink);

    /// Closes the link.
    async fn close(&self);

    /// Returns a short description for logging.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
