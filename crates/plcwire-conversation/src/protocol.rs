// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol capability consumed by the conversation engine.
//!
//! A protocol adds correlation knowledge on top of its [`Codec`]: which key
//! an exchange is tagged with, which predicate recognizes its reply, how a
//! reply is turned back into per-field outcomes, and which inbound frames
//! are unsolicited notifications.

use crate::predicate::{AbortInfo, BoxPredicate};
use plcwire_core::{
    Codec, Exchange, FieldAddress, FieldError, FieldOutcome, ProtocolKind, RequestItem,
    SubscriptionField, SubscriptionKind, Value,
};

// =============================================================================
// Dispatch Mode
// =============================================================================

/// How a multi-field request is put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// One exchange per field, all in flight together.
    FanOut,
    /// Batchable fields share one exchange of at most `max_items` fields.
    Batched {
        /// Upper bound of fields per exchange.
        max_items: usize,
    },
}

/// How a subscription field is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Establishment {
    /// A subscribe exchange registers the field on the device.
    Exchange,
    /// One read checks that the field exists before polling starts.
    Probe,
    /// Purely local; nothing is sent.
    Local,
    /// The protocol has no way to deliver this field; it fails with
    /// `Unsupported` before anything is sent.
    Unsupported,
}

/// A value pushed by the device outside any request.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Address the value belongs to.
    pub address: FieldAddress,
    /// The value.
    pub value: Value,
}

impl Notification {
    /// Creates a notification.
    pub fn new(address: FieldAddress, value: Value) -> Self {
        Self { address, value }
    }
}

// =============================================================================
// Protocol
// =============================================================================

/// A wire protocol the engine can hold conversations over.
pub trait Protocol: Codec {
    /// The protocol family.
    fn kind(&self) -> ProtocolKind;

    /// How multi-field requests are dispatched.
    fn dispatch_mode(&self) -> DispatchMode {
        DispatchMode::FanOut
    }

    /// Whether `item` may share an exchange with other fields.
    fn is_batchable(&self, _item: &RequestItem) -> bool {
        true
    }

    /// The correlation key for a new exchange.
    ///
    /// Counter-based protocols allocate a fresh identifier here; address-
    /// based protocols derive the key from the exchange itself.
    fn correlation_key(&self, exchange: &Exchange) -> Self::Key;

    /// The key a decoded frame is addressed to, when the frame says so.
    ///
    /// Returning `Some` lets the registry test a single entry instead of
    /// all of them.
    fn frame_key(&self, _frame: &Self::Frame) -> Option<Self::Key> {
        None
    }

    /// The predicate recognizing the reply to `exchange`.
    fn predicate(&self, key: &Self::Key, exchange: &Exchange) -> BoxPredicate<Self::Frame>;

    /// Turns the matched reply into one outcome per exchange item.
    fn interpret(&self, exchange: &Exchange, frame: Self::Frame) -> Vec<FieldOutcome>;

    /// Maps a device abort to the error reported for `item`.
    fn abort_error(&self, _item: &RequestItem, abort: &AbortInfo) -> FieldError {
        FieldError::protocol_abort(abort.code, abort.message.clone())
    }

    /// How a subscription field is established.
    ///
    /// By default event fields are local, natively notified change-of-state
    /// fields are registered on the device and everything else is probed.
    /// Protocols whose unsolicited frames cannot carry an address must
    /// return [`Establishment::Unsupported`] for event fields on it.
    fn establishment(&self, field: &SubscriptionField) -> Establishment {
        match field.kind {
            SubscriptionKind::Event => Establishment::Local,
            SubscriptionKind::ChangeOfState
                if self.native_change_notification(&field.address) =>
            {
                Establishment::Exchange
            }
            _ => Establishment::Probe,
        }
    }

    /// Whether the device pushes changes of `address` by itself.
    fn native_change_notification(&self, _address: &FieldAddress) -> bool {
        false
    }

    /// Extracts the notifications carried by a frame no request claimed.
    fn notifications(&self, _frame: &Self::Frame) -> Vec<Notification> {
        Vec::new()
    }
}
