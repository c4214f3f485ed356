// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! ADS conversation protocol.
//!
//! Every exchange is tagged with a fresh invoke ID which the device echoes,
//! so correlation is by identifier. Reads of direct addresses are batched
//! into one sum read (`ReadWrite` on index group `0xF080`); everything else
//! is sent alone.
//!
//! | Operation                 | Command                                   |
//! |---------------------------|-------------------------------------------|
//! | read, direct              | `Read`                                    |
//! | read, symbolic            | `ReadWrite` on `0xF004` with the name     |
//! | several direct reads      | `ReadWrite` on `0xF080` (sum read)        |
//! | write, direct             | `Write`                                   |
//! | change-of-state, direct   | `AddDeviceNotification` (on change)       |

use crate::error::AdsError;
use crate::frame::{AdsFrame, AdsPayload, AmsHeader};
use crate::types::{
    error_message, is_not_found, AdsCommand, AmsNetId, AmsRoute, TransmissionMode,
    INDEX_GROUP_SUM_READ, INDEX_GROUP_SYM_VALUE_BY_NAME,
};
use crate::value::{decode_value, encode_value};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use plcwire_config::ConnectionString;
use plcwire_conversation::{
    AbortInfo, BoxPredicate, DispatchMode, Establishment, MatchPredicate, Notification,
    Protocol,
};
use plcwire_core::{
    AdsAddress, AdsTarget, Codec, CodecError, CodecResult, ConnectionError, ConnectionResult,
    Exchange, FieldAddress, FieldError, FieldOperation, FieldOutcome, ProtocolKind, RequestItem,
    SubscriptionField, SubscriptionKind,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Upper bound of reads per sum read accepted by TwinCAT.
pub const DEFAULT_MAX_SUM_ITEMS: usize = 500;

/// Maximum notification delay sent with AddDeviceNotification.
const NOTIFICATION_MAX_DELAY: Duration = Duration::from_millis(100);

/// Bytes describing one sub-read of a sum read.
const SUM_READ_ENTRY_LEN: usize = 12;

// =============================================================================
// AdsProtocol
// =============================================================================

/// The ADS protocol.
pub struct AdsProtocol {
    route: AmsRoute,
    next_invoke_id: AtomicU32,
    max_sum_items: usize,
    handles: Mutex<HashMap<u32, AdsAddress>>,
}

impl AdsProtocol {
    /// Creates a protocol instance talking along `route`.
    pub fn new(route: AmsRoute) -> Self {
        Self {
            route,
            next_invoke_id: AtomicU32::new(1),
            max_sum_items: DEFAULT_MAX_SUM_ITEMS,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the route from an `ads:` connection string.
    ///
    /// The target net ID defaults to `<host>.1.1` when the host is an IPv4
    /// address; otherwise `target-ams-net-id` is required.
    pub fn from_connection(uri: &ConnectionString) -> ConnectionResult<Self> {
        if uri.protocol() != ProtocolKind::Ads {
            return Err(ConnectionError::invalid_uri(
                uri.to_string(),
                format!("expected an ads connection string, got {}", uri.protocol()),
            ));
        }

        let defaults = AmsRoute::default();
        let target_net_id = match uri.param_str("target-ams-net-id") {
            Some(id) => id.parse::<AmsNetId>()?,
            None => AmsNetId::from_ipv4_host(uri.host()).ok_or_else(|| {
                ConnectionError::invalid_parameter(
                    "target-ams-net-id",
                    uri.host(),
                    "required when the host is not an IPv4 address",
                )
            })?,
        };
        let source_net_id = match uri.param_str("source-ams-net-id") {
            Some(id) => id.parse::<AmsNetId>()?,
            None => defaults.source_net_id,
        };
        let port = |name: &str, default: u16| {
            uri.param_u64(name)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(default)
        };

        Ok(Self::new(AmsRoute {
            target_net_id,
            target_port: port("target-ams-port", defaults.target_port),
            source_net_id,
            source_port: port("source-ams-port", defaults.source_port),
        }))
    }

    /// Limits the number of reads per sum read.
    pub fn with_max_sum_items(mut self, max: usize) -> Self {
        self.max_sum_items = max.max(1);
        self
    }

    /// The AMS route.
    pub fn route(&self) -> &AmsRoute {
        &self.route
    }

    /// Number of notification handles registered on the device.
    pub fn notification_count(&self) -> usize {
        self.handles.lock().len()
    }

    fn allocate_invoke_id(&self) -> u32 {
        loop {
            let id = self.next_invoke_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn ads_address(item: &RequestItem) -> CodecResult<&AdsAddress> {
        item.address.as_ads().ok_or_else(|| {
            CodecError::encode(format!("{} is not an ADS address", item.address))
        })
    }

    /// The command the reply to `exchange` carries.
    fn command_for(exchange: &Exchange) -> AdsCommand {
        if exchange.is_batch() {
            return AdsCommand::ReadWrite;
        }
        let Some(item) = exchange.first() else {
            return AdsCommand::Read;
        };
        match (&item.operation, item.address.as_ads().map(|a| &a.target)) {
            (FieldOperation::Read, Some(AdsTarget::Symbolic(_))) => AdsCommand::ReadWrite,
            (FieldOperation::Read, _) => AdsCommand::Read,
            (FieldOperation::Write(_), _) => AdsCommand::Write,
            (FieldOperation::Subscribe(_), _) => AdsCommand::AddDeviceNotification,
            (FieldOperation::Unsubscribe, _) => AdsCommand::DeleteDeviceNotification,
        }
    }

    fn single_payload(&self, item: &RequestItem) -> CodecResult<AdsPayload> {
        let address = Self::ads_address(item)?;
        let length = address.byte_len() as u32;
        let payload = match (&item.operation, &address.target) {
            (
                FieldOperation::Read,
                AdsTarget::Direct {
                    index_group,
                    index_offset,
                },
            ) => AdsPayload::Read {
                index_group: *index_group,
                index_offset: *index_offset,
                length,
            },
            (FieldOperation::Read, AdsTarget::Symbolic(symbol)) => {
                let mut name = BytesMut::with_capacity(symbol.len() + 1);
                name.put_slice(symbol.as_bytes());
                name.put_u8(0);
                AdsPayload::ReadWrite {
                    index_group: INDEX_GROUP_SYM_VALUE_BY_NAME,
                    index_offset: 0,
                    read_length: length,
                    data: name.freeze(),
                }
            }
            (
                FieldOperation::Write(value),
                AdsTarget::Direct {
                    index_group,
                    index_offset,
                },
            ) => AdsPayload::Write {
                index_group: *index_group,
                index_offset: *index_offset,
                data: encode_value(address, value)?,
            },
            (
                FieldOperation::Subscribe(kind),
                AdsTarget::Direct {
                    index_group,
                    index_offset,
                },
            ) => {
                let (mode, cycle) = match kind {
                    SubscriptionKind::Cyclic(interval) => (TransmissionMode::Cyclic, *interval),
                    _ => (TransmissionMode::OnChange, Duration::ZERO),
                };
                AdsPayload::AddNotification {
                    index_group: *index_group,
                    index_offset: *index_offset,
                    length,
                    mode,
                    max_delay: hundred_ns(NOTIFICATION_MAX_DELAY),
                    cycle_time: hundred_ns(cycle),
                }
            }
            (FieldOperation::Unsubscribe, AdsTarget::Direct { .. }) => {
                AdsPayload::DeleteNotification {
                    handle: self.handle_for(address).ok_or_else(|| {
                        CodecError::encode(format!(
                            "no device notification registered for {}",
                            address
                        ))
                    })?,
                }
            }
            (_, AdsTarget::Symbolic(symbol)) => {
                return Err(AdsError::SymbolicUnsupported {
                    symbol: symbol.clone(),
                }
                .into())
            }
        };
        Ok(payload)
    }

    fn handle_for(&self, address: &AdsAddress) -> Option<u32> {
        self.handles
            .lock()
            .iter()
            .find(|(_, registered)| *registered == address)
            .map(|(handle, _)| *handle)
    }

    /// Forgets the device notification of `address` once the device has
    /// confirmed the delete; samples still in flight for its handle are
    /// dropped from then on.
    fn forget_handle(&self, address: &AdsAddress) {
        let mut handles = self.handles.lock();
        handles.retain(|handle, registered| {
            if *registered == *address {
                debug!(handle = *handle, address = %address, "device notification released");
                false
            } else {
                true
            }
        });
    }

    fn sum_read_payload(&self, exchange: &Exchange) -> CodecResult<AdsPayload> {
        let mut data = BytesMut::with_capacity(exchange.len() * SUM_READ_ENTRY_LEN);
        let mut read_length = 0usize;
        for item in exchange.items() {
            let address = Self::ads_address(item)?;
            let AdsTarget::Direct {
                index_group,
                index_offset,
            } = &address.target
            else {
                return Err(CodecError::encode(format!(
                    "symbolic address {} cannot join a sum read",
                    address
                )));
            };
            data.put_u32_le(*index_group);
            data.put_u32_le(*index_offset);
            data.put_u32_le(address.byte_len() as u32);
            read_length += 4 + address.byte_len();
        }
        Ok(AdsPayload::ReadWrite {
            index_group: INDEX_GROUP_SUM_READ,
            index_offset: exchange.len() as u32,
            read_length: read_length as u32,
            data: data.freeze(),
        })
    }

    fn interpret_sum_read(&self, exchange: &Exchange, data: &[u8]) -> Vec<FieldOutcome> {
        let items = exchange.items();
        let results_len = items.len() * 4;
        let values_len: usize = items
            .iter()
            .map(|i| i.address.as_ads().map_or(0, AdsAddress::byte_len))
            .sum();
        if data.len() != results_len + values_len {
            let err = CodecError::LengthMismatch {
                declared: results_len + values_len,
                actual: data.len(),
            };
            debug!(error = %err, "sum read reply does not fit the request");
            return items.iter().map(|_| Err(err.clone().into())).collect();
        }

        let (results, mut values) = data.split_at(results_len);
        items
            .iter()
            .zip(results.chunks_exact(4))
            .map(|(item, result)| {
                let address = Self::ads_address(item)?;
                let (value, rest) = values.split_at(address.byte_len());
                values = rest;
                let code = u32::from_le_bytes([result[0], result[1], result[2], result[3]]);
                if code != 0 {
                    return Err(self.abort_error(item, &AbortInfo::new(code, error_message(code))));
                }
                Ok(Some(decode_value(address, value)?))
            })
            .collect()
    }
}

fn hundred_ns(duration: Duration) -> u32 {
    u32::try_from(duration.as_nanos() / 100).unwrap_or(u32::MAX)
}

impl Codec for AdsProtocol {
    type Key = u32;
    type Frame = AdsFrame;

    fn encode(&self, exchange: &Exchange, key: &u32) -> CodecResult<Bytes> {
        let payload = if exchange.is_batch() {
            self.sum_read_payload(exchange)?
        } else {
            let item = exchange
                .first()
                .ok_or_else(|| CodecError::encode("empty exchange"))?;
            self.single_payload(item)?
        };
        let header = AmsHeader::request(&self.route, Self::command_for(exchange), *key);
        Ok(AdsFrame::new(header, payload).encode())
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<AdsFrame> {
        AdsFrame::decode(bytes)
    }
}

impl Protocol for AdsProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Ads
    }

    fn dispatch_mode(&self) -> DispatchMode {
        DispatchMode::Batched {
            max_items: self.max_sum_items,
        }
    }

    fn is_batchable(&self, item: &RequestItem) -> bool {
        matches!(item.operation, FieldOperation::Read)
            && matches!(
                item.address.as_ads().map(|a| &a.target),
                Some(AdsTarget::Direct { .. })
            )
    }

    fn correlation_key(&self, _exchange: &Exchange) -> u32 {
        self.allocate_invoke_id()
    }

    fn frame_key(&self, frame: &AdsFrame) -> Option<u32> {
        frame.header.is_response().then_some(frame.header.invoke_id)
    }

    fn predicate(&self, key: &u32, exchange: &Exchange) -> BoxPredicate<AdsFrame> {
        let invoke_id = *key;
        let command = Self::command_for(exchange);
        MatchPredicate::new(
            format!("invoke id {} ({})", invoke_id, command),
            move |f: &AdsFrame| {
                f.header.is_response()
                    && f.header.invoke_id == invoke_id
                    && f.header.command == command
            },
        )
        // per-item codes of a sum read live in its data, not in `result`
        .or_abort(move |f| {
            let code = match (f.header.error_code, f.payload.result()) {
                (0, Some(result)) if result != 0 => result,
                (0, _) => return None,
                (error, _) => error,
            };
            Some(AbortInfo::new(code, error_message(code)))
        })
        .boxed()
    }

    fn interpret(&self, exchange: &Exchange, frame: AdsFrame) -> Vec<FieldOutcome> {
        if exchange.is_batch() {
            return match frame.payload {
                AdsPayload::ReadResponse { data, .. } => self.interpret_sum_read(exchange, &data),
                other => {
                    let err = FieldError::decode(format!("unexpected sum read reply {:?}", other));
                    exchange.items().iter().map(|_| Err(err.clone())).collect()
                }
            };
        }

        let Some(item) = exchange.first() else {
            return Vec::new();
        };
        let outcome = match (frame.payload, &item.operation) {
            (AdsPayload::ReadResponse { data, .. }, FieldOperation::Read) => Self::ads_address(item)
                .and_then(|address| decode_value(address, &data))
                .map(Some)
                .map_err(FieldError::from),
            (AdsPayload::Status { .. }, FieldOperation::Write(_)) => Ok(None),
            (AdsPayload::Status { .. }, FieldOperation::Unsubscribe) => {
                if let Some(address) = item.address.as_ads() {
                    self.forget_handle(address);
                }
                Ok(None)
            }
            (AdsPayload::AddNotificationResponse { handle, .. }, FieldOperation::Subscribe(_)) => {
                match item.address.as_ads() {
                    Some(address) => {
                        debug!(handle, address = %address, "device notification registered");
                        self.handles.lock().insert(handle, address.clone());
                        Ok(None)
                    }
                    None => Err(FieldError::decode("notification for a non-ADS address")),
                }
            }
            (other, operation) => Err(FieldError::decode(format!(
                "unexpected reply {:?} to {}",
                other,
                operation.as_str()
            ))),
        };
        vec![outcome]
    }

    fn abort_error(&self, item: &RequestItem, abort: &AbortInfo) -> FieldError {
        if is_not_found(abort.code) {
            FieldError::not_found(item.address.to_string())
        } else {
            FieldError::protocol_abort(abort.code, abort.message.clone())
        }
    }

    /// Event fields are device notifications too; every sample is delivered.
    fn establishment(&self, field: &SubscriptionField) -> Establishment {
        match field.kind {
            SubscriptionKind::Event => Establishment::Exchange,
            SubscriptionKind::ChangeOfState if self.native_change_notification(&field.address) => {
                Establishment::Exchange
            }
            _ => Establishment::Probe,
        }
    }

    fn native_change_notification(&self, address: &FieldAddress) -> bool {
        matches!(
            address.as_ads().map(|a| &a.target),
            Some(AdsTarget::Direct { .. })
        )
    }

    fn notifications(&self, frame: &AdsFrame) -> Vec<Notification> {
        let AdsPayload::Notification { stamps } = &frame.payload else {
            return Vec::new();
        };
        let handles = self.handles.lock();
        stamps
            .iter()
            .flat_map(|stamp| stamp.samples.iter())
            .filter_map(|sample| {
                let Some(address) = handles.get(&sample.handle) else {
                    trace!(handle = sample.handle, "notification for unknown handle");
                    return None;
                };
                match decode_value(address, &sample.data) {
                    Ok(value) => Some(Notification::new(address.clone().into(), value)),
                    Err(e) => {
                        debug!(handle = sample.handle, error = %e, "undecodable notification sample");
                        None
                    }
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for AdsProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdsProtocol")
            .field("route", &self.route)
            .field("max_sum_items", &self.max_sum_items)
            .finish_non_exhaustive()
    }
}
