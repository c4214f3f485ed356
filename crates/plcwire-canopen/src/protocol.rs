// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CANopen conversation protocol.
//!
//! SDO replies carry no request identifier. A reply is recognized by the
//! node it comes from and the service it uses, so the correlation key is
//! `(node id, TRANSMIT_SDO)`: at most one SDO exchange per node is in
//! flight and further requests to that node wait for the key.
//!
//! NMT and heartbeat traffic is never requested. Those frames are turned
//! into notifications for `NMT` / `NMT:<n>` subscribers.

use crate::error::{abort_message, is_not_found, CanOpenError};
use crate::frame::{CanOpenFrame, CanOpenPayload, CanOpenService, SdoPayload};
use crate::value::{decode_value, encode_value};
use bytes::Bytes;
use plcwire_config::ConnectionString;
use plcwire_conversation::{
    AbortInfo, BoxPredicate, Establishment, MatchPredicate, Notification, Protocol,
};
use plcwire_core::{
    CanOpenAddress, Codec, CodecError, CodecResult, ConnectionError, ConnectionResult, Exchange,
    FieldAddress, FieldError, FieldOperation, FieldOutcome, ProtocolKind, RequestItem, SdoAddress,
    SubscriptionField, SubscriptionKind, Value,
};
use tracing::trace;

/// Correlation key: the node and the service its reply arrives on.
pub type SdoChannel = (u8, CanOpenService);

/// The CANopen protocol.
#[derive(Debug, Default)]
pub struct CanOpenProtocol {
    default_node: Option<u8>,
}

impl CanOpenProtocol {
    /// Creates the protocol.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `node-id` from a `canopen:` connection string.
    pub fn from_connection(uri: &ConnectionString) -> ConnectionResult<Self> {
        if uri.protocol() != ProtocolKind::CanOpen {
            return Err(ConnectionError::invalid_uri(
                uri.to_string(),
                format!("expected a canopen connection string, got {}", uri.protocol()),
            ));
        }
        Ok(Self {
            default_node: uri.param_u64("node-id").and_then(|n| u8::try_from(n).ok()),
        })
    }

    /// The node named by the connection string, if any.
    pub fn default_node(&self) -> Option<u8> {
        self.default_node
    }

    fn sdo_address(item: &RequestItem) -> Result<&SdoAddress, CanOpenError> {
        match item.address.as_canopen() {
            Some(CanOpenAddress::Sdo(sdo)) => Ok(sdo),
            _ => Err(CanOpenError::Unsupported {
                operation: item.operation.as_str(),
                address: item.address.to_string(),
            }),
        }
    }

    fn is_nmt(address: &FieldAddress) -> bool {
        matches!(address.as_canopen(), Some(CanOpenAddress::Nmt { .. }))
    }
}

impl Codec for CanOpenProtocol {
    type Key = SdoChannel;
    type Frame = CanOpenFrame;

    fn encode(&self, exchange: &Exchange, _key: &SdoChannel) -> CodecResult<Bytes> {
        let item = match exchange.items() {
            [item] => item,
            items => {
                return Err(CodecError::encode(format!(
                    "an SDO exchange carries one field, got {}",
                    items.len()
                )))
            }
        };
        let sdo = Self::sdo_address(item)?;
        let payload = match &item.operation {
            FieldOperation::Read => SdoPayload::InitiateUpload {
                index: sdo.index,
                subindex: sdo.subindex,
            },
            FieldOperation::Write(value) => SdoPayload::InitiateDownload {
                index: sdo.index,
                subindex: sdo.subindex,
                data: encode_value(sdo.data_type, value)?,
            },
            FieldOperation::Subscribe(_) | FieldOperation::Unsubscribe => {
                return Err(CanOpenError::Unsupported {
                    operation: item.operation.as_str(),
                    address: item.address.to_string(),
                }
                .into())
            }
        };
        Ok(CanOpenFrame::sdo_request(sdo.node_id, payload).encode())
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<CanOpenFrame> {
        CanOpenFrame::decode(bytes)
    }
}

impl Protocol for CanOpenProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::CanOpen
    }

    fn correlation_key(&self, exchange: &Exchange) -> SdoChannel {
        let node = exchange
            .first()
            .and_then(|item| item.address.as_canopen())
            .map_or(0, CanOpenAddress::node_id);
        (node, CanOpenService::TransmitSdo)
    }

    fn frame_key(&self, frame: &CanOpenFrame) -> Option<SdoChannel> {
        (frame.service == CanOpenService::TransmitSdo).then_some((frame.node_id, frame.service))
    }

    fn predicate(&self, key: &SdoChannel, exchange: &Exchange) -> BoxPredicate<CanOpenFrame> {
        let (node, service) = *key;
        let writing = matches!(
            exchange.first().map(|item| &item.operation),
            Some(FieldOperation::Write(_))
        );
        let expected = if writing { "DownloadResponse" } else { "UploadResponse" };
        let object = exchange
            .first()
            .and_then(|item| Self::sdo_address(item).ok())
            .map(|sdo| (sdo.index, sdo.subindex));

        // a reply naming another object belongs to an earlier request on this channel
        MatchPredicate::new(
            format!("node {} {} {} {:?}", node, service, expected, object),
            move |f: &CanOpenFrame| {
                f.node_id == node
                    && f.service == service
                    && f.sdo().map(SdoPayload::object) == object
            },
        )
        .expecting(move |f| match f.sdo() {
            Some(SdoPayload::UploadResponse { .. }) => !writing,
            Some(SdoPayload::DownloadResponse { .. }) => writing,
            _ => false,
        })
        .or_abort(|f| match f.sdo() {
            Some(SdoPayload::Abort { code, .. }) => Some(AbortInfo::new(*code, abort_message(*code))),
            _ => None,
        })
        .boxed()
    }

    fn interpret(&self, exchange: &Exchange, frame: CanOpenFrame) -> Vec<FieldOutcome> {
        let Some(item) = exchange.first() else {
            return Vec::new();
        };
        let outcome = (|| -> FieldOutcome {
            let sdo = Self::sdo_address(item).map_err(CodecError::from)?;
            let CanOpenPayload::Sdo(payload) = frame.payload else {
                return Err(FieldError::decode("reply is not an SDO frame"));
            };
            if payload.object() != (sdo.index, sdo.subindex) {
                let (index, subindex) = payload.object();
                return Err(FieldError::decode(format!(
                    "reply for 0x{:04X}/0x{:X} while 0x{:04X}/0x{:X} was requested",
                    index, subindex, sdo.index, sdo.subindex
                )));
            }
            match payload {
                SdoPayload::UploadResponse { data, .. } => {
                    Ok(Some(decode_value(sdo.data_type, &data)?))
                }
                SdoPayload::DownloadResponse { .. } => Ok(None),
                other => Err(FieldError::decode(format!("unexpected SDO reply {:?}", other))),
            }
        })();
        vec![outcome]
    }

    fn abort_error(&self, item: &RequestItem, abort: &AbortInfo) -> FieldError {
        if is_not_found(abort.code) {
            FieldError::not_found(item.address.to_string())
        } else {
            FieldError::protocol_abort(abort.code, abort.message.clone())
        }
    }

    fn establishment(&self, field: &SubscriptionField) -> Establishment {
        match field.kind {
            SubscriptionKind::Event | SubscriptionKind::ChangeOfState
                if Self::is_nmt(&field.address) =>
            {
                Establishment::Local
            }
            // only NMT and heartbeat frames arrive unsolicited
            SubscriptionKind::Event => Establishment::Unsupported,
            _ => Establishment::Probe,
        }
    }

    fn native_change_notification(&self, address: &FieldAddress) -> bool {
        Self::is_nmt(address)
    }

    fn notifications(&self, frame: &CanOpenFrame) -> Vec<Notification> {
        let value = match &frame.payload {
            CanOpenPayload::Heartbeat(state) => *state as u8,
            CanOpenPayload::Nmt(command) => *command as u8,
            CanOpenPayload::Sdo(_) => {
                trace!(node = frame.node_id, service = %frame.service, "SDO frame without a pending request");
                return Vec::new();
            }
        };
        vec![Notification::new(
            CanOpenAddress::nmt(frame.node_id).into(),
            Value::UInt8(value),
        )]
    }
}
