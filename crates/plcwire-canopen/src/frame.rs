// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CANopen frames in SocketCAN `can_frame` layout.
//!
//! ```text
//! ┌─────────────┬────────┬──────────┬─────────────────────┐
//! │ can_id u32  │ len u8 │ pad (3)  │ data (8)            │
//! └─────────────┴────────┴──────────┴─────────────────────┘
//! ```
//!
//! Supported services:
//!
//! | Service       | COB-ID        | Data                              |
//! |---------------|---------------|-----------------------------------|
//! | NMT           | `0x000`       | command, node id (0 = all)        |
//! | TRANSMIT_SDO  | `0x580 + n`   | 8 byte SDO, server to client      |
//! | RECEIVE_SDO   | `0x600 + n`   | 8 byte SDO, client to server      |
//! | HEARTBEAT     | `0x700 + n`   | NMT state                         |
//!
//! Only expedited SDO transfers (up to four data bytes) are supported.

use crate::error::CanOpenError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use plcwire_core::{CodecError, CodecResult};
use std::fmt;

/// Size of one encoded frame.
pub const CAN_FRAME_LEN: usize = 16;

/// Data bytes of a classic CAN frame.
pub const CAN_MAX_DLEN: usize = 8;

/// Data bytes of every SDO frame.
const SDO_LEN: usize = 8;

const CAN_SFF_MASK: u32 = 0x7FF;

// =============================================================================
// Services
// =============================================================================

/// CANopen communication services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanOpenService {
    /// Network management commands.
    Nmt,
    /// SDO server to client.
    TransmitSdo,
    /// SDO client to server.
    ReceiveSdo,
    /// Heartbeat / boot-up.
    Heartbeat,
}

impl CanOpenService {
    /// Base COB-ID of the service.
    pub fn base(self) -> u32 {
        match self {
            CanOpenService::Nmt => 0x000,
            CanOpenService::TransmitSdo => 0x580,
            CanOpenService::ReceiveSdo => 0x600,
            CanOpenService::Heartbeat => 0x700,
        }
    }

    /// COB-ID of the service for `node_id`.
    pub fn cob_id(self, node_id: u8) -> u32 {
        match self {
            CanOpenService::Nmt => 0,
            other => other.base() + u32::from(node_id),
        }
    }

    /// Splits a COB-ID into service and node.
    pub fn from_cob_id(cob_id: u32) -> Option<(Self, u8)> {
        let node = (cob_id & 0x7F) as u8;
        let service = match cob_id & !0x7F {
            0x000 if cob_id == 0 => CanOpenService::Nmt,
            0x580 => CanOpenService::TransmitSdo,
            0x600 => CanOpenService::ReceiveSdo,
            0x700 => CanOpenService::Heartbeat,
            _ => return None,
        };
        if service != CanOpenService::Nmt && node == 0 {
            return None;
        }
        Some((service, node))
    }
}

impl fmt::Display for CanOpenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CanOpenService::Nmt => "NMT",
            CanOpenService::TransmitSdo => "TRANSMIT_SDO",
            CanOpenService::ReceiveSdo => "RECEIVE_SDO",
            CanOpenService::Heartbeat => "HEARTBEAT",
        })
    }
}

/// NMT commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NmtCommand {
    /// Enter operational.
    Start = 0x01,
    /// Enter stopped.
    Stop = 0x02,
    /// Enter pre-operational.
    EnterPreOperational = 0x80,
    /// Reset the application.
    ResetNode = 0x81,
    /// Reset communication.
    ResetCommunication = 0x82,
}

impl NmtCommand {
    fn from_code(code: u8) -> Result<Self, CanOpenError> {
        Ok(match code {
            0x01 => NmtCommand::Start,
            0x02 => NmtCommand::Stop,
            0x80 => NmtCommand::EnterPreOperational,
            0x81 => NmtCommand::ResetNode,
            0x82 => NmtCommand::ResetCommunication,
            code => return Err(CanOpenError::UnknownNmtCode { what: "command", code }),
        })
    }
}

/// NMT states reported by heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NmtState {
    /// Boot-up message.
    BootUp = 0x00,
    /// Stopped.
    Stopped = 0x04,
    /// Operational.
    Operational = 0x05,
    /// Pre-operational.
    PreOperational = 0x7F,
}

impl NmtState {
    fn from_code(code: u8) -> Result<Self, CanOpenError> {
        // bit 7 is the legacy node-guarding toggle
        Ok(match code & 0x7F {
            0x00 => NmtState::BootUp,
            0x04 => NmtState::Stopped,
            0x05 => NmtState::Operational,
            0x7F => NmtState::PreOperational,
            _ => return Err(CanOpenError::UnknownNmtCode { what: "state", code }),
        })
    }
}

// =============================================================================
// SDO
// =============================================================================

/// Expedited SDO payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdoPayload {
    /// Client asks for an object.
    InitiateUpload {
        /// Object index.
        index: u16,
        /// Sub-index.
        subindex: u8,
    },
    /// Server returns the object.
    UploadResponse {
        /// Object index.
        index: u16,
        /// Sub-index.
        subindex: u8,
        /// One to four data bytes.
        data: Bytes,
    },
    /// Client writes an object.
    InitiateDownload {
        /// Object index.
        index: u16,
        /// Sub-index.
        subindex: u8,
        /// One to four data bytes.
        data: Bytes,
    },
    /// Server confirms a write.
    DownloadResponse {
        /// Object index.
        index: u16,
        /// Sub-index.
        subindex: u8,
    },
    /// Either side aborts the transfer.
    Abort {
        /// Object index.
        index: u16,
        /// Sub-index.
        subindex: u8,
        /// Abort code.
        code: u32,
    },
}

impl SdoPayload {
    /// Object index and sub-index the payload refers to.
    pub fn object(&self) -> (u16, u8) {
        match self {
            SdoPayload::InitiateUpload { index, subindex }
            | SdoPayload::UploadResponse { index, subindex, .. }
            | SdoPayload::InitiateDownload { index, subindex, .. }
            | SdoPayload::DownloadResponse { index, subindex }
            | SdoPayload::Abort { index, subindex, .. } => (*index, *subindex),
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        let (index, subindex) = self.object();
        let empty: &[u8] = &[];
        let (specifier, data) = match self {
            SdoPayload::InitiateUpload { .. } => (0x40, empty),
            SdoPayload::UploadResponse { data, .. } => {
                (0x43 | unused_bits(data.len()), data.as_ref())
            }
            SdoPayload::InitiateDownload { data, .. } => {
                (0x23 | unused_bits(data.len()), data.as_ref())
            }
            SdoPayload::DownloadResponse { .. } => (0x60, empty),
            SdoPayload::Abort { .. } => (0x80, empty),
        };
        buf.put_u8(specifier);
        buf.put_u16_le(index);
        buf.put_u8(subindex);
        match self {
            SdoPayload::Abort { code, .. } => buf.put_u32_le(*code),
            _ => {
                let n = data.len().min(4);
                buf.put_slice(&data[..n]);
                buf.put_bytes(0, 4 - n);
            }
        }
    }

    fn get(service: CanOpenService, data: &[u8]) -> CodecResult<Self> {
        if data.len() != SDO_LEN {
            return Err(CodecError::LengthMismatch {
                declared: SDO_LEN,
                actual: data.len(),
            });
        }
        let mut buf = data;
        let specifier = buf.get_u8();
        let index = buf.get_u16_le();
        let subindex = buf.get_u8();
        let body = buf;

        let payload = match (specifier >> 5, service) {
            (4, _) => SdoPayload::Abort {
                index,
                subindex,
                code: buf.get_u32_le(),
            },
            (2, CanOpenService::ReceiveSdo) => SdoPayload::InitiateUpload { index, subindex },
            (2, CanOpenService::TransmitSdo) => SdoPayload::UploadResponse {
                index,
                subindex,
                data: expedited(specifier, index, subindex, body)?,
            },
            (1, CanOpenService::ReceiveSdo) => SdoPayload::InitiateDownload {
                index,
                subindex,
                data: expedited(specifier, index, subindex, body)?,
            },
            (3, CanOpenService::TransmitSdo) => SdoPayload::DownloadResponse { index, subindex },
            _ => return Err(CanOpenError::UnexpectedSpecifier { specifier }.into()),
        };
        Ok(payload)
    }
}

/// The `n` field of an expedited initiate: 4 minus the data length, shifted.
fn unused_bits(len: usize) -> u8 {
    ((4 - len.clamp(1, 4)) as u8) << 2
}

fn expedited(specifier: u8, index: u16, subindex: u8, body: &[u8]) -> CodecResult<Bytes> {
    const EXPEDITED: u8 = 0x02;
    const SIZE_INDICATED: u8 = 0x01;

    if specifier & EXPEDITED == 0 {
        return Err(CanOpenError::SegmentedTransfer { index, subindex }.into());
    }
    let len = if specifier & SIZE_INDICATED != 0 {
        4 - ((specifier >> 2) & 0x03) as usize
    } else {
        4
    };
    Ok(Bytes::copy_from_slice(&body[..len]))
}

// =============================================================================
// CanOpenFrame
// =============================================================================

/// Service specific frame contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanOpenPayload {
    /// NMT command; the frame's node is the commanded node.
    Nmt(NmtCommand),
    /// Heartbeat carrying the sender's state.
    Heartbeat(NmtState),
    /// SDO transfer.
    Sdo(SdoPayload),
}

/// A decoded CANopen frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanOpenFrame {
    /// Node the frame comes from or is addressed to.
    pub node_id: u8,
    /// Service.
    pub service: CanOpenService,
    /// Contents.
    pub payload: CanOpenPayload,
}

impl CanOpenFrame {
    /// An SDO request from the client to `node_id`.
    pub fn sdo_request(node_id: u8, payload: SdoPayload) -> Self {
        Self {
            node_id,
            service: CanOpenService::ReceiveSdo,
            payload: CanOpenPayload::Sdo(payload),
        }
    }

    /// An SDO reply from `node_id`.
    pub fn sdo_response(node_id: u8, payload: SdoPayload) -> Self {
        Self {
            node_id,
            service: CanOpenService::TransmitSdo,
            payload: CanOpenPayload::Sdo(payload),
        }
    }

    /// A heartbeat of `node_id`.
    pub fn heartbeat(node_id: u8, state: NmtState) -> Self {
        Self {
            node_id,
            service: CanOpenService::Heartbeat,
            payload: CanOpenPayload::Heartbeat(state),
        }
    }

    /// An NMT command for `node_id` (0 addresses every node).
    pub fn nmt(node_id: u8, command: NmtCommand) -> Self {
        Self {
            node_id,
            service: CanOpenService::Nmt,
            payload: CanOpenPayload::Nmt(command),
        }
    }

    /// The SDO payload, if this is an SDO frame.
    pub fn sdo(&self) -> Option<&SdoPayload> {
        match &self.payload {
            CanOpenPayload::Sdo(sdo) => Some(sdo),
            _ => None,
        }
    }

    /// Serializes the frame.
    pub fn encode(&self) -> Bytes {
        let mut data = BytesMut::with_capacity(CAN_MAX_DLEN);
        match &self.payload {
            CanOpenPayload::Nmt(command) => {
                data.put_u8(*command as u8);
                data.put_u8(self.node_id);
            }
            CanOpenPayload::Heartbeat(state) => data.put_u8(*state as u8),
            CanOpenPayload::Sdo(sdo) => sdo.put(&mut data),
        }

        let mut buf = BytesMut::with_capacity(CAN_FRAME_LEN);
        buf.put_u32_le(self.service.cob_id(self.node_id));
        buf.put_u8(data.len() as u8);
        buf.put_bytes(0, 3);
        buf.put_slice(&data);
        buf.put_bytes(0, CAN_MAX_DLEN - data.len());
        buf.freeze()
    }

    /// Parses one frame.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != CAN_FRAME_LEN {
            return Err(CodecError::LengthMismatch {
                declared: CAN_FRAME_LEN,
                actual: bytes.len(),
            });
        }
        let mut buf = bytes;
        let cob_id = buf.get_u32_le() & CAN_SFF_MASK;
        let len = buf.get_u8() as usize;
        if len > CAN_MAX_DLEN {
            return Err(CodecError::malformed(format!("CAN length {} exceeds 8", len)));
        }
        buf.advance(3);
        let data = &buf[..len];

        let (service, node_id) = CanOpenService::from_cob_id(cob_id)
            .ok_or(CanOpenError::UnsupportedCobId { cob_id })?;
        let (node_id, payload) = match service {
            CanOpenService::Nmt => {
                expect_len(2, data)?;
                (data[1], CanOpenPayload::Nmt(NmtCommand::from_code(data[0])?))
            }
            CanOpenService::Heartbeat => {
                expect_len(1, data)?;
                (node_id, CanOpenPayload::Heartbeat(NmtState::from_code(data[0])?))
            }
            sdo => (node_id, CanOpenPayload::Sdo(SdoPayload::get(sdo, data)?)),
        };
        Ok(Self {
            node_id,
            service,
            payload,
        })
    }
}

fn expect_len(expected: usize, data: &[u8]) -> CodecResult<()> {
    if data.len() != expected {
        return Err(CodecError::LengthMismatch {
            declared: expected,
            actual: data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cob_ids() {
        assert_eq!(CanOpenService::ReceiveSdo.cob_id(5), 0x605);
        assert_eq!(CanOpenService::TransmitSdo.cob_id(5), 0x585);
        assert_eq!(CanOpenService::Heartbeat.cob_id(127), 0x77F);
        assert_eq!(
            CanOpenService::from_cob_id(0x585),
            Some((CanOpenService::TransmitSdo, 5))
        );
        assert_eq!(CanOpenService::from_cob_id(0), Some((CanOpenService::Nmt, 0)));
        assert_eq!(CanOpenService::from_cob_id(0x181), None);
        assert_eq!(CanOpenService::from_cob_id(0x580), None);
    }

    #[test]
    fn test_upload_request_layout() {
        let frame = CanOpenFrame::sdo_request(
            5,
            SdoPayload::InitiateUpload {
                index: 0x1018,
                subindex: 1,
            },
        );
        let bytes = frame.encode();
        assert_eq!(bytes.len(), CAN_FRAME_LEN);
        assert_eq!(&bytes[0..4], &0x605u32.to_le_bytes());
        assert_eq!(bytes[4], 8);
        assert_eq!(&bytes[8..16], &[0x40, 0x18, 0x10, 0x01, 0, 0, 0, 0]);
        assert_eq!(CanOpenFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_expedited_sizes() {
        let frame = CanOpenFrame::sdo_response(
            5,
            SdoPayload::UploadResponse {
                index: 0x2000,
                subindex: 0,
                data: Bytes::from_static(&[0x34, 0x12]),
            },
        );
        let bytes = frame.encode();
        assert_eq!(bytes[8], 0x4B);
        assert_eq!(CanOpenFrame::decode(&bytes).unwrap(), frame);

        let download = CanOpenFrame::sdo_request(
            5,
            SdoPayload::InitiateDownload {
                index: 0x2000,
                subindex: 0,
                data: Bytes::from_static(&[1, 2, 3, 4]),
            },
        );
        let bytes = download.encode();
        assert_eq!(bytes[8], 0x23);
        assert_eq!(CanOpenFrame::decode(&bytes).unwrap(), download);
    }

    #[test]
    fn test_abort_and_download_response() {
        let abort = CanOpenFrame::sdo_response(
            9,
            SdoPayload::Abort {
                index: 0x6000,
                subindex: 2,
                code: 0x0602_0000,
            },
        );
        assert_eq!(CanOpenFrame::decode(&abort.encode()).unwrap(), abort);

        let ack = CanOpenFrame::sdo_response(
            9,
            SdoPayload::DownloadResponse {
                index: 0x6000,
                subindex: 2,
            },
        );
        assert_eq!(CanOpenFrame::decode(&ack.encode()).unwrap(), ack);
        assert_eq!(ack.sdo().map(SdoPayload::object), Some((0x6000, 2)));
    }

    #[test]
    fn test_nmt_and_heartbeat() {
        let nmt = CanOpenFrame::nmt(3, NmtCommand::Start);
        let bytes = nmt.encode();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
        assert_eq!(bytes[4], 2);
        assert_eq!(&bytes[8..10], &[0x01, 3]);
        assert_eq!(CanOpenFrame::decode(&bytes).unwrap(), nmt);

        let heartbeat = CanOpenFrame::heartbeat(4, NmtState::Operational);
        assert_eq!(CanOpenFrame::decode(&heartbeat.encode()).unwrap(), heartbeat);
    }

    #[test]
    fn test_rejects_segmented_and_bad_lengths() {
        let mut bytes = BytesMut::from(
            CanOpenFrame::sdo_response(
                1,
                SdoPayload::UploadResponse {
                    index: 0x1008,
                    subindex: 0,
                    data: Bytes::from_static(&[0; 4]),
                },
            )
            .encode()
            .as_ref(),
        );
        bytes[8] = 0x41; // size indicated, not expedited
        assert!(matches!(
            CanOpenFrame::decode(&bytes),
            Err(CodecError::Malformed { .. })
        ));

        bytes[4] = 7;
        assert!(matches!(
            CanOpenFrame::decode(&bytes),
            Err(CodecError::LengthMismatch {
                declared: 8,
                actual: 7
            })
        ));

        assert!(matches!(
            CanOpenFrame::decode(&bytes[..10]),
            Err(CodecError::LengthMismatch { .. })
        ));
    }
}
