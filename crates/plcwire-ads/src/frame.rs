// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! AMS/TCP framing.
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────────┬─────────────┐
//! │ AMS/TCP (6)  │ AMS header (32)                         │ ADS data    │
//! │ reserved u16 │ target id/port, source id/port,         │ command     │
//! │ length   u32 │ command, flags, length, error, invoke   │ specific    │
//! └──────────────┴─────────────────────────────────────────┴─────────────┘
//! ```
//!
//! All integers are little endian. The AMS/TCP length delimits the frame on
//! the stream; the header's data length and every inner length field must
//! agree with it or the frame is rejected with
//! [`CodecError::LengthMismatch`].

use crate::types::{AdsCommand, AmsNetId, AmsRoute, TransmissionMode, STATE_ADS_COMMAND, STATE_RESPONSE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use plcwire_core::{CodecError, CodecResult};

/// Length of the AMS/TCP prefix.
pub const AMS_TCP_HEADER_LEN: usize = 6;

/// Length of the AMS header.
pub const AMS_HEADER_LEN: usize = 32;

/// Length of the reserved tail of an AddDeviceNotification request.
const NOTIFICATION_RESERVED: usize = 16;

// =============================================================================
// AmsHeader
// =============================================================================

/// The AMS header carried by every ADS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmsHeader {
    /// Receiver net ID.
    pub target_net_id: AmsNetId,
    /// Receiver port.
    pub target_port: u16,
    /// Sender net ID.
    pub source_net_id: AmsNetId,
    /// Sender port.
    pub source_port: u16,
    /// Command.
    pub command: AdsCommand,
    /// State flags.
    pub state_flags: u16,
    /// Length of the ADS data.
    pub data_length: u32,
    /// AMS error code.
    pub error_code: u32,
    /// Request identifier echoed by the reply.
    pub invoke_id: u32,
}

impl AmsHeader {
    /// Creates a request header along `route`.
    pub fn request(route: &AmsRoute, command: AdsCommand, invoke_id: u32) -> Self {
        Self {
            target_net_id: route.target_net_id,
            target_port: route.target_port,
            source_net_id: route.source_net_id,
            source_port: route.source_port,
            command,
            state_flags: STATE_ADS_COMMAND,
            data_length: 0,
            error_code: 0,
            invoke_id,
        }
    }

    /// Creates the header of the reply to `request`.
    pub fn reply_to(request: &AmsHeader) -> Self {
        Self {
            target_net_id: request.source_net_id,
            target_port: request.source_port,
            source_net_id: request.target_net_id,
            source_port: request.target_port,
            command: request.command,
            state_flags: STATE_ADS_COMMAND | STATE_RESPONSE,
            data_length: 0,
            error_code: 0,
            invoke_id: request.invoke_id,
        }
    }

    /// Returns `true` for reply frames.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.state_flags & STATE_RESPONSE != 0
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.target_net_id.octets());
        buf.put_u16_le(self.target_port);
        buf.put_slice(&self.source_net_id.octets());
        buf.put_u16_le(self.source_port);
        buf.put_u16_le(self.command.code());
        buf.put_u16_le(self.state_flags);
        buf.put_u32_le(self.data_length);
        buf.put_u32_le(self.error_code);
        buf.put_u32_le(self.invoke_id);
    }

    fn get(buf: &mut &[u8]) -> CodecResult<Self> {
        CodecError::ensure_len(AMS_HEADER_LEN, buf.remaining())?;
        let target_net_id = net_id(buf);
        let target_port = buf.get_u16_le();
        let source_net_id = net_id(buf);
        let source_port = buf.get_u16_le();
        let code = buf.get_u16_le();
        let command = AdsCommand::from_code(code)
            .ok_or_else(|| CodecError::malformed(format!("unknown ADS command {}", code)))?;
        Ok(Self {
            target_net_id,
            target_port,
            source_net_id,
            source_port,
            command,
            state_flags: buf.get_u16_le(),
            data_length: buf.get_u32_le(),
            error_code: buf.get_u32_le(),
            invoke_id: buf.get_u32_le(),
        })
    }
}

fn net_id(buf: &mut &[u8]) -> AmsNetId {
    let mut octets = [0u8; 6];
    buf.copy_to_slice(&mut octets);
    AmsNetId::new(octets)
}

// =============================================================================
// Payload
// =============================================================================

/// One sample of a device notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSample {
    /// Handle returned by AddDeviceNotification.
    pub handle: u32,
    /// Raw value.
    pub data: Bytes,
}

/// Samples sharing a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationStamp {
    /// Windows FILETIME of the samples.
    pub timestamp: u64,
    /// The samples.
    pub samples: Vec<NotificationSample>,
}

/// Command specific ADS data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdsPayload {
    /// Read request.
    Read {
        /// Index group.
        index_group: u32,
        /// Index offset.
        index_offset: u32,
        /// Bytes to read.
        length: u32,
    },
    /// Write request.
    Write {
        /// Index group.
        index_group: u32,
        /// Index offset.
        index_offset: u32,
        /// Bytes to write.
        data: Bytes,
    },
    /// ReadWrite request.
    ReadWrite {
        /// Index group.
        index_group: u32,
        /// Index offset.
        index_offset: u32,
        /// Bytes expected back.
        read_length: u32,
        /// Bytes written.
        data: Bytes,
    },
    /// AddDeviceNotification request.
    AddNotification {
        /// Index group.
        index_group: u32,
        /// Index offset.
        index_offset: u32,
        /// Bytes per sample.
        length: u32,
        /// When samples are sent.
        mode: TransmissionMode,
        /// Maximum delay in 100 ns units.
        max_delay: u32,
        /// Cycle time in 100 ns units.
        cycle_time: u32,
    },
    /// DeleteDeviceNotification request.
    DeleteNotification {
        /// Handle to remove.
        handle: u32,
    },
    /// Reply carrying data (Read and ReadWrite).
    ReadResponse {
        /// ADS return code.
        result: u32,
        /// Data read.
        data: Bytes,
    },
    /// Reply carrying only a return code.
    Status {
        /// ADS return code.
        result: u32,
    },
    /// AddDeviceNotification reply.
    AddNotificationResponse {
        /// ADS return code.
        result: u32,
        /// Notification handle.
        handle: u32,
    },
    /// Device notification.
    Notification {
        /// Stamps.
        stamps: Vec<NotificationStamp>,
    },
    /// No data, as in a reply carrying an AMS error.
    Empty,
    /// Data of a command this codec does not interpret.
    Raw(Bytes),
}

impl AdsPayload {
    /// The ADS return code of a reply, if it carries one.
    pub fn result(&self) -> Option<u32> {
        match self {
            AdsPayload::ReadResponse { result, .. }
            | AdsPayload::Status { result }
            | AdsPayload::AddNotificationResponse { result, .. } => Some(*result),
            _ => None,
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        match self {
            AdsPayload::Read {
                index_group,
                index_offset,
                length,
            } => {
                buf.put_u32_le(*index_group);
                buf.put_u32_le(*index_offset);
                buf.put_u32_le(*length);
            }
            AdsPayload::Write {
                index_group,
                index_offset,
                data,
            } => {
                buf.put_u32_le(*index_group);
                buf.put_u32_le(*index_offset);
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            AdsPayload::ReadWrite {
                index_group,
                index_offset,
                read_length,
                data,
            } => {
                buf.put_u32_le(*index_group);
                buf.put_u32_le(*index_offset);
                buf.put_u32_le(*read_length);
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            AdsPayload::AddNotification {
                index_group,
                index_offset,
                length,
                mode,
                max_delay,
                cycle_time,
            } => {
                buf.put_u32_le(*index_group);
                buf.put_u32_le(*index_offset);
                buf.put_u32_le(*length);
                buf.put_u32_le(*mode as u32);
                buf.put_u32_le(*max_delay);
                buf.put_u32_le(*cycle_time);
                buf.put_bytes(0, NOTIFICATION_RESERVED);
            }
            AdsPayload::DeleteNotification { handle } => buf.put_u32_le(*handle),
            AdsPayload::ReadResponse { result, data } => {
                buf.put_u32_le(*result);
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            AdsPayload::Status { result } => buf.put_u32_le(*result),
            AdsPayload::AddNotificationResponse { result, handle } => {
                buf.put_u32_le(*result);
                buf.put_u32_le(*handle);
            }
            AdsPayload::Notification { stamps } => {
                let body_len: usize = stamps
                    .iter()
                    .map(|s| 12 + s.samples.iter().map(|x| 8 + x.data.len()).sum::<usize>())
                    .sum();
                buf.put_u32_le((4 + body_len) as u32);
                buf.put_u32_le(stamps.len() as u32);
                for stamp in stamps {
                    buf.put_u64_le(stamp.timestamp);
                    buf.put_u32_le(stamp.samples.len() as u32);
                    for sample in &stamp.samples {
                        buf.put_u32_le(sample.handle);
                        buf.put_u32_le(sample.data.len() as u32);
                        buf.put_slice(&sample.data);
                    }
                }
            }
            AdsPayload::Empty => {}
            AdsPayload::Raw(data) => buf.put_slice(data),
        }
    }

    fn get(header: &AmsHeader, data: &[u8]) -> CodecResult<Self> {
        if data.is_empty() && header.error_code != 0 {
            return Ok(AdsPayload::Empty);
        }

        let mut buf = data;
        let payload = match (header.command, header.is_response()) {
            (AdsCommand::Read, false) => {
                CodecError::ensure_len(12, buf.remaining())?;
                AdsPayload::Read {
                    index_group: buf.get_u32_le(),
                    index_offset: buf.get_u32_le(),
                    length: buf.get_u32_le(),
                }
            }
            (AdsCommand::Write, false) => {
                CodecError::ensure_len(12, buf.remaining())?;
                let index_group = buf.get_u32_le();
                let index_offset = buf.get_u32_le();
                let data = sized(&mut buf)?;
                AdsPayload::Write {
                    index_group,
                    index_offset,
                    data,
                }
            }
            (AdsCommand::ReadWrite, false) => {
                CodecError::ensure_len(16, buf.remaining())?;
                let index_group = buf.get_u32_le();
                let index_offset = buf.get_u32_le();
                let read_length = buf.get_u32_le();
                let data = sized(&mut buf)?;
                AdsPayload::ReadWrite {
                    index_group,
                    index_offset,
                    read_length,
                    data,
                }
            }
            (AdsCommand::AddDeviceNotification, false) => {
                CodecError::ensure_len(24 + NOTIFICATION_RESERVED, buf.remaining())?;
                let index_group = buf.get_u32_le();
                let index_offset = buf.get_u32_le();
                let length = buf.get_u32_le();
                let mode = match buf.get_u32_le() {
                    3 => TransmissionMode::Cyclic,
                    4 => TransmissionMode::OnChange,
                    other => {
                        return Err(CodecError::malformed(format!(
                            "unknown transmission mode {}",
                            other
                        )))
                    }
                };
                let max_delay = buf.get_u32_le();
                let cycle_time = buf.get_u32_le();
                buf.advance(NOTIFICATION_RESERVED);
                AdsPayload::AddNotification {
                    index_group,
                    index_offset,
                    length,
                    mode,
                    max_delay,
                    cycle_time,
                }
            }
            (AdsCommand::DeleteDeviceNotification, false) => {
                CodecError::ensure_len(4, buf.remaining())?;
                AdsPayload::DeleteNotification {
                    handle: buf.get_u32_le(),
                }
            }
            (AdsCommand::Read | AdsCommand::ReadWrite, true) => {
                CodecError::ensure_len(8, buf.remaining())?;
                let result = buf.get_u32_le();
                let data = sized(&mut buf)?;
                AdsPayload::ReadResponse { result, data }
            }
            (
                AdsCommand::Write | AdsCommand::WriteControl | AdsCommand::DeleteDeviceNotification,
                true,
            ) => {
                CodecError::ensure_len(4, buf.remaining())?;
                AdsPayload::Status {
                    result: buf.get_u32_le(),
                }
            }
            (AdsCommand::AddDeviceNotification, true) => {
                CodecError::ensure_len(8, buf.remaining())?;
                AdsPayload::AddNotificationResponse {
                    result: buf.get_u32_le(),
                    handle: buf.get_u32_le(),
                }
            }
            (AdsCommand::DeviceNotification, _) => get_notification(&mut buf)?,
            _ => {
                let raw = Bytes::copy_from_slice(buf);
                buf.advance(buf.remaining());
                AdsPayload::Raw(raw)
            }
        };

        if buf.has_remaining() {
            return Err(CodecError::LengthMismatch {
                declared: data.len() - buf.remaining(),
                actual: data.len(),
            });
        }
        Ok(payload)
    }
}

/// Reads a `u32` length followed by that many bytes.
fn sized(buf: &mut &[u8]) -> CodecResult<Bytes> {
    CodecError::ensure_len(4, buf.remaining())?;
    let len = buf.get_u32_le() as usize;
    if len > buf.remaining() {
        return Err(CodecError::LengthMismatch {
            declared: len,
            actual: buf.remaining(),
        });
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_notification(buf: &mut &[u8]) -> CodecResult<AdsPayload> {
    CodecError::ensure_len(8, buf.remaining())?;
    let declared = buf.get_u32_le() as usize;
    if declared != buf.remaining() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: buf.remaining(),
        });
    }

    let count = buf.get_u32_le();
    let mut stamps = Vec::new();
    for _ in 0..count {
        CodecError::ensure_len(12, buf.remaining())?;
        let timestamp = buf.get_u64_le();
        let sample_count = buf.get_u32_le();
        let mut samples = Vec::new();
        for _ in 0..sample_count {
            CodecError::ensure_len(4, buf.remaining())?;
            let handle = buf.get_u32_le();
            samples.push(NotificationSample {
                handle,
                data: sized(buf)?,
            });
        }
        stamps.push(NotificationStamp { timestamp, samples });
    }
    Ok(AdsPayload::Notification { stamps })
}

// =============================================================================
// AdsFrame
// =============================================================================

/// A complete AMS/TCP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdsFrame {
    /// AMS header.
    pub header: AmsHeader,
    /// ADS data.
    pub payload: AdsPayload,
}

impl AdsFrame {
    /// Creates a frame.
    pub fn new(header: AmsHeader, payload: AdsPayload) -> Self {
        Self { header, payload }
    }

    /// Total length of the frame starting at `prefix`, once its AMS/TCP
    /// header is available.
    pub fn frame_len(prefix: &[u8]) -> Option<usize> {
        if prefix.len() < AMS_TCP_HEADER_LEN {
            return None;
        }
        let mut buf = &prefix[2..AMS_TCP_HEADER_LEN];
        Some(AMS_TCP_HEADER_LEN + buf.get_u32_le() as usize)
    }

    /// Serializes the frame. The header's data length is computed.
    pub fn encode(&self) -> Bytes {
        let mut data = BytesMut::new();
        self.payload.put(&mut data);

        let mut header = self.header;
        header.data_length = data.len() as u32;

        let mut buf = BytesMut::with_capacity(AMS_TCP_HEADER_LEN + AMS_HEADER_LEN + data.len());
        buf.put_u16_le(0);
        buf.put_u32_le((AMS_HEADER_LEN + data.len()) as u32);
        header.put(&mut buf);
        buf.put_slice(&data);
        buf.freeze()
    }

    /// Parses one complete frame.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        CodecError::ensure_len(AMS_TCP_HEADER_LEN + AMS_HEADER_LEN, bytes.len())?;
        let mut buf = bytes;
        buf.advance(2);
        let tcp_len = buf.get_u32_le() as usize;
        if tcp_len != buf.remaining() {
            return Err(CodecError::LengthMismatch {
                declared: tcp_len,
                actual: buf.remaining(),
            });
        }

        let header = AmsHeader::get(&mut buf)?;
        let declared = header.data_length as usize;
        if declared != buf.remaining() {
            return Err(CodecError::LengthMismatch {
                declared,
                actual: buf.remaining(),
            });
        }

        let payload = AdsPayload::get(&header, buf)?;
        Ok(Self { header, payload })
    }
}
