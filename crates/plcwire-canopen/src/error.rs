// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CANopen-specific errors and SDO abort codes.

use plcwire_core::CodecError;
use thiserror::Error;

/// SDO abort: object does not exist in the object dictionary.
pub const ABORT_OBJECT_DOES_NOT_EXIST: u32 = 0x0602_0000;

/// SDO abort: sub-index does not exist.
pub const ABORT_SUBINDEX_DOES_NOT_EXIST: u32 = 0x0609_0011;

/// Errors raised while framing CANopen traffic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CanOpenError {
    /// The COB-ID belongs to a service this driver does not speak.
    #[error("Unsupported COB-ID 0x{cob_id:03X}")]
    UnsupportedCobId {
        /// The COB-ID.
        cob_id: u32,
    },

    /// An NMT command or state byte is unknown.
    #[error("Unknown NMT {what} 0x{code:02X}")]
    UnknownNmtCode {
        /// "command" or "state".
        what: &'static str,
        /// The byte.
        code: u8,
    },

    /// The SDO command specifier is invalid for the direction.
    #[error("Unexpected SDO command specifier 0x{specifier:02X}")]
    UnexpectedSpecifier {
        /// The first payload byte.
        specifier: u8,
    },

    /// The value needs a segmented transfer.
    #[error("Segmented SDO transfer of 0x{index:04X}/0x{subindex:X} is not supported")]
    SegmentedTransfer {
        /// Object index.
        index: u16,
        /// Sub-index.
        subindex: u8,
    },

    /// A value does not fit the addressed object type.
    #[error("Cannot encode {value_type} as {data_type}")]
    ValueType {
        /// Type of the supplied value.
        value_type: &'static str,
        /// Object dictionary type.
        data_type: &'static str,
    },

    /// The operation cannot be carried by an SDO exchange.
    #[error("{operation} is not supported for {address}")]
    Unsupported {
        /// Operation name.
        operation: &'static str,
        /// Field address.
        address: String,
    },
}

impl From<CanOpenError> for CodecError {
    fn from(err: CanOpenError) -> Self {
        match err {
            CanOpenError::ValueType { .. } => CodecError::encode(err.to_string()),
            CanOpenError::Unsupported { .. } => CodecError::unsupported(err.to_string()),
            other => CodecError::malformed(other.to_string()),
        }
    }
}

/// Describes an SDO abort code (CiA 301).
pub fn abort_message(code: u32) -> &'static str {
    match code {
        0x0503_0000 => "toggle bit not alternated",
        0x0504_0000 => "SDO protocol timed out",
        0x0504_0001 => "command specifier not valid or unknown",
        0x0504_0005 => "out of memory",
        0x0601_0000 => "unsupported access to an object",
        0x0601_0001 => "attempt to read a write only object",
        0x0601_0002 => "attempt to write a read only object",
        ABORT_OBJECT_DOES_NOT_EXIST => "object does not exist in the object dictionary",
        0x0604_0041 => "object cannot be mapped to the PDO",
        0x0606_0000 => "access failed due to a hardware error",
        0x0607_0010 => "data type does not match, length of service parameter does not match",
        0x0607_0012 => "data type does not match, length of service parameter too high",
        0x0607_0013 => "data type does not match, length of service parameter too low",
        ABORT_SUBINDEX_DOES_NOT_EXIST => "sub-index does not exist",
        0x0609_0030 => "invalid value for parameter",
        0x0609_0031 => "value of parameter written too high",
        0x0609_0032 => "value of parameter written too low",
        0x0800_0000 => "general error",
        0x0800_0020 => "data cannot be transferred or stored to the application",
        0x0800_0022 => "data cannot be transferred because of the present device state",
        _ => "unknown SDO abort code",
    }
}

/// Returns `true` if `code` reports a missing object or sub-index.
pub fn is_not_found(code: u32) -> bool {
    matches!(code, ABORT_OBJECT_DOES_NOT_EXIST | ABORT_SUBINDEX_DOES_NOT_EXIST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_codes() {
        assert!(is_not_found(0x0602_0000));
        assert!(is_not_found(0x0609_0011));
        assert!(!is_not_found(0x0601_0002));
        assert_eq!(abort_message(0x0609_0011), "sub-index does not exist");
    }

    #[test]
    fn test_codec_conversion() {
        let err: CodecError = CanOpenError::UnsupportedCobId { cob_id: 0x181 }.into();
        assert!(matches!(err, CodecError::Malformed { .. }));
        let err: CodecError = CanOpenError::SegmentedTransfer {
            index: 0x1008,
            subindex: 0,
        }
        .into();
        assert!(matches!(err, CodecError::Malformed { .. }));
        let err: CodecError = CanOpenError::Unsupported {
            operation: "subscribe",
            address: "SDO:1:0x1008/0x0:UNSIGNED32".into(),
        }
        .into();
        assert!(matches!(err, CodecError::Unsupported { .. }));
    }
}
