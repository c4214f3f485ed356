// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for plcwire.
//!
//! Errors are split by *when* they can happen:
//!
//! - Build-time errors ([`BuildError`]) are raised synchronously while a
//!   request is assembled. Nothing has been sent when one of these surfaces.
//! - Field errors ([`FieldError`]) happen after dispatch and are scoped to a
//!   single field. They are carried inside a [`Response`](crate::request::Response)
//!   and never abort sibling fields.
//! - Connection errors ([`ConnectionError`]) are raised while a connection is
//!   constructed or after it has been closed.
//!
//! # Error Hierarchy
//!
//! ```text
//! PlcError (root)
//! ├── BuildError       - Address grammar, duplicate names, intervals
//! ├── FieldError       - Per-field outcome after dispatch
//! ├── ConnectionError  - Connection string and lifecycle
//! └── CodecError       - Frame encoding and decoding
//! ```
//!
//! # Examples
//!
//! ```
//! use plcwire_core::error::{FieldError, PlcError};
//! use plcwire_core::types::ResponseCode;
//! use std::time::Duration;
//!
//! let error = FieldError::timeout(Duration::from_secs(5));
//! assert!(error.is_retryable());
//! assert_eq!(error.response_code(), ResponseCode::Timeout);
//!
//! let plc_error: PlcError = error.into();
//! assert!(plc_error.is_retryable());
//! ```

use crate::types::{ProtocolKind, ResponseCode};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// PlcError - Root Error Type
// =============================================================================

/// The root error type for plcwire.
#[derive(Debug, Error)]
pub enum PlcError {
    /// Request construction error.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Per-field failure.
    #[error("Field error: {0}")]
    Field(#[from] FieldError),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Codec error.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl PlcError {
    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlcError::Field(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            PlcError::Build(_) => "build",
            PlcError::Field(e) => e.error_type(),
            PlcError::Connection(_) => "connection",
            PlcError::Codec(_) => "codec",
        }
    }
}

// =============================================================================
// BuildError
// =============================================================================

/// Errors raised while building a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Address string does not match its protocol's grammar.
    #[error("Invalid address '{address}': {message}")]
    InvalidAddress {
        /// The offending address string.
        address: String,
        /// What is wrong with it.
        message: String,
    },

    /// An event field name is already present in the builder.
    #[error("Duplicate field definition '{name}'")]
    DuplicateFieldName {
        /// The duplicated field name.
        name: String,
    },

    /// A cyclic subscription was given a zero interval.
    #[error("Invalid polling interval for '{name}': {message}")]
    InvalidInterval {
        /// The field name.
        name: String,
        /// What is wrong with the interval.
        message: String,
    },

    /// The address belongs to another protocol than the connection.
    #[error("Address '{address}' is a {actual} address, expected {expected}")]
    WrongProtocol {
        /// The address string.
        address: String,
        /// Protocol of the connection.
        expected: ProtocolKind,
        /// Protocol of the address.
        actual: ProtocolKind,
    },

    /// The request contains no fields.
    #[error("Request contains no fields")]
    EmptyRequest,
}

impl BuildError {
    /// Creates an invalid address error.
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates a duplicate field name error.
    pub fn duplicate_field(name: impl Into<String>) -> Self {
        Self::DuplicateFieldName { name: name.into() }
    }

    /// Creates an invalid interval error.
    pub fn invalid_interval(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInterval {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Result type for build operations.
pub type BuildResult<T> = Result<T, BuildError>;

// =============================================================================
// FieldError
// =============================================================================

/// Failure of a single field after it was handed to the engine.
///
/// Cloneable so that one failure of a batched exchange can be attached to
/// every field the exchange carried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// The operation could not be serialized. Nothing was sent.
    #[error("Encode failure: {message}")]
    Encode {
        /// Error message.
        message: String,
    },

    /// Sending failed or the physical layer reported an error.
    #[error("Transport failure: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// No matching response arrived before the deadline.
    #[error("Timed out after {duration:?}")]
    Timeout {
        /// The configured deadline.
        duration: Duration,
    },

    /// The device rejected the operation.
    #[error("Remote party reported code 0x{code:08X}: {message}")]
    ProtocolAbort {
        /// Device-reported code.
        code: u32,
        /// Protocol description of the code.
        message: String,
    },

    /// The address is well formed but does not exist on the device.
    #[error("Item not found: {address}")]
    NotFound {
        /// The address that was not found.
        address: String,
    },

    /// The matching response could not be interpreted.
    #[error("Decode failure: {message}")]
    Decode {
        /// Error message.
        message: String,
    },

    /// The protocol does not support this operation.
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        /// Description of the operation.
        operation: String,
    },

    /// The connection closed while the field was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The caller stopped waiting for the field.
    #[error("Cancelled")]
    Cancelled,
}

impl FieldError {
    /// Creates an encode failure.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates a transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Creates a protocol abort error.
    pub fn protocol_abort(code: u32, message: impl Into<String>) -> Self {
        Self::ProtocolAbort {
            code,
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(address: impl Into<String>) -> Self {
        Self::NotFound {
            address: address.into(),
        }
    }

    /// Creates a decode failure.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Returns `true` if a fresh attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FieldError::Timeout { .. } | FieldError::Transport { .. })
    }

    /// Returns the device-reported code for protocol aborts.
    pub fn abort_code(&self) -> Option<u32> {
        match self {
            FieldError::ProtocolAbort { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Maps this error to the per-field response code.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            FieldError::Encode { .. } => ResponseCode::InvalidDataType,
            FieldError::Transport { .. } => ResponseCode::TransportError,
            FieldError::Timeout { .. } => ResponseCode::Timeout,
            FieldError::ProtocolAbort { .. } => ResponseCode::RemoteError,
            FieldError::NotFound { .. } => ResponseCode::NotFound,
            FieldError::Decode { .. } => ResponseCode::InternalError,
            FieldError::Unsupported { .. } => ResponseCode::Unsupported,
            FieldError::ConnectionClosed => ResponseCode::ConnectionClosed,
            FieldError::Cancelled => ResponseCode::Cancelled,
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            FieldError::Encode { .. } => "encode",
            FieldError::Transport { .. } => "transport",
            FieldError::Timeout { .. } => "timeout",
            FieldError::ProtocolAbort { .. } => "protocol_abort",
            FieldError::NotFound { .. } => "not_found",
            FieldError::Decode { .. } => "decode",
            FieldError::Unsupported { .. } => "unsupported",
            FieldError::ConnectionClosed => "connection_closed",
            FieldError::Cancelled => "cancelled",
        }
    }
}

impl From<CodecError> for FieldError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Encode { message } => FieldError::Encode { message },
            CodecError::Unsupported { operation } => FieldError::Unsupported { operation },
            other => FieldError::decode(other.to_string()),
        }
    }
}

/// Result type for a single field.
pub type FieldResult<T> = Result<T, FieldError>;

// =============================================================================
// ConnectionError
// =============================================================================

/// Errors raised while constructing or using a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The connection string does not match the URI grammar.
    #[error("Invalid connection string '{uri}': {message}")]
    InvalidUri {
        /// The connection string.
        uri: String,
        /// What is wrong with it.
        message: String,
    },

    /// A query parameter is not recognized by the protocol.
    #[error("Unknown parameter '{name}' for protocol {protocol}")]
    UnknownParameter {
        /// The parameter name.
        name: String,
        /// The protocol.
        protocol: ProtocolKind,
    },

    /// A query parameter has a malformed value.
    #[error("Invalid value '{value}' for parameter '{name}': {message}")]
    InvalidParameter {
        /// The parameter name.
        name: String,
        /// The offending value.
        value: String,
        /// Expected form.
        message: String,
    },

    /// The protocol named in the connection string is not supported.
    #[error("Unsupported protocol: {protocol}")]
    UnsupportedProtocol {
        /// The protocol name.
        protocol: String,
    },

    /// The transport could not be used.
    #[error("Transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// The connection is closed.
    #[error("Connection is closed")]
    Closed,

    /// The request was built without a connection to execute on.
    #[error("Request is not bound to a connection")]
    NotBound,
}

impl ConnectionError {
    /// Creates an invalid URI error.
    pub fn invalid_uri(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown parameter error.
    pub fn unknown_parameter(name: impl Into<String>, protocol: ProtocolKind) -> Self {
        Self::UnknownParameter {
            name: name.into(),
            protocol,
        }
    }

    /// Creates an invalid parameter error.
    pub fn invalid_parameter(
        name: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            value: value.into(),
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

// =============================================================================
// CodecError
// =============================================================================

/// Errors raised by a protocol codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The operation cannot be serialized.
    #[error("Cannot encode: {message}")]
    Encode {
        /// Error message.
        message: String,
    },

    /// The frame is shorter than its structure requires.
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// A length field disagrees with the payload that follows it.
    #[error("Length mismatch: header declares {declared} bytes, payload has {actual}")]
    LengthMismatch {
        /// Length from the wire.
        declared: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// The frame is structurally invalid.
    #[error("Malformed frame: {message}")]
    Malformed {
        /// Error message.
        message: String,
    },

    /// The protocol has no frame for this operation.
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        /// Description of the operation.
        operation: String,
    },
}

impl CodecError {
    /// Creates an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates a malformed frame error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Checks that `available` bytes satisfy `needed`.
    pub fn ensure_len(needed: usize, available: usize) -> CodecResult<()> {
        if available < needed {
            Err(Self::Truncated { needed, available })
        } else {
            Ok(())
        }
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type with the root error.
pub type PlcResult<T> = Result<T, PlcError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error_codes() {
        assert_eq!(FieldError::not_found("ns=2;i=1").response_code(), ResponseCode::NotFound);
        assert_eq!(
            FieldError::protocol_abort(0x0602_0000, "object does not exist").response_code(),
            ResponseCode::RemoteError
        );
        assert_eq!(FieldError::Cancelled.response_code(), ResponseCode::Cancelled);
        assert_ne!(
            FieldError::Cancelled.response_code(),
            FieldError::timeout(Duration::from_millis(1)).response_code()
        );
    }

    #[test]
    fn test_abort_message_carries_code() {
        let err = FieldError::protocol_abort(0x0504_0000, "SDO protocol timed out");
        assert_eq!(err.abort_code(), Some(0x0504_0000));
        assert!(err.to_string().contains("0x05040000"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_codec_error_into_field_error() {
        let encode: FieldError = CodecError::encode("string into INT").into();
        assert_eq!(encode.error_type(), "encode");

        let truncated: FieldError = CodecError::Truncated { needed: 8, available: 2 }.into();
        assert_eq!(truncated.error_type(), "decode");

        let unsupported: FieldError = CodecError::unsupported("subscribe to SDO").into();
        assert_eq!(unsupported.response_code(), ResponseCode::Unsupported);
    }

    #[test]
    fn test_duplicate_field_message() {
        let err = BuildError::duplicate_field("alarm");
        assert_eq!(err.to_string(), "Duplicate field definition 'alarm'");
        let root: PlcError = err.into();
        assert_eq!(root.error_type(), "build");
    }

    #[test]
    fn test_ensure_len() {
        assert!(CodecError::ensure_len(4, 4).is_ok());
        assert_eq!(
            CodecError::ensure_len(6, 4),
            Err(CodecError::Truncated { needed: 6, available: 4 })
        );
    }
}
