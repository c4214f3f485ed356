// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! ADS-specific errors.

use plcwire_core::{CodecError, ConnectionError};
use thiserror::Error;

/// Errors raised while framing or configuring ADS.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdsError {
    /// An AMS net ID is not six dotted octets.
    #[error("Invalid AMS net id '{value}'")]
    InvalidNetId {
        /// The rejected text.
        value: String,
    },

    /// The header names a command this codec does not know.
    #[error("Unknown ADS command {code}")]
    UnknownCommand {
        /// The command code.
        code: u16,
    },

    /// A value does not fit the addressed PLC type.
    #[error("Cannot encode {value_type} as {data_type}")]
    ValueType {
        /// Type of the supplied value.
        value_type: &'static str,
        /// Addressed PLC type.
        data_type: &'static str,
    },

    /// Symbol writes need a handle exchange that is not supported.
    #[error("Operation not supported for symbolic address '{symbol}'")]
    SymbolicUnsupported {
        /// The symbol.
        symbol: String,
    },
}

impl AdsError {
    /// Returns the error type name for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            AdsError::InvalidNetId { .. } => "invalid_net_id",
            AdsError::UnknownCommand { .. } => "unknown_command",
            AdsError::ValueType { .. } => "value_type",
            AdsError::SymbolicUnsupported { .. } => "symbolic_unsupported",
        }
    }
}

impl From<AdsError> for CodecError {
    fn from(err: AdsError) -> Self {
        match err {
            AdsError::UnknownCommand { .. } => CodecError::malformed(err.to_string()),
            AdsError::SymbolicUnsupported { .. } => CodecError::unsupported(err.to_string()),
            other => CodecError::encode(other.to_string()),
        }
    }
}

impl From<AdsError> for ConnectionError {
    fn from(err: AdsError) -> Self {
        match &err {
            AdsError::InvalidNetId { value } => {
                ConnectionError::invalid_parameter("ams-net-id", value.clone(), err.to_string())
            }
            _ => ConnectionError::transport(err.to_string()),
        }
    }
}

/// Result type for ADS operations.
pub type AdsResult<T> = Result<T, AdsError>;
