// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema definitions for plcwire.
//!
//! # Schema Structure
//!
//! ```text
//! PlcConfig
//! ├── engine: EngineConfig
//! └── connections: Vec<ConnectionEntry>
//! ```

use crate::connection::ConnectionString;
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

/// Default per-field response deadline in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Default polling interval for change-of-state fields without native
/// notification, in milliseconds.
pub const DEFAULT_CHANGE_OF_STATE_POLL_MS: u64 = 250;

/// Default capacity of each subscription's delivery channel.
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 256;

/// Default maximum number of outstanding pending entries per connection.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Default number of completed keys remembered for duplicate detection.
pub const DEFAULT_DUPLICATE_HISTORY: usize = 64;

/// Default capacity of the inbound frame channel.
pub const DEFAULT_INBOUND_BUFFER: usize = 1024;

/// Maximum request timeout in milliseconds (10 minutes).
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 600_000;

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlcConfig {
    /// Engine settings shared by all connections.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Named connections.
    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,
}

impl PlcConfig {
    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.engine.validate()?;

        let mut names = HashSet::new();
        for connection in &self.connections {
            if !names.insert(connection.name.as_str()) {
                return Err(ConfigError::DuplicateConnection {
                    name: connection.name.clone(),
                });
            }
            connection.validate()?;
        }

        Ok(())
    }

    /// Returns a connection entry by name.
    pub fn get_connection(&self, name: &str) -> Option<&ConnectionEntry> {
        self.connections.iter().find(|c| c.name == name)
    }

    /// Returns the engine settings for a connection, applying its overrides.
    pub fn engine_for(&self, name: &str) -> Option<EngineConfig> {
        self.get_connection(name).map(|entry| {
            let mut engine = self.engine.clone();
            if let Some(timeout) = entry.request_timeout_ms {
                engine.request_timeout_ms = timeout;
            }
            engine
        })
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Settings of the conversation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Per-field response deadline in milliseconds.
    pub request_timeout_ms: u64,

    /// Poll interval for change-of-state fields without native notification.
    pub change_of_state_poll_ms: u64,

    /// Capacity of each subscription's delivery channel.
    pub subscription_buffer: usize,

    /// Maximum number of outstanding pending entries.
    pub max_pending: usize,

    /// Number of completed keys remembered for duplicate detection.
    pub duplicate_history: usize,

    /// Capacity of the inbound frame channel.
    pub inbound_buffer: usize,
}

impl EngineConfig {
    /// Returns the request timeout.
    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the change-of-state poll interval.
    #[inline]
    pub fn change_of_state_poll(&self) -> Duration {
        Duration::from_millis(self.change_of_state_poll_ms)
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the change-of-state poll interval.
    pub fn with_change_of_state_poll(mut self, interval: Duration) -> Self {
        self.change_of_state_poll_ms = interval.as_millis() as u64;
        self
    }

    /// Validates the engine settings.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.request_timeout_ms == 0 || self.request_timeout_ms > MAX_REQUEST_TIMEOUT_MS {
            return Err(ConfigError::validation(
                "engine.request_timeout_ms",
                format!("must be in 1..={}", MAX_REQUEST_TIMEOUT_MS),
            ));
        }
        if self.change_of_state_poll_ms == 0 {
            return Err(ConfigError::validation(
                "engine.change_of_state_poll_ms",
                "must be greater than zero",
            ));
        }
        for (field, value) in [
            ("engine.subscription_buffer", self.subscription_buffer),
            ("engine.max_pending", self.max_pending),
            ("engine.inbound_buffer", self.inbound_buffer),
        ] {
            if value == 0 {
                return Err(ConfigError::validation(field, "must be greater than zero"));
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            change_of_state_poll_ms: DEFAULT_CHANGE_OF_STATE_POLL_MS,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            max_pending: DEFAULT_MAX_PENDING,
            duplicate_history: DEFAULT_DUPLICATE_HISTORY,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }
}

// =============================================================================
// Connection Entry
// =============================================================================

/// A named connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionEntry {
    /// Unique connection name.
    pub name: String,

    /// Connection string.
    pub url: String,

    /// Overrides the engine request timeout for this connection.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl ConnectionEntry {
    /// Parses the connection string.
    pub fn connection_string(&self) -> ConfigResult<ConnectionString> {
        ConnectionString::parse(&self.url).map_err(|source| ConfigError::InvalidConnection {
            name: self.name.clone(),
            source,
        })
    }

    /// Validates the entry.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::validation("connection.name", "cannot be empty"));
        }
        if let Some(timeout) = self.request_timeout_ms {
            if timeout == 0 || timeout > MAX_REQUEST_TIMEOUT_MS {
                return Err(ConfigError::validation(
                    format!("connections.{}.request_timeout_ms", self.name),
                    format!("must be in 1..={}", MAX_REQUEST_TIMEOUT_MS),
                ));
            }
        }
        self.connection_string()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
