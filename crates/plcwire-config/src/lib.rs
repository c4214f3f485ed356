// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # plcwire-config
//!
//! Address grammars, connection strings and configuration loading for
//! plcwire.
//!
//! - **Parser**: CANopen, OPC UA and ADS address grammars plus an
//!   auto-detecting parser that plugs into request builders
//! - **Connection**: `<protocol>:<transport>://<host>[:<port>][/<path>][?k=v]`
//!   with per-protocol parameter validation
//! - **Schema**: Engine settings and named connections
//! - **Loader**: YAML, TOML and JSON loading with environment overrides
//!
//! ## Example
//!
//! ```
//! use plcwire_config::{ConnectionString, UnifiedAddressParser};
//!
//! let address = UnifiedAddressParser::new().parse("NMT:5").unwrap();
//! assert_eq!(address.to_string(), "NMT:5");
//!
//! let conn: ConnectionString = "canopen:socketcan://can0?node-id=5".parse().unwrap();
//! assert_eq!(conn.param_u64("node-id"), Some(5));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod loader;
pub mod parser;
pub mod schema;

pub use connection::{ConnectionString, ParamValue, TransportKind};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader};
pub use parser::{
    AddressParser, AdsAddressParser, CanOpenAddressParser, OpcUaAddressParser,
    UnifiedAddressParser,
};
pub use schema::{ConnectionEntry, EngineConfig, PlcConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
