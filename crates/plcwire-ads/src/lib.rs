// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # plcwire-ads
//!
//! Beckhoff ADS/AMS driver for the plcwire conversation engine.
//!
//! - [`frame`]: AMS/TCP framing with strict length checks
//! - [`value`]: PLC memory image to [`plcwire_core::Value`] conversion
//! - [`protocol`]: invoke-id correlation, sum-read batching and device
//!   notifications
//!
//! ## Example
//!
//! ```rust,ignore
//! use plcwire_ads::AdsProtocol;
//! use plcwire_config::ConnectionString;
//! use plcwire_conversation::Connection;
//!
//! let uri = ConnectionString::parse("ads:tcp://10.0.0.5?target-ams-port=851")?;
//! let protocol = AdsProtocol::from_connection(&uri)?;
//! let connection = Connection::open(protocol, transport, EngineConfig::default());
//!
//! let mut builder = connection.read_request_builder();
//! builder.add_item("counter", "0x4020/0:DINT");
//! builder.add_item("speed", "MAIN.speed:REAL");
//! let response = builder.build()?.execute().await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod frame;
pub mod protocol;
pub mod types;
pub mod value;

pub use error::{AdsError, AdsResult};
pub use frame::{AdsFrame, AdsPayload, AmsHeader, NotificationSample, NotificationStamp};
pub use protocol::{AdsProtocol, DEFAULT_MAX_SUM_ITEMS};
pub use types::{AdsCommand, AmsNetId, AmsRoute, TransmissionMode};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
