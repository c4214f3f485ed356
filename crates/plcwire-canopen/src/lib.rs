// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # plcwire-canopen
//!
//! CANopen SDO/NMT driver for the plcwire conversation engine.
//!
//! SDO exchanges are correlated by node and service instead of an
//! identifier, which serializes requests to the same node. Heartbeat and
//! NMT frames are delivered to `NMT` / `NMT:<n>` subscribers.
//!
//! ```rust,ignore
//! let protocol = CanOpenProtocol::new();
//! let connection = Connection::open(protocol, transport, EngineConfig::default());
//!
//! let mut builder = connection.subscription_request_builder();
//! builder.add_event("nodes", "NMT")?;
//! let mut subscription = builder.build()?.execute().await?;
//! while let Some(event) = subscription.recv().await {
//!     println!("{} -> {}", event.address, event.value);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod frame;
pub mod protocol;
pub mod value;

pub use error::{CanOpenError, ABORT_OBJECT_DOES_NOT_EXIST, ABORT_SUBINDEX_DOES_NOT_EXIST};
pub use frame::{CanOpenFrame, CanOpenPayload, CanOpenService, NmtCommand, NmtState, SdoPayload};
pub use protocol::{CanOpenProtocol, SdoChannel};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
