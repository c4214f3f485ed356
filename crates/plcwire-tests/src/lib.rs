// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # plcwire Integration Tests
//!
//! End-to-end tests for the plcwire conversation engine and its protocol
//! drivers, plus the simulated devices and helpers they run against.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `fixtures`: Addresses, connection strings and config documents
//!   - `builders`: Fluent builders for simulated devices
//!   - `assertions`: Response and subscription assertions
//!   - `mocks`: In-process transport and simulated ADS / CANopen devices
//!   - `harness`: Connection harness wiring a device to a real engine
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p plcwire-tests
//!
//! # Run specific test suite
//! cargo test -p plcwire-tests --test integration_conversation
//! cargo test -p plcwire-tests --test integration_subscription
//! cargo test -p plcwire-tests --test integration_address
//! cargo test -p plcwire-tests --test integration_config
//! cargo test -p plcwire-tests --test integration_protocols
//!
//! # With engine logs
//! RUST_LOG=plcwire=trace cargo test -p plcwire-tests -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! ### Conversation Tests (`integration_conversation.rs`)
//! - Multi-field reads regardless of reply arrival order
//! - Duplicate replies delivered once
//! - Per-field NOT_FOUND and timeouts
//! - Close cascade and transport failures
//!
//! ### Subscription Tests (`integration_subscription.rs`)
//! - Cyclic polling against a changing device
//! - Change-of-state and event delivery
//! - Duplicate event fields and unsubscribe
//!
//! ### Address Tests (`integration_address.rs`)
//! - CANopen, OPC UA and ADS grammars and their round trip
//!
//! ### Config Tests (`integration_config.rs`)
//! - Connection strings
//! - Config files with environment overrides
//!
//! ### Protocol Tests (`integration_protocols.rs`)
//! - ADS and CANopen framing against the simulated devices
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use plcwire_tests::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_something() {
//!     let device = AdsDeviceBuilder::new()
//!         .variable(AddressFixtures::ADS_COUNTER, Value::Int32(7))
//!         .build();
//!     let harness = TestHarness::ads(device);
//!
//!     let mut builder = harness.connection.read_request_builder();
//!     builder.add_item("counter", AddressFixtures::ADS_COUNTER);
//!     let response = builder.build().unwrap().execute().await.unwrap();
//!     response.assert_value("counter", &Value::Int32(7));
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::builders::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
    pub use plcwire_core::{ResponseCode, Value};
}
