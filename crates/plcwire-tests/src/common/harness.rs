// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! Wires a simulated device to a real [`Connection`] and offers shortcuts
//! for the requests most tests make.
//!
//! ```rust,ignore
//! let harness = TestHarness::canopen(device);
//! let response = harness
//!     .read(&[("type", AddressFixtures::SDO_DEVICE_TYPE)])
//!     .await;
//! response.assert_all_ok();
//! harness.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use plcwire_ads::{AdsProtocol, AmsRoute};
use plcwire_canopen::CanOpenProtocol;
use plcwire_config::EngineConfig;
use plcwire_conversation::{Connection, Protocol};
use plcwire_core::{Response, SubscriptionRequestBuilder, Transport, Value};
use tracing::debug;

use crate::common::fixtures::EngineFixtures;
use crate::common::init_test_logging;
use crate::common::mocks::{MockAdsDevice, MockCanOpenDevice, MockTransport, SimulatedDevice};

// =============================================================================
// Test Harness
// =============================================================================

/// Configuration for the test harness.
#[derive(Debug, Clone)]
pub struct TestHarnessConfig {
    /// Name of the test, used in logs.
    pub test_name: String,

    /// Engine settings of the connection.
    pub engine: EngineConfig,

    /// Whether to enable tracing for the test.
    pub enable_tracing: bool,
}

impl Default for TestHarnessConfig {
    fn default() -> Self {
        Self {
            test_name: "unknown_test".to_string(),
            engine: EngineFixtures::fast(),
            enable_tracing: true,
        }
    }
}

impl TestHarnessConfig {
    /// Create a new config with a test name.
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            ..Default::default()
        }
    }

    /// Set the per-field request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.engine = self.engine.with_request_timeout(timeout);
        self
    }

    /// Set the polling interval of emulated change-of-state fields.
    pub fn change_of_state_poll(mut self, interval: Duration) -> Self {
        self.engine = self.engine.with_change_of_state_poll(interval);
        self
    }

    /// Enable or disable tracing.
    pub fn tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

/// A connection talking to a simulated device.
pub struct TestHarness<P: Protocol, D: SimulatedDevice> {
    /// The connection under test.
    pub connection: Connection<P>,

    /// The transport between connection and device.
    pub transport: Arc<MockTransport<D>>,

    /// The simulated device.
    pub device: Arc<D>,

    config: TestHarnessConfig,
}

impl TestHarness<AdsProtocol, MockAdsDevice> {
    /// An ADS connection to `device` with default settings.
    pub fn ads(device: Arc<MockAdsDevice>) -> Self {
        Self::ads_with_config(device, TestHarnessConfig::default())
    }

    /// An ADS connection to `device`.
    pub fn ads_with_config(device: Arc<MockAdsDevice>, config: TestHarnessConfig) -> Self {
        Self::open(AdsProtocol::new(AmsRoute::default()), device, config)
    }
}

impl TestHarness<CanOpenProtocol, MockCanOpenDevice> {
    /// A CANopen connection to `device` with default settings.
    pub fn canopen(device: Arc<MockCanOpenDevice>) -> Self {
        Self::canopen_with_config(device, TestHarnessConfig::default())
    }

    /// A CANopen connection to `device`.
    pub fn canopen_with_config(device: Arc<MockCanOpenDevice>, config: TestHarnessConfig) -> Self {
        Self::open(CanOpenProtocol::new(), device, config)
    }
}

impl<P: Protocol, D: SimulatedDevice> TestHarness<P, D> {
    /// Opens a connection speaking `protocol` to `device`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(protocol: P, device: Arc<D>, config: TestHarnessConfig) -> Self {
        if config.enable_tracing {
            init_test_logging();
        }
        let transport = MockTransport::new(Arc::clone(&device));
        let link: Arc<dyn Transport> = transport.clone();
        let connection = Connection::open(protocol, link, config.engine.clone());
        debug!(test = %config.test_name, connection = %connection.id(), "harness opened");

        Self {
            connection,
            transport,
            device,
            config,
        }
    }

    /// The harness configuration.
    pub fn config(&self) -> &TestHarnessConfig {
        &self.config
    }

    /// Reads `(name, address)` fields in one request.
    pub async fn read(&self, fields: &[(&str, &str)]) -> Response {
        let mut builder = self.connection.read_request_builder();
        for (name, address) in fields {
            builder.add_item(*name, *address);
        }
        builder
            .build()
            .expect("read request should build")
            .execute()
            .await
            .expect("request bound to a connection")
    }

    /// Writes `(name, address, value)` fields in one request.
    pub async fn write(&self, fields: &[(&str, &str, Value)]) -> Response {
        let mut builder = self.connection.write_request_builder();
        for (name, address, value) in fields {
            builder.add_item(*name, *address, value.clone());
        }
        builder
            .build()
            .expect("write request should build")
            .execute()
            .await
            .expect("request bound to a connection")
    }

    /// A subscription builder bound to the connection.
    pub fn subscribe(&self) -> SubscriptionRequestBuilder {
        self.connection.subscription_request_builder()
    }

    /// Closes the connection.
    pub async fn shutdown(self) {
        debug!(test = %self.config.test_name, "harness shutting down");
        self.connection.close().await;
    }
}
