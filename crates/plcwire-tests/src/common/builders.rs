// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Builders
//!
//! Fluent builders for simulated devices.
//!
//! Addresses are given in the same text grammar the request builders use,
//! so a test declares its device with the strings it later reads.
//!
//! ```rust,ignore
//! let device = CanOpenDeviceBuilder::new()
//!     .object("SDO:1:0x1000/0x0:UNSIGNED32", Value::UInt32(0x0004_0191))
//!     .silent("SDO:2:0x1001/0x0:UNSIGNED8")
//!     .latency(1, Duration::from_millis(30))
//!     .build();
//! ```

use std::sync::Arc;
use std::time::Duration;

use plcwire_config::{AdsAddressParser, CanOpenAddressParser};
use plcwire_core::{AdsAddress, CanOpenAddress, SdoAddress, Value};

use crate::common::mocks::{MockAdsDevice, MockCanOpenDevice, Variable};

// =============================================================================
// ADS Device Builder
// =============================================================================

/// Builder for [`MockAdsDevice`].
#[derive(Debug, Default)]
pub struct AdsDeviceBuilder {
    variables: Vec<(AdsAddress, Variable)>,
    silent: Vec<AdsAddress>,
}

impl AdsDeviceBuilder {
    /// Create a builder for an empty device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable holding `value`.
    pub fn variable(mut self, address: &str, value: impl Into<Value>) -> Self {
        self.variables
            .push((parse_ads(address), Variable::Fixed(value.into())));
        self
    }

    /// Adds a counter that increments every `period`.
    pub fn ramp(mut self, address: &str, period: Duration) -> Self {
        self.variables.push((parse_ads(address), Variable::ramp(period)));
        self
    }

    /// Makes the device ignore every request touching `address`.
    pub fn silent(mut self, address: &str) -> Self {
        self.silent.push(parse_ads(address));
        self
    }

    /// Build the device.
    pub fn build(self) -> Arc<MockAdsDevice> {
        let device = MockAdsDevice::new();
        for (address, variable) in self.variables {
            device.insert(address, variable);
        }
        for address in self.silent {
            device.silence(address.target);
        }
        Arc::new(device)
    }
}

fn parse_ads(address: &str) -> AdsAddress {
    AdsAddressParser::new()
        .parse_ads(address)
        .unwrap_or_else(|e| panic!("invalid ADS test address {}: {}", address, e))
}

// =============================================================================
// CANopen Device Builder
// =============================================================================

/// Builder for [`MockCanOpenDevice`].
#[derive(Debug, Default)]
pub struct CanOpenDeviceBuilder {
    objects: Vec<(SdoAddress, Variable)>,
    silent: Vec<SdoAddress>,
    latency: Vec<(u8, Duration)>,
}

impl CanOpenDeviceBuilder {
    /// Create a builder for an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object holding `value`.
    pub fn object(mut self, address: &str, value: impl Into<Value>) -> Self {
        self.objects
            .push((parse_sdo(address), Variable::Fixed(value.into())));
        self
    }

    /// Adds an object counting up every `period`.
    pub fn ramp(mut self, address: &str, period: Duration) -> Self {
        self.objects.push((parse_sdo(address), Variable::ramp(period)));
        self
    }

    /// Makes the node holding `address` ignore requests for it.
    pub fn silent(mut self, address: &str) -> Self {
        self.silent.push(parse_sdo(address));
        self
    }

    /// Delays every reply of `node_id`.
    pub fn latency(mut self, node_id: u8, latency: Duration) -> Self {
        self.latency.push((node_id, latency));
        self
    }

    /// Build the bus.
    pub fn build(self) -> Arc<MockCanOpenDevice> {
        let device = MockCanOpenDevice::new();
        for (sdo, variable) in self.objects {
            device.insert(sdo.node_id, sdo.index, sdo.subindex, sdo.data_type, variable);
        }
        for sdo in self.silent {
            device.silence(sdo.node_id, sdo.index, sdo.subindex);
        }
        for (node_id, latency) in self.latency {
            device.set_latency(node_id, latency);
        }
        Arc::new(device)
    }
}

fn parse_sdo(address: &str) -> SdoAddress {
    match CanOpenAddressParser::new().parse_canopen(address) {
        Ok(CanOpenAddress::Sdo(sdo)) => sdo,
        Ok(other) => panic!("{} is not an SDO address", other),
        Err(e) => panic!("invalid CANopen test address {}: {}", address, e),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use plcwire_core::AdsTarget;

    #[test]
    fn test_ads_builder() {
        let device = AdsDeviceBuilder::new()
            .variable("0x4020/0x0:DINT", Value::Int32(7))
            .build();
        let target = AdsTarget::Direct {
            index_group: 0x4020,
            index_offset: 0,
        };
        assert_eq!(device.value(&target), Some(Value::Int32(7)));
    }

    #[test]
    fn test_canopen_builder() {
        let device = CanOpenDeviceBuilder::new()
            .object("SDO:1:0x1000/0x0:UNSIGNED32", Value::UInt32(0x191))
            .build();
        assert_eq!(device.value(1, 0x1000, 0), Some(Value::UInt32(0x191)));
        assert_eq!(device.value(2, 0x1000, 0), None);
    }

    #[test]
    #[should_panic(expected = "is not an SDO address")]
    fn test_canopen_builder_rejects_nmt() {
        let _ = CanOpenDeviceBuilder::new().object("NMT:1", Value::UInt8(5));
    }
}
