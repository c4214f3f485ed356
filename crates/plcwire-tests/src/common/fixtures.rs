// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built addresses, connection strings and configuration documents.
//!
//! ## Design Principles
//!
//! - Fixtures are plain constants, shared by devices and requests
//! - Each fixture names a realistic object on a realistic device

use std::time::Duration;

use plcwire_config::EngineConfig;

// =============================================================================
// Address Fixtures
// =============================================================================

/// Addresses used across the integration tests.
pub struct AddressFixtures;

impl AddressFixtures {
    /// A DINT production counter in the PLC's memory area.
    pub const ADS_COUNTER: &'static str = "0x4020/0x0:DINT";
    /// An INT motor speed.
    pub const ADS_SPEED: &'static str = "0x4020/0x4:INT";
    /// A BOOL running flag.
    pub const ADS_RUNNING: &'static str = "0x4020/0x6:BOOL";
    /// Three REAL setpoints.
    pub const ADS_SETPOINTS: &'static str = "0x4020/0x10:REAL[3]";
    /// An offset with nothing behind it.
    pub const ADS_MISSING: &'static str = "0x4020/0x100:DINT";
    /// A symbol resolved by name on the PLC.
    pub const ADS_SYMBOL: &'static str = "MAIN.temperature:REAL";

    /// Device type of node 1.
    pub const SDO_DEVICE_TYPE: &'static str = "SDO:1:0x1000/0x0:UNSIGNED32";
    /// Error register of node 2.
    pub const SDO_ERROR_REGISTER: &'static str = "SDO:2:0x1001/0x0:UNSIGNED8";
    /// Vendor ID of node 3.
    pub const SDO_VENDOR_ID: &'static str = "SDO:3:0x1018/0x1:UNSIGNED32";
    /// A manufacturer object on node 1.
    pub const SDO_SPEED: &'static str = "SDO:1:0x2000/0x1:INTEGER16";
    /// An object node 1 does not have.
    pub const SDO_MISSING: &'static str = "SDO:1:0x2FFF/0x0:UNSIGNED32";

    /// NMT state of every node.
    pub const NMT_ANY: &'static str = "NMT";
    /// NMT state of node 1.
    pub const NMT_NODE_1: &'static str = "NMT:1";

    /// Valid addresses of every grammar.
    pub fn valid_addresses() -> Vec<&'static str> {
        vec![
            "NMT",
            "NMT:0",
            "NMT:127",
            "SDO:1:0x1000/0x0",
            "SDO:5:4096/1:UNSIGNED16",
            "sdo:127:0x1A00/0x2:INTEGER32",
            "SDO:3:0x2000/0x0:VISIBLE_STRING",
            "ns=2;s=Machine.Speed",
            "ns=0;i=2258",
            "i=85",
            "ns=3;g=72962b91-fa75-4ae6-8d28-b404dc7daf63",
            "0x4020/0x0:DINT",
            "16416/4:INT",
            "0xF030/0x1F:LREAL[4]",
            "MAIN.counter:UDINT",
            "GVL.flags[2]:BOOL[8]",
        ]
    }

    /// Malformed addresses with the reason they fail.
    pub fn invalid_addresses() -> Vec<(&'static str, &'static str)> {
        vec![
            ("NMT:128", "node id out of range"),
            ("NMT:1:2", "too many parts"),
            ("SDO:0:0x1000/0x0", "SDO needs a concrete node"),
            ("SDO:1:0x10000/0x0", "index out of range"),
            ("SDO:1:0x1000", "missing sub-index"),
            ("SDO:1:0x1000/0x0:FLOAT", "unknown data type"),
            ("PDO:1", "unknown service"),
            ("0x4020/0x0:FLOAT", "unknown ADS type"),
            ("0x4020/0x0:DINT[0]", "zero element count"),
            ("MAIN counter:DINT", "invalid symbol"),
            ("", "empty address"),
        ]
    }
}

// =============================================================================
// Connection Fixtures
// =============================================================================

/// Connection strings.
pub struct ConnectionFixtures;

impl ConnectionFixtures {
    /// An ADS PLC with an explicit route.
    pub const ADS: &'static str =
        "ads:tcp://10.0.0.5?target-ams-net-id=10.0.0.5.1.1&target-ams-port=851";
    /// An ADS PLC relying on the default route.
    pub const ADS_DEFAULTS: &'static str = "ads:tcp://10.0.0.5";
    /// A CANopen bus with a default node.
    pub const CANOPEN: &'static str = "canopen:socketcan://can0?node-id=1";
    /// An OPC UA server with discovery.
    pub const OPCUA: &'static str = "opcua:tcp://127.0.0.1:12686/milo?discovery=true";

    /// Connection strings that must be rejected.
    pub fn invalid() -> Vec<&'static str> {
        vec![
            "opcua:tcp://127.0.0.1:12686/milo?discovery=1",
            "opcua:tcp://127.0.0.1:12686/milo?diskovery=false",
            "opcua:tcp://h?discovery=true&discovery=false",
            "modbus:tcp://h",
            "opcua:carrier-pigeon://h",
            "opcua:tcp://",
            "opcua:tcp://h:0",
            "ads:tcp://h?target-ams-net-id=10.0.0.5",
            "canopen:socketcan://can0?node-id=128",
        ]
    }
}

// =============================================================================
// Config Fixtures
// =============================================================================

/// Configuration documents.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// A plant configuration in TOML.
    pub const TOML: &'static str = r#"
[engine]
request_timeout_ms = 1500
change_of_state_poll_ms = 200

[[connections]]
name = "press"
url = "ads:tcp://10.0.0.5?target-ams-net-id=10.0.0.5.1.1"

[[connections]]
name = "conveyor"
url = "canopen:socketcan://can0?node-id=3"
request_timeout_ms = 300
"#;

    /// The same plant in YAML.
    pub const YAML: &'static str = r#"
engine:
  request_timeout_ms: 1500
  change_of_state_poll_ms: 200
connections:
  - name: press
    url: "ads:tcp://10.0.0.5?target-ams-net-id=10.0.0.5.1.1"
  - name: conveyor
    url: "canopen:socketcan://can0?node-id=3"
    request_timeout_ms: 300
"#;
}

// =============================================================================
// Engine Fixtures
// =============================================================================

/// Engine settings.
pub struct EngineFixtures;

impl EngineFixtures {
    /// Short deadlines for tests that wait on timeouts.
    pub fn fast() -> EngineConfig {
        EngineConfig::default()
            .with_request_timeout(Duration::from_millis(200))
            .with_change_of_state_poll(Duration::from_millis(50))
    }
}
