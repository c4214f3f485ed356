// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Configuration Integration Tests
//!
//! Connection strings, configuration files and the way both feed the
//! protocols and connections.
//!
//! ## Test Categories
//!
//! - `test_uri_*`: Connection string grammar
//! - `test_file_*`: Loading configuration documents
//! - `test_open_*`: Building protocols and connections from configuration

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use plcwire_ads::AdsProtocol;
use plcwire_canopen::CanOpenProtocol;
use plcwire_config::{
    ConfigError, ConfigFormat, ConfigLoader, ConnectionString, ParamValue, TransportKind,
};
use plcwire_conversation::Connection;
use plcwire_core::{ConnectionError, ProtocolKind, Transport};
use plcwire_tests::common::{init_test_logging, temp_test_dir};
use plcwire_tests::prelude::*;

// =============================================================================
// Connection Strings
// =============================================================================

#[test]
fn test_uri_fixtures_parse() {
    let ads = ConnectionString::parse(ConnectionFixtures::ADS).unwrap();
    assert_eq!(ads.protocol(), ProtocolKind::Ads);
    assert_eq!(ads.transport(), TransportKind::Tcp);
    assert_eq!(ads.host(), "10.0.0.5");
    assert_eq!(ads.param_str("target-ams-net-id"), Some("10.0.0.5.1.1"));
    assert_eq!(ads.param_u64("target-ams-port"), Some(851));

    let canopen = ConnectionString::parse(ConnectionFixtures::CANOPEN).unwrap();
    assert_eq!(canopen.transport(), TransportKind::SocketCan);
    assert_eq!(canopen.host(), "can0");
    assert_eq!(canopen.param("node-id"), Some(&ParamValue::UInt(1)));

    let opcua = ConnectionString::parse(ConnectionFixtures::OPCUA).unwrap();
    assert_eq!(opcua.port(), 12686);
    assert_eq!(opcua.path(), Some("milo"));
    assert_eq!(opcua.param_bool("discovery"), Some(true));
}

#[test]
fn test_uri_default_ports() {
    assert_eq!(ConnectionString::parse("opcua:tcp://plc").unwrap().port(), 4840);
    assert_eq!(ConnectionString::parse(ConnectionFixtures::ADS_DEFAULTS).unwrap().port(), 48898);
    assert_eq!(ConnectionString::parse("ads:tcp://plc:851").unwrap().port(), 851);
}

#[test]
fn test_uri_rejects_invalid() {
    for uri in ConnectionFixtures::invalid() {
        assert!(ConnectionString::parse(uri).is_err(), "'{}' should be rejected", uri);
    }
}

#[test]
fn test_uri_error_kinds() {
    assert!(matches!(
        ConnectionString::parse("modbus:tcp://h"),
        Err(ConnectionError::UnsupportedProtocol { ref protocol }) if protocol == "modbus"
    ));
    assert!(matches!(
        ConnectionString::parse("opcua:tcp://h?diskovery=true"),
        Err(ConnectionError::UnknownParameter { ref name, protocol: ProtocolKind::OpcUa }) if name == "diskovery"
    ));
    assert!(matches!(
        ConnectionString::parse("opcua:tcp://h?discovery=yes"),
        Err(ConnectionError::InvalidParameter { ref name, .. }) if name == "discovery"
    ));
    assert!(matches!(
        ConnectionString::parse("opcua:tcp://"),
        Err(ConnectionError::InvalidUri { .. })
    ));
}

#[test]
fn test_uri_parameters_belong_to_their_protocol() {
    // node-id is a CANopen parameter, not an ADS one
    assert!(matches!(
        ConnectionString::parse("ads:tcp://10.0.0.5?node-id=1"),
        Err(ConnectionError::UnknownParameter { protocol: ProtocolKind::Ads, .. })
    ));
    assert!(ConnectionString::parse("canopen:socketcan://can0?node-id=1").is_ok());
}

#[test]
fn test_uri_display_round_trip() {
    for uri in [
        ConnectionFixtures::ADS,
        ConnectionFixtures::ADS_DEFAULTS,
        ConnectionFixtures::CANOPEN,
        ConnectionFixtures::OPCUA,
        "opcua:tcp://plc:4841?security-policy=Basic256Sha256&message-security=Sign",
    ] {
        let parsed = ConnectionString::parse(uri).unwrap();
        assert_eq!(parsed.to_string(), uri);
        assert_eq!(parsed.to_string().parse::<ConnectionString>().unwrap(), parsed);
    }
}

// =============================================================================
// Configuration Files
// =============================================================================

fn assert_plant(config: &plcwire_config::PlcConfig) {
    assert_eq!(config.engine.request_timeout(), Duration::from_millis(1500));
    assert_eq!(config.engine.change_of_state_poll(), Duration::from_millis(200));
    assert_eq!(config.connections.len(), 2);

    let press = config.get_connection("press").unwrap();
    assert_eq!(press.connection_string().unwrap().protocol(), ProtocolKind::Ads);

    let conveyor = config.engine_for("conveyor").unwrap();
    assert_eq!(conveyor.request_timeout(), Duration::from_millis(300));
    assert_eq!(conveyor.change_of_state_poll(), Duration::from_millis(200));
    assert_eq!(config.engine_for("press").unwrap().request_timeout(), Duration::from_millis(1500));
    assert!(config.engine_for("boiler").is_none());
}

#[test]
fn test_file_toml() {
    let dir = temp_test_dir("config_toml");
    let path = dir.path().join("plant.toml");
    fs::write(&path, ConfigFixtures::TOML).unwrap();

    let config = ConfigLoader::new().with_env_vars(false).load(&path).unwrap();
    assert_plant(&config);
}

#[test]
fn test_file_yaml() {
    let dir = temp_test_dir("config_yaml");
    let path = dir.path().join("plant.yaml");
    fs::write(&path, ConfigFixtures::YAML).unwrap();

    let config = ConfigLoader::new().with_env_vars(false).load(&path).unwrap();
    assert_plant(&config);
}

#[test]
fn test_file_missing_and_unsupported() {
    let dir = temp_test_dir("config_errors");

    let err = ConfigLoader::new().load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }), "{:?}", err);

    let path = dir.path().join("plant.ini");
    fs::write(&path, "[engine]").unwrap();
    assert!(ConfigLoader::new().load(&path).is_err());
}

#[test]
fn test_file_invalid_connection_is_named() {
    let doc = r#"
[[connections]]
name = "legacy"
url = "modbus:tcp://10.0.0.9"
"#;
    let err = ConfigLoader::new()
        .with_env_vars(false)
        .load_from_str(doc, ConfigFormat::Toml)
        .unwrap_err();
    match err {
        ConfigError::InvalidConnection { name, source } => {
            assert_eq!(name, "legacy");
            assert!(matches!(source, ConnectionError::UnsupportedProtocol { .. }));
        }
        other => panic!("expected InvalidConnection, got {:?}", other),
    }
}

#[test]
fn test_file_duplicate_connection_names() {
    let doc = r#"
[[connections]]
name = "press"
url = "ads:tcp://10.0.0.5"

[[connections]]
name = "press"
url = "ads:tcp://10.0.0.6"
"#;
    let err = ConfigLoader::new()
        .with_env_vars(false)
        .load_from_str(doc, ConfigFormat::Toml)
        .unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateConnection { ref name } if name == "press"));
}

#[test]
fn test_file_environment_overrides_engine() {
    std::env::set_var("PLCWIRE_IT_CONFIG_REQUEST_TIMEOUT_MS", "750");
    std::env::set_var("PLCWIRE_IT_CONFIG_HOST", "10.0.0.77");

    let doc = r#"
[engine]
request_timeout_ms = 1500

[[connections]]
name = "press"
url = "ads:tcp://${PLCWIRE_IT_CONFIG_HOST}?target-ams-port=${PLCWIRE_IT_CONFIG_PORT:851}"
"#;
    let config = ConfigLoader::new()
        .with_env_prefix("PLCWIRE_IT_CONFIG")
        .load_from_str(doc, ConfigFormat::Toml)
        .unwrap();

    assert_eq!(config.engine.request_timeout(), Duration::from_millis(750));
    let uri = config.get_connection("press").unwrap().connection_string().unwrap();
    assert_eq!(uri.host(), "10.0.0.77");
    assert_eq!(uri.param_u64("target-ams-port"), Some(851));
}

// =============================================================================
// Opening Connections
// =============================================================================

#[test]
fn test_open_ads_route_from_uri() {
    let uri = ConnectionString::parse(ConnectionFixtures::ADS).unwrap();
    let protocol = AdsProtocol::from_connection(&uri).unwrap();
    assert_eq!(protocol.route().target_net_id.to_string(), "10.0.0.5.1.1");
    assert_eq!(protocol.route().target_port, 851);

    // the net ID follows the host when not given
    let uri = ConnectionString::parse(ConnectionFixtures::ADS_DEFAULTS).unwrap();
    let protocol = AdsProtocol::from_connection(&uri).unwrap();
    assert_eq!(protocol.route().target_net_id.to_string(), "10.0.0.5.1.1");
}

#[test]
fn test_open_canopen_default_node() {
    let uri = ConnectionString::parse(ConnectionFixtures::CANOPEN).unwrap();
    let protocol = CanOpenProtocol::from_connection(&uri).unwrap();
    assert_eq!(protocol.default_node(), Some(1));

    let uri = ConnectionString::parse(ConnectionFixtures::ADS).unwrap();
    assert!(CanOpenProtocol::from_connection(&uri).is_err());
}

#[tokio::test]
async fn test_open_uri_checks_protocol() {
    init_test_logging();
    let device = CanOpenDeviceBuilder::new()
        .object(AddressFixtures::SDO_DEVICE_TYPE, Value::UInt32(0x191))
        .build();

    let transport: Arc<dyn Transport> = MockTransport::new(Arc::clone(&device));
    let err = Connection::open_uri(
        ConnectionFixtures::ADS,
        CanOpenProtocol::new(),
        transport,
        EngineFixtures::fast(),
    )
    .err()
    .expect("protocol mismatch");
    assert!(matches!(err, ConnectionError::InvalidUri { .. }), "{:?}", err);

    let transport = MockTransport::new(device);
    let link: Arc<dyn Transport> = transport.clone();
    let connection = Connection::open_uri(
        ConnectionFixtures::CANOPEN,
        CanOpenProtocol::new(),
        link,
        EngineFixtures::fast(),
    )
    .unwrap();

    let mut builder = connection.read_request_builder();
    builder.add_item("type", AddressFixtures::SDO_DEVICE_TYPE);
    let response = builder.build().unwrap().execute().await.unwrap();
    response.assert_value("type", &Value::UInt32(0x191));
    connection.close().await;
    assert!(transport.is_closed());
}

#[tokio::test]
async fn test_open_with_engine_from_config() {
    init_test_logging();
    let config = ConfigLoader::new()
        .with_env_vars(false)
        .load_from_str(ConfigFixtures::TOML, ConfigFormat::Toml)
        .unwrap();
    let engine = config.engine_for("conveyor").unwrap();

    let device = CanOpenDeviceBuilder::new().build();
    let transport: Arc<dyn Transport> = MockTransport::new(device);
    let connection = Connection::open(CanOpenProtocol::new(), transport, engine);
    assert_eq!(connection.engine().config().request_timeout(), Duration::from_millis(300));
    connection.close().await;
}
