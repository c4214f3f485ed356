// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Address Grammar Integration Tests
//!
//! Parsing, printing and matching of field addresses across the CANopen,
//! OPC UA and ADS grammars, and their enforcement by request builders.
//!
//! ## Test Categories
//!
//! - `test_grammar_*`: Accepted and rejected forms
//! - `test_roundtrip_*`: Printing then parsing yields the same address
//! - `test_wildcard_*`: NMT wildcard coverage
//! - `test_builder_*`: Addresses checked against the connection's protocol

use plcwire_config::{
    AdsAddressParser, AddressParser, CanOpenAddressParser, OpcUaAddressParser,
    UnifiedAddressParser,
};
use plcwire_core::{
    AdsAddress, AdsDataType, AdsTarget, BuildError, CanOpenAddress, CanOpenDataType,
    FieldAddress, NodeIdentifier, ProtocolKind,
};
use plcwire_tests::prelude::*;

fn parse(address: &str) -> FieldAddress {
    UnifiedAddressParser::new()
        .parse(address)
        .unwrap_or_else(|e| panic!("'{}' should parse: {}", address, e))
}

// =============================================================================
// Grammar
// =============================================================================

#[test]
fn test_grammar_valid_addresses() {
    for address in AddressFixtures::valid_addresses() {
        let parsed = parse(address);
        assert_ne!(parsed.protocol(), ProtocolKind::Unknown, "{}", address);
    }
}

#[test]
fn test_grammar_invalid_addresses() {
    let parser = UnifiedAddressParser::new();
    for (address, reason) in AddressFixtures::invalid_addresses() {
        assert!(
            parser.parse(address).is_err(),
            "'{}' should be rejected ({})",
            address,
            reason
        );
    }
}

#[test]
fn test_grammar_protocol_detection() {
    assert_eq!(parse("NMT").protocol(), ProtocolKind::CanOpen);
    assert_eq!(parse("sdo:4:0x6041/0x0").protocol(), ProtocolKind::CanOpen);
    assert_eq!(parse("ns=2;s=Line1.Speed").protocol(), ProtocolKind::OpcUa);
    assert_eq!(parse("i=2258").protocol(), ProtocolKind::OpcUa);
    assert_eq!(parse("0x4020/0x0:DINT").protocol(), ProtocolKind::Ads);
    assert_eq!(parse("MAIN.counter:UDINT").protocol(), ProtocolKind::Ads);
}

#[test]
fn test_grammar_canopen_fields() {
    let parser = CanOpenAddressParser::new();

    assert_eq!(parser.parse_canopen("NMT").unwrap(), CanOpenAddress::nmt(0));
    assert_eq!(parser.parse_canopen("nmt:12").unwrap(), CanOpenAddress::nmt(12));

    let sdo = parser.parse_canopen("SDO:3:0x1018/0x1:UNSIGNED32").unwrap();
    assert_eq!(
        sdo,
        CanOpenAddress::sdo(3, 0x1018, 1, CanOpenDataType::Unsigned32)
    );
    assert_eq!(sdo.node_id(), 3);

    // decimal and hex are interchangeable
    assert_eq!(
        parser.parse_canopen("SDO:3:4120/1:UNSIGNED32").unwrap(),
        sdo
    );

    // the data type defaults when omitted
    let untyped = parser.parse_canopen("SDO:3:0x1018/0x1").unwrap();
    assert_eq!(
        untyped,
        CanOpenAddress::sdo(3, 0x1018, 1, CanOpenDataType::default())
    );
}

#[test]
fn test_grammar_opcua_fields() {
    let parser = OpcUaAddressParser::new();

    let node = parser.parse_opcua("i=85").unwrap();
    assert_eq!(node.namespace_index, 0);
    assert_eq!(node.identifier, NodeIdentifier::Numeric(85));

    let node = parser.parse_opcua("ns=2;s=Machine.Speed").unwrap();
    assert_eq!(node.namespace_index, 2);
    assert_eq!(node.identifier, NodeIdentifier::String("Machine.Speed".into()));

    let node = parser
        .parse_opcua("ns=3;g=72962B91-FA75-4AE6-8D28-B404DC7DAF63")
        .unwrap();
    assert_eq!(
        node.identifier,
        NodeIdentifier::Guid("72962b91-fa75-4ae6-8d28-b404dc7daf63".into())
    );

    for bad in ["ns=2", "ns=x;i=1", "ns=1;i=-4", "s=", "g=1234", "x=5"] {
        assert!(parser.parse_opcua(bad).is_err(), "'{}' should be rejected", bad);
    }
}

#[test]
fn test_grammar_ads_fields() {
    let parser = AdsAddressParser::new();

    let direct = parser.parse_ads("0xF030/0x1F:LREAL[4]").unwrap();
    assert_eq!(
        direct,
        AdsAddress::direct(0xF030, 0x1F, AdsDataType::Lreal).with_count(4)
    );
    assert_eq!(direct.byte_len(), 32);

    let symbolic = parser.parse_ads("GVL.flags[2]:BOOL[8]").unwrap();
    assert_eq!(symbolic.target, AdsTarget::Symbolic("GVL.flags[2]".into()));
    assert_eq!(symbolic.count, 8);
    assert_eq!(symbolic.byte_len(), 8);

    for bad in ["0x4020/0x0", "0x4020/0x0:DINT[", "0x4020/zz:DINT", ":DINT"] {
        assert!(parser.parse_ads(bad).is_err(), "'{}' should be rejected", bad);
    }
}

#[test]
fn test_grammar_protocol_parsers_report_their_protocol() {
    assert_eq!(CanOpenAddressParser::new().protocol(), ProtocolKind::CanOpen);
    assert_eq!(OpcUaAddressParser::new().protocol(), ProtocolKind::OpcUa);
    assert_eq!(AdsAddressParser::new().protocol(), ProtocolKind::Ads);
}

#[test]
fn test_grammar_forced_protocol() {
    let ads = UnifiedAddressParser::for_protocol(ProtocolKind::Ads);
    assert!(ads.parse("MAIN.counter:DINT").is_ok());
    assert!(ads.parse("NMT").is_err());

    let canopen = UnifiedAddressParser::for_protocol(ProtocolKind::CanOpen);
    assert!(canopen.parse("NMT:4").is_ok());
    assert!(canopen.parse("ns=2;i=1").is_err());
}

// =============================================================================
// Round Trip
// =============================================================================

#[test]
fn test_roundtrip_every_valid_address() {
    for address in AddressFixtures::valid_addresses() {
        let parsed = parse(address);
        let printed = parsed.to_string();
        assert_eq!(parse(&printed), parsed, "'{}' printed as '{}'", address, printed);
    }
}

#[test]
fn test_roundtrip_canonical_forms() {
    for (input, canonical) in [
        ("NMT:0", "NMT"),
        ("nmt:7", "NMT:7"),
        ("i=85", "ns=0;i=85"),
        ("16416/4:INT", "0x4020/0x4:INT"),
        ("MAIN.counter:UDINT[1]", "MAIN.counter:UDINT"),
    ] {
        assert_eq!(parse(input).to_string(), canonical, "canonical form of '{}'", input);
    }
}

#[test]
fn test_roundtrip_constructed_addresses() {
    let addresses: Vec<FieldAddress> = vec![
        CanOpenAddress::nmt(0).into(),
        CanOpenAddress::nmt(127).into(),
        CanOpenAddress::sdo(1, 0x1000, 0, CanOpenDataType::Unsigned32).into(),
        AdsAddress::direct(0x4020, 0x10, AdsDataType::Real).with_count(3).into(),
        AdsAddress::symbolic("MAIN.temperature", AdsDataType::Real).into(),
    ];
    for address in addresses {
        assert_eq!(parse(&address.to_string()), address);
    }
}

// =============================================================================
// Wildcards
// =============================================================================

#[test]
fn test_wildcard_nmt_covers_every_node() {
    let any = parse(AddressFixtures::NMT_ANY);
    assert!(any.is_wildcard());
    for node in [1u8, 5, 127] {
        assert!(any.matches(&CanOpenAddress::nmt(node).into()));
    }
}

#[test]
fn test_wildcard_node_address_is_exact() {
    let node1 = parse(AddressFixtures::NMT_NODE_1);
    assert!(!node1.is_wildcard());
    assert!(node1.matches(&CanOpenAddress::nmt(1).into()));
    assert!(!node1.matches(&CanOpenAddress::nmt(2).into()));
}

#[test]
fn test_wildcard_does_not_cross_services() {
    let any = parse(AddressFixtures::NMT_ANY);
    assert!(!any.matches(&parse(AddressFixtures::SDO_DEVICE_TYPE)));
    assert!(!parse(AddressFixtures::SDO_DEVICE_TYPE).is_wildcard());
    assert!(!parse(AddressFixtures::ADS_COUNTER).is_wildcard());
}

// =============================================================================
// Builders
// =============================================================================

#[tokio::test]
async fn test_builder_rejects_foreign_address() {
    let harness = TestHarness::canopen(CanOpenDeviceBuilder::new().build());

    let mut builder = harness.connection.read_request_builder();
    builder
        .add_item("type", AddressFixtures::SDO_DEVICE_TYPE)
        .add_item("counter", AddressFixtures::ADS_COUNTER);
    match builder.build() {
        Err(BuildError::WrongProtocol {
            address,
            expected,
            actual,
        }) => {
            assert_eq!(address, AddressFixtures::ADS_COUNTER);
            assert_eq!(expected, ProtocolKind::CanOpen);
            assert_eq!(actual, ProtocolKind::Ads);
        }
        other => panic!("expected WrongProtocol, got {:?}", other),
    }
}

#[tokio::test]
async fn test_builder_rejects_malformed_address() {
    let harness = TestHarness::ads(AdsDeviceBuilder::new().build());

    let mut builder = harness.connection.write_request_builder();
    builder.add_item("speed", "0x4020/0x4:INT[0]", 5i16);
    let err = builder.build().unwrap_err();
    assert!(matches!(err, BuildError::InvalidAddress { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_builder_accepts_typed_address() {
    let device = AdsDeviceBuilder::new()
        .variable(AddressFixtures::ADS_SPEED, 1200i16)
        .build();
    let harness = TestHarness::ads(device);

    let mut builder = harness.connection.read_request_builder();
    builder.add_item(
        "speed",
        FieldAddress::from(AdsAddress::direct(0x4020, 4, AdsDataType::Int)),
    );
    let response = builder.build().unwrap().execute().await.unwrap();
    response.assert_value("speed", &Value::Int16(1200));
}
