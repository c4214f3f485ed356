// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Field address parsing.
//!
//! This module provides parsers for converting address strings into typed
//! [`FieldAddress`] values. Parsing is pure and never touches the network.
//!
//! # Supported Address Formats
//!
//! ## CANopen
//!
//! - `NMT` - NMT state of any node (wildcard)
//! - `NMT:5` - NMT state of node 5
//! - `SDO:5:0x1018/1:UNSIGNED32` - object 0x1018 sub-index 1 of node 5
//! - `SDO:5:4096/0` - type defaults to UNSIGNED32
//!
//! ## OPC UA
//!
//! - `ns=2;s=HelloWorld/ScalarTypes/Boolean` - String node ID
//! - `ns=2;i=2258` - Numeric node ID
//! - `i=2258` - Numeric node ID with namespace 0
//! - `ns=1;g=09087e75-8e5e-499b-954f-f2a9603db28a` - GUID node ID
//!
//! ## ADS
//!
//! - `0x4020/0x0:INT` - index group 0x4020, offset 0, one INT
//! - `16416/4:REAL[8]` - eight REALs
//! - `MAIN.counter:DINT` - symbolic address

use crate::error::{ConfigError, ConfigResult};
use plcwire_core::address::{
    AdsAddress, AdsDataType, AdsTarget, CanOpenAddress, CanOpenDataType, FieldAddress,
    NodeIdentifier, OpcUaNodeId, SdoAddress, CANOPEN_MAX_NODE_ID,
};
use plcwire_core::error::{BuildError, BuildResult};
use plcwire_core::request::AddressResolver;
use plcwire_core::types::ProtocolKind;

// =============================================================================
// Address Parser Trait
// =============================================================================

/// A trait for parsing protocol-specific addresses.
pub trait AddressParser {
    /// Parses a string address into a typed [`FieldAddress`].
    fn parse(&self, address: &str) -> ConfigResult<FieldAddress>;

    /// Returns the protocol this parser handles.
    fn protocol(&self) -> ProtocolKind;
}

// =============================================================================
// Unified Parser
// =============================================================================

/// A unified address parser that can parse any supported protocol.
///
/// The parser auto-detects the protocol from the address format, or can be
/// restricted to a single protocol with [`UnifiedAddressParser::for_protocol`].
#[derive(Debug, Clone, Default)]
pub struct UnifiedAddressParser {
    /// Forced protocol, if any.
    protocol: Option<ProtocolKind>,
}

impl UnifiedAddressParser {
    /// Creates a new auto-detecting parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser that only accepts one protocol's grammar.
    pub fn for_protocol(protocol: ProtocolKind) -> Self {
        Self {
            protocol: Some(protocol),
        }
    }

    /// Parses an address string.
    ///
    /// # Examples
    ///
    /// ```
    /// use plcwire_config::parser::UnifiedAddressParser;
    /// use plcwire_core::types::ProtocolKind;
    ///
    /// let parser = UnifiedAddressParser::new();
    ///
    /// let addr = parser.parse("NMT").unwrap();
    /// assert!(addr.is_wildcard());
    ///
    /// let addr = parser.parse("ns=2;s=Temperature").unwrap();
    /// assert_eq!(addr.protocol(), ProtocolKind::OpcUa);
    ///
    /// let addr = parser.parse("MAIN.counter:DINT").unwrap();
    /// assert_eq!(addr.protocol(), ProtocolKind::Ads);
    /// ```
    pub fn parse(&self, address: &str) -> ConfigResult<FieldAddress> {
        let address = address.trim();

        if address.is_empty() {
            return Err(ConfigError::invalid_address(address, "address cannot be empty"));
        }

        if let Some(protocol) = self.protocol {
            return self.parse_with_protocol(address, protocol);
        }

        match detect_protocol(address) {
            Some(protocol) => self.parse_with_protocol(address, protocol),
            None => Err(ConfigError::invalid_address(
                address,
                "unable to detect protocol from address format",
            )),
        }
    }

    /// Parses an address with an explicit protocol.
    pub fn parse_with_protocol(
        &self,
        address: &str,
        protocol: ProtocolKind,
    ) -> ConfigResult<FieldAddress> {
        match protocol {
            ProtocolKind::CanOpen => CanOpenAddressParser::new().parse(address),
            ProtocolKind::OpcUa => OpcUaAddressParser::new().parse(address),
            ProtocolKind::Ads => AdsAddressParser::new().parse(address),
            ProtocolKind::Unknown => Err(ConfigError::invalid_address(
                address,
                "no address grammar for unknown protocol",
            )),
        }
    }
}

impl AddressResolver for UnifiedAddressParser {
    fn resolve(&self, address: &str) -> BuildResult<FieldAddress> {
        if let Some(expected) = self.protocol {
            match detect_protocol(address.trim()) {
                Some(actual) if actual != expected => {
                    return Err(BuildError::WrongProtocol {
                        address: address.to_string(),
                        expected,
                        actual,
                    })
                }
                _ => {}
            }
        }
        self.parse(address).map_err(Into::into)
    }

    fn protocol(&self) -> Option<ProtocolKind> {
        self.protocol
    }
}

/// Detects the protocol from the address format.
fn detect_protocol(address: &str) -> Option<ProtocolKind> {
    let upper = address.to_ascii_uppercase();

    if upper == "NMT" || upper.starts_with("NMT:") || upper.starts_with("SDO:") {
        return Some(ProtocolKind::CanOpen);
    }

    if address.starts_with("ns=")
        || address.starts_with("i=")
        || address.starts_with("s=")
        || address.starts_with("g=")
    {
        return Some(ProtocolKind::OpcUa);
    }

    if let Some((_, type_part)) = address.rsplit_once(':') {
        let type_name = type_part.split('[').next().unwrap_or(type_part);
        if AdsDataType::from_name(type_name).is_some() {
            return Some(ProtocolKind::Ads);
        }
    }

    None
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
fn parse_number(full_address: &str, what: &str, s: &str) -> ConfigResult<u32> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|_| {
        ConfigError::invalid_address(
            full_address,
            format!("invalid {} '{}'; expected decimal or 0x-prefixed hex", what, s),
        )
    })
}

fn narrow<T: TryFrom<u32>>(full_address: &str, what: &str, value: u32) -> ConfigResult<T> {
    T::try_from(value).map_err(|_| {
        ConfigError::invalid_address(full_address, format!("{} {} is out of range", what, value))
    })
}

// =============================================================================
// CANopen Address Parser
// =============================================================================

/// Parser for CANopen addresses.
///
/// # Format
///
/// ```text
/// NMT[:<node>]
/// SDO:<node>:<index>/<subindex>[:<type>]
///
/// node: 0-127 for NMT (0 or omitted = any node), 1-127 for SDO
/// index: 0-0xFFFF, subindex: 0-0xFF (decimal or 0x hex)
/// type: BOOLEAN, INTEGER8/16/32, UNSIGNED8/16/32, REAL32, VISIBLE_STRING
/// ```
#[derive(Debug, Clone, Default)]
pub struct CanOpenAddressParser;

impl CanOpenAddressParser {
    /// Creates a new CANopen address parser.
    pub fn new() -> Self {
        Self
    }

    /// Parses a CANopen address string.
    pub fn parse_canopen(&self, address: &str) -> ConfigResult<CanOpenAddress> {
        let address = address.trim();
        let parts: Vec<&str> = address.split(':').collect();

        match parts[0].to_ascii_uppercase().as_str() {
            "NMT" => self.parse_nmt(address, &parts[1..]),
            "SDO" => self.parse_sdo(address, &parts[1..]),
            other => Err(ConfigError::invalid_address(
                address,
                format!("unknown CANopen service '{}'; expected NMT or SDO", other),
            )),
        }
    }

    fn parse_nmt(&self, address: &str, rest: &[&str]) -> ConfigResult<CanOpenAddress> {
        let node_id = match rest {
            [] => 0,
            [node] => self.parse_node_id(address, node)?,
            _ => {
                return Err(ConfigError::invalid_address(
                    address,
                    "expected format: NMT[:<node>]",
                ))
            }
        };
        Ok(CanOpenAddress::Nmt { node_id })
    }

    fn parse_sdo(&self, address: &str, rest: &[&str]) -> ConfigResult<CanOpenAddress> {
        let (node, object, data_type) = match rest {
            [node, object] => (node, object, CanOpenDataType::default()),
            [node, object, type_name] => {
                let data_type = CanOpenDataType::from_name(type_name).ok_or_else(|| {
                    ConfigError::invalid_address(
                        address,
                        format!("unknown CANopen data type '{}'", type_name),
                    )
                })?;
                (node, object, data_type)
            }
            _ => {
                return Err(ConfigError::invalid_address(
                    address,
                    "expected format: SDO:<node>:<index>/<subindex>[:<type>]",
                ))
            }
        };

        let node_id = self.parse_node_id(address, node)?;
        if node_id == 0 {
            return Err(ConfigError::invalid_address(
                address,
                "SDO addresses need a concrete node id (1-127)",
            ));
        }

        let (index, subindex) = object.split_once('/').ok_or_else(|| {
            ConfigError::invalid_address(address, "expected <index>/<subindex>")
        })?;
        let index = narrow(address, "index", parse_number(address, "index", index)?)?;
        let subindex = narrow(address, "sub-index", parse_number(address, "sub-index", subindex)?)?;

        Ok(CanOpenAddress::Sdo(SdoAddress {
            node_id,
            index,
            subindex,
            data_type,
        }))
    }

    fn parse_node_id(&self, address: &str, node: &str) -> ConfigResult<u8> {
        let node_id: u8 = node.trim().parse().map_err(|_| {
            ConfigError::invalid_address(address, format!("invalid node id '{}'", node))
        })?;
        if node_id > CANOPEN_MAX_NODE_ID {
            return Err(ConfigError::invalid_address(
                address,
                format!("node id {} is out of range; expected 0-127", node_id),
            ));
        }
        Ok(node_id)
    }
}

impl AddressParser for CanOpenAddressParser {
    fn parse(&self, address: &str) -> ConfigResult<FieldAddress> {
        Ok(FieldAddress::CanOpen(self.parse_canopen(address)?))
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::CanOpen
    }
}

// =============================================================================
// OPC UA Address Parser
// =============================================================================

/// Parser for OPC UA node IDs.
///
/// # Format
///
/// ```text
/// [ns=<namespace>;]<type>=<value>
///
/// type: i (numeric), s (string), g (guid)
/// ```
#[derive(Debug, Clone, Default)]
pub struct OpcUaAddressParser;

impl OpcUaAddressParser {
    /// Creates a new OPC UA address parser.
    pub fn new() -> Self {
        Self
    }

    /// Parses an OPC UA node ID string.
    pub fn parse_opcua(&self, address: &str) -> ConfigResult<OpcUaNodeId> {
        let address = address.trim();

        let mut namespace_index: u16 = 0;
        let mut identifier_part = address;

        if let Some(rest) = address.strip_prefix("ns=") {
            let (ns_str, identifier) = rest.split_once(';').ok_or_else(|| {
                ConfigError::invalid_address(
                    address,
                    "expected format: ns=<namespace>;<identifier_type>=<value>",
                )
            })?;

            namespace_index = ns_str.parse().map_err(|_| {
                ConfigError::invalid_address(
                    address,
                    format!("invalid namespace '{}'; expected 0-65535", ns_str),
                )
            })?;

            identifier_part = identifier;
        }

        let identifier = self.parse_identifier(address, identifier_part)?;

        Ok(OpcUaNodeId {
            namespace_index,
            identifier,
        })
    }

    fn parse_identifier(&self, full_address: &str, part: &str) -> ConfigResult<NodeIdentifier> {
        if let Some(value_str) = part.strip_prefix("i=") {
            let value: u32 = value_str.parse().map_err(|_| {
                ConfigError::invalid_address(
                    full_address,
                    format!("invalid numeric identifier '{}'; expected u32", value_str),
                )
            })?;
            Ok(NodeIdentifier::Numeric(value))
        } else if let Some(value) = part.strip_prefix("s=") {
            if value.is_empty() {
                return Err(ConfigError::invalid_address(
                    full_address,
                    "string identifier cannot be empty",
                ));
            }
            Ok(NodeIdentifier::String(value.to_string()))
        } else if let Some(value) = part.strip_prefix("g=") {
            if value.len() != 36 || value.chars().filter(|&c| c == '-').count() != 4 {
                return Err(ConfigError::invalid_address(
                    full_address,
                    format!(
                        "invalid GUID format '{}'; expected xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx",
                        value
                    ),
                ));
            }
            Ok(NodeIdentifier::Guid(value.to_ascii_lowercase()))
        } else {
            Err(ConfigError::invalid_address(
                full_address,
                "unknown identifier type; expected i=, s= or g=",
            ))
        }
    }
}

impl AddressParser for OpcUaAddressParser {
    fn parse(&self, address: &str) -> ConfigResult<FieldAddress> {
        Ok(FieldAddress::OpcUa(self.parse_opcua(address)?))
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::OpcUa
    }
}

// =============================================================================
// ADS Address Parser
// =============================================================================

/// Parser for ADS addresses.
///
/// # Format
///
/// ```text
/// <index_group>/<index_offset>:<type>[<count>]
/// <symbol>:<type>[<count>]
///
/// numbers: decimal or 0x hex (u32)
/// type: BOOL, BYTE, WORD, DWORD, SINT, USINT, INT, UINT, DINT, UDINT,
///       LINT, ULINT, REAL, LREAL
/// count: >= 1, defaults to 1
/// ```
#[derive(Debug, Clone, Default)]
pub struct AdsAddressParser;

impl AdsAddressParser {
    /// Creates a new ADS address parser.
    pub fn new() -> Self {
        Self
    }

    /// Parses an ADS address string.
    pub fn parse_ads(&self, address: &str) -> ConfigResult<AdsAddress> {
        let address = address.trim();

        let (target, type_part) = address.rsplit_once(':').ok_or_else(|| {
            ConfigError::invalid_address(address, "expected format: <target>:<type>[<count>]")
        })?;

        let (type_name, count) = match type_part.split_once('[') {
            Some((name, count)) => {
                let count = count.strip_suffix(']').ok_or_else(|| {
                    ConfigError::invalid_address(address, "unterminated element count")
                })?;
                let count: u32 = count.parse().map_err(|_| {
                    ConfigError::invalid_address(address, format!("invalid element count '{}'", count))
                })?;
                (name, count)
            }
            None => (type_part, 1),
        };

        if count == 0 {
            return Err(ConfigError::invalid_address(address, "element count must be at least 1"));
        }

        let data_type = AdsDataType::from_name(type_name).ok_or_else(|| {
            ConfigError::invalid_address(address, format!("unknown ADS data type '{}'", type_name))
        })?;

        let target = self.parse_target(address, target)?;

        Ok(AdsAddress {
            target,
            data_type,
            count,
        })
    }

    fn parse_target(&self, address: &str, target: &str) -> ConfigResult<AdsTarget> {
        if let Some((group, offset)) = target.split_once('/') {
            return Ok(AdsTarget::Direct {
                index_group: parse_number(address, "index group", group)?,
                index_offset: parse_number(address, "index offset", offset)?,
            });
        }

        let valid_symbol = !target.is_empty()
            && target
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'));
        if !valid_symbol {
            return Err(ConfigError::invalid_address(
                address,
                format!("invalid symbol '{}'", target),
            ));
        }
        Ok(AdsTarget::Symbolic(target.to_string()))
    }
}

impl AddressParser for AdsAddressParser {
    fn parse(&self, address: &str) -> ConfigResult<FieldAddress> {
        Ok(FieldAddress::Ads(self.parse_ads(address)?))
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Ads
    }
}

// =============================================================================
// Tests
// =============================================================================
