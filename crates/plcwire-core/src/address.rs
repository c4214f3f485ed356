// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol-specific field addresses.
//!
//! A [`FieldAddress`] is the immutable, value-equal result of parsing an
//! address string against one protocol's grammar. Parsing itself lives in
//! `plcwire-config`; this module only defines the address values, their
//! canonical string form and wildcard matching.
//!
//! # Supported Protocols
//!
//! - **CANopen**: `NMT`, `NMT:<node>` and `SDO:<node>:<index>/<subindex>:<type>`
//! - **OPC UA**: `ns=<n>;s=<id>`, `ns=<n>;i=<num>`, `ns=<n>;g=<guid>`
//! - **ADS**: `<group>/<offset>:<type>[<count>]` or `<symbol>:<type>[<count>]`
//!
//! # Examples
//!
//! ```
//! use plcwire_core::address::{CanOpenAddress, FieldAddress};
//!
//! let any_node = FieldAddress::CanOpen(CanOpenAddress::nmt(0));
//! let node_5 = FieldAddress::CanOpen(CanOpenAddress::nmt(5));
//!
//! assert!(any_node.is_wildcard());
//! assert!(any_node.matches(&node_5));
//! assert!(!node_5.matches(&any_node));
//! assert_eq!(any_node.to_string(), "NMT");
//! ```

use crate::types::ProtocolKind;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// FieldAddress
// =============================================================================

/// A parsed, protocol-specific address of a PLC field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "address")]
pub enum FieldAddress {
    /// CANopen NMT or SDO address
    CanOpen(CanOpenAddress),

    /// OPC UA node ID
    OpcUa(OpcUaNodeId),

    /// ADS index group/offset or symbol
    Ads(AdsAddress),
}

impl FieldAddress {
    /// Returns the protocol this address belongs to.
    pub fn protocol(&self) -> ProtocolKind {
        match self {
            FieldAddress::CanOpen(_) => ProtocolKind::CanOpen,
            FieldAddress::OpcUa(_) => ProtocolKind::OpcUa,
            FieldAddress::Ads(_) => ProtocolKind::Ads,
        }
    }

    /// Returns `true` if this address matches any node of its kind.
    pub fn is_wildcard(&self) -> bool {
        match self {
            FieldAddress::CanOpen(addr) => addr.is_wildcard(),
            FieldAddress::OpcUa(_) | FieldAddress::Ads(_) => false,
        }
    }

    /// Returns `true` if `other` is covered by this address.
    ///
    /// Concrete addresses match only themselves. A wildcard matches every
    /// concrete address of the same kind.
    pub fn matches(&self, other: &FieldAddress) -> bool {
        match (self, other) {
            (FieldAddress::CanOpen(a), FieldAddress::CanOpen(b)) => a.matches(b),
            _ => self == other,
        }
    }

    /// Returns the CANopen address, if any.
    pub fn as_canopen(&self) -> Option<&CanOpenAddress> {
        match self {
            FieldAddress::CanOpen(addr) => Some(addr),
            _ => None,
        }
    }

    /// Returns the OPC UA node ID, if any.
    pub fn as_opcua(&self) -> Option<&OpcUaNodeId> {
        match self {
            FieldAddress::OpcUa(addr) => Some(addr),
            _ => None,
        }
    }

    /// Returns the ADS address, if any.
    pub fn as_ads(&self) -> Option<&AdsAddress> {
        match self {
            FieldAddress::Ads(addr) => Some(addr),
            _ => None,
        }
    }
}

impl fmt::Display for FieldAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldAddress::CanOpen(addr) => write!(f, "{}", addr),
            FieldAddress::OpcUa(addr) => write!(f, "{}", addr),
            FieldAddress::Ads(addr) => write!(f, "{}", addr),
        }
    }
}

impl From<CanOpenAddress> for FieldAddress {
    fn from(addr: CanOpenAddress) -> Self {
        FieldAddress::CanOpen(addr)
    }
}

impl From<OpcUaNodeId> for FieldAddress {
    fn from(addr: OpcUaNodeId) -> Self {
        FieldAddress::OpcUa(addr)
    }
}

impl From<AdsAddress> for FieldAddress {
    fn from(addr: AdsAddress) -> Self {
        FieldAddress::Ads(addr)
    }
}

// =============================================================================
// CANopen
// =============================================================================

/// Highest valid CANopen node identifier.
pub const CANOPEN_MAX_NODE_ID: u8 = 127;

/// A CANopen field address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum CanOpenAddress {
    /// Network management state of a node. Node 0 means any node.
    Nmt {
        /// Node identifier, 0 for wildcard
        node_id: u8,
    },

    /// Object dictionary entry accessed through SDO.
    Sdo(SdoAddress),
}

impl CanOpenAddress {
    /// Creates an NMT address. `0` is the wildcard.
    #[inline]
    pub fn nmt(node_id: u8) -> Self {
        CanOpenAddress::Nmt { node_id }
    }

    /// Creates an SDO address.
    pub fn sdo(node_id: u8, index: u16, subindex: u8, data_type: CanOpenDataType) -> Self {
        CanOpenAddress::Sdo(SdoAddress {
            node_id,
            index,
            subindex,
            data_type,
        })
    }

    /// Returns the node identifier.
    pub fn node_id(&self) -> u8 {
        match self {
            CanOpenAddress::Nmt { node_id } => *node_id,
            CanOpenAddress::Sdo(sdo) => sdo.node_id,
        }
    }

    /// Returns `true` for the "any node" NMT address.
    #[inline]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, CanOpenAddress::Nmt { node_id: 0 })
    }

    /// Wildcard-aware match against a concrete address.
    pub fn matches(&self, other: &CanOpenAddress) -> bool {
        match (self, other) {
            (CanOpenAddress::Nmt { node_id: 0 }, CanOpenAddress::Nmt { .. }) => true,
            _ => self == other,
        }
    }
}

impl fmt::Display for CanOpenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanOpenAddress::Nmt { node_id: 0 } => write!(f, "NMT"),
            CanOpenAddress::Nmt { node_id } => write!(f, "NMT:{}", node_id),
            CanOpenAddress::Sdo(sdo) => write!(f, "{}", sdo),
        }
    }
}

/// Object dictionary coordinates of an SDO field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SdoAddress {
    /// Node identifier (1..=127)
    pub node_id: u8,
    /// Object dictionary index
    pub index: u16,
    /// Object dictionary sub-index
    pub subindex: u8,
    /// Declared data type of the entry
    pub data_type: CanOpenDataType,
}

impl fmt::Display for SdoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SDO:{}:0x{:04X}/0x{:X}:{}",
            self.node_id, self.index, self.subindex, self.data_type
        )
    }
}

/// CANopen object dictionary data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanOpenDataType {
    /// BOOLEAN
    Boolean,
    /// INTEGER8
    Integer8,
    /// INTEGER16
    Integer16,
    /// INTEGER32
    Integer32,
    /// UNSIGNED8
    Unsigned8,
    /// UNSIGNED16
    Unsigned16,
    /// UNSIGNED32
    #[default]
    Unsigned32,
    /// REAL32
    Real32,
    /// VISIBLE_STRING
    VisibleString,
}

impl CanOpenDataType {
    /// All known data types.
    pub const ALL: [CanOpenDataType; 9] = [
        CanOpenDataType::Boolean,
        CanOpenDataType::Integer8,
        CanOpenDataType::Integer16,
        CanOpenDataType::Integer32,
        CanOpenDataType::Unsigned8,
        CanOpenDataType::Unsigned16,
        CanOpenDataType::Unsigned32,
        CanOpenDataType::Real32,
        CanOpenDataType::VisibleString,
    ];

    /// Returns the canonical type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CanOpenDataType::Boolean => "BOOLEAN",
            CanOpenDataType::Integer8 => "INTEGER8",
            CanOpenDataType::Integer16 => "INTEGER16",
            CanOpenDataType::Integer32 => "INTEGER32",
            CanOpenDataType::Unsigned8 => "UNSIGNED8",
            CanOpenDataType::Unsigned16 => "UNSIGNED16",
            CanOpenDataType::Unsigned32 => "UNSIGNED32",
            CanOpenDataType::Real32 => "REAL32",
            CanOpenDataType::VisibleString => "VISIBLE_STRING",
        }
    }

    /// Looks a type up by its canonical name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
    }

    /// Encoded size in bytes, `None` for variable-length types.
    pub fn size(&self) -> Option<usize> {
        match self {
            CanOpenDataType::Boolean | CanOpenDataType::Integer8 | CanOpenDataType::Unsigned8 => {
                Some(1)
            }
            CanOpenDataType::Integer16 | CanOpenDataType::Unsigned16 => Some(2),
            CanOpenDataType::Integer32 | CanOpenDataType::Unsigned32 | CanOpenDataType::Real32 => {
                Some(4)
            }
            CanOpenDataType::VisibleString => None,
        }
    }
}

impl fmt::Display for CanOpenDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// OPC UA
// =============================================================================

/// An OPC UA node ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpcUaNodeId {
    /// Namespace index
    pub namespace_index: u16,
    /// Node identifier
    pub identifier: NodeIdentifier,
}

impl OpcUaNodeId {
    /// Creates a numeric node ID.
    pub fn numeric(namespace_index: u16, id: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(id),
        }
    }

    /// Creates a string node ID.
    pub fn string(namespace_index: u16, id: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(id.into()),
        }
    }
}

impl fmt::Display for OpcUaNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};{}", self.namespace_index, self.identifier)
    }
}

/// OPC UA node identifier types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier
    Numeric(u32),

    /// String identifier
    String(String),

    /// GUID identifier
    Guid(String),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeIdentifier::Numeric(id) => write!(f, "i={}", id),
            NodeIdentifier::String(id) => write!(f, "s={}", id),
            NodeIdentifier::Guid(id) => write!(f, "g={}", id),
        }
    }
}

// =============================================================================
// ADS
// =============================================================================

/// An ADS field address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdsAddress {
    /// Where the data lives
    pub target: AdsTarget,
    /// Element data type
    pub data_type: AdsDataType,
    /// Number of consecutive elements (at least 1)
    pub count: u32,
}

impl AdsAddress {
    /// Creates a direct index group/offset address for a single element.
    pub fn direct(index_group: u32, index_offset: u32, data_type: AdsDataType) -> Self {
        Self {
            target: AdsTarget::Direct {
                index_group,
                index_offset,
            },
            data_type,
            count: 1,
        }
    }

    /// Creates a symbolic address for a single element.
    pub fn symbolic(symbol: impl Into<String>, data_type: AdsDataType) -> Self {
        Self {
            target: AdsTarget::Symbolic(symbol.into()),
            data_type,
            count: 1,
        }
    }

    /// Sets the element count.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Total number of bytes to read for this address.
    pub fn byte_len(&self) -> usize {
        self.data_type.size() * self.count as usize
    }
}

impl fmt::Display for AdsAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            AdsTarget::Direct {
                index_group,
                index_offset,
            } => write!(f, "0x{:X}/0x{:X}:{}", index_group, index_offset, self.data_type)?,
            AdsTarget::Symbolic(symbol) => write!(f, "{}:{}", symbol, self.data_type)?,
        }
        if self.count != 1 {
            write!(f, "[{}]", self.count)?;
        }
        Ok(())
    }
}

/// Location of ADS data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdsTarget {
    /// Raw index group and offset
    Direct {
        /// Index group
        index_group: u32,
        /// Index offset
        index_offset: u32,
    },

    /// PLC symbol path such as `MAIN.counter`
    Symbolic(String),
}

/// IEC 61131-3 elementary types supported over ADS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdsDataType {
    /// BOOL
    Bool,
    /// BYTE
    Byte,
    /// WORD
    Word,
    /// DWORD
    Dword,
    /// SINT
    Sint,
    /// USINT
    Usint,
    /// INT
    Int,
    /// UINT
    Uint,
    /// DINT
    Dint,
    /// UDINT
    Udint,
    /// LINT
    Lint,
    /// ULINT
    Ulint,
    /// REAL
    Real,
    /// LREAL
    Lreal,
}

impl AdsDataType {
    /// All known data types.
    pub const ALL: [AdsDataType; 14] = [
        AdsDataType::Bool,
        AdsDataType::Byte,
        AdsDataType::Word,
        AdsDataType::Dword,
        AdsDataType::Sint,
        AdsDataType::Usint,
        AdsDataType::Int,
        AdsDataType::Uint,
        AdsDataType::Dint,
        AdsDataType::Udint,
        AdsDataType::Lint,
        AdsDataType::Ulint,
        AdsDataType::Real,
        AdsDataType::Lreal,
    ];

    /// Returns the canonical type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdsDataType::Bool => "BOOL",
            AdsDataType::Byte => "BYTE",
            AdsDataType::Word => "WORD",
            AdsDataType::Dword => "DWORD",
            AdsDataType::Sint => "SINT",
            AdsDataType::Usint => "USINT",
            AdsDataType::Int => "INT",
            AdsDataType::Uint => "UINT",
            AdsDataType::Dint => "DINT",
            AdsDataType::Udint => "UDINT",
            AdsDataType::Lint => "LINT",
            AdsDataType::Ulint => "ULINT",
            AdsDataType::Real => "REAL",
            AdsDataType::Lreal => "LREAL",
        }
    }

    /// Looks a type up by its canonical name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
    }

    /// Encoded size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            AdsDataType::Bool | AdsDataType::Byte | AdsDataType::Sint | AdsDataType::Usint => 1,
            AdsDataType::Word | AdsDataType::Int | AdsDataType::Uint => 2,
            AdsDataType::Dword | AdsDataType::Dint | AdsDataType::Udint | AdsDataType::Real => 4,
            AdsDataType::Lint | AdsDataType::Ulint | AdsDataType::Lreal => 8,
        }
    }
}

impl fmt::Display for AdsDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nmt_wildcard() {
        let any = CanOpenAddress::nmt(0);
        assert!(any.is_wildcard());
        assert!(any.matches(&CanOpenAddress::nmt(12)));
        assert!(!CanOpenAddress::nmt(12).matches(&CanOpenAddress::nmt(13)));
        assert!(!any.matches(&CanOpenAddress::sdo(1, 0x1000, 0, CanOpenDataType::Unsigned32)));
    }

    #[test]
    fn test_canonical_strings() {
        assert_eq!(CanOpenAddress::nmt(0).to_string(), "NMT");
        assert_eq!(CanOpenAddress::nmt(7).to_string(), "NMT:7");
        assert_eq!(
            CanOpenAddress::sdo(5, 0x1018, 1, CanOpenDataType::Unsigned32).to_string(),
            "SDO:5:0x1018/0x1:UNSIGNED32"
        );
        assert_eq!(OpcUaNodeId::numeric(0, 2258).to_string(), "ns=0;i=2258");
        assert_eq!(
            OpcUaNodeId::string(2, "HelloWorld/ScalarTypes/Boolean").to_string(),
            "ns=2;s=HelloWorld/ScalarTypes/Boolean"
        );
        assert_eq!(
            AdsAddress::direct(0x4020, 16, AdsDataType::Int).to_string(),
            "0x4020/0x10:INT"
        );
        assert_eq!(
            AdsAddress::symbolic("MAIN.values", AdsDataType::Real)
                .with_count(4)
                .to_string(),
            "MAIN.values:REAL[4]"
        );
    }

    #[test]
    fn test_field_address_protocol() {
        let addr: FieldAddress = OpcUaNodeId::numeric(1, 5).into();
        assert_eq!(addr.protocol(), ProtocolKind::OpcUa);
        assert!(!addr.is_wildcard());
        assert!(addr.as_opcua().is_some());
        assert!(addr.as_ads().is_none());
    }

    #[test]
    fn test_data_type_lookup() {
        assert_eq!(AdsDataType::from_name("lreal"), Some(AdsDataType::Lreal));
        assert_eq!(AdsDataType::Lreal.size(), 8);
        assert_eq!(
            CanOpenDataType::from_name("visible_string"),
            Some(CanOpenDataType::VisibleString)
        );
        assert_eq!(CanOpenDataType::VisibleString.size(), None);
        assert_eq!(AdsAddress::direct(1, 2, AdsDataType::Int).with_count(3).byte_len(), 6);
    }
}
