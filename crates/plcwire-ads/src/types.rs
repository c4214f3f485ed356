// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! ADS/AMS identifiers, command codes and return codes.

use crate::error::AdsError;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Constants
// =============================================================================

/// Index group for reading a variable by symbol name.
pub const INDEX_GROUP_SYM_VALUE_BY_NAME: u32 = 0xF004;

/// Index group for a sum read (several reads in one frame).
pub const INDEX_GROUP_SUM_READ: u32 = 0xF080;

/// Default AMS port of a TwinCAT 3 PLC runtime.
pub const DEFAULT_TARGET_PORT: u16 = 851;

/// Default AMS port used by clients.
pub const DEFAULT_SOURCE_PORT: u16 = 32905;

/// State flag: ADS command.
pub const STATE_ADS_COMMAND: u16 = 0x0004;

/// State flag: the frame is a response.
pub const STATE_RESPONSE: u16 = 0x0001;

// =============================================================================
// AmsNetId
// =============================================================================

/// Six-byte AMS network identifier, written `a.b.c.d.e.f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AmsNetId(pub [u8; 6]);

impl AmsNetId {
    /// Creates a net ID from its octets.
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Derives the conventional net ID `<ipv4>.1.1` from a host name.
    ///
    /// Returns `None` if `host` is not a dotted IPv4 address.
    pub fn from_ipv4_host(host: &str) -> Option<Self> {
        let parts: Vec<u8> = host
            .split('.')
            .map(|p| p.parse::<u8>().ok())
            .collect::<Option<_>>()?;
        match parts.as_slice() {
            [a, b, c, d] => Some(Self([*a, *b, *c, *d, 1, 1])),
            _ => None,
        }
    }

    /// Returns the octets.
    #[inline]
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for AmsNetId {
    type Err = AdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AdsError::InvalidNetId {
            value: s.to_string(),
        };
        let mut octets = [0u8; 6];
        let mut parts = s.split('.');
        for octet in octets.iter_mut() {
            *octet = parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(invalid)?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for AmsNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{}.{}.{}.{}.{}.{}", a, b, c, d, e, g)
    }
}

/// Both ends of an AMS route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmsRoute {
    /// Target net ID.
    pub target_net_id: AmsNetId,
    /// Target port.
    pub target_port: u16,
    /// Source net ID.
    pub source_net_id: AmsNetId,
    /// Source port.
    pub source_port: u16,
}

impl AmsRoute {
    /// Returns the route with both ends swapped, as used by replies.
    pub fn reversed(&self) -> Self {
        Self {
            target_net_id: self.source_net_id,
            target_port: self.source_port,
            source_net_id: self.target_net_id,
            source_port: self.target_port,
        }
    }
}

impl Default for AmsRoute {
    fn default() -> Self {
        Self {
            target_net_id: AmsNetId::new([127, 0, 0, 1, 1, 1]),
            target_port: DEFAULT_TARGET_PORT,
            source_net_id: AmsNetId::new([127, 0, 0, 1, 1, 2]),
            source_port: DEFAULT_SOURCE_PORT,
        }
    }
}

// =============================================================================
// AdsCommand
// =============================================================================

/// ADS command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AdsCommand {
    /// Read device name and version.
    ReadDeviceInfo = 1,
    /// Read data by index group/offset.
    Read = 2,
    /// Write data by index group/offset.
    Write = 3,
    /// Read ADS and device state.
    ReadState = 4,
    /// Change ADS and device state.
    WriteControl = 5,
    /// Register a device notification.
    AddDeviceNotification = 6,
    /// Remove a device notification.
    DeleteDeviceNotification = 7,
    /// Notification pushed by the device.
    DeviceNotification = 8,
    /// Write then read in one round trip.
    ReadWrite = 9,
}

impl AdsCommand {
    /// Looks a command up by its wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => AdsCommand::ReadDeviceInfo,
            2 => AdsCommand::Read,
            3 => AdsCommand::Write,
            4 => AdsCommand::ReadState,
            5 => AdsCommand::WriteControl,
            6 => AdsCommand::AddDeviceNotification,
            7 => AdsCommand::DeleteDeviceNotification,
            8 => AdsCommand::DeviceNotification,
            9 => AdsCommand::ReadWrite,
            _ => return None,
        })
    }

    /// Wire code.
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for AdsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// When a device notification fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TransmissionMode {
    /// Every cycle.
    Cyclic = 3,
    /// Only when the value changes.
    OnChange = 4,
}

// =============================================================================
// Return codes
// =============================================================================

/// ADS return codes that mean "the addressed item does not exist".
pub const NOT_FOUND_CODES: [u32; 4] = [0x701, 0x702, 0x703, 0x710];

/// Returns `true` if `code` reports a missing item.
pub fn is_not_found(code: u32) -> bool {
    NOT_FOUND_CODES.contains(&code)
}

/// Describes an ADS return code.
pub fn error_message(code: u32) -> &'static str {
    match code {
        0x000 => "no error",
        0x001 => "internal error",
        0x006 => "target port not found",
        0x007 => "target machine not found",
        0x700 => "general device error",
        0x701 => "service is not supported by server",
        0x702 => "invalid index group",
        0x703 => "invalid index offset",
        0x704 => "reading/writing not permitted",
        0x705 => "parameter size not correct",
        0x706 => "invalid parameter value(s)",
        0x707 => "device is not in a ready state",
        0x708 => "device is busy",
        0x70A => "out of memory",
        0x70B => "invalid parameter value(s)",
        0x70C => "not found (files)",
        0x710 => "symbol not found",
        0x711 => "symbol version invalid",
        0x712 => "server is in invalid state",
        0x713 => "ads transmode not supported",
        0x714 => "notification handle is invalid",
        0x745 => "timeout elapsed",
        _ => "unknown ads error",
    }
}
