// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection string parsing.
//!
//! ```text
//! <protocol>:<transport>://<host>[:<port>][/<path>][?<key>=<value>[&<key>=<value>]...]
//! ```
//!
//! Every query parameter is checked against the protocol's parameter table.
//! Unknown names and malformed values fail here, before any I/O happens.
//!
//! # Examples
//!
//! ```
//! use plcwire_config::connection::ConnectionString;
//!
//! let conn: ConnectionString = "opcua:tcp://127.0.0.1:12686/milo?discovery=false".parse().unwrap();
//! assert_eq!(conn.port(), 12686);
//! assert_eq!(conn.param_bool("discovery"), Some(false));
//!
//! assert!("opcua:tcp://127.0.0.1:12686/milo?discovery=1".parse::<ConnectionString>().is_err());
//! assert!("opcua:tcp://127.0.0.1:12686/milo?diskovery=false".parse::<ConnectionString>().is_err());
//! ```

use plcwire_core::error::{ConnectionError, ConnectionResult};
use plcwire_core::types::ProtocolKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Transport Kind
// =============================================================================

/// Physical transport named in a connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// Serial line
    Serial,
    /// Linux SocketCAN
    SocketCan,
}

impl TransportKind {
    /// Returns the transport name as used in connection strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
            TransportKind::Serial => "serial",
            TransportKind::SocketCan => "socketcan",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Some(TransportKind::Tcp),
            "udp" => Some(TransportKind::Udp),
            "serial" => Some(TransportKind::Serial),
            "socketcan" => Some(TransportKind::SocketCan),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// A validated query parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// `true` or `false`
    Bool(bool),
    /// Unsigned integer
    UInt(u64),
    /// Enumerated or structured text
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::UInt(v) => write!(f, "{}", v),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ParamKind {
    Bool,
    Range(u64, u64),
    AmsNetId,
    OneOf(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
struct ParamSpec {
    name: &'static str,
    kind: ParamKind,
}

const OPCUA_PARAMS: &[ParamSpec] = &[
    ParamSpec { name: "discovery", kind: ParamKind::Bool },
    ParamSpec {
        name: "security-policy",
        kind: ParamKind::OneOf(&["None", "Basic128Rsa15", "Basic256", "Basic256Sha256"]),
    },
    ParamSpec {
        name: "message-security",
        kind: ParamKind::OneOf(&["None", "Sign", "SignAndEncrypt"]),
    },
];

const ADS_PARAMS: &[ParamSpec] = &[
    ParamSpec { name: "target-ams-net-id", kind: ParamKind::AmsNetId },
    ParamSpec { name: "target-ams-port", kind: ParamKind::Range(1, 65535) },
    ParamSpec { name: "source-ams-net-id", kind: ParamKind::AmsNetId },
    ParamSpec { name: "source-ams-port", kind: ParamKind::Range(1, 65535) },
];

const CANOPEN_PARAMS: &[ParamSpec] = &[
    ParamSpec { name: "node-id", kind: ParamKind::Range(1, 127) },
    ParamSpec { name: "bitrate", kind: ParamKind::Range(1, 1_000_000) },
];

fn param_table(protocol: ProtocolKind) -> &'static [ParamSpec] {
    match protocol {
        ProtocolKind::OpcUa => OPCUA_PARAMS,
        ProtocolKind::Ads => ADS_PARAMS,
        ProtocolKind::CanOpen => CANOPEN_PARAMS,
        ProtocolKind::Unknown => &[],
    }
}

fn default_port(protocol: ProtocolKind) -> u16 {
    match protocol {
        ProtocolKind::OpcUa => 4840,
        ProtocolKind::Ads => 48898,
        ProtocolKind::CanOpen | ProtocolKind::Unknown => 0,
    }
}

fn validate_param(spec: &ParamSpec, value: &str) -> ConnectionResult<ParamValue> {
    let invalid = |message: String| ConnectionError::invalid_parameter(spec.name, value, message);
    match spec.kind {
        ParamKind::Bool => match value {
            "true" => Ok(ParamValue::Bool(true)),
            "false" => Ok(ParamValue::Bool(false)),
            _ => Err(invalid("expected true or false".to_string())),
        },
        ParamKind::Range(min, max) => {
            let n: u64 = value
                .parse()
                .map_err(|_| invalid(format!("expected an integer in {}..={}", min, max)))?;
            if n < min || n > max {
                return Err(invalid(format!("expected an integer in {}..={}", min, max)));
            }
            Ok(ParamValue::UInt(n))
        }
        ParamKind::AmsNetId => {
            let octets: Vec<&str> = value.split('.').collect();
            if octets.len() != 6 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
                return Err(invalid("expected six dotted octets such as 192.168.0.1.1.1".to_string()));
            }
            Ok(ParamValue::Text(value.to_string()))
        }
        ParamKind::OneOf(choices) => choices
            .iter()
            .find(|c| **c == value)
            .map(|c| ParamValue::Text((*c).to_string()))
            .ok_or_else(|| invalid(format!("expected one of {}", choices.join(", ")))),
    }
}

// =============================================================================
// Connection String
// =============================================================================

/// A parsed and validated connection string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionString {
    protocol: ProtocolKind,
    transport: TransportKind,
    host: String,
    port: Option<u16>,
    path: Option<String>,
    params: Vec<(String, ParamValue)>,
}

impl ConnectionString {
    /// Parses and validates a connection string.
    pub fn parse(uri: &str) -> ConnectionResult<Self> {
        let uri = uri.trim();
        let bad = |message: &str| ConnectionError::invalid_uri(uri, message);

        let (protocol_part, rest) = uri
            .split_once(':')
            .ok_or_else(|| bad("expected <protocol>:<transport>://<host>"))?;
        let protocol: ProtocolKind = protocol_part.parse().map_err(|_| {
            ConnectionError::UnsupportedProtocol {
                protocol: protocol_part.to_string(),
            }
        })?;

        let (transport_part, rest) = rest
            .split_once("://")
            .ok_or_else(|| bad("expected <transport>:// after the protocol"))?;
        let transport = TransportKind::parse(transport_part)
            .ok_or_else(|| bad("unknown transport; expected tcp, udp, serial or socketcan"))?;

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let (authority, path) = match location.split_once('/') {
            Some((authority, path)) if !path.is_empty() => (authority, Some(path.to_string())),
            Some((authority, _)) => (authority, None),
            None => (location, None),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| bad("invalid port"))?;
                if port == 0 {
                    return Err(bad("port must not be zero"));
                }
                (host, Some(port))
            }
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(bad("host cannot be empty"));
        }

        let params = match query {
            Some(query) => Self::parse_query(uri, protocol, query)?,
            None => Vec::new(),
        };

        Ok(Self {
            protocol,
            transport,
            host: host.to_string(),
            port,
            path,
            params,
        })
    }

    fn parse_query(
        uri: &str,
        protocol: ProtocolKind,
        query: &str,
    ) -> ConnectionResult<Vec<(String, ParamValue)>> {
        let table = param_table(protocol);
        let mut params: Vec<(String, ParamValue)> = Vec::new();

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                ConnectionError::invalid_uri(uri, format!("parameter '{}' has no value", pair))
            })?;
            let spec = table
                .iter()
                .find(|spec| spec.name == name)
                .ok_or_else(|| ConnectionError::unknown_parameter(name, protocol))?;
            if params.iter().any(|(n, _)| n == name) {
                return Err(ConnectionError::invalid_parameter(
                    name,
                    value,
                    "parameter given more than once",
                ));
            }
            params.push((name.to_string(), validate_param(spec, value)?));
        }

        Ok(params)
    }

    /// Returns the protocol.
    #[inline]
    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    /// Returns the transport.
    #[inline]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Returns the host (or device name for serial and CAN transports).
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the explicit port or the protocol's default port.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| default_port(self.protocol))
    }

    /// Returns the path without the leading slash.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Returns a parameter value.
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns a boolean parameter.
    pub fn param_bool(&self, name: &str) -> Option<bool> {
        match self.param(name) {
            Some(ParamValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns an integer parameter.
    pub fn param_u64(&self, name: &str) -> Option<u64> {
        match self.param(name) {
            Some(ParamValue::UInt(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a text parameter.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        match self.param(name) {
            Some(ParamValue::Text(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns all parameters in the order given.
    pub fn params(&self) -> &[(String, ParamValue)] {
        &self.params
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}://{}", self.protocol, self.transport, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if let Some(path) = &self.path {
            write!(f, "/{}", path)?;
        }
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, name, value)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
