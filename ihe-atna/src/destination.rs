//! Audit destinations and transport kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport used to reach an audit repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// One unframed datagram per record
    #[default]
    #[serde(rename = "UDP", alias = "udp")]
    Udp,
    /// Plain TCP stream
    #[serde(rename = "TCP", alias = "tcp")]
    Tcp,
    /// TLS, server authenticated only
    #[serde(rename = "TLS_ONE_WAY", alias = "tls_one_way")]
    TlsOneWay,
    /// TLS with mutual (node) authentication
    #[serde(rename = "TLS", alias = "TLS_TWO_WAY", alias = "tls")]
    TlsTwoWay,
}

impl TransportKind {
    /// Whether this transport runs over TLS
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::TlsOneWay | Self::TlsTwoWay)
    }

    /// URI scheme used for endpoint mapping lookups
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::TlsOneWay | Self::TlsTwoWay => "tls",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "UDP"),
            Self::Tcp => write!(f, "TCP"),
            Self::TlsOneWay => write!(f, "TLS_ONE_WAY"),
            Self::TlsTwoWay => write!(f, "TLS"),
        }
    }
}

/// A resolved audit repository endpoint, reusable across sends
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16, transport: TransportKind) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
        }
    }

    /// Same transport, different host and port
    pub fn with_endpoint(&self, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            transport: self.transport,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}",
            self.transport.scheme(),
            self.host,
            self.port
        )
    }
}
