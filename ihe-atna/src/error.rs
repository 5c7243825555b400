//! Error types for audit transport and node authentication

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Stage of socket establishment at which a failure was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectPhase {
    /// Looking up the security domain for the target
    ResolveDomain,
    /// Loading key/trust material and building the TLS client config
    BuildTlsContext,
    /// Opening the TCP connection
    Connect,
    /// Negotiating TLS over an open TCP connection
    Handshake,
}

impl fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolveDomain => write!(f, "resolve_domain"),
            Self::BuildTlsContext => write!(f, "build_tls_context"),
            Self::Connect => write!(f, "connect"),
            Self::Handshake => write!(f, "handshake"),
        }
    }
}

/// Main error type for the crate
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// No mapped security domain and no default domain for the target
    #[error("No security domain resolves for {host}:{port}")]
    DomainResolution {
        /// Target host
        host: String,
        /// Target port
        port: u16,
    },

    /// An endpoint was mapped to a domain name that is not registered
    #[error("Unknown security domain: {0}")]
    UnknownDomain(String),

    /// Secure transport required but disabled, or plain transport attempted when forbidden
    #[error("TLS policy violation: {0}")]
    TlsPolicyViolation(String),

    /// Certificate or alias rejected during TLS negotiation
    #[error("TLS handshake with {host}:{port} failed: {source}")]
    HandshakeFailure {
        /// Target host
        host: String,
        /// Target port
        port: u16,
        /// Underlying handshake error
        #[source]
        source: io::Error,
    },

    /// Connection retries exhausted
    #[error("Failed to connect to {host}:{port} after {attempts} attempt(s): {source}")]
    ConnectFailure {
        /// Target host
        host: String,
        /// Target port
        port: u16,
        /// Number of attempts made
        attempts: u32,
        /// Error from the last attempt, kind preserved
        #[source]
        source: io::Error,
    },

    /// I/O failure on an established channel; `delivered` messages made it out first
    #[error("Transport error after {delivered}/{total} message(s): {source}")]
    Transport {
        /// Messages written before the failure
        delivered: usize,
        /// Messages in the batch
        total: usize,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The channel worked but some records were dropped without I/O
    #[error("Incomplete delivery: {skipped} record(s) dropped, {delivered} delivered")]
    IncompleteDelivery {
        /// Records written to the channel
        delivered: usize,
        /// Records dropped (oversized datagrams)
        skipped: usize,
    },

    /// A record could not be serialized (missing or out-of-range field)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key store or trust store could not be loaded
    #[error("Key material error: {0}")]
    KeyMaterial(String),

    /// Endpoint string could not be parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Durable broker publish failed
    #[error("Broker error: {0}")]
    Broker(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Check if this error is retriable (transient errors that may succeed on retry)
    ///
    /// Nothing inside the crate retries on this; it is a hint for callers that
    /// layer their own retry above a queue.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::ConnectFailure { .. } | Error::Transport { .. } | Error::Broker(_)
        )
    }

    /// Get the connect phase this error belongs to, if it came from the socket handler
    pub fn connect_phase(&self) -> Option<ConnectPhase> {
        match self {
            Error::DomainResolution { .. } | Error::UnknownDomain(_) => {
                Some(ConnectPhase::ResolveDomain)
            }
            Error::KeyMaterial(_) => Some(ConnectPhase::BuildTlsContext),
            Error::ConnectFailure { .. } => Some(ConnectPhase::Connect),
            Error::HandshakeFailure { .. } => Some(ConnectPhase::Handshake),
            _ => None,
        }
    }
}

// Manual From implementations for boxed errors
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failure_preserves_io_kind() {
        let err = Error::ConnectFailure {
            host: "repo.example.com".to_string(),
            port: 6514,
            attempts: 3,
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };

        let source = std::error::Error::source(&err)
            .and_then(|s| s.downcast_ref::<io::Error>())
            .unwrap();
        assert_eq!(source.kind(), io::ErrorKind::ConnectionRefused);
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }

    #[test]
    fn test_is_retriable() {
        assert!(Error::Broker("down".into()).is_retriable());
        assert!(Error::Transport {
            delivered: 1,
            total: 2,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "pipe"),
        }
        .is_retriable());
        assert!(!Error::TlsPolicyViolation("no".into()).is_retriable());
        assert!(!Error::Serialization("missing".into()).is_retriable());
        assert!(!Error::HandshakeFailure {
            host: "h".into(),
            port: 1,
            source: io::Error::new(io::ErrorKind::InvalidData, "bad cert"),
        }
        .is_retriable());
    }

    #[test]
    fn test_connect_phase() {
        assert_eq!(
            Error::UnknownDomain("x".into()).connect_phase(),
            Some(ConnectPhase::ResolveDomain)
        );
        assert_eq!(
            Error::KeyMaterial("x".into()).connect_phase(),
            Some(ConnectPhase::BuildTlsContext)
        );
        assert_eq!(Error::Serialization("x".into()).connect_phase(), None);
        assert_eq!(ConnectPhase::Handshake.to_string(), "handshake");
    }

    #[test]
    fn test_incomplete_delivery_is_final() {
        let err = Error::IncompleteDelivery {
            delivered: 1,
            skipped: 1,
        };
        assert!(!err.is_retriable());
        assert_eq!(err.connect_phase(), None);
        assert_eq!(
            err.to_string(),
            "Incomplete delivery: 1 record(s) dropped, 1 delivered"
        );
    }

    #[test]
    fn test_transport_display() {
        let err = Error::Transport {
            delivered: 2,
            total: 5,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"),
        };
        assert_eq!(
            err.to_string(),
            "Transport error after 2/5 message(s): pipe closed"
        );
    }
}
