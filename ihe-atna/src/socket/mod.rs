//! Socket handler: policy-checked, retried, optionally TLS-authenticated connections
//!
//! Establishing a connection walks a fixed sequence:
//!
//! ```text
//! INIT -> RESOLVE_DOMAIN -> BUILD_TLS_CONTEXT (TLS only) -> CONNECT (1..N) -> CONNECTED | FAILED
//! ```
//!
//! Only the TCP connect is retried. A TLS handshake that fails (bad
//! certificate, no acceptable alias) is reported immediately as
//! [`Error::HandshakeFailure`]; repeating it with the same material cannot
//! succeed.
//!
//! A mutual session is only handed out once the server has kept it. If the
//! server asked for a certificate and none was sent, the connection fails
//! locally. Under TLS 1.3 the server judges the client certificate after the
//! client has finished its handshake, so the handler waits up to
//! `session_confirm_wait` for a rejecting alert or close before returning.

pub mod alias;
pub mod tls;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ProtocolVersion;
use tokio_rustls::TlsConnector;

use crate::config::NodeAuthConfig;
use crate::destination::{Destination, TransportKind};
use crate::domain::{SecurityDomain, SecurityDomainRegistry};
use crate::error::{Error, Result};

pub use alias::{select_alias, AliasSelectingResolver, CertificateSelection, KeyType};
pub use tls::{build_client_config, load_trust_store, ClientTls, KeyStore};

/// Scheme used to resolve the security domain of TLS connections
const TLS_SCHEME: &str = "tls";

/// Socket policy and timing
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub tls_enabled: bool,
    pub nontls_permitted: bool,
    pub retries: u32,
    pub retry_wait: Duration,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    /// How long a TLS 1.3 mutual session is watched for a server rejection
    pub session_confirm_wait: Duration,
}

impl From<&NodeAuthConfig> for SocketConfig {
    fn from(config: &NodeAuthConfig) -> Self {
        Self {
            tls_enabled: config.tls_enabled,
            nontls_permitted: config.nontls_permitted,
            retries: config.socket_retries,
            retry_wait: config.socket_retry_wait(),
            connect_timeout: config.connect_timeout(),
            socket_timeout: config.socket_timeout(),
            session_confirm_wait: config.session_confirm_wait(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::from(&NodeAuthConfig::default())
    }
}

/// Requested channel security
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionSecurity {
    Plain,
    /// Server authenticated only
    TlsOneWay,
    /// Mutual authentication
    TlsTwoWay,
}

impl ConnectionSecurity {
    /// Security for a stream transport; `None` for UDP
    pub fn for_transport(transport: TransportKind) -> Option<Self> {
        match transport {
            TransportKind::Udp => None,
            TransportKind::Tcp => Some(Self::Plain),
            TransportKind::TlsOneWay => Some(Self::TlsOneWay),
            TransportKind::TlsTwoWay => Some(Self::TlsTwoWay),
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Self::Plain)
    }
}

impl fmt::Display for ConnectionSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::TlsOneWay => write!(f, "tls-one-way"),
            Self::TlsTwoWay => write!(f, "tls-two-way"),
        }
    }
}

/// An open connection to an audit repository
pub enum AtnaStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AtnaStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Self::Plain(s) => s.peer_addr(),
            Self::Tls(s) => s.get_ref().0.peer_addr(),
        }
    }

    /// Negotiated TLS version; `None` for plain streams
    pub fn tls_version(&self) -> Option<ProtocolVersion> {
        match self {
            Self::Plain(_) => None,
            Self::Tls(s) => s.get_ref().1.protocol_version(),
        }
    }
}

impl fmt::Debug for AtnaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_tls() { "Tls" } else { "Plain" };
        f.debug_tuple(kind).field(&self.peer_addr().ok()).finish()
    }
}

impl AsyncRead for AtnaStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(&mut **s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AtnaStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(&mut **s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(&mut **s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(&mut **s).poll_shutdown(cx),
        }
    }
}

struct CachedTls {
    domain: Arc<SecurityDomain>,
    tls: ClientTls,
}

/// Opens connections according to node authentication policy
pub struct SocketHandler {
    config: SocketConfig,
    registry: Arc<SecurityDomainRegistry>,
    tls_cache: DashMap<(String, ConnectionSecurity), CachedTls>,
}

impl SocketHandler {
    pub fn new(config: SocketConfig, registry: Arc<SecurityDomainRegistry>) -> Self {
        Self {
            config,
            registry,
            tls_cache: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SecurityDomainRegistry> {
        &self.registry
    }

    /// Open a plain (`secure == false`) or mutually authenticated TLS stream
    ///
    /// An `existing` stream is handed back unchanged. When `domain` is
    /// `None` it is resolved from the registry.
    pub async fn get_socket(
        &self,
        host: &str,
        port: u16,
        secure: bool,
        domain: Option<Arc<SecurityDomain>>,
        existing: Option<AtnaStream>,
    ) -> Result<AtnaStream> {
        let mode = if secure {
            ConnectionSecurity::TlsTwoWay
        } else {
            ConnectionSecurity::Plain
        };
        self.get_socket_with_mode(host, port, mode, domain, existing)
            .await
    }

    /// Open a stream to a destination using its transport
    pub async fn connect(&self, destination: &Destination) -> Result<AtnaStream> {
        let mode = ConnectionSecurity::for_transport(destination.transport).ok_or_else(|| {
            Error::InvalidEndpoint(format!("{} is a datagram destination", destination))
        })?;
        self.get_socket_with_mode(&destination.host, destination.port, mode, None, None)
            .await
    }

    /// Open a stream with explicit channel security
    pub async fn get_socket_with_mode(
        &self,
        host: &str,
        port: u16,
        mode: ConnectionSecurity,
        domain: Option<Arc<SecurityDomain>>,
        existing: Option<AtnaStream>,
    ) -> Result<AtnaStream> {
        if let Some(stream) = existing {
            return Ok(stream);
        }

        let host = strip_brackets(host);
        let mode = self.apply_policy(host, port, mode)?;

        if !mode.is_tls() {
            let tcp = self.connect_tcp(host, port).await?;
            return Ok(AtnaStream::Plain(tcp));
        }

        let domain = match domain {
            Some(domain) => domain,
            None => self.registry.resolve_for(Some(TLS_SCHEME), host, port)?,
        };
        let (client_config, resolver) = self.client_tls(&domain, mode)?.session();
        let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
            Error::InvalidEndpoint(format!("'{}' is not a valid TLS server name: {}", host, e))
        })?;

        let tcp = self.connect_tcp(host, port).await?;
        let connector = TlsConnector::from(client_config);

        let stream = match tokio::time::timeout(
            self.config.socket_timeout,
            connector.connect(server_name, tcp),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                tracing::warn!(host, port, domain = %domain.name, error = %source, "TLS handshake failed");
                return Err(handshake_failure(host, port, source));
            }
            Err(_) => {
                return Err(handshake_failure(
                    host,
                    port,
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("TLS handshake timed out after {:?}", self.config.socket_timeout),
                    ),
                ))
            }
        };

        let stream = match resolver {
            Some(resolver) => self.confirm_session(host, port, stream, &resolver).await?,
            None => stream,
        };
        tracing::debug!(host, port, domain = %domain.name, mode = %mode, "TLS session established");
        Ok(AtnaStream::Tls(Box::new(stream)))
    }

    /// Check that the server kept a mutually authenticated session
    async fn confirm_session(
        &self,
        host: &str,
        port: u16,
        mut stream: TlsStream<TcpStream>,
        resolver: &AliasSelectingResolver,
    ) -> Result<TlsStream<TcpStream>> {
        let alias = match resolver.selection() {
            CertificateSelection::NotRequested => return Ok(stream),
            CertificateSelection::Withheld => {
                tracing::warn!(host, port, "Server requested a client certificate and none was sent");
                return Err(handshake_failure(
                    host,
                    port,
                    io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "server requested a client certificate but the preferred key alias is not usable",
                    ),
                ));
            }
            CertificateSelection::Presented(alias) => alias,
        };

        // Before TLS 1.3 the server verified the certificate inside the handshake
        if stream.get_ref().1.protocol_version() != Some(ProtocolVersion::TLSv1_3) {
            return Ok(stream);
        }

        let mut first = [0u8; 1];
        match tokio::time::timeout(self.config.session_confirm_wait, stream.read(&mut first)).await {
            Err(_) => Ok(stream),
            Ok(Ok(0)) => {
                tracing::warn!(host, port, alias = %alias, "Server closed the session after the client certificate");
                Err(handshake_failure(
                    host,
                    port,
                    io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        format!("server closed the session after client certificate '{}'", alias),
                    ),
                ))
            }
            Ok(Ok(_)) => {
                tracing::warn!(host, port, "Audit repository sent unsolicited data; discarded");
                Ok(stream)
            }
            Ok(Err(source)) => {
                tracing::warn!(host, port, alias = %alias, error = %source, "Server rejected the client certificate");
                Err(handshake_failure(host, port, source))
            }
        }
    }

    /// Check that datagrams, which are never encrypted, are allowed
    pub fn check_datagram_policy(&self, host: &str, port: u16) -> Result<()> {
        if self.config.nontls_permitted {
            return Ok(());
        }
        Err(Error::TlsPolicyViolation(format!(
            "non-TLS datagrams to {}:{} are not permitted",
            host, port
        )))
    }

    /// Check the requested security against TLS policy, downgrading if allowed
    fn apply_policy(
        &self,
        host: &str,
        port: u16,
        mode: ConnectionSecurity,
    ) -> Result<ConnectionSecurity> {
        match (mode.is_tls(), self.config.tls_enabled, self.config.nontls_permitted) {
            (false, _, false) => Err(Error::TlsPolicyViolation(format!(
                "non-TLS connection to {}:{} is not permitted",
                host, port
            ))),
            (true, false, false) => Err(Error::TlsPolicyViolation(format!(
                "TLS is disabled and non-TLS connection to {}:{} is not permitted",
                host, port
            ))),
            (true, false, true) => {
                tracing::warn!(host, port, "TLS is disabled; connecting without TLS");
                Ok(ConnectionSecurity::Plain)
            }
            _ => Ok(mode),
        }
    }

    /// Cached client TLS material for a domain, rebuilt when the domain is replaced
    fn client_tls(&self, domain: &Arc<SecurityDomain>, mode: ConnectionSecurity) -> Result<ClientTls> {
        let key = (domain.name.clone(), mode);
        if let Some(cached) = self.tls_cache.get(&key) {
            if Arc::ptr_eq(&cached.domain, domain) || cached.domain.as_ref() == domain.as_ref() {
                return Ok(cached.tls.clone());
            }
        }

        let tls = build_client_config(domain, mode == ConnectionSecurity::TlsTwoWay)?;
        self.tls_cache.insert(
            key,
            CachedTls {
                domain: domain.clone(),
                tls: tls.clone(),
            },
        );
        Ok(tls)
    }

    /// Connect with bounded retries
    async fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream> {
        let attempts = self.config.retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect((host, port)))
                .await
            {
                Ok(Ok(stream)) => {
                    tracing::debug!(host, port, attempt, "Connected");
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    tracing::warn!(host, port, attempt, max_attempts = attempts, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    tracing::warn!(host, port, attempt, max_attempts = attempts, "Connect attempt timed out");
                    last_error = Some(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", self.config.connect_timeout),
                    ));
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_wait).await;
            }
        }

        tracing::error!(host, port, attempts, "Giving up on connection");
        Err(Error::ConnectFailure {
            host: host.to_string(),
            port,
            attempts,
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no connect attempt made")),
        })
    }
}

impl fmt::Debug for SocketHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandler")
            .field("config", &self.config)
            .field("cached_tls_configs", &self.tls_cache.len())
            .finish()
    }
}

fn handshake_failure(host: &str, port: u16, source: io::Error) -> Error {
    Error::HandshakeFailure {
        host: host.to_string(),
        port,
        source,
    }
}

pub(crate) fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}
