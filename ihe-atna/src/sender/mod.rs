//! Audit message sender
//!
//! Serializes a batch of audit records and writes them to the destination's
//! transport. Every record is serialized before any I/O, so a bad record
//! never produces a partial batch. UDP sends one unframed datagram per
//! record and is refused when non-TLS traffic is forbidden. TCP and TLS
//! open one stream per call and write each record with octet-counting
//! framing.
//!
//! Nothing here retries. The only retry loop is the connect loop in
//! [`crate::socket`].

pub mod framing;

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio_util::codec::FramedWrite;

use crate::destination::{Destination, TransportKind};
use crate::error::{Error, Result};
use crate::record::AuditEventMessage;
use crate::socket::{strip_brackets, AtnaStream, SocketHandler};

pub use framing::OctetCountingCodec;

/// Largest UDP payload that fits in one IPv4 datagram
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Outcome of a successful send call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Records written to the channel
    pub delivered: usize,
    /// Records dropped without I/O (oversized datagrams)
    pub skipped: usize,
    /// Transport used
    pub transport: TransportKind,
}

impl SendReport {
    fn empty(transport: TransportKind) -> Self {
        Self {
            delivered: 0,
            skipped: 0,
            transport,
        }
    }

    /// Whether every record in the batch went out
    pub fn is_complete(&self) -> bool {
        self.skipped == 0
    }

    /// Turn a report with dropped records into [`Error::IncompleteDelivery`]
    pub fn into_complete(self) -> Result<Self> {
        if self.is_complete() {
            return Ok(self);
        }
        Err(Error::IncompleteDelivery {
            delivered: self.delivered,
            skipped: self.skipped,
        })
    }
}

/// Delivers serialized audit records to a repository
#[async_trait]
pub trait AuditSender: Send + Sync + 'static {
    /// Send a batch to `target`, or to the configured destination when `None`
    ///
    /// The target keeps the configured transport.
    async fn send_audit_events(
        &self,
        messages: &[AuditEventMessage],
        target: Option<(&str, u16)>,
    ) -> Result<SendReport>;
}

/// Sender over UDP, TCP or TLS using a shared [`SocketHandler`]
#[derive(Debug, Clone)]
pub struct AuditMessageSender {
    destination: Destination,
    socket_handler: Arc<SocketHandler>,
}

impl AuditMessageSender {
    pub fn new(destination: Destination, socket_handler: Arc<SocketHandler>) -> Self {
        Self {
            destination,
            socket_handler,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Send a batch to an explicit destination
    pub async fn send_to(
        &self,
        messages: &[AuditEventMessage],
        destination: &Destination,
    ) -> Result<SendReport> {
        let payloads = serialize_all(messages)?;
        if payloads.is_empty() {
            return Ok(SendReport::empty(destination.transport));
        }

        let report = match destination.transport {
            TransportKind::Udp => {
                self.socket_handler
                    .check_datagram_policy(&destination.host, destination.port)?;
                send_datagrams(destination, payloads).await?
            }
            _ => {
                let mut stream = self.socket_handler.connect(destination).await?;
                let delivered =
                    write_frames(&mut stream, payloads, self.socket_timeout()).await?;
                if let Err(e) = stream.shutdown().await {
                    tracing::debug!(destination = %destination, error = %e, "Stream shutdown failed");
                }
                SendReport {
                    delivered,
                    skipped: 0,
                    transport: destination.transport,
                }
            }
        };

        tracing::debug!(
            destination = %destination,
            delivered = report.delivered,
            skipped = report.skipped,
            "Audit batch sent"
        );
        Ok(report)
    }

    /// Send a batch on a caller-owned stream, leaving it open
    ///
    /// Returns the number of records written.
    pub async fn send_on(
        &self,
        messages: &[AuditEventMessage],
        stream: &mut AtnaStream,
    ) -> Result<usize> {
        let payloads = serialize_all(messages)?;
        write_frames(stream, payloads, self.socket_timeout()).await
    }

    fn socket_timeout(&self) -> Duration {
        self.socket_handler.config().socket_timeout
    }
}

#[async_trait]
impl AuditSender for AuditMessageSender {
    async fn send_audit_events(
        &self,
        messages: &[AuditEventMessage],
        target: Option<(&str, u16)>,
    ) -> Result<SendReport> {
        match target {
            Some((host, port)) => {
                let destination = self.destination.with_endpoint(host, port);
                self.send_to(messages, &destination).await
            }
            None => self.send_to(messages, &self.destination).await,
        }
    }
}

fn serialize_all(messages: &[AuditEventMessage]) -> Result<Vec<Bytes>> {
    messages
        .iter()
        .map(|m| m.to_bytes().map(Bytes::from))
        .collect()
}

/// Write each payload as one frame, flushing after each so `delivered` is exact
async fn write_frames(
    stream: &mut AtnaStream,
    payloads: Vec<Bytes>,
    write_timeout: Duration,
) -> Result<usize> {
    let total = payloads.len();
    let mut framed = FramedWrite::new(stream, OctetCountingCodec::new());
    let mut delivered = 0;

    for payload in payloads {
        let outcome = match tokio::time::timeout(write_timeout, framed.send(payload)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write timed out after {:?}", write_timeout),
            )),
        };
        if let Err(source) = outcome {
            tracing::warn!(delivered, total, error = %source, "Audit stream write failed");
            return Err(Error::Transport {
                delivered,
                total,
                source,
            });
        }
        delivered += 1;
    }

    Ok(delivered)
}

async fn send_datagrams(destination: &Destination, payloads: Vec<Bytes>) -> Result<SendReport> {
    let total = payloads.len();
    let transport_error = |delivered: usize, source: io::Error| Error::Transport {
        delivered,
        total,
        source,
    };

    let host = strip_brackets(&destination.host);
    let target = tokio::net::lookup_host((host, destination.port))
        .await
        .map_err(|e| transport_error(0, e))?
        .next()
        .ok_or_else(|| {
            transport_error(
                0,
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host)),
            )
        })?;

    let local = if target.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };
    let socket = UdpSocket::bind(local)
        .await
        .map_err(|e| transport_error(0, e))?;

    let mut report = SendReport::empty(TransportKind::Udp);
    for payload in payloads {
        if payload.len() > MAX_UDP_PAYLOAD {
            tracing::warn!(
                destination = %destination,
                size = payload.len(),
                limit = MAX_UDP_PAYLOAD,
                "Audit record too large for one datagram; dropped"
            );
            report.skipped += 1;
            continue;
        }

        if let Err(source) = socket.send_to(&payload, target).await {
            tracing::warn!(destination = %destination, error = %source, "Audit datagram send failed");
            return Err(transport_error(report.delivered, source));
        }
        report.delivered += 1;
    }

    Ok(report)
}
