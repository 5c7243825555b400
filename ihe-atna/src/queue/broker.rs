//! Durable broker queue
//!
//! Records are published as JSON to a broker subject. Delivery to the audit
//! repository happens later, out of process, by whatever drains the subject
//! (see `events::run_relay` with the `events` feature). The caller only ever
//! sees publish failures.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{AuditQueue, DESTINATION_HEADER};
use crate::error::{Error, Result};
use crate::record::AuditEventMessage;

/// Header carrying the record's EventID code
pub const EVENT_ID_HEADER: &str = "Atna-Event-Id";

/// Publishes payloads to a durable subject
#[async_trait]
pub trait BrokerPublisher: Send + Sync + 'static {
    /// Publish and wait for the broker to accept the payload
    async fn publish(
        &self,
        subject: &str,
        headers: Vec<(String, String)>,
        payload: Vec<u8>,
    ) -> Result<()>;
}

pub struct BrokerAuditQueue {
    publisher: Arc<dyn BrokerPublisher>,
    subject: String,
}

impl BrokerAuditQueue {
    pub fn new(publisher: Arc<dyn BrokerPublisher>, subject: impl Into<String>) -> Self {
        Self {
            publisher,
            subject: subject.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Encode a record for the broker
pub fn encode_record(message: &AuditEventMessage) -> Result<Vec<u8>> {
    // Required fields are checked at publish time, not in the relay
    message.to_xml()?;
    serde_json::to_vec(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode audit record: {}", e)))
}

/// Decode a record published by [`BrokerAuditQueue`]
pub fn decode_record(payload: &[u8]) -> Result<AuditEventMessage> {
    serde_json::from_slice(payload)
        .map_err(|e| Error::Serialization(format!("Failed to decode audit record: {}", e)))
}

/// Parse a `host:port` destination header value
pub fn parse_destination_header(value: &str) -> Option<(String, u16)> {
    let (host, port) = value.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

#[async_trait]
impl AuditQueue for BrokerAuditQueue {
    async fn send_audit_events(
        &self,
        messages: Vec<AuditEventMessage>,
        target: Option<(String, u16)>,
    ) -> Result<()> {
        let payloads = messages
            .iter()
            .map(|m| encode_record(m).map(|p| (m.event().event_id().code().to_string(), p)))
            .collect::<Result<Vec<_>>>()?;

        let total = payloads.len();
        for (published, (event_id, payload)) in payloads.into_iter().enumerate() {
            let mut headers = vec![(EVENT_ID_HEADER.to_string(), event_id)];
            if let Some((host, port)) = &target {
                let host = if host.contains(':') {
                    format!("[{}]", host)
                } else {
                    host.clone()
                };
                headers.push((DESTINATION_HEADER.to_string(), format!("{}:{}", host, port)));
            }

            if let Err(e) = self.publisher.publish(&self.subject, headers, payload).await {
                tracing::warn!(subject = %self.subject, published, total, error = %e, "Broker publish failed");
                return Err(match e {
                    Error::Broker(msg) => Error::Broker(format!(
                        "{} ({} of {} record(s) published)",
                        msg, published, total
                    )),
                    other => other,
                });
            }
        }

        tracing::debug!(subject = %self.subject, total, "Audit records published");
        Ok(())
    }
}

/// A record captured by [`InMemoryPublisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    pub subject: String,
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

impl PublishedRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Publisher that keeps records in memory, for tests and local runs
#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    records: Mutex<Vec<PublishedRecord>>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail as if the broker were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<PublishedRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrokerPublisher for InMemoryPublisher {
    async fn publish(
        &self,
        subject: &str,
        headers: Vec<(String, String)>,
        payload: Vec<u8>,
    ) -> Result<()> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Broker("broker unavailable".to_string()));
        }
        let mut records = self
            .records
            .lock()
            .map_err(|_| Error::Broker("publisher state poisoned".to_string()))?;
        records.push(PublishedRecord {
            subject: subject.to_string(),
            headers,
            payload,
        });
        Ok(())
    }
}
