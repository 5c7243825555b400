//! NATS JetStream backend for the broker queue
//!
//! [`NatsJetStreamPublisher`] publishes audit records onto a JetStream
//! stream and waits for the stream ack, so a successful publish is durable.
//! [`run_relay`] drains the stream through a durable consumer and hands each
//! record to an [`AuditSender`]; records are acked only after a successful
//! send.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull, AckKind};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::queue::broker::{decode_record, parse_destination_header, BrokerPublisher};
use crate::queue::DESTINATION_HEADER;
use crate::sender::{AuditSender, SendReport};

/// Create a NATS client with retry logic
///
/// Uses exponential backoff between attempts, up to `max_retries` retries.
pub async fn create_client(config: &BrokerConfig) -> Result<Client> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_client(config).await {
            Ok(client) => {
                if attempt > 0 {
                    tracing::info!(
                        "NATS connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!("NATS client connected to {}", config.url);
                }
                return Ok(client);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to NATS after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                tracing::warn!(
                    "NATS connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_create_client(config: &BrokerConfig) -> Result<Client> {
    let mut opts = async_nats::ConnectOptions::new();
    if let Some(name) = &config.name {
        opts = opts.name(name);
    }

    opts.connect(&config.url).await.map_err(|e| {
        Error::Broker(format!(
            "Failed to connect to NATS server at '{}' (client name: {}): {}",
            config.url,
            config.name.as_deref().unwrap_or("<none>"),
            e
        ))
    })
}

/// Ensure the configured stream exists and captures the audit subject
async fn ensure_stream(
    context: &jetstream::Context,
    config: &BrokerConfig,
) -> Result<jetstream::stream::Stream> {
    context
        .get_or_create_stream(jetstream::stream::Config {
            name: config.stream.clone(),
            subjects: vec![config.subject.clone()],
            ..Default::default()
        })
        .await
        .map_err(|e| {
            Error::Broker(format!(
                "Failed to open JetStream stream '{}': {}",
                config.stream, e
            ))
        })
}

/// Durable publisher backed by a JetStream stream
#[derive(Clone)]
pub struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

impl NatsJetStreamPublisher {
    /// Connect and make sure the stream exists
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let client = create_client(config).await?;
        let context = jetstream::new(client);
        ensure_stream(&context, config).await?;
        Ok(Self { context })
    }

    pub fn context(&self) -> &jetstream::Context {
        &self.context
    }
}

#[async_trait]
impl BrokerPublisher for NatsJetStreamPublisher {
    async fn publish(
        &self,
        subject: &str,
        headers: Vec<(String, String)>,
        payload: Vec<u8>,
    ) -> Result<()> {
        let mut header_map = HeaderMap::new();
        for (name, value) in &headers {
            header_map.insert(name.as_str(), value.as_str());
        }

        let ack = self
            .context
            .publish_with_headers(subject.to_string(), header_map, payload.into())
            .await
            .map_err(|e| Error::Broker(format!("Failed to publish to {}: {}", subject, e)))?;
        ack.await.map_err(|e| {
            Error::Broker(format!("JetStream did not acknowledge {}: {}", subject, e))
        })?;

        Ok(())
    }
}

/// Drain the audit stream into `sender` until `shutdown` is cancelled
///
/// Records that fail to decode, or that the sender had to drop, are
/// terminated; records that fail to send are negatively acked so JetStream
/// redelivers them.
pub async fn run_relay(
    config: &BrokerConfig,
    sender: Arc<dyn AuditSender>,
    shutdown: CancellationToken,
) -> Result<()> {
    let client = create_client(config).await?;
    let context = jetstream::new(client);
    let stream = ensure_stream(&context, config).await?;

    let consumer = stream
        .get_or_create_consumer(
            &config.consumer,
            pull::Config {
                durable_name: Some(config.consumer.clone()),
                filter_subject: config.subject.clone(),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| Error::Broker(format!("Failed to open consumer '{}': {}", config.consumer, e)))?;

    let mut messages = consumer
        .messages()
        .await
        .map_err(|e| Error::Broker(format!("Failed to subscribe to '{}': {}", config.subject, e)))?;

    tracing::info!(stream = %config.stream, consumer = %config.consumer, "Audit relay started");

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = messages.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Audit relay receive error");
                continue;
            }
            None => break,
        };

        let record = match decode_record(&message.payload) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "Dropping undecodable audit record");
                if let Err(e) = message.ack_with(AckKind::Term).await {
                    tracing::warn!(error = %e, "Failed to terminate audit record");
                }
                continue;
            }
        };

        let target = message
            .headers
            .as_ref()
            .and_then(|h| h.get(DESTINATION_HEADER))
            .and_then(|v| parse_destination_header(v.as_str()));
        let target_ref = target.as_ref().map(|(host, port)| (host.as_str(), *port));

        let outcome = sender
            .send_audit_events(std::slice::from_ref(&record), target_ref)
            .await
            .and_then(SendReport::into_complete);
        match outcome {
            Ok(_) => {
                if let Err(e) = message.ack().await {
                    tracing::warn!(error = %e, "Failed to ack relayed audit record");
                }
            }
            Err(e @ Error::IncompleteDelivery { .. }) => {
                // Redelivery cannot make the record fit
                tracing::error!(error = %e, target = ?target, "Audit record cannot be relayed; terminating");
                if let Err(e) = message.ack_with(AckKind::Term).await {
                    tracing::warn!(error = %e, "Failed to terminate audit record");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, target = ?target, "Relay send failed; record will be redelivered");
                if let Err(e) = message.ack_with(AckKind::Nak(None)).await {
                    tracing::warn!(error = %e, "Failed to nak audit record");
                }
            }
        }
    }

    tracing::info!("Audit relay stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_defaults() {
        let config: BrokerConfig = serde_json::from_value(serde_json::json!({
            "url": "nats://localhost:4222",
            "name": "audit-node"
        }))
        .unwrap();

        assert_eq!(config.name.as_deref(), Some("audit-node"));
        assert_eq!(config.consumer, "atna-relay");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay_secs, 2);
    }

    #[tokio::test]
    async fn test_connect_failure_is_broker_error() {
        let config: BrokerConfig = serde_json::from_value(serde_json::json!({
            "url": "nats://127.0.0.1:1",
            "max_retries": 0,
            "retry_delay_secs": 0
        }))
        .unwrap();

        let err = create_client(&config).await.err().unwrap();
        assert!(matches!(err, Error::Broker(ref m) if m.contains("127.0.0.1:1")));
    }
}
