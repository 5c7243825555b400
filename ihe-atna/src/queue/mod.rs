//! Audit queues: how a record gets from the caller to the sender
//!
//! Three strategies share the [`AuditQueue`] trait:
//!
//! - [`SynchronousAuditQueue`] sends on the calling task and returns the
//!   sender's result unchanged; dropped records become
//!   [`Error::IncompleteDelivery`].
//! - [`PooledAuditQueue`] hands the send to a worker and returns at once.
//!   Failures are logged, counted and passed to a [`QueueErrorHook`].
//! - [`BrokerAuditQueue`] publishes to a durable broker; only publish
//!   failures reach the caller.
//!
//! No queue retries. [`AuditQueue::shutdown`] drains whatever a strategy
//! still has in flight. Every strategy is `Send + Sync` and can be shared
//! between tasks behind an `Arc`.

pub mod broker;
pub mod pooled;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::QueueStrategy;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::record::AuditEventMessage;
use crate::sender::{AuditMessageSender, AuditSender};

pub use broker::{BrokerAuditQueue, BrokerPublisher, InMemoryPublisher, PublishedRecord};
pub use pooled::PooledAuditQueue;
pub use sync::SynchronousAuditQueue;

/// Header naming an overridden destination on broker-published records
pub const DESTINATION_HEADER: &str = "Atna-Destination";

/// Accepts audit records for delivery
#[async_trait]
pub trait AuditQueue: Send + Sync + 'static {
    /// Queue a batch for the configured destination, or for `target`
    async fn send_audit_events(
        &self,
        messages: Vec<AuditEventMessage>,
        target: Option<(String, u16)>,
    ) -> Result<()>;

    /// Queue one record for the configured destination
    async fn send_audit_event(&self, message: AuditEventMessage) -> Result<()> {
        self.send_audit_events(vec![message], None).await
    }

    /// Queue one record for `host:port`, keeping the configured transport
    async fn send_audit_event_to(
        &self,
        message: AuditEventMessage,
        host: &str,
        port: u16,
    ) -> Result<()> {
        self.send_audit_events(vec![message], Some((host.to_string(), port)))
            .await
    }

    /// Stop accepting records and wait up to `timeout` for in-flight sends
    ///
    /// Returns the number of sends still running when the wait ended.
    async fn shutdown(&self, _timeout: Duration) -> usize {
        0
    }
}

/// A delivery failure observed off the caller's task
#[derive(Debug)]
pub struct QueueFailure {
    pub error: Error,
    /// Records in the failed batch
    pub records: usize,
    pub target: Option<(String, u16)>,
}

/// Receives failures the pooled queue could not return to its caller
///
/// Invoked on the worker that ran the send; implementations should not block.
#[async_trait]
pub trait QueueErrorHook: Send + Sync + 'static {
    async fn on_send_error(&self, failure: &QueueFailure);
}

/// Build the queue named by `queue.strategy`
///
/// The pooled strategy uses the current tokio runtime when called inside
/// one. The broker strategy needs the `events` feature and a `[broker]`
/// section.
pub async fn build_queue(context: &Context) -> Result<Arc<dyn AuditQueue>> {
    let config = context.config();
    let sender: Arc<dyn AuditSender> = Arc::new(AuditMessageSender::new(
        config.destination(),
        context.socket_handler().clone(),
    ));

    let queue: Arc<dyn AuditQueue> = match config.queue.strategy {
        QueueStrategy::Sync => Arc::new(SynchronousAuditQueue::new(sender)),
        QueueStrategy::Pooled => {
            let runtime = tokio::runtime::Handle::try_current().ok();
            Arc::new(PooledAuditQueue::new(sender, runtime))
        }
        QueueStrategy::Broker => build_broker_queue(context).await?,
    };

    tracing::info!(strategy = ?config.queue.strategy, destination = %config.destination(), "Audit queue ready");
    Ok(queue)
}

/// Drain `queue` within the configured `queue.shutdown_timeout_ms`
pub async fn shutdown_queue(context: &Context, queue: &dyn AuditQueue) -> usize {
    let timeout = context.config().queue.shutdown_timeout();
    let remaining = queue.shutdown(timeout).await;
    tracing::info!(remaining, ?timeout, "Audit queue shut down");
    remaining
}

#[cfg(feature = "events")]
async fn build_broker_queue(context: &Context) -> Result<Arc<dyn AuditQueue>> {
    let broker = context.config().broker.as_ref().ok_or_else(|| {
        Error::Broker("queue.strategy is broker but [broker] is not configured".to_string())
    })?;
    let publisher = crate::events::NatsJetStreamPublisher::connect(broker).await?;
    Ok(Arc::new(BrokerAuditQueue::new(
        Arc::new(publisher),
        broker.subject.clone(),
    )))
}

#[cfg(not(feature = "events"))]
async fn build_broker_queue(_context: &Context) -> Result<Arc<dyn AuditQueue>> {
    Err(Error::Broker(
        "broker queue requires the `events` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_build_queue_from_strategy() {
        let mut config = Config::default();
        config.queue.strategy = QueueStrategy::Pooled;
        let context = Context::from_config(config).unwrap();
        let queue = build_queue(&context).await.unwrap();
        assert_eq!(shutdown_queue(&context, queue.as_ref()).await, 0);
    }

    #[tokio::test]
    async fn test_sync_queue_shutdown_is_immediate() {
        let context = Context::from_config(Config::default()).unwrap();
        let queue = build_queue(&context).await.unwrap();
        assert_eq!(queue.shutdown(Duration::ZERO).await, 0);
    }

    #[cfg(not(feature = "events"))]
    #[tokio::test]
    async fn test_broker_strategy_needs_feature() {
        let mut config = Config::default();
        config.queue.strategy = QueueStrategy::Broker;
        let context = Context::from_config(config).unwrap();
        assert!(matches!(
            build_queue(&context).await.err(),
            Some(Error::Broker(_))
        ));
    }
}
