//! Synchronous queue: send inline, surface errors unchanged
//!
//! A batch the sender only partly delivered (oversized datagrams) is
//! returned as [`Error::IncompleteDelivery`](crate::error::Error::IncompleteDelivery).

use std::sync::Arc;

use async_trait::async_trait;

use super::AuditQueue;
use crate::error::Result;
use crate::record::AuditEventMessage;
use crate::sender::{AuditSender, SendReport};

#[derive(Clone)]
pub struct SynchronousAuditQueue {
    sender: Arc<dyn AuditSender>,
}

impl SynchronousAuditQueue {
    pub fn new(sender: Arc<dyn AuditSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl AuditQueue for SynchronousAuditQueue {
    async fn send_audit_events(
        &self,
        messages: Vec<AuditEventMessage>,
        target: Option<(String, u16)>,
    ) -> Result<()> {
        let target = target.as_ref().map(|(host, port)| (host.as_str(), *port));
        self.sender
            .send_audit_events(&messages, target)
            .await
            .and_then(SendReport::into_complete)?;
        Ok(())
    }
}
