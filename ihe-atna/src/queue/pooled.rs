//! Fire-and-forget queue backed by a worker runtime
//!
//! With a runtime handle, each call becomes a task on that runtime. Without
//! one, each call gets its own OS thread running a current-thread runtime,
//! which costs a thread per in-flight send. Calls are not ordered relative
//! to each other.
//!
//! A send that fails, or that drops records, counts as a failure.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

use super::{AuditQueue, QueueErrorHook, QueueFailure};
use crate::error::{Error, Result};
use crate::record::AuditEventMessage;
use crate::sender::{AuditSender, SendReport};

pub struct PooledAuditQueue {
    sender: Arc<dyn AuditSender>,
    runtime: Option<Handle>,
    tracker: TaskTracker,
    failures: Arc<AtomicU64>,
    hook: Option<Arc<dyn QueueErrorHook>>,
}

impl PooledAuditQueue {
    pub fn new(sender: Arc<dyn AuditSender>, runtime: Option<Handle>) -> Self {
        Self {
            sender,
            runtime,
            tracker: TaskTracker::new(),
            failures: Arc::new(AtomicU64::new(0)),
            hook: None,
        }
    }

    /// Register a hook for failures that cannot reach the caller
    pub fn with_error_hook(mut self, hook: Arc<dyn QueueErrorHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Sends that have failed since creation
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Sends still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait up to `timeout` for in-flight sends
    ///
    /// Returns the number of sends still running when the wait ended.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.tracker.close();
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                tracing::debug!("Pooled audit queue drained");
                0
            }
            Err(_) => {
                let remaining = self.tracker.len();
                tracing::warn!(remaining, ?timeout, "Pooled audit queue shutdown timed out");
                remaining
            }
        }
    }

    fn dispatch(&self, messages: Vec<AuditEventMessage>, target: Option<(String, u16)>) -> Result<()> {
        if self.tracker.is_closed() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pooled audit queue is shut down",
            )));
        }

        let task = deliver(
            self.sender.clone(),
            messages,
            target,
            self.failures.clone(),
            self.hook.clone(),
        );

        match &self.runtime {
            Some(handle) => {
                self.tracker.spawn_on(task, handle);
            }
            None => {
                tracing::debug!("No worker runtime configured; sending on a dedicated thread");
                let tracked = self.tracker.track_future(task);
                let failures = self.failures.clone();
                std::thread::Builder::new()
                    .name("atna-audit-send".to_string())
                    .spawn(move || {
                        match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(runtime) => runtime.block_on(tracked),
                            Err(e) => {
                                failures.fetch_add(1, Ordering::Relaxed);
                                tracing::error!(error = %e, "Failed to start audit send runtime");
                            }
                        }
                    })?;
            }
        }
        Ok(())
    }
}

async fn deliver(
    sender: Arc<dyn AuditSender>,
    messages: Vec<AuditEventMessage>,
    target: Option<(String, u16)>,
    failures: Arc<AtomicU64>,
    hook: Option<Arc<dyn QueueErrorHook>>,
) {
    let target_ref = target.as_ref().map(|(host, port)| (host.as_str(), *port));
    let outcome = sender
        .send_audit_events(&messages, target_ref)
        .await
        .and_then(SendReport::into_complete);
    match outcome {
        Ok(report) => {
            tracing::debug!(delivered = report.delivered, "Pooled audit send finished");
        }
        Err(error) => {
            let total = failures.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::error!(
                error = %error,
                records = messages.len(),
                target = ?target,
                failures = total,
                "Pooled audit send failed"
            );
            if let Some(hook) = hook {
                let failure = QueueFailure {
                    error,
                    records: messages.len(),
                    target,
                };
                hook.on_send_error(&failure).await;
            }
        }
    }
}

impl fmt::Debug for PooledAuditQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledAuditQueue")
            .field("has_runtime", &self.runtime.is_some())
            .field("in_flight", &self.tracker.len())
            .field("failures", &self.failure_count())
            .finish()
    }
}

#[async_trait]
impl AuditQueue for PooledAuditQueue {
    async fn send_audit_events(
        &self,
        messages: Vec<AuditEventMessage>,
        target: Option<(String, u16)>,
    ) -> Result<()> {
        self.dispatch(messages, target)
    }

    async fn shutdown(&self, timeout: Duration) -> usize {
        PooledAuditQueue::shutdown(self, timeout).await
    }
}
