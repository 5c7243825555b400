//! Shared audit node context
//!
//! [`Context`] ties configuration, the security domain registry and the
//! socket handler together. Clones are cheap and share the same registry and
//! TLS cache, so one context can back any number of senders and queues.

use std::sync::Arc;

use crate::config::Config;
use crate::domain::SecurityDomainRegistry;
use crate::error::Result;
use crate::sender::AuditMessageSender;
use crate::socket::{SocketConfig, SocketHandler};

/// Types that can hand out a socket handler
pub trait ProvidesSocketHandler {
    fn socket_handler(&self) -> &Arc<SocketHandler>;
}

/// Types that can hand out the security domain registry
pub trait ProvidesDomainRegistry {
    fn registry(&self) -> &Arc<SecurityDomainRegistry>;
}

#[derive(Clone, Debug)]
pub struct Context {
    config: Arc<Config>,
    registry: Arc<SecurityDomainRegistry>,
    socket_handler: Arc<SocketHandler>,
}

impl Context {
    /// Build a context from configuration
    ///
    /// Registers `security_domains`, maps `endpoints` and installs
    /// `default_domain`. Fails if an endpoint pattern is malformed or names
    /// an unregistered domain.
    pub fn from_config(config: Config) -> Result<Self> {
        ContextBuilder::new().config(config).build()
    }

    /// Create a new context builder
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SecurityDomainRegistry> {
        &self.registry
    }

    pub fn socket_handler(&self) -> &Arc<SocketHandler> {
        &self.socket_handler
    }

    /// Sender for the configured audit repository
    pub fn sender(&self) -> AuditMessageSender {
        AuditMessageSender::new(self.config.destination(), self.socket_handler.clone())
    }
}

impl ProvidesSocketHandler for Context {
    fn socket_handler(&self) -> &Arc<SocketHandler> {
        &self.socket_handler
    }
}

impl ProvidesDomainRegistry for Context {
    fn registry(&self) -> &Arc<SecurityDomainRegistry> {
        &self.registry
    }
}

/// Builder for [`Context`]
///
/// ```rust,ignore
/// let context = Context::builder()
///     .config(config)
///     .registry(shared_registry)
///     .build()?;
/// ```
#[derive(Default)]
pub struct ContextBuilder {
    config: Option<Config>,
    registry: Option<Arc<SecurityDomainRegistry>>,
    socket_config: Option<SocketConfig>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration (defaults to `Config::default()`)
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an existing registry instead of a fresh one
    ///
    /// Domains and endpoints from the configuration are added to it.
    pub fn registry(mut self, registry: Arc<SecurityDomainRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the socket settings derived from `[nodeauth]`
    pub fn socket_config(mut self, socket_config: SocketConfig) -> Self {
        self.socket_config = Some(socket_config);
        self
    }

    pub fn build(self) -> Result<Context> {
        let config = self.config.unwrap_or_default();
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(SecurityDomainRegistry::new()));

        for domain in &config.security_domains {
            registry.register(domain.clone());
        }
        for (pattern, domain_name) in &config.endpoints {
            registry.map_endpoint(pattern, domain_name)?;
        }
        if config.default_domain.is_some() {
            registry.set_default(config.default_domain.clone());
        }

        let socket_config = self
            .socket_config
            .unwrap_or_else(|| SocketConfig::from(&config.nodeauth));

        tracing::debug!(
            domains = registry.len(),
            endpoints = config.endpoints.len(),
            tls_enabled = socket_config.tls_enabled,
            "Audit context initialized"
        );

        let socket_handler = Arc::new(SocketHandler::new(socket_config, registry.clone()));

        Ok(Context {
            config: Arc::new(config),
            registry,
            socket_handler,
        })
    }
}
