//! Security domains and the registry that resolves them per endpoint
//!
//! A security domain is a named bundle of key material, trust material and
//! TLS policy. The registry holds two tables: domain name to domain, and
//! endpoint pattern to domain name. Resolution never touches the network.
//!
//! Both tables are `DashMap`s holding `Arc` values, so a lookup racing a
//! re-registration sees either the old or the new domain in full.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::endpoint::EndpointPattern;
use crate::error::{Error, Result};

/// Named bundle of key/trust material and TLS policy
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDomain {
    /// Domain name
    pub name: String,

    /// Directory of `<alias>.crt` / `<alias>.key` PEM pairs
    #[serde(default)]
    pub key_store_path: Option<PathBuf>,

    /// Key store password
    #[serde(default, skip_serializing)]
    pub key_store_password: Option<String>,

    /// PEM file (or directory of PEM files) of trusted CA certificates
    pub trust_store_path: PathBuf,

    /// Trust store password
    #[serde(default, skip_serializing)]
    pub trust_store_password: Option<String>,

    /// Alias presented during mutual authentication
    #[serde(default)]
    pub preferred_key_alias: Option<String>,

    /// Enabled TLS protocol versions (`TLSv1.2`, `TLSv1.3`); empty means both
    #[serde(default)]
    pub enabled_protocols: Vec<String>,
}

impl SecurityDomain {
    /// Create a domain with only a trust store (enough for one-way TLS)
    pub fn new(name: impl Into<String>, trust_store_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            key_store_path: None,
            key_store_password: None,
            trust_store_path: trust_store_path.into(),
            trust_store_password: None,
            preferred_key_alias: None,
            enabled_protocols: Vec::new(),
        }
    }

    /// Set the key store directory
    pub fn with_key_store(mut self, path: impl Into<PathBuf>, password: Option<String>) -> Self {
        self.key_store_path = Some(path.into());
        self.key_store_password = password;
        self
    }

    /// Set the alias presented during mutual authentication
    pub fn with_preferred_alias(mut self, alias: impl Into<String>) -> Self {
        self.preferred_key_alias = Some(alias.into());
        self
    }

    /// Restrict enabled protocol versions
    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }
}

// Passwords never reach logs
impl fmt::Debug for SecurityDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityDomain")
            .field("name", &self.name)
            .field("key_store_path", &self.key_store_path)
            .field(
                "key_store_password",
                &self.key_store_password.as_ref().map(|_| "<redacted>"),
            )
            .field("trust_store_path", &self.trust_store_path)
            .field(
                "trust_store_password",
                &self.trust_store_password.as_ref().map(|_| "<redacted>"),
            )
            .field("preferred_key_alias", &self.preferred_key_alias)
            .field("enabled_protocols", &self.enabled_protocols)
            .finish()
    }
}

/// Name → domain and endpoint → name lookup tables
#[derive(Default)]
pub struct SecurityDomainRegistry {
    domains: DashMap<String, Arc<SecurityDomain>>,
    endpoints: DashMap<EndpointPattern, String>,
    default_domain: RwLock<Option<Arc<SecurityDomain>>>,
}

impl SecurityDomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a domain by name
    ///
    /// Connections already established with the previous domain are unaffected.
    pub fn register(&self, domain: SecurityDomain) -> Arc<SecurityDomain> {
        let name = domain.name.clone();
        let domain = Arc::new(domain);
        if self.domains.insert(name.clone(), domain.clone()).is_some() {
            tracing::info!(domain = %name, "Security domain replaced");
        } else {
            tracing::debug!(domain = %name, "Security domain registered");
        }
        domain
    }

    /// Remove a domain and every endpoint mapped to it
    pub fn unregister(&self, name: &str) -> Option<Arc<SecurityDomain>> {
        let removed = self.domains.remove(name).map(|(_, d)| d);
        if removed.is_some() {
            self.endpoints.retain(|_, mapped| mapped != name);
        }
        removed
    }

    /// Look up a domain by name
    pub fn domain(&self, name: &str) -> Option<Arc<SecurityDomain>> {
        self.domains.get(name).map(|d| d.value().clone())
    }

    /// Associate an endpoint pattern with a registered domain name
    pub fn map_endpoint(&self, uri_pattern: &str, domain_name: &str) -> Result<()> {
        if !self.domains.contains_key(domain_name) {
            return Err(Error::UnknownDomain(domain_name.to_string()));
        }

        let pattern = EndpointPattern::parse(uri_pattern)?;
        tracing::debug!(endpoint = %pattern, domain = %domain_name, "Endpoint mapped");
        self.endpoints.insert(pattern, domain_name.to_string());
        Ok(())
    }

    /// Set the process default domain used when no mapping matches
    pub fn set_default(&self, domain: Option<SecurityDomain>) {
        let mut guard = self
            .default_domain
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = domain.map(Arc::new);
    }

    /// Current default domain
    pub fn default_domain(&self) -> Option<Arc<SecurityDomain>> {
        self.default_domain
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Resolve the domain for a target, ignoring scheme
    pub fn resolve(&self, host: &str, port: u16) -> Result<Arc<SecurityDomain>> {
        self.resolve_for(None, host, port)
    }

    /// Resolve the domain for a target reached over `scheme`
    ///
    /// Exact host:port wins, then host with any port, then port-only and
    /// scheme-only patterns, then the default domain. Among equally specific
    /// patterns the one whose text sorts first wins. The socket handler
    /// resolves TLS connections with scheme `tls`, which also matches
    /// `https` and `ssl` patterns.
    pub fn resolve_for(
        &self,
        scheme: Option<&str>,
        host: &str,
        port: u16,
    ) -> Result<Arc<SecurityDomain>> {
        let best = self
            .endpoints
            .iter()
            .filter(|entry| entry.key().matches(scheme, host, port))
            .map(|entry| {
                let pattern = entry.key();
                (pattern.specificity(), pattern.to_string(), entry.value().clone())
            })
            .min_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, _, name)| name);

        if let Some(name) = best {
            if let Some(domain) = self.domain(&name) {
                return Ok(domain);
            }
            // Mapping outlived its domain; fall through to the default
            tracing::warn!(domain = %name, host, port, "Endpoint maps to unregistered domain");
        }

        if let Some(domain) = self.default_domain() {
            tracing::debug!(domain = %domain.name, host, port, "Using default security domain");
            return Ok(domain);
        }

        Err(Error::DomainResolution {
            host: host.to_string(),
            port,
        })
    }

    /// Number of registered domains
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl fmt::Debug for SecurityDomainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityDomainRegistry")
            .field("domains", &self.domains.len())
            .field("endpoints", &self.endpoints.len())
            .field("has_default", &self.default_domain().is_some())
            .finish()
    }
}
