//! TLS material loading and client configuration
//!
//! Key store: a directory of `<alias>.crt` (PEM chain) and `<alias>.key`
//! (PEM private key) pairs. Trust store: a PEM file, or a directory of PEM
//! files, of CA certificates.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls_pemfile::{certs, private_key};
use tokio_rustls::rustls::crypto::ring::{self, sign::any_supported_type};
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::sign::CertifiedKey;
use tokio_rustls::rustls::{version, ClientConfig, RootCertStore, SupportedProtocolVersion};

use super::alias::{AliasSelectingResolver, KeyType};
use crate::domain::SecurityDomain;
use crate::error::{Error, Result};

const CERT_EXTENSION: &str = "crt";
const KEY_EXTENSION: &str = "key";

struct KeyEntry {
    alias: String,
    key_type: KeyType,
    certified: Arc<CertifiedKey>,
}

/// Aliased certificate chains and private keys
pub struct KeyStore {
    path: PathBuf,
    entries: Vec<KeyEntry>,
}

impl KeyStore {
    /// Load every `<alias>.crt` / `<alias>.key` pair in `dir`
    ///
    /// A certificate without a matching key is skipped with a warning; a key
    /// that is encrypted or of an unsupported type is an error.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let read_dir = fs::read_dir(dir).map_err(|e| {
            Error::KeyMaterial(format!("Failed to open key store '{}': {}", dir.display(), e))
        })?;

        let mut cert_paths: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == CERT_EXTENSION))
            .collect();
        cert_paths.sort();

        let mut entries = Vec::with_capacity(cert_paths.len());
        for cert_path in cert_paths {
            let Some(alias) = cert_path.file_stem().map(|s| s.to_string_lossy().into_owned())
            else {
                continue;
            };
            let key_path = cert_path.with_extension(KEY_EXTENSION);
            if !key_path.exists() {
                tracing::warn!(alias = %alias, "Key store certificate has no private key; skipping");
                continue;
            }
            entries.push(load_entry(&alias, &cert_path, &key_path)?);
        }

        tracing::debug!(
            key_store = %dir.display(),
            aliases = entries.len(),
            "Key store loaded"
        );

        Ok(Self {
            path: dir.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.alias.as_str())
    }

    /// Aliases whose key is of `key_type`, in directory order
    pub fn aliases_for(&self, key_type: KeyType) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |e| e.key_type == key_type)
            .map(|e| e.alias.as_str())
    }

    pub fn key_type(&self, alias: &str) -> Option<KeyType> {
        self.entry(alias).map(|e| e.key_type)
    }

    pub fn certified_key(&self, alias: &str) -> Option<Arc<CertifiedKey>> {
        self.entry(alias).map(|e| e.certified.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, alias: &str) -> Option<&KeyEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }
}

fn load_entry(alias: &str, cert_path: &Path, key_path: &Path) -> Result<KeyEntry> {
    let chain = read_certs(cert_path)?;
    if chain.is_empty() {
        return Err(Error::KeyMaterial(format!(
            "Certificate file for alias '{}' contains no certificates",
            alias
        )));
    }

    let key_pem = fs::read_to_string(key_path).map_err(|e| {
        Error::KeyMaterial(format!("Failed to read key for alias '{}': {}", alias, e))
    })?;
    if key_pem.contains("ENCRYPTED") {
        return Err(Error::KeyMaterial(format!(
            "Private key for alias '{}' is encrypted; store it unencrypted with restricted file permissions",
            alias
        )));
    }

    let key = private_key(&mut key_pem.as_bytes())
        .map_err(|e| {
            Error::KeyMaterial(format!("Failed to parse key for alias '{}': {}", alias, e))
        })?
        .ok_or_else(|| {
            Error::KeyMaterial(format!("Key file for alias '{}' contains no private key", alias))
        })?;

    let signing_key = any_supported_type(&key).map_err(|e| {
        Error::KeyMaterial(format!("Unsupported key for alias '{}': {}", alias, e))
    })?;
    let key_type = KeyType::for_algorithm(signing_key.algorithm()).ok_or_else(|| {
        Error::KeyMaterial(format!(
            "Key algorithm {:?} for alias '{}' cannot be used for client authentication",
            signing_key.algorithm(),
            alias
        ))
    })?;

    Ok(KeyEntry {
        alias: alias.to_string(),
        key_type,
        certified: Arc::new(CertifiedKey::new(chain, signing_key)),
    })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = fs::read(path).map_err(|e| {
        Error::KeyMaterial(format!("Failed to open '{}': {}", path.display(), e))
    })?;
    certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::KeyMaterial(format!(
                "Failed to parse certificates in '{}': {}",
                path.display(),
                e
            ))
        })
}

/// Load CA certificates from a PEM file or a directory of PEM files
pub fn load_trust_store(path: impl AsRef<Path>) -> Result<RootCertStore> {
    let path = path.as_ref();
    let files = if path.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(path)
            .map_err(|e| {
                Error::KeyMaterial(format!(
                    "Failed to open trust store '{}': {}",
                    path.display(),
                    e
                ))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext == "pem" || ext == "crt" || ext == "cer")
            })
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut roots = RootCertStore::empty();
    for file in &files {
        let (added, ignored) = roots.add_parsable_certificates(read_certs(file)?);
        if ignored > 0 {
            tracing::warn!(file = %file.display(), ignored, "Ignored unparsable trust anchors");
        }
        tracing::debug!(file = %file.display(), added, "Trust anchors loaded");
    }

    if roots.is_empty() {
        return Err(Error::KeyMaterial(format!(
            "Trust store '{}' contains no usable CA certificates",
            path.display()
        )));
    }

    Ok(roots)
}

/// Map protocol names to rustls versions; an empty list enables all
pub fn parse_protocols(names: &[String]) -> Result<Vec<&'static SupportedProtocolVersion>> {
    if names.is_empty() {
        return Ok(vec![&version::TLS13, &version::TLS12]);
    }

    let mut versions: Vec<&'static SupportedProtocolVersion> = Vec::new();
    for name in names {
        let selected: &'static SupportedProtocolVersion = match name.to_ascii_uppercase().as_str() {
            "TLSV1.3" | "TLS1.3" => &version::TLS13,
            "TLSV1.2" | "TLS1.2" => &version::TLS12,
            _ => {
                tracing::warn!(protocol = %name, "Unsupported TLS protocol version ignored");
                continue;
            }
        };
        if !versions.iter().any(|v| v.version == selected.version) {
            versions.push(selected);
        }
    }

    if versions.is_empty() {
        return Err(Error::TlsPolicyViolation(format!(
            "None of the enabled protocols {:?} is supported",
            names
        )));
    }
    Ok(versions)
}

/// Client TLS material for one security domain and mode
#[derive(Clone)]
pub struct ClientTls {
    config: Arc<ClientConfig>,
    resolver: Option<Arc<AliasSelectingResolver>>,
}

impl ClientTls {
    /// The shared config
    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    pub fn is_mutual(&self) -> bool {
        self.resolver.is_some()
    }

    /// Config for one connection
    ///
    /// For mutual authentication the returned resolver belongs to this
    /// connection alone and records which certificate it sent.
    pub fn session(&self) -> (Arc<ClientConfig>, Option<Arc<AliasSelectingResolver>>) {
        match &self.resolver {
            None => (self.config.clone(), None),
            Some(shared) => {
                let resolver = Arc::new(shared.for_session());
                let mut config = ClientConfig::clone(&self.config);
                config.client_auth_cert_resolver = resolver.clone();
                (Arc::new(config), Some(resolver))
            }
        }
    }
}

impl fmt::Debug for ClientTls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTls")
            .field("mutual", &self.is_mutual())
            .finish()
    }
}

/// Build the client TLS material for `domain`
///
/// With `mutual` set, the key store is loaded and client certificates are
/// chosen by [`AliasSelectingResolver`]; otherwise no client certificate is
/// ever sent.
pub fn build_client_config(domain: &SecurityDomain, mutual: bool) -> Result<ClientTls> {
    let versions = parse_protocols(&domain.enabled_protocols)?;
    let roots = load_trust_store(&domain.trust_store_path)?;

    let builder = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_protocol_versions(&versions)
        .map_err(|e| Error::KeyMaterial(format!("Failed to build TLS client config: {}", e)))?
        .with_root_certificates(roots);

    let (config, resolver) = if mutual {
        let key_store_path = domain.key_store_path.as_ref().ok_or_else(|| {
            Error::KeyMaterial(format!(
                "Security domain '{}' has no key store for mutual authentication",
                domain.name
            ))
        })?;
        let store = Arc::new(KeyStore::load(key_store_path)?);
        if let Some(alias) = &domain.preferred_key_alias {
            if store.key_type(alias).is_none() {
                tracing::warn!(
                    domain = %domain.name,
                    alias = %alias,
                    "Preferred key alias not found in key store"
                );
            }
        }
        let resolver = Arc::new(AliasSelectingResolver::new(
            store,
            domain.preferred_key_alias.clone(),
        ));
        (
            builder.with_client_cert_resolver(resolver.clone()),
            Some(resolver),
        )
    } else {
        (builder.with_no_client_auth(), None)
    };

    tracing::debug!(domain = %domain.name, mutual, "TLS client config built");
    Ok(ClientTls {
        config: Arc::new(config),
        resolver,
    })
}
