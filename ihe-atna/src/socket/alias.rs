//! Alias-aware client certificate selection
//!
//! During mutual authentication the peer offers the signature schemes it
//! accepts. For each key type in that order we look at the aliases that hold
//! a key of that type and pick the configured preferred alias if present.
//! There is no fallback: if the preferred alias is not among the candidates,
//! no certificate is presented and the handshake fails closed.
//!
//! Each resolver records what it did during its handshake as a
//! [`CertificateSelection`], so the socket handler can fail a connection the
//! server would otherwise drop after the client has finished.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio_rustls::rustls::client::ResolvesClientCert;
use tokio_rustls::rustls::sign::CertifiedKey;
use tokio_rustls::rustls::{SignatureAlgorithm, SignatureScheme};

use super::tls::KeyStore;

/// Private key algorithm family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Rsa,
    Ec,
    Ed25519,
}

impl KeyType {
    /// Key type a signature scheme needs, if it is one we can hold
    pub fn for_scheme(scheme: SignatureScheme) -> Option<Self> {
        match scheme {
            SignatureScheme::RSA_PKCS1_SHA1
            | SignatureScheme::RSA_PKCS1_SHA256
            | SignatureScheme::RSA_PKCS1_SHA384
            | SignatureScheme::RSA_PKCS1_SHA512
            | SignatureScheme::RSA_PSS_SHA256
            | SignatureScheme::RSA_PSS_SHA384
            | SignatureScheme::RSA_PSS_SHA512 => Some(Self::Rsa),
            SignatureScheme::ECDSA_SHA1_Legacy
            | SignatureScheme::ECDSA_NISTP256_SHA256
            | SignatureScheme::ECDSA_NISTP384_SHA384
            | SignatureScheme::ECDSA_NISTP521_SHA512 => Some(Self::Ec),
            SignatureScheme::ED25519 => Some(Self::Ed25519),
            _ => None,
        }
    }

    /// Key type of a loaded signing key
    pub fn for_algorithm(algorithm: SignatureAlgorithm) -> Option<Self> {
        match algorithm {
            SignatureAlgorithm::RSA => Some(Self::Rsa),
            SignatureAlgorithm::ECDSA => Some(Self::Ec),
            SignatureAlgorithm::ED25519 => Some(Self::Ed25519),
            _ => None,
        }
    }

    /// Distinct key types in the order the schemes were offered
    pub fn offered(schemes: &[SignatureScheme]) -> Vec<Self> {
        let mut out = Vec::new();
        for key_type in schemes.iter().filter_map(|s| Self::for_scheme(*s)) {
            if !out.contains(&key_type) {
                out.push(key_type);
            }
        }
        out
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa => write!(f, "RSA"),
            Self::Ec => write!(f, "EC"),
            Self::Ed25519 => write!(f, "Ed25519"),
        }
    }
}

/// Pick the alias to present
///
/// `candidates` lists, per key type in the peer's order, the aliases holding
/// a key of that type. Returns the preferred alias from the first key type
/// that has it; returns `None` when there is no preferred alias or no
/// candidate equals it.
pub fn select_alias<S: AsRef<str>>(
    preferred: Option<&str>,
    candidates: &[(KeyType, Vec<S>)],
) -> Option<String> {
    let preferred = preferred?;
    candidates
        .iter()
        .flat_map(|(_, aliases)| aliases.iter())
        .find(|alias| alias.as_ref() == preferred)
        .map(|alias| alias.as_ref().to_string())
}

/// What a resolver did during one handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSelection {
    /// The server did not ask for a client certificate
    NotRequested,
    /// The alias whose certificate was sent
    Presented(String),
    /// A certificate was requested and none was sent
    Withheld,
}

/// rustls client certificate resolver that only ever presents the preferred alias
pub struct AliasSelectingResolver {
    store: Arc<KeyStore>,
    preferred: Option<String>,
    selection: Mutex<CertificateSelection>,
}

impl AliasSelectingResolver {
    pub fn new(store: Arc<KeyStore>, preferred: Option<String>) -> Self {
        if preferred.is_none() {
            tracing::warn!("No preferred key alias configured; no client certificate will be presented");
        }
        Self {
            store,
            preferred,
            selection: Mutex::new(CertificateSelection::NotRequested),
        }
    }

    /// A resolver over the same key store with a fresh selection record
    pub fn for_session(&self) -> Self {
        Self {
            store: self.store.clone(),
            preferred: self.preferred.clone(),
            selection: Mutex::new(CertificateSelection::NotRequested),
        }
    }

    /// Outcome of the most recent certificate request
    pub fn selection(&self) -> CertificateSelection {
        self.selection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, selection: CertificateSelection) {
        *self
            .selection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = selection;
    }

    /// Aliases grouped by key type, in `offered` order
    fn candidates(&self, offered: &[KeyType]) -> Vec<(KeyType, Vec<&str>)> {
        offered
            .iter()
            .map(|key_type| (*key_type, self.store.aliases_for(*key_type).collect()))
            .collect()
    }
}

impl fmt::Debug for AliasSelectingResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliasSelectingResolver")
            .field("aliases", &self.store.len())
            .field("preferred", &self.preferred)
            .field("selection", &self.selection())
            .finish()
    }
}

impl ResolvesClientCert for AliasSelectingResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        let offered = KeyType::offered(sigschemes);
        let candidates = self.candidates(&offered);

        let certified = select_alias(self.preferred.as_deref(), &candidates)
            .and_then(|alias| self.store.certified_key(&alias).map(|key| (alias, key)));

        match certified {
            Some((alias, key)) => {
                tracing::debug!(alias = %alias, "Presenting client certificate");
                self.record(CertificateSelection::Presented(alias));
                Some(key)
            }
            None => {
                tracing::warn!(
                    preferred = ?self.preferred,
                    offered = ?offered,
                    "Preferred key alias not usable for offered key types; presenting no certificate"
                );
                self.record(CertificateSelection::Withheld);
                None
            }
        }
    }

    fn has_certs(&self) -> bool {
        self.preferred.is_some() && !self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_preferred_when_present() {
        let candidates = vec![
            (KeyType::Rsa, vec!["legacy", "node1"]),
            (KeyType::Ec, vec!["node2"]),
        ];
        assert_eq!(select_alias(Some("node1"), &candidates), Some("node1".to_string()));
        assert_eq!(select_alias(Some("node2"), &candidates), Some("node2".to_string()));
    }

    #[test]
    fn test_fails_closed() {
        let candidates = vec![(KeyType::Rsa, vec!["legacy", "node1"])];
        assert_eq!(select_alias(Some("node9"), &candidates), None);
        assert_eq!(select_alias(None, &candidates), None);
        assert_eq!(select_alias::<&str>(Some("node1"), &[]), None);
    }

    #[test]
    fn test_offered_order_is_kept() {
        let offered = KeyType::offered(&[
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PKCS1_SHA256,
        ]);
        assert_eq!(offered, vec![KeyType::Ec, KeyType::Rsa, KeyType::Ed25519]);
    }

    fn ec_store() -> (tempfile::TempDir, Arc<KeyStore>) {
        let dir = tempfile::tempdir().unwrap();
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let cert = rcgen::CertificateParams::new(vec!["node.local".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        std::fs::write(dir.path().join("node1.crt"), cert.pem()).unwrap();
        std::fs::write(dir.path().join("node1.key"), key.serialize_pem()).unwrap();
        let store = Arc::new(KeyStore::load(dir.path()).unwrap());
        (dir, store)
    }

    #[test]
    fn test_resolver_records_selection() {
        let (_dir, store) = ec_store();
        let ec = [SignatureScheme::ECDSA_NISTP256_SHA256];

        let resolver = AliasSelectingResolver::new(store.clone(), Some("node1".to_string()));
        assert_eq!(resolver.selection(), CertificateSelection::NotRequested);
        assert!(resolver.resolve(&[], &ec).is_some());
        assert_eq!(
            resolver.selection(),
            CertificateSelection::Presented("node1".to_string())
        );

        // Server only accepts RSA; the EC alias is never offered
        assert!(resolver.resolve(&[], &[SignatureScheme::RSA_PSS_SHA256]).is_none());
        assert_eq!(resolver.selection(), CertificateSelection::Withheld);

        let unknown = AliasSelectingResolver::new(store, Some("node9".to_string()));
        assert!(unknown.resolve(&[], &ec).is_none());
        assert_eq!(unknown.selection(), CertificateSelection::Withheld);
    }

    #[test]
    fn test_session_resolvers_are_independent() {
        let (_dir, store) = ec_store();
        let shared = AliasSelectingResolver::new(store, Some("node1".to_string()));

        let first = shared.for_session();
        let second = shared.for_session();
        assert!(first
            .resolve(&[], &[SignatureScheme::ECDSA_NISTP256_SHA256])
            .is_some());

        assert!(matches!(first.selection(), CertificateSelection::Presented(_)));
        assert_eq!(second.selection(), CertificateSelection::NotRequested);
        assert_eq!(shared.selection(), CertificateSelection::NotRequested);
    }

    #[test]
    fn test_algorithm_mapping() {
        assert_eq!(KeyType::for_algorithm(SignatureAlgorithm::ECDSA), Some(KeyType::Ec));
        assert_eq!(KeyType::for_algorithm(SignatureAlgorithm::RSA), Some(KeyType::Rsa));
        assert_eq!(KeyType::for_algorithm(SignatureAlgorithm::ED448), None);
    }
}
