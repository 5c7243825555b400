#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use ihe_atna::record::{AuditEventMessage, CodedValue, EventIdentification, EventOutcome};
use ihe_atna::sender::OctetCountingCodec;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::FramedRead;

pub fn message(code: &str) -> AuditEventMessage {
    AuditEventMessage::new(EventIdentification::new(
        CodedValue::new(code, "DCM", "Query"),
        EventOutcome::Success,
    ))
}

/// A CA able to issue node certificates
pub struct TestCa {
    pub key: KeyPair,
    pub cert: Certificate,
}

impl TestCa {
    pub fn new(name: &str) -> Self {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key).unwrap();
        Self { key, cert }
    }

    /// Issue a leaf certificate for `names`
    pub fn issue(&self, names: &[&str]) -> (KeyPair, Certificate) {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let mut params = CertificateParams::new(names).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, "atna-node");
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        (key, cert)
    }

    pub fn write_pem(&self, path: &Path) {
        fs::write(path, self.cert.pem()).unwrap();
    }

    pub fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.cert.der().clone()).unwrap();
        roots
    }
}

/// Write `<alias>.crt` / `<alias>.key` into a key store directory
pub fn write_key_pair(dir: &Path, alias: &str, key: &KeyPair, cert: &Certificate) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(format!("{}.crt", alias)), cert.pem()).unwrap();
    fs::write(dir.join(format!("{}.key", alias)), key.serialize_pem()).unwrap();
    dir.to_path_buf()
}

fn server_config(ca: &TestCa, require_client_auth: bool) -> Arc<ServerConfig> {
    let provider = Arc::new(ring::default_provider());
    let (key, cert) = ca.issue(&["localhost", "127.0.0.1"]);
    let chain: Vec<CertificateDer<'static>> = vec![cert.der().clone()];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap();
    let config = if require_client_auth {
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(ca.roots()), provider)
            .build()
            .unwrap();
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    }
    .with_single_cert(chain, key)
    .unwrap();

    Arc::new(config)
}

/// Outcome of one accepted connection
#[derive(Debug)]
pub enum Accepted {
    Frames(Vec<Vec<u8>>),
    HandshakeFailed(String),
}

/// Plain TCP audit repository; reports the frames of each connection
pub async fn spawn_tcp_repository() -> (SocketAddr, mpsc::UnboundedReceiver<Accepted>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(Accepted::Frames(read_frames(stream).await));
            });
        }
    });

    (addr, rx)
}

/// TLS audit repository issued by `ca`, optionally requiring client certificates
pub async fn spawn_tls_repository(
    ca: &TestCa,
    require_client_auth: bool,
) -> (SocketAddr, mpsc::UnboundedReceiver<Accepted>) {
    let acceptor = TlsAcceptor::from(server_config(ca, require_client_auth));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let accepted = match acceptor.accept(stream).await {
                    Ok(tls) => Accepted::Frames(read_frames(tls).await),
                    Err(e) => Accepted::HandshakeFailed(e.to_string()),
                };
                let _ = tx.send(accepted);
            });
        }
    });

    (addr, rx)
}

async fn read_frames<S>(stream: S) -> Vec<Vec<u8>>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(stream, OctetCountingCodec::new());
    let mut received = Vec::new();
    while let Some(Ok(frame)) = frames.next().await {
        received.push(frame.to_vec());
    }
    received
}
