mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{message, spawn_tls_repository, write_key_pair, Accepted, TestCa};
use ihe_atna::prelude::*;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_rustls::rustls::ProtocolVersion;

struct Node {
    _dir: tempfile::TempDir,
    domain: SecurityDomain,
}

/// A node trusting `trusted`, holding a client certificate issued by `issuer`
fn node(trusted: &TestCa, issuer: &TestCa, alias: &str, preferred: Option<&str>) -> Node {
    let dir = tempfile::tempdir().unwrap();
    let trust = dir.path().join("ca.pem");
    trusted.write_pem(&trust);

    let (key, cert) = issuer.issue(&["node.local"]);
    let key_store = write_key_pair(&dir.path().join("keys"), alias, &key, &cert);

    let mut domain = SecurityDomain::new("arr", &trust).with_key_store(key_store, None);
    if let Some(preferred) = preferred {
        domain = domain.with_preferred_alias(preferred);
    }
    Node { _dir: dir, domain }
}

fn handler_for(domain: &SecurityDomain) -> Arc<SocketHandler> {
    handler_with(domain, 1, Duration::ZERO)
}

fn handler_with(
    domain: &SecurityDomain,
    retries: u32,
    retry_wait: Duration,
) -> Arc<SocketHandler> {
    let registry = Arc::new(SecurityDomainRegistry::new());
    registry.register(domain.clone());
    registry.map_endpoint("tls://127.0.0.1", &domain.name).unwrap();
    Arc::new(SocketHandler::new(
        SocketConfig {
            retries,
            retry_wait,
            connect_timeout: Duration::from_secs(2),
            socket_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        registry,
    ))
}

async fn next_accepted(accepted: &mut UnboundedReceiver<Accepted>) -> Accepted {
    tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .unwrap()
        .unwrap()
}

async fn expect_frames(accepted: &mut UnboundedReceiver<Accepted>) -> Vec<Vec<u8>> {
    match next_accepted(accepted).await {
        Accepted::Frames(frames) => frames,
        other => panic!("unexpected {:?}", other),
    }
}

async fn expect_rejected(accepted: &mut UnboundedReceiver<Accepted>) {
    match next_accepted(accepted).await {
        Accepted::HandshakeFailed(_) => {}
        other => panic!("server accepted an unauthenticated client: {:?}", other),
    }
}

#[tokio::test]
async fn test_mutual_tls_delivers_records() {
    let ca = TestCa::new("atna-ca");
    let node = node(&ca, &ca, "node1", Some("node1"));
    let (addr, mut accepted) = spawn_tls_repository(&ca, true).await;

    let sender = AuditMessageSender::new(
        Destination::new("127.0.0.1", addr.port(), TransportKind::TlsTwoWay),
        handler_for(&node.domain),
    );
    let records = vec![message("110112"), message("110114")];
    let report = sender.send_audit_events(&records, None).await.unwrap();
    assert_eq!(report.delivered, 2);

    let frames = expect_frames(&mut accepted).await;
    let expected: Vec<Vec<u8>> = records.iter().map(|r| r.to_bytes().unwrap()).collect();
    assert_eq!(frames, expected);
}

#[tokio::test]
async fn test_mutual_session_defaults_to_tls13() {
    let ca = TestCa::new("atna-ca");
    let node = node(&ca, &ca, "node1", Some("node1"));
    let (addr, mut accepted) = spawn_tls_repository(&ca, true).await;

    let stream = handler_for(&node.domain)
        .get_socket("127.0.0.1", addr.port(), true, None, None)
        .await
        .unwrap();
    assert_eq!(stream.tls_version(), Some(ProtocolVersion::TLSv1_3));
    drop(stream);

    assert!(expect_frames(&mut accepted).await.is_empty());
}

#[tokio::test]
async fn test_one_way_tls_sends_no_certificate() {
    let ca = TestCa::new("atna-ca");
    let node = node(&ca, &ca, "node1", None);
    let (addr, mut accepted) = spawn_tls_repository(&ca, false).await;

    let handler = handler_for(&node.domain);
    let stream = handler
        .get_socket_with_mode(
            "127.0.0.1",
            addr.port(),
            ConnectionSecurity::TlsOneWay,
            None,
            None,
        )
        .await
        .unwrap();
    assert!(stream.is_tls());
    assert!(stream.tls_version().is_some());
    drop(stream);

    assert!(expect_frames(&mut accepted).await.is_empty());
}

#[tokio::test]
async fn test_untrusted_server_fails_handshake() {
    let server_ca = TestCa::new("rogue-ca");
    let node_ca = TestCa::new("atna-ca");
    let node = node(&node_ca, &node_ca, "node1", Some("node1"));
    let (addr, _accepted) = spawn_tls_repository(&server_ca, false).await;

    let err = handler_for(&node.domain)
        .get_socket("127.0.0.1", addr.port(), true, None, None)
        .await
        .unwrap_err();

    assert_eq!(err.connect_phase(), Some(ConnectPhase::Handshake));
    assert!(matches!(err, Error::HandshakeFailure { port, .. } if port == addr.port()));
}

#[tokio::test]
async fn test_handshake_failure_is_not_retried() {
    let server_ca = TestCa::new("rogue-ca");
    let node_ca = TestCa::new("atna-ca");
    let node = node(&node_ca, &node_ca, "node1", Some("node1"));
    let (addr, mut accepted) = spawn_tls_repository(&server_ca, false).await;

    let retry_wait = Duration::from_secs(3);
    let started = Instant::now();
    let err = handler_with(&node.domain, 3, retry_wait)
        .get_socket("127.0.0.1", addr.port(), true, None, None)
        .await
        .unwrap_err();

    assert!(started.elapsed() < retry_wait, "elapsed {:?}", started.elapsed());
    assert!(matches!(err, Error::HandshakeFailure { .. }));
    expect_rejected(&mut accepted).await;
    let second = tokio::time::timeout(Duration::from_millis(500), accepted.recv()).await;
    assert!(second.is_err(), "server saw a second connection: {:?}", second);
}

async fn assert_unknown_alias_rejected(protocols: &[&str]) {
    let ca = TestCa::new("atna-ca");
    let mut node = node(&ca, &ca, "node1", Some("someone-else"));
    if !protocols.is_empty() {
        node.domain = node.domain.with_protocols(protocols.iter().copied());
    }
    let (addr, mut accepted) = spawn_tls_repository(&ca, true).await;

    let err = handler_for(&node.domain)
        .get_socket("127.0.0.1", addr.port(), true, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.connect_phase(), Some(ConnectPhase::Handshake));
    expect_rejected(&mut accepted).await;
}

#[tokio::test]
async fn test_unknown_preferred_alias_is_rejected() {
    assert_unknown_alias_rejected(&[]).await;
}

#[tokio::test]
async fn test_unknown_preferred_alias_is_rejected_over_tls12() {
    assert_unknown_alias_rejected(&["TLSv1.2"]).await;
}

#[tokio::test]
async fn test_send_with_unknown_alias_reports_failure() {
    let ca = TestCa::new("atna-ca");
    let node = node(&ca, &ca, "node1", Some("someone-else"));
    let (addr, mut accepted) = spawn_tls_repository(&ca, true).await;

    let sender = AuditMessageSender::new(
        Destination::new("127.0.0.1", addr.port(), TransportKind::TlsTwoWay),
        handler_for(&node.domain),
    );
    let err = sender
        .send_audit_events(&[message("110112"), message("110114")], None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HandshakeFailure { .. }));
    expect_rejected(&mut accepted).await;
}

async fn assert_foreign_client_rejected(protocols: &[&str]) {
    let ca = TestCa::new("atna-ca");
    let foreign = TestCa::new("foreign-ca");
    let mut node = node(&ca, &foreign, "node1", Some("node1"));
    if !protocols.is_empty() {
        node.domain = node.domain.with_protocols(protocols.iter().copied());
    }
    let (addr, mut accepted) = spawn_tls_repository(&ca, true).await;

    let sender = AuditMessageSender::new(
        Destination::new("127.0.0.1", addr.port(), TransportKind::TlsTwoWay),
        handler_for(&node.domain),
    );
    let err = sender
        .send_audit_events(&[message("110112")], None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HandshakeFailure { .. }), "unexpected {:?}", err);
    expect_rejected(&mut accepted).await;
}

#[tokio::test]
async fn test_client_from_foreign_ca_is_rejected() {
    assert_foreign_client_rejected(&[]).await;
}

#[tokio::test]
async fn test_client_from_foreign_ca_is_rejected_over_tls12() {
    assert_foreign_client_rejected(&["TLSv1.2"]).await;
}

#[tokio::test]
async fn test_mutual_without_key_store_is_key_material_error() {
    let ca = TestCa::new("atna-ca");
    let dir = tempfile::tempdir().unwrap();
    let trust = dir.path().join("ca.pem");
    ca.write_pem(&trust);
    let (addr, _accepted) = spawn_tls_repository(&ca, true).await;

    let domain = SecurityDomain::new("arr", Path::new(&trust));
    let err = handler_for(&domain)
        .get_socket("127.0.0.1", addr.port(), true, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.connect_phase(), Some(ConnectPhase::BuildTlsContext));
}

#[tokio::test]
async fn test_unmapped_endpoint_fails_domain_resolution() {
    let ca = TestCa::new("atna-ca");
    let node = node(&ca, &ca, "node1", Some("node1"));
    let handler = handler_for(&node.domain);

    let err = handler
        .get_socket("localhost", 6514, true, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DomainResolution { ref host, port: 6514 } if host == "localhost"));
}
