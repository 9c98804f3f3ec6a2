//! Integration tests for listener startup, failure and shutdown

mod common;

use common::{create_test_app_state, test_config};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use twitch_relay_api::{start_server, start_subscriber_server, ServiceError, TlsConfig};

fn loopback_any_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn test_subscriber_listener_stops_on_graceful_shutdown() {
    let state = create_test_app_state(test_config());
    let handle = axum_server::Handle::new();
    let server = tokio::spawn(start_subscriber_server(
        loopback_any_port(),
        None,
        state.gateway_state(),
        handle.clone(),
    ));

    let bound = handle.listening().await.expect("listener address");

    // Plain HTTP without upgrade headers is refused.
    let response = reqwest::get(format!("http://{}/", bound)).await.unwrap();
    assert!(response.status().is_client_error());

    handle.graceful_shutdown(Some(Duration::from_secs(1)));
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("listener stopped")
        .expect("listener task");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_subscriber_listener_serves_tls_with_generated_certificate() {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&key_pair)
        .unwrap();
    let dir = TempDir::new().unwrap();
    let tls = TlsConfig {
        cert_path: dir.path().join("relay-cert.pem"),
        key_path: dir.path().join("relay-key.pem"),
    };
    std::fs::write(&tls.cert_path, cert.pem()).unwrap();
    std::fs::write(&tls.key_path, key_pair.serialize_pem()).unwrap();

    let state = create_test_app_state(test_config());
    let handle = axum_server::Handle::new();
    let server = tokio::spawn({
        let handle = handle.clone();
        async move {
            start_subscriber_server(loopback_any_port(), Some(&tls), state.gateway_state(), handle)
                .await
        }
    });

    let bound = handle.listening().await.expect("TLS listener address");
    assert!(tokio::net::TcpStream::connect(bound).await.is_ok());

    handle.graceful_shutdown(Some(Duration::from_secs(1)));
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("listener stopped")
        .expect("listener task");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_subscriber_listener_reports_bind_failure() {
    let occupied = TcpListener::bind(loopback_any_port()).unwrap();
    let addr = occupied.local_addr().unwrap();
    let state = create_test_app_state(test_config());

    let result = start_subscriber_server(
        addr,
        None,
        state.gateway_state(),
        axum_server::Handle::new(),
    )
    .await;

    match result {
        Err(e @ ServiceError::BindFailed { .. }) => assert_eq!(e.exit_code(), 1),
        other => panic!("expected BindFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_subscriber_listener_reports_unreadable_certificate() {
    let state = create_test_app_state(test_config());
    let tls = TlsConfig {
        cert_path: PathBuf::from("/nonexistent/relay-cert.pem"),
        key_path: PathBuf::from("/nonexistent/relay-key.pem"),
    };

    let result = start_subscriber_server(
        loopback_any_port(),
        Some(&tls),
        state.gateway_state(),
        axum_server::Handle::new(),
    )
    .await;

    match result {
        Err(e @ ServiceError::Tls(_)) => assert_eq!(e.exit_code(), 4),
        other => panic!("expected Tls, got {:?}", other),
    }
}

#[tokio::test]
async fn test_webhook_listener_reports_bind_failure() {
    let occupied = TcpListener::bind(loopback_any_port()).unwrap();
    let mut config = test_config();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = occupied.local_addr().unwrap().port();
    let state = create_test_app_state(config);

    let result = start_server(state, std::future::pending::<()>()).await;

    assert!(matches!(result, Err(ServiceError::BindFailed { .. })));
}
