//! Integration tests for the reqwest control transport against a local socket.

use access_gate_control::{ControlError, ControlTransport, HttpControlTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

async fn serve_once(status_line: &'static str, body: &'static str) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let address = listener.local_addr().expect("listener should have address");

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("client should connect");
        let mut buffer = [0_u8; 4096];
        let _ = socket.read(&mut buffer).await;
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });

    Url::parse(&format!("http://{address}/server.php?p=secret")).expect("url should parse")
}

fn local_transport() -> HttpControlTransport {
    let client = reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("client should build");
    HttpControlTransport::from_client(client)
}

#[tokio::test]
async fn http_transport_tests_returns_body_text() {
    let url = serve_once("200 OK", "CODE#https://example.com/portal\n").await;
    let transport = local_transport();

    let body = transport.fetch_text(&url).await.expect("fetch should succeed");
    assert_eq!(body, "CODE#https://example.com/portal\n");
}

#[tokio::test]
async fn http_transport_tests_maps_non_success_status_to_network_error() {
    let url = serve_once("503 Service Unavailable", "down").await;
    let transport = local_transport();

    let error = transport
        .fetch_text(&url)
        .await
        .expect_err("503 should fail");
    match error {
        ControlError::Network(message) => assert!(!message.contains("secret")),
        other => panic!("expected network error, got {other:?}"),
    }
}

#[tokio::test]
async fn http_transport_tests_maps_refused_connection_to_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let address = listener.local_addr().expect("listener should have address");
    drop(listener);

    let url = Url::parse(&format!("http://{address}/server.php")).expect("url should parse");
    let transport = local_transport();
    assert!(matches!(
        transport.fetch_text(&url).await,
        Err(ControlError::Network(_))
    ));
}
