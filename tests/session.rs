//! End-to-end session scenarios against an in-process mock server.

mod common;

use common::{state_body, MockHttpServer, MockResponse};
use std::time::Duration;

use betterclock_time::{connect, ClientError, SessionOptions};

fn clock_server(clock_offset_ms: i64) -> MockHttpServer {
    MockHttpServer::serve(move |request| match request.path() {
        "/healthz" => MockResponse::text("OK\n"),
        "/v1/state" => MockResponse::json(state_body(clock_offset_ms)),
        "/v1/client/disconnect" => MockResponse::json(serde_json::json!({
            "disconnected": true,
            "client_id": "rust-time-lib",
            "instance_id": "srv-echo",
        })),
        "/v1/clients" => MockResponse::json(serde_json::json!({
            "count": 1,
            "clients": [{
                "id": "rust-time-lib",
                "instance_id": "rs-0011223344",
                "ip": "127.0.0.1",
                "request_count": 12,
            }],
        })),
        "/v1" => MockResponse::json(serde_json::json!({
            "api_base": "/v1",
            "state_url": "/v1/state",
            "clients_url": "/v1/clients",
            "health_url": "/healthz",
            "runtime_code_url": "/v1/client/code",
            "disconnect_url": "/v1/client/disconnect",
            "debug_url": "/debug",
            "openapi_url": "/openapi.yaml",
        })),
        _ => MockResponse::not_found(),
    })
}

#[test]
fn state_poll_parses_payload() {
    let server = clock_server(0);
    let client = connect("127.0.0.1", server.port, SessionOptions::default());

    let state = client.get_state().unwrap();
    assert_eq!(state.clients_seen, 1);
    assert_eq!(state.total_requests, 7);
    assert!(state.request_received_unix_ms > 0);
    assert_eq!(state.runtime.source_label, "mock");

    // get_state never touches the offset model.
    assert!(!client.offset_initialized());
    assert_eq!(client.latency_sample_count(), 0);
}

#[test]
fn corrected_time_converges_on_server_offset() {
    let server = clock_server(150);
    let mut client = connect("127.0.0.1", server.port, SessionOptions::default());

    let mut last = None;
    for _ in 0..10 {
        last = Some(client.get_corrected_time().unwrap());
        std::thread::sleep(Duration::from_millis(5));
    }
    let snapshot = last.unwrap();

    // Loopback RTT is tiny, so the estimate lands within a few ms.
    assert!(
        (snapshot.offset_ms - 150.0).abs() <= 5.0,
        "offset {} should be within 5ms of 150",
        snapshot.offset_ms
    );
    let now = common::unix_ms();
    assert!((snapshot.corrected_unix_ms - now - 150).abs() <= 50);
    assert!(client.offset_initialized());
    assert_eq!(client.latency_sample_count(), 10);
    assert!(snapshot.rtt_ms >= 0.0);

    // Shaped strings come from the corrected instant.
    assert!(snapshot.time_12h.ends_with("AM") || snapshot.time_12h.ends_with("PM"));
    assert!(snapshot.corrected_iso_local.contains('T'));
    assert!(!snapshot.date_text.is_empty());
}

#[test]
fn identity_flows_as_headers_and_query() {
    let server = clock_server(0);
    let mut client = connect(
        "127.0.0.1",
        server.port,
        SessionOptions {
            client_name: Some("bench-42".to_string()),
            instance_id: Some("rs-feedfacef0".to_string()),
            ..SessionOptions::default()
        },
    );

    client.get_corrected_time().unwrap();
    client.get_corrected_time().unwrap();

    let requests = server.requests();
    assert!(requests.len() >= 2);
    let first = &requests[0];
    assert!(first.target.contains("client_id=bench-42"));
    assert!(first.target.contains("instance_id=rs-feedfacef0"));
    assert!(first.has_header("x-client-id"));
    assert!(first.has_header("x-client-instance"));
    // Telemetry headers only appear once the offset model is initialized.
    assert!(!first.has_header("x-client-rtt-ms"));
    let second = &requests[1];
    assert!(second.has_header("x-client-rtt-ms"));
    assert!(second.has_header("x-client-offset-ms"));
    assert!(second.has_header("x-client-desync-ms"));
}

#[test]
fn healthz_does_not_send_identity() {
    let server = clock_server(0);
    let client = connect("127.0.0.1", server.port, SessionOptions::default());
    assert!(client.healthz().unwrap());

    let requests = server.requests();
    let health = requests.iter().find(|r| r.path() == "/healthz").unwrap();
    assert!(!health.has_header("x-client-id"));
    assert!(!health.has_header("x-client-instance"));
}

#[test]
fn disconnect_then_reconnect_lifecycle() {
    let server = clock_server(25);
    let mut client = connect("127.0.0.1", server.port, SessionOptions::default());
    let original_instance = client.instance_id().to_string();

    client.get_corrected_time().unwrap();
    assert!(client.offset_initialized());

    let response = client.disconnect().unwrap();
    assert!(response.disconnected);
    assert!(client.is_disconnected());

    // Every operation now fails closed, including plain health checks.
    assert!(matches!(
        client.get_state(),
        Err(ClientError::SessionClosed)
    ));
    assert!(matches!(client.healthz(), Err(ClientError::SessionClosed)));
    assert!(matches!(
        client.get_corrected_time(),
        Err(ClientError::SessionClosed)
    ));

    client.reconnect(true);
    assert!(!client.is_disconnected());
    assert_ne!(client.instance_id(), original_instance);
    assert!(!client.offset_initialized());
    assert_eq!(client.latency_sample_count(), 0);

    // The session is usable again.
    assert!(client.get_state().is_ok());
}

#[test]
fn clients_and_index_pass_through() {
    let server = clock_server(0);
    let client = connect("127.0.0.1", server.port, SessionOptions::default());

    let roster = client.get_clients().unwrap();
    assert_eq!(roster.count, 1);
    assert_eq!(roster.clients[0].id, "rust-time-lib");
    assert_eq!(roster.clients[0].request_count, 12);

    let index = client.get_api_index().unwrap();
    assert_eq!(index.state_url, "/v1/state");
    assert_eq!(index.openapi_url, "/openapi.yaml");

    let traffic = client.traffic();
    assert_eq!(traffic.requests_sent, 2);
    assert!(traffic.request_bytes_estimate > 0);
    assert!(traffic.response_bytes > 0);
}

#[test]
fn http_error_statuses_surface_as_transport() {
    let server = clock_server(0);
    let client = connect("127.0.0.1", server.port, SessionOptions::default());

    let err = client.get_runtime_code().unwrap_err();
    match err {
        ClientError::Transport { kind, .. } => {
            assert_eq!(
                kind,
                betterclock_time::TransportErrorKind::HttpStatus(404)
            );
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[test]
fn malformed_state_payload_is_a_parse_error() {
    let server = MockHttpServer::serve(|request| match request.path() {
        "/v1/state" => MockResponse::text("{truncated"),
        _ => MockResponse::not_found(),
    });
    let mut client = connect("127.0.0.1", server.port, SessionOptions::default());
    assert!(matches!(
        client.get_corrected_time(),
        Err(ClientError::Parse(_))
    ));
    // A failed poll leaves the model untouched.
    assert!(!client.offset_initialized());
}
