//! In-process mock servers for end-to-end discovery and session tests.

// Each test binary compiles its own copy; not every binary uses every helper.
#![allow(dead_code)]

use serde_json::json;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Route client log output through the test harness when RUST_LOG is set.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// One parsed request head as seen by the mock server.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    /// Request target: path plus query string.
    pub target: String,
    /// Full request head, request line and headers.
    pub raw: String,
}

impl ReceivedRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }

    pub fn has_header(&self, name: &str) -> bool {
        let needle = format!("\r\n{}:", name.to_ascii_lowercase());
        self.raw.to_ascii_lowercase().contains(&needle)
    }
}

pub struct MockResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn text(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain",
            body: b"not found".to_vec(),
        }
    }
}

/// Minimal HTTP/1.1 server on an ephemeral loopback port.
pub struct MockHttpServer {
    pub port: u16,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockHttpServer {
    pub fn serve<F>(responder: F) -> Self
    where
        F: Fn(&ReceivedRequest) -> MockResponse + Send + Sync + 'static,
    {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock http server");
        let port = listener.local_addr().unwrap().port();
        listener.set_nonblocking(true).unwrap();

        let requests: Arc<Mutex<Vec<ReceivedRequest>>> = Arc::default();
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_requests = requests.clone();
        let thread_shutdown = shutdown.clone();

        let handle = std::thread::spawn(move || {
            while !thread_shutdown.load(Relaxed) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        if let Some((request, stream)) = read_request(stream) {
                            thread_requests.lock().unwrap().push(request.clone());
                            write_response(stream, &responder(&request));
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            port,
            requests,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Server whose `/healthz` answers `OK\n` and everything else 404s.
    pub fn healthz_ok() -> Self {
        Self::serve(|request| {
            if request.path() == "/healthz" {
                MockResponse::text("OK\n")
            } else {
                MockResponse::not_found()
            }
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn read_request(mut stream: TcpStream) -> Option<(ReceivedRequest, TcpStream)> {
    // Accepted sockets inherit non-blocking mode on some platforms.
    stream.set_nonblocking(false).ok()?;
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .ok()?;
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") && head.len() < 16 * 1024 {
        match stream.read(&mut byte) {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    let raw = String::from_utf8_lossy(&head).into_owned();
    let target = raw
        .lines()
        .next()?
        .split_whitespace()
        .nth(1)?
        .to_string();
    Some((ReceivedRequest { target, raw }, stream))
}

fn write_response(mut stream: TcpStream, response: &MockResponse) {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        if response.status == 200 { "OK" } else { "ERR" },
        response.content_type,
        response.body.len(),
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&response.body);
    let _ = stream.flush();
}

/// `/v1/state` body whose server clock leads the local clock by
/// `clock_offset_ms`, with both exchange timestamps populated.
pub fn state_body(clock_offset_ms: i64) -> serde_json::Value {
    let server_now = unix_ms() + clock_offset_ms;
    json!({
        "runtime": {
            "iso_local": "2026-08-01T10:00:00.000",
            "hour": 10, "minute": 0, "second": 0,
            "source_label": "mock",
            "warning_enabled": false,
            "warning_active_count": 0,
            "warning_pulse_on": false,
            "warning_lead_time_ms": 0,
            "warning_pulse_time_ms": 0,
            "triggered_count": 0,
            "armed_count": 0,
            "updated_unix_ms": server_now,
        },
        "clients_seen": 1,
        "total_requests": 7,
        "total_in_bytes": 900,
        "total_out_bytes": 4200,
        "session_in_bytes_per_sec": 120.5,
        "session_out_bytes_per_sec": 610.0,
        "server_started_unix_ms": server_now - 60_000,
        "session_first_in_unix_ms": server_now - 5_000,
        "session_last_in_unix_ms": server_now,
        "session_last_out_unix_ms": server_now,
        "client_debug_mode": false,
        "request_received_unix_ms": server_now,
        "response_unix_ms": server_now,
        "response_send_unix_ms": server_now,
        "server_processing_ms": 0,
        "response_iso_local": "2026-08-01T10:00:00.000",
    })
}

/// UDP discovery responder: answers any datagram with a server announcement.
pub struct MockUdpResponder {
    pub port: u16,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockUdpResponder {
    pub fn spawn(api_port: u16, version: i64) -> Self {
        init_tracing();
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind mock udp responder");
        let port = socket.local_addr().unwrap().port();
        socket
            .set_read_timeout(Some(Duration::from_millis(25)))
            .unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let handle = std::thread::spawn(move || {
            let reply = json!({
                "service": "betterclock",
                "api_port": api_port,
                "version": version,
            })
            .to_string();
            let mut buf = [0u8; 2048];
            while !thread_shutdown.load(Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((_, source)) => {
                        let _ = socket.send_to(reply.as_bytes(), source);
                    }
                    Err(_) => {}
                }
            }
        });

        Self {
            port,
            shutdown,
            handle: Some(handle),
        }
    }
}

impl Drop for MockUdpResponder {
    fn drop(&mut self) {
        self.shutdown.store(true, Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A loopback port with nothing listening on it.
pub fn dead_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();
    drop(socket);
    port
}
