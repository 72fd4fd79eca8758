//! Client session: identity, lifecycle, and the polling API.
//!
//! A [`TimeClient`] owns one endpoint, one identity, and one offset model.
//! It is single-owner state driven by caller polls; nothing runs in the
//! background, and concurrent use must be serialized externally.

use chrono::{Local, TimeZone, Timelike};
use rand::Rng;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::Duration;

use crate::discover::{discover_server, DiscoveryOptions, DEFAULT_PORT};
use crate::error::ClientError;
use crate::fmt::{format_time_12h, unix_ms_now};
use crate::messages::{
    ApiIndexResponse, ClientsResponse, ConnectionInfo, CorrectedTimeSnapshot, DeviceIpInfo,
    DisconnectResponse, StateResponse,
};
use crate::netinfo::{
    self, detect_lan_ip, device_hostname, lookup_public_ip, resolve_hostname_ip, LOCALHOST_IP,
};
use crate::offset::OffsetModel;
use crate::sample::compute_network_sample;
use crate::transport::{HttpTransport, IdentityHeaders, TimedResponse};

/// Identity a session reports when the caller does not pick a name.
pub const DEFAULT_CLIENT_ID: &str = "rust-time-lib";
/// Per-request timeout unless overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Session construction knobs.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Identity sent as `X-Client-Id` and `client_id`.
    pub client_id: String,
    /// Caller-chosen display name; overrides `client_id` when non-blank.
    pub client_name: Option<String>,
    /// Explicit instance id for fleet deployments; random when `None`.
    pub instance_id: Option<String>,
    pub timeout: Duration,
    pub https: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_name: None,
            instance_id: None,
            timeout: DEFAULT_TIMEOUT,
            https: false,
        }
    }
}

fn new_instance_id() -> String {
    let mut raw = [0u8; 5];
    rand::thread_rng().fill(&mut raw[..]);
    let hex: String = raw.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("rs-{hex}")
}

/// Host and port parsed back out of a base URL.
fn host_port_from_url(base_url: &str) -> (String, Option<u16>) {
    match reqwest::Url::parse(base_url) {
        Ok(url) => (url.host_str().unwrap_or("").to_string(), url.port()),
        Err(_) => (String::new(), None),
    }
}

/// Cumulative client-side traffic accounting for one session.
///
/// Request bytes are an estimate reconstructed from the request line and
/// headers the client set; the HTTP engine may write more on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionTraffic {
    pub requests_sent: u64,
    pub request_bytes_estimate: u64,
    pub response_bytes: u64,
}

/// A connected BetterClock session.
pub struct TimeClient {
    base_url: String,
    connection_host: String,
    connection_port: u16,
    local: bool,
    client_id: String,
    instance_id: String,
    disconnected: bool,
    transport: HttpTransport,
    offset: OffsetModel,
    // Sampling counters, not synchronisation.
    requests_sent: AtomicU64,
    request_bytes_estimate: AtomicU64,
    response_bytes: AtomicU64,
}

impl std::fmt::Debug for TimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeClient")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("instance_id", &self.instance_id)
            .field("disconnected", &self.disconnected)
            .finish_non_exhaustive()
    }
}

impl TimeClient {
    fn build(
        host: Option<&str>,
        port: u16,
        local: bool,
        base_url: Option<&str>,
        opts: SessionOptions,
    ) -> Self {
        let fallback_host = if local {
            LOCALHOST_IP
        } else {
            host.unwrap_or(LOCALHOST_IP)
        };
        let scheme = if opts.https { "https" } else { "http" };
        let base_url = match base_url {
            Some(url) => url.trim().trim_end_matches('/').to_string(),
            None => format!("{scheme}://{fallback_host}:{port}"),
        };

        let (parsed_host, parsed_port) = host_port_from_url(&base_url);
        // A hostless absolute URL is a caller bug; the configured endpoint
        // stays authoritative for connection info.
        let connection_host = if parsed_host.is_empty() {
            fallback_host.to_string()
        } else {
            parsed_host
        };
        let connection_port = parsed_port.unwrap_or(port);

        let client_id = opts
            .client_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .unwrap_or(opts.client_id);
        let instance_id = opts.instance_id.clone().unwrap_or_else(new_instance_id);

        Self {
            base_url,
            connection_host,
            connection_port,
            local,
            client_id,
            instance_id,
            disconnected: false,
            transport: HttpTransport::new(opts.timeout),
            offset: OffsetModel::new(),
            requests_sent: AtomicU64::new(0),
            request_bytes_estimate: AtomicU64::new(0),
            response_bytes: AtomicU64::new(0),
        }
    }

    /// Session against an explicit endpoint. No discovery, no I/O.
    pub fn connect(host: &str, port: u16, opts: SessionOptions) -> Self {
        Self::build(Some(host), port, false, None, opts)
    }

    /// Session against a server on this machine.
    pub fn connect_local(port: u16, opts: SessionOptions) -> Self {
        Self::build(None, port, true, None, opts)
    }

    /// Session against a previously discovered or externally known base URL.
    pub fn from_base_url(base_url: &str, local: bool, opts: SessionOptions) -> Self {
        Self::build(None, DEFAULT_PORT, local, Some(base_url), opts)
    }

    /// Run discovery and connect to whatever it finds.
    pub fn connect_auto(
        opts: SessionOptions,
        discovery: &DiscoveryOptions,
    ) -> Result<Self, ClientError> {
        let found = discover_server(discovery).ok_or(ClientError::NoServerDiscovered {
            port: discovery.port,
        })?;
        tracing::info!(base_url = %found.base_url, via = %found.via, "connected via discovery");
        let local = found.ip == LOCALHOST_IP;
        Ok(Self::from_base_url(&found.base_url, local, opts))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn offset_initialized(&self) -> bool {
        self.offset.initialized()
    }

    pub fn latency_sample_count(&self) -> usize {
        self.offset.sample_count()
    }

    /// Point-in-time copy of the session's traffic counters.
    pub fn traffic(&self) -> SessionTraffic {
        SessionTraffic {
            requests_sent: self.requests_sent.load(Relaxed),
            request_bytes_estimate: self.request_bytes_estimate.load(Relaxed),
            response_bytes: self.response_bytes.load(Relaxed),
        }
    }

    /// Replace the reported identity mid-session.
    pub fn set_client_id(&mut self, client_name: &str) -> Result<(), ClientError> {
        let cleaned = client_name.trim();
        if cleaned.is_empty() {
            return Err(ClientError::InvalidArgument(
                "client_name cannot be empty".to_string(),
            ));
        }
        self.client_id = cleaned.to_string();
        Ok(())
    }

    /// Clear offset state and the disconnect flag; optionally roll the
    /// instance id so the server sees a fresh arrival.
    pub fn reconnect(&mut self, new_instance: bool) {
        if new_instance {
            self.instance_id = new_instance_id();
        }
        self.disconnected = false;
        self.offset.reset();
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(
        &self,
        path: &str,
        accept: &str,
        query: &[(&str, &str)],
        send_client_headers: bool,
    ) -> Result<TimedResponse, ClientError> {
        if self.disconnected {
            return Err(ClientError::SessionClosed);
        }
        let identity = if send_client_headers {
            Some(IdentityHeaders {
                client_id: &self.client_id,
                instance_id: &self.instance_id,
                telemetry: self.offset.initialized().then(|| {
                    (
                        self.offset.rtt_ewma_ms(),
                        self.offset.display_ms(),
                        self.offset.desync_ms(),
                    )
                }),
            })
        } else {
            None
        };
        let response = self
            .transport
            .get(&self.endpoint(path), accept, query, identity.as_ref())?;
        self.requests_sent.fetch_add(1, Relaxed);
        self.request_bytes_estimate
            .fetch_add(response.request_bytes_estimate, Relaxed);
        self.response_bytes
            .fetch_add(response.body.len() as u64, Relaxed);
        Ok(response)
    }

    fn request_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<(Value, TimedResponse), ClientError> {
        let response = self.request(path, "application/json", query, true)?;
        let payload: Value = serde_json::from_slice(&response.body)
            .map_err(|err| ClientError::Parse(err.to_string()))?;
        Ok((payload, response))
    }

    fn identity_query(&self) -> [(&str, &str); 2] {
        [
            ("client_id", self.client_id.as_str()),
            ("instance_id", self.instance_id.as_str()),
        ]
    }

    /// `/v1` endpoint map.
    pub fn get_api_index(&self) -> Result<ApiIndexResponse, ClientError> {
        let (payload, _) = self.request_json("/v1", &[])?;
        Ok(ApiIndexResponse::from_value(&payload))
    }

    /// One state fetch. Does not touch the offset model.
    pub fn get_state(&self) -> Result<StateResponse, ClientError> {
        let (payload, _) = self.request_json("/v1/state", &self.identity_query())?;
        Ok(StateResponse::from_value(&payload))
    }

    /// Connected-client roster.
    pub fn get_clients(&self) -> Result<ClientsResponse, ClientError> {
        let (payload, _) = self.request_json("/v1/clients", &self.identity_query())?;
        Ok(ClientsResponse::from_value(&payload))
    }

    /// True when the server's health endpoint answers `ok`.
    pub fn healthz(&self) -> Result<bool, ClientError> {
        let response = self.request("/healthz", "text/plain", &[], false)?;
        let body = String::from_utf8_lossy(&response.body);
        Ok(body.trim().eq_ignore_ascii_case("ok"))
    }

    /// Server-published client runtime source.
    pub fn get_runtime_code(&self) -> Result<String, ClientError> {
        let response = self.request("/v1/client/code", "text/x-python", &[], true)?;
        Ok(String::from_utf8_lossy(&response.body).into_owned())
    }

    pub fn get_openapi_yaml(&self) -> Result<String, ClientError> {
        let response = self.request("/openapi.yaml", "application/yaml, text/yaml", &[], true)?;
        Ok(String::from_utf8_lossy(&response.body).into_owned())
    }

    pub fn get_debug_html(&self) -> Result<String, ClientError> {
        let response = self.request("/debug", "text/html", &[], true)?;
        Ok(String::from_utf8_lossy(&response.body).into_owned())
    }

    /// Poll the server, feed the offset model, and shape the corrected clock.
    pub fn get_corrected_time(&mut self) -> Result<CorrectedTimeSnapshot, ClientError> {
        let (payload, timing) = self.request_json("/v1/state", &self.identity_query())?;
        let sample = compute_network_sample(
            &payload,
            timing.rtt_wall_ms,
            timing.sent_unix_ms,
            timing.received_unix_ms,
        );
        self.offset.update(sample);

        let corrected_unix_ms = (unix_ms_now() as f64 + self.offset.display_ms()) as i64;
        let corrected = Local
            .timestamp_millis_opt(corrected_unix_ms)
            .single()
            .unwrap_or_else(Local::now);

        Ok(CorrectedTimeSnapshot {
            corrected_unix_ms,
            corrected_iso_local: corrected.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            time_12h: format_time_12h(corrected.hour(), corrected.minute(), corrected.second()),
            date_text: corrected.format("%A, %B %d %Y").to_string(),
            rtt_ms: self.offset.rtt_ewma_ms(),
            offset_ms: self.offset.display_ms(),
            desync_ms: self.offset.desync_ms(),
            state: StateResponse::from_value(&payload),
        })
    }

    /// Ask the server to drop this session. On success the session refuses
    /// further requests until [`reconnect`](Self::reconnect).
    pub fn disconnect(&mut self) -> Result<DisconnectResponse, ClientError> {
        let (payload, _) = self.request_json("/v1/client/disconnect", &self.identity_query())?;
        let response = DisconnectResponse {
            disconnected: payload["disconnected"].as_bool().unwrap_or(false),
            client_id: payload["client_id"]
                .as_str()
                .unwrap_or(&self.client_id)
                .to_string(),
            instance_id: payload["instance_id"]
                .as_str()
                .unwrap_or(&self.instance_id)
                .to_string(),
        };
        self.disconnected = response.disconnected;
        Ok(response)
    }

    /// Resolved IP of the configured connection host.
    pub fn get_connection_ip(&self) -> Option<String> {
        if netinfo::is_valid_ip(&self.connection_host) {
            return Some(self.connection_host.clone());
        }
        resolve_hostname_ip(&self.connection_host)
    }

    pub fn get_connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            host: self.connection_host.clone(),
            port: self.connection_port,
            base_url: self.base_url.clone(),
            local: self.local,
            connection_ip: self.get_connection_ip(),
        }
    }

    /// Public address lookup; `None` doubles as the offline answer.
    pub fn get_public_ip(&self, timeout: Option<Duration>) -> Option<String> {
        lookup_public_ip(timeout.unwrap_or_else(|| self.transport.timeout()))
    }

    /// Hostname, loopback, LAN, and optionally public address of this device.
    pub fn get_device_ip_info(
        &self,
        include_public_ip: bool,
        public_timeout: Option<Duration>,
    ) -> DeviceIpInfo {
        let hostname = device_hostname();
        let resolved_local_ip = resolve_hostname_ip(&hostname);
        DeviceIpInfo {
            hostname,
            loopback_ip: LOCALHOST_IP.to_string(),
            resolved_local_ip,
            lan_ip: detect_lan_ip(),
            public_ip: include_public_ip
                .then(|| self.get_public_ip(public_timeout))
                .flatten(),
        }
    }
}

/// Build a session against an explicit endpoint.
pub fn connect(host: &str, port: u16, opts: SessionOptions) -> TimeClient {
    TimeClient::connect(host, port, opts)
}

/// Build a session against a server on this machine.
pub fn connect_local(port: u16, opts: SessionOptions) -> TimeClient {
    TimeClient::connect_local(port, opts)
}

/// Discover a server on the LAN and connect to it.
pub fn connect_auto(
    opts: SessionOptions,
    discovery: &DiscoveryOptions,
) -> Result<TimeClient, ClientError> {
    TimeClient::connect_auto(opts, discovery)
}
