//! Single-request HTTP transport with timestamp capture.
//!
//! Every exchange records the wall clock before send (`t1`) and after the
//! body is fully read (`t4`), plus a monotonic round-trip measurement used
//! as the fallback RTT when server timestamps are missing or implausible.

use reqwest::blocking::Client;
use std::time::{Duration, Instant};

use crate::error::{ClientError, TransportErrorKind};
use crate::fmt::unix_ms_now;

/// Floor applied to every caller-supplied timeout.
pub(crate) const MIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Identity state attached to identity-bearing requests.
pub(crate) struct IdentityHeaders<'a> {
    pub client_id: &'a str,
    pub instance_id: &'a str,
    /// `(rtt_ewma_ms, offset_display_ms, offset_desync_ms)` once the offset
    /// model has initialised; formatted to three decimals on the wire.
    pub telemetry: Option<(f64, f64, f64)>,
}

/// Response body plus the timing the offset model needs.
#[derive(Debug)]
pub(crate) struct TimedResponse {
    pub body: Vec<u8>,
    pub rtt_wall_ms: f64,
    pub sent_unix_ms: i64,
    pub received_unix_ms: i64,
    /// Size of the request line and headers this transport set. An estimate:
    /// the HTTP engine may add its own headers on the wire.
    pub request_bytes_estimate: u64,
}

pub(crate) struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("failed to build HTTP client"),
            timeout: timeout.max(MIN_TIMEOUT),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute a GET with the transport's default timeout.
    pub fn get(
        &self,
        url: &str,
        accept: &str,
        query: &[(&str, &str)],
        identity: Option<&IdentityHeaders<'_>>,
    ) -> Result<TimedResponse, ClientError> {
        self.get_with_timeout(url, accept, query, identity, self.timeout)
    }

    pub fn get_with_timeout(
        &self,
        url: &str,
        accept: &str,
        query: &[(&str, &str)],
        identity: Option<&IdentityHeaders<'_>>,
        timeout: Duration,
    ) -> Result<TimedResponse, ClientError> {
        let mut builder = self
            .client
            .get(url)
            .timeout(timeout.max(MIN_TIMEOUT))
            .header("Accept", accept);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(identity) = identity {
            builder = builder
                .header("X-Client-Id", identity.client_id)
                .header("X-Client-Instance", identity.instance_id);
            if let Some((rtt_ms, offset_ms, desync_ms)) = identity.telemetry {
                builder = builder
                    .header("X-Client-Rtt-Ms", format!("{:.3}", rtt_ms))
                    .header("X-Client-Offset-Ms", format!("{:.3}", offset_ms))
                    .header("X-Client-Desync-Ms", format!("{:.3}", desync_ms));
            }
        }

        let request = builder.build().map_err(|err| classify(url, err))?;
        let request_bytes_estimate = estimate_request_bytes(&request);

        let sent_unix_ms = unix_ms_now();
        let start = Instant::now();
        let response = self
            .client
            .execute(request)
            .map_err(|err| classify(url, err))?;
        let status = response.status();
        let body = response
            .bytes()
            .map_err(|err| classify(url, err))?
            .to_vec();
        let rtt_wall_ms = start.elapsed().as_secs_f64() * 1000.0;
        let received_unix_ms = unix_ms_now();

        if !status.is_success() {
            return Err(ClientError::Transport {
                kind: TransportErrorKind::HttpStatus(status.as_u16()),
                url: url.to_string(),
                message: format!("server returned HTTP {}", status.as_u16()),
            });
        }

        Ok(TimedResponse {
            body,
            rtt_wall_ms,
            sent_unix_ms,
            received_unix_ms,
            request_bytes_estimate,
        })
    }
}

/// Probe `{base_url}/healthz`; true only for a success status whose body,
/// trimmed and case-folded, is exactly `ok`.
pub(crate) fn try_healthz(client: &Client, base_url: &str, timeout: Duration) -> bool {
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let response = match client
        .get(&url)
        .timeout(timeout.max(MIN_TIMEOUT))
        .header("Accept", "text/plain")
        .send()
    {
        Ok(response) => response,
        Err(_) => return false,
    };
    if !response.status().is_success() {
        return false;
    }
    match response.text() {
        Ok(body) => body.trim().eq_ignore_ascii_case("ok"),
        Err(_) => false,
    }
}

/// Reconstruct roughly what the request line and headers occupy on the wire.
fn estimate_request_bytes(request: &reqwest::blocking::Request) -> u64 {
    let url = request.url();
    let mut path_len = url.path().len();
    if let Some(q) = url.query() {
        path_len += 1 + q.len();
    }
    // "GET <target> HTTP/1.1\r\n"
    let mut total = 4 + path_len + 11;
    // "Host: <netloc>\r\n"
    if let Some(host) = url.host_str() {
        total += 6 + host.len() + url.port().map(|p| format!(":{p}").len()).unwrap_or(0) + 2;
    }
    for (name, value) in request.headers() {
        total += name.as_str().len() + 2 + value.len() + 2;
    }
    // Terminating blank line
    total += 2;
    total as u64
}

/// Map a reqwest failure onto the transport taxonomy.
fn classify(url: &str, err: reqwest::Error) -> ClientError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else {
        let mut kind = TransportErrorKind::Io;
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        while let Some(current) = source {
            if let Some(io) = current.downcast_ref::<std::io::Error>() {
                kind = match io.kind() {
                    std::io::ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                        TransportErrorKind::Timeout
                    }
                    _ => TransportErrorKind::Io,
                };
                break;
            }
            let text = current.to_string();
            if text.contains("dns error") || text.contains("failed to lookup") {
                kind = TransportErrorKind::Dns;
                break;
            }
            source = current.source();
        }
        kind
    };
    ClientError::Transport {
        kind,
        url: url.to_string(),
        message: err.to_string(),
    }
}
