//! Layered server discovery.
//!
//! Probes run in a fixed order: localhost healthz, cached endpoint, mDNS,
//! UDP broadcast, subnet sweep. Each stage either yields a
//! [`DiscoveryResult`] or a failure reason; the engine stops at the first
//! success unless a full scan was requested. Stages never error out of the
//! engine, they record a [`ScanStep`] and the next one runs.

use serde::Serialize;
use serde_json::Value;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::cache::{default_cache_path, load_cached_discovery, save_cached_discovery};
use crate::fmt::unix_ms_now;
use crate::mdns;
use crate::messages::coerce_i64;
use crate::netinfo::LOCALHOST_IP;
use crate::sweep::{
    sweep_for_server, SWEEP_DEFAULT_MAX_HOSTS, SWEEP_DEFAULT_PREFIX, SWEEP_DEFAULT_WORKERS,
};
use crate::transport::try_healthz;

/// ASCII token a client broadcasts to solicit a server announcement.
pub const DISCOVERY_PROBE_TOKEN: &str = "BETTERCLOCK_DISCOVER_V1";
/// Service name expected in UDP announcements and written to the cache.
pub const DISCOVERY_SERVICE_NAME: &str = "betterclock";
/// API port the server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 8099;
/// Default budget for a single discovery stage.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(800);

/// Ceiling for the quick localhost/cache healthz probes.
const QUICK_PROBE_CEILING: Duration = Duration::from_millis(350);

/// A located server endpoint. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    pub base_url: String,
    pub ip: String,
    pub port: u16,
    pub service: String,
    pub version: i64,
    /// Which stage produced this result: `local-healthz`, `cache-healthz`,
    /// `mdns`, `udp-broadcast`, or `subnet-sweep`.
    pub via: String,
}

/// Outcome class of one scan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Fail,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Ok => write!(f, "ok"),
            StepStatus::Fail => write!(f, "fail"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One stage's diagnostic record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanStep {
    pub step: &'static str,
    pub status: StepStatus,
    pub elapsed_ms: u64,
    pub message: String,
    pub via: Option<String>,
    pub base_url: Option<String>,
    pub ip: Option<String>,
    pub port: Option<u16>,
}

/// Aggregate scan diagnostics plus an echo of the effective configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub started_unix_ms: i64,
    pub finished_unix_ms: i64,
    pub elapsed_ms: u64,
    pub selected: Option<DiscoveryResult>,
    pub steps: Vec<ScanStep>,
    pub cache_path: PathBuf,
    pub local_first: bool,
    pub mdns: bool,
    pub use_cache: bool,
    pub subnet_sweep: bool,
    pub sweep_prefix: u8,
    pub sweep_cidr: Option<String>,
    pub sweep_max_hosts: usize,
    pub sweep_workers: usize,
    pub retries: u32,
    pub timeout: Duration,
    pub broadcast_address: String,
}

impl std::fmt::Display for ScanReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "BetterClock Discovery Scan Report")?;
        writeln!(
            f,
            "elapsed={}ms retries={} timeout={:.2}s cache={} mdns={} local-first={} \
             sweep={} prefix=/{} cidr={} hosts={} workers={}",
            self.elapsed_ms,
            self.retries,
            self.timeout.as_secs_f64(),
            if self.use_cache { "on" } else { "off" },
            if self.mdns { "on" } else { "off" },
            if self.local_first { "on" } else { "off" },
            if self.subnet_sweep { "on" } else { "off" },
            self.sweep_prefix,
            self.sweep_cidr.as_deref().unwrap_or("-"),
            self.sweep_max_hosts,
            self.sweep_workers,
        )?;
        for step in &self.steps {
            write!(
                f,
                "- {:<13} {:<7} {:>4}ms | {}",
                step.step,
                step.status.to_string().to_uppercase(),
                step.elapsed_ms,
                step.message,
            )?;
            if let Some(base_url) = &step.base_url {
                write!(f, " | {}", base_url)?;
            }
            writeln!(f)?;
        }
        match &self.selected {
            None => writeln!(f, "Selected: none")?,
            Some(selected) => writeln!(
                f,
                "Selected: {} via {} (ip={}, port={})",
                selected.base_url, selected.via, selected.ip, selected.port
            )?,
        }
        write!(f, "Cache path: {}", self.cache_path.display())
    }
}

/// Knobs for one discovery run. All stages are on by default.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub port: u16,
    /// Budget for each waiting stage (mDNS browse, UDP receive window).
    pub timeout: Duration,
    /// UDP probe attempts.
    pub retries: u32,
    pub broadcast_address: String,
    pub local_first: bool,
    pub mdns: bool,
    pub use_cache: bool,
    /// Cache file override; `None` means `~/.betterclock_time/discovery_cache.json`.
    pub cache_path: Option<PathBuf>,
    pub subnet_sweep: bool,
    pub sweep_prefix: u8,
    pub sweep_cidr: Option<String>,
    pub sweep_max_hosts: usize,
    pub sweep_workers: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            retries: 3,
            broadcast_address: "255.255.255.255".to_string(),
            local_first: true,
            mdns: true,
            use_cache: true,
            cache_path: None,
            subnet_sweep: true,
            sweep_prefix: SWEEP_DEFAULT_PREFIX,
            sweep_cidr: None,
            sweep_max_hosts: SWEEP_DEFAULT_MAX_HOSTS,
            sweep_workers: SWEEP_DEFAULT_WORKERS,
        }
    }
}

impl DiscoveryOptions {
    fn effective_timeout(&self) -> Duration {
        self.timeout.max(Duration::from_millis(100))
    }

    fn effective_retries(&self) -> u32 {
        self.retries.max(1)
    }

    fn effective_cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(default_cache_path)
    }
}

fn resolve_base_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}

fn build_scan_step(
    step: &'static str,
    status: StepStatus,
    started: Instant,
    message: String,
    discovery: Option<&DiscoveryResult>,
) -> ScanStep {
    ScanStep {
        step,
        status,
        elapsed_ms: started.elapsed().as_millis() as u64,
        message,
        via: discovery.map(|d| d.via.clone()),
        base_url: discovery.map(|d| d.base_url.clone()),
        ip: discovery.map(|d| d.ip.clone()),
        port: discovery.map(|d| d.port),
    }
}

/// A datagram counts as a server announcement when it names the service and
/// its `api_port`/`version` fields, where present, are numeric.
fn is_discovery_payload(payload: &Value) -> bool {
    let service = payload["service"]
        .as_str()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if service != DISCOVERY_SERVICE_NAME {
        return false;
    }
    let numeric_or_absent = |value: &Value| value.is_null() || coerce_i64(value).is_some();
    numeric_or_absent(&payload["api_port"]) && numeric_or_absent(&payload["version"])
}

/// Up to `retries` UDP rounds: send the probe token to the broadcast address
/// and localhost, then collect replies until the receive window closes.
/// Returns the result, the attempt that hit, and the last OS error text.
fn udp_broadcast_probe(opts: &DiscoveryOptions) -> (Option<DiscoveryResult>, u32, String) {
    let timeout = opts.effective_timeout();
    let retries = opts.effective_retries();
    let probe = DISCOVERY_PROBE_TOKEN.as_bytes();
    let mut last_error = String::new();

    for attempt in 1..=retries {
        let socket = match open_broadcast_socket(timeout) {
            Ok(socket) => socket,
            Err(err) => {
                last_error = err.to_string();
                continue;
            }
        };

        // Send failures are non-fatal: a host without a broadcast route can
        // still hear a same-machine server over loopback.
        let _ = socket.send_to(probe, (opts.broadcast_address.as_str(), opts.port));
        let _ = socket.send_to(probe, (LOCALHOST_IP, opts.port));

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 2048];
        while Instant::now() < deadline {
            let (len, source) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(err) => {
                    last_error = err.to_string();
                    break;
                }
            };

            let Ok(payload) = serde_json::from_slice::<Value>(&buf[..len]) else {
                continue;
            };
            if !is_discovery_payload(&payload) {
                continue;
            }

            let source_ip = source.ip().to_string();
            let announced_port = coerce_i64(&payload["api_port"])
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(opts.port);
            let version = coerce_i64(&payload["version"]).unwrap_or(1);
            let service = payload["service"]
                .as_str()
                .unwrap_or(DISCOVERY_SERVICE_NAME)
                .to_string();
            let result = DiscoveryResult {
                base_url: resolve_base_url(&source_ip, announced_port),
                ip: source_ip,
                port: announced_port,
                service,
                version,
                via: "udp-broadcast".to_string(),
            };
            return (Some(result), attempt, last_error);
        }
    }

    (None, 0, last_error)
}

fn open_broadcast_socket(timeout: Duration) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(timeout))?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
    Ok(socket.into())
}

/// Run the stage sequence. Returns the selection, the recorded steps (empty
/// unless `collect_steps`), and the cache path in effect.
fn discover_internal(
    opts: &DiscoveryOptions,
    stop_on_first: bool,
    collect_steps: bool,
) -> (Option<DiscoveryResult>, Vec<ScanStep>, PathBuf) {
    let timeout = opts.effective_timeout();
    let cache_path = opts.effective_cache_path();
    let quick_timeout = timeout.min(QUICK_PROBE_CEILING);
    let http = reqwest::blocking::Client::builder()
        .build()
        .expect("failed to build HTTP client");
    let mut selected: Option<DiscoveryResult> = None;
    let mut steps: Vec<ScanStep> = Vec::new();

    // Stage 1: the server may be on this very machine.
    if opts.local_first {
        let started = Instant::now();
        let local_base_url = resolve_base_url(LOCALHOST_IP, opts.port);
        if try_healthz(&http, &local_base_url, quick_timeout) {
            let result = DiscoveryResult {
                base_url: local_base_url,
                ip: LOCALHOST_IP.to_string(),
                port: opts.port,
                service: DISCOVERY_SERVICE_NAME.to_string(),
                version: 1,
                via: "local-healthz".to_string(),
            };
            tracing::info!(base_url = %result.base_url, "local server is reachable");
            if opts.use_cache {
                save_cached_discovery(&result, &cache_path);
            }
            if collect_steps {
                steps.push(build_scan_step(
                    "local-healthz",
                    StepStatus::Ok,
                    started,
                    "local server is reachable".to_string(),
                    Some(&result),
                ));
            }
            selected = Some(result);
            if stop_on_first {
                return (selected, steps, cache_path);
            }
        } else if collect_steps {
            steps.push(build_scan_step(
                "local-healthz",
                StepStatus::Fail,
                started,
                "local server not reachable on localhost".to_string(),
                None,
            ));
        }
    } else if collect_steps {
        steps.push(build_scan_step(
            "local-healthz",
            StepStatus::Skipped,
            Instant::now(),
            "local-first probe disabled".to_string(),
            None,
        ));
    }

    // Stage 2: the last server that answered, if it still does.
    if opts.use_cache {
        let started = Instant::now();
        match load_cached_discovery(&cache_path) {
            None => {
                if collect_steps {
                    steps.push(build_scan_step(
                        "cache-healthz",
                        StepStatus::Fail,
                        started,
                        format!("no cache entry at {}", cache_path.display()),
                        None,
                    ));
                }
            }
            Some(cached) => {
                if try_healthz(&http, &cached.base_url, quick_timeout) {
                    let result = DiscoveryResult {
                        via: "cache-healthz".to_string(),
                        ..cached
                    };
                    tracing::info!(base_url = %result.base_url, "cached server is reachable");
                    if collect_steps {
                        steps.push(build_scan_step(
                            "cache-healthz",
                            StepStatus::Ok,
                            started,
                            "cached server is reachable".to_string(),
                            Some(&result),
                        ));
                    }
                    if selected.is_none() {
                        selected = Some(result);
                        if stop_on_first {
                            return (selected, steps, cache_path);
                        }
                    }
                } else if collect_steps {
                    steps.push(build_scan_step(
                        "cache-healthz",
                        StepStatus::Fail,
                        started,
                        format!("cached server is stale/unreachable: {}", cached.base_url),
                        None,
                    ));
                }
            }
        }
    } else if collect_steps {
        steps.push(build_scan_step(
            "cache-healthz",
            StepStatus::Skipped,
            Instant::now(),
            "cache lookup disabled".to_string(),
            None,
        ));
    }

    // Stage 3: listen for an mDNS announcement.
    if opts.mdns {
        let started = Instant::now();
        match mdns::browse(timeout) {
            Some(result) => {
                if opts.use_cache {
                    save_cached_discovery(&result, &cache_path);
                }
                if collect_steps {
                    steps.push(build_scan_step(
                        "mdns",
                        StepStatus::Ok,
                        started,
                        "mDNS service discovered".to_string(),
                        Some(&result),
                    ));
                }
                if selected.is_none() {
                    selected = Some(result);
                    if stop_on_first {
                        return (selected, steps, cache_path);
                    }
                }
            }
            None => {
                if collect_steps {
                    let message = if mdns::is_available() {
                        "no mDNS response from server (check server mDNS announcement and \
                         UDP 5353 multicast/firewall rules)"
                            .to_string()
                    } else {
                        "no mDNS response (rebuild with the 'mdns' feature for mDNS support)"
                            .to_string()
                    };
                    steps.push(build_scan_step(
                        "mdns",
                        StepStatus::Fail,
                        started,
                        message,
                        None,
                    ));
                }
            }
        }
    } else if collect_steps {
        steps.push(build_scan_step(
            "mdns",
            StepStatus::Skipped,
            Instant::now(),
            "mDNS scan disabled".to_string(),
            None,
        ));
    }

    // Stage 4: ask the whole segment directly.
    {
        let started = Instant::now();
        let (udp_result, hit_attempt, last_error) = udp_broadcast_probe(opts);
        match udp_result {
            Some(result) => {
                tracing::info!(base_url = %result.base_url, hit_attempt, "discovered over UDP");
                if opts.use_cache {
                    save_cached_discovery(&result, &cache_path);
                }
                if collect_steps {
                    steps.push(build_scan_step(
                        "udp-broadcast",
                        StepStatus::Ok,
                        started,
                        format!(
                            "discovered over UDP on attempt {}/{}",
                            hit_attempt,
                            opts.effective_retries()
                        ),
                        Some(&result),
                    ));
                }
                if selected.is_none() {
                    selected = Some(result);
                    if stop_on_first {
                        return (selected, steps, cache_path);
                    }
                }
            }
            None => {
                if collect_steps {
                    let message = if last_error.is_empty() {
                        format!("no UDP discovery response on port {}", opts.port)
                    } else {
                        format!("UDP discovery failed: {last_error}")
                    };
                    steps.push(build_scan_step(
                        "udp-broadcast",
                        StepStatus::Fail,
                        started,
                        message,
                        None,
                    ));
                }
            }
        }
    }

    // Stage 5: brute force the subnet.
    if opts.subnet_sweep {
        let started = Instant::now();
        let (sweep_result, sweep_message) = sweep_for_server(
            &http,
            opts.port,
            timeout,
            opts.sweep_max_hosts.max(1),
            opts.sweep_workers.max(1),
            opts.sweep_prefix,
            opts.sweep_cidr.as_deref(),
        );
        match sweep_result {
            Some(result) => {
                if opts.use_cache {
                    save_cached_discovery(&result, &cache_path);
                }
                if collect_steps {
                    steps.push(build_scan_step(
                        "subnet-sweep",
                        StepStatus::Ok,
                        started,
                        sweep_message,
                        Some(&result),
                    ));
                }
                if selected.is_none() {
                    selected = Some(result);
                    if stop_on_first {
                        return (selected, steps, cache_path);
                    }
                }
            }
            None => {
                if collect_steps {
                    steps.push(build_scan_step(
                        "subnet-sweep",
                        StepStatus::Fail,
                        started,
                        sweep_message,
                        None,
                    ));
                }
            }
        }
    } else if collect_steps {
        steps.push(build_scan_step(
            "subnet-sweep",
            StepStatus::Skipped,
            Instant::now(),
            "subnet sweep disabled".to_string(),
            None,
        ));
    }

    (selected, steps, cache_path)
}

/// Locate a server, stopping at the first stage that succeeds.
pub fn discover_server(opts: &DiscoveryOptions) -> Option<DiscoveryResult> {
    let (selected, _, _) = discover_internal(opts, true, false);
    selected
}

/// Run discovery with per-stage diagnostics. With `full_scan` the engine
/// keeps going after a success so every stage gets exercised and recorded.
pub fn scan_report(opts: &DiscoveryOptions, full_scan: bool) -> ScanReport {
    let started_unix_ms = unix_ms_now();
    let started = Instant::now();
    let (selected, steps, cache_path) = discover_internal(opts, !full_scan, true);
    ScanReport {
        started_unix_ms,
        finished_unix_ms: unix_ms_now(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        selected,
        steps,
        cache_path,
        local_first: opts.local_first,
        mdns: opts.mdns,
        use_cache: opts.use_cache,
        subnet_sweep: opts.subnet_sweep,
        sweep_prefix: opts.sweep_prefix.clamp(8, 30),
        sweep_cidr: opts
            .sweep_cidr
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
        sweep_max_hosts: opts.sweep_max_hosts.max(1),
        sweep_workers: opts.sweep_workers.max(1),
        retries: opts.effective_retries(),
        timeout: opts.effective_timeout(),
        broadcast_address: opts.broadcast_address.clone(),
    }
}
