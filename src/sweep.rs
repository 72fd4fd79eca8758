//! Concurrent subnet healthz sweep.
//!
//! Last-resort discovery stage: enumerate the hosts around the LAN address
//! and probe `/healthz` on each with a short per-host timeout. A pool of
//! worker threads drains a shared candidate queue; the first `ok` answer
//! stops the pool and wins.

use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

use crate::discover::{DiscoveryResult, DISCOVERY_SERVICE_NAME};
use crate::error::ClientError;
use crate::netinfo;
use crate::transport::try_healthz;

pub const SWEEP_DEFAULT_PREFIX: u8 = 24;
pub const SWEEP_DEFAULT_MAX_HOSTS: usize = 254;
pub const SWEEP_DEFAULT_WORKERS: usize = 48;
/// The pool never shrinks below this, even for tiny candidate lists.
const SWEEP_MIN_WORKERS: usize = 4;

/// Build the ordered probe list for a sweep.
///
/// The target network comes from `sweep_cidr` when given, otherwise from the
/// LAN IP with `sweep_prefix` (clamped to 8..=30). Hosts inside the LAN /24
/// come first, then the rest of the network; the LAN address itself and the
/// `.1` gateway are hoisted to the very front so a same-machine server
/// resolves immediately. The list is truncated to `max_hosts`.
pub fn build_subnet_candidates(
    lan_ip: &str,
    max_hosts: usize,
    sweep_prefix: u8,
    sweep_cidr: Option<&str>,
) -> Result<(Vec<Ipv4Addr>, String), ClientError> {
    let local: Ipv4Addr = lan_ip
        .trim()
        .parse()
        .map_err(|_| ClientError::InvalidArgument(format!("invalid LAN IP: {lan_ip}")))?;

    let network = match sweep_cidr.map(str::trim).filter(|s| !s.is_empty()) {
        Some(cidr) => cidr
            .parse::<Ipv4Network>()
            .map_err(|_| ClientError::InvalidArgument(format!("invalid sweep CIDR: {cidr}")))?,
        None => {
            let prefix = sweep_prefix.clamp(8, 30);
            Ipv4Network::new(local, prefix)
                .map_err(|_| ClientError::InvalidArgument(format!("invalid prefix: /{prefix}")))?
        }
    };
    let network_text = format!("{}/{}", network.network(), network.prefix());
    let max_hosts = max_hosts.max(1);

    let net_base = u32::from(network.network());
    let net_broadcast = u32::from(network.broadcast());
    let (first_host, last_host) = match network.prefix() {
        32 => (net_base, net_base),
        31 => return Ok((Vec::new(), network_text)),
        _ => (net_base + 1, net_broadcast - 1),
    };

    let same24 = Ipv4Network::new(local, 24).expect("/24 is always a valid prefix");
    let same24_base = u32::from(same24.network());
    let same24_broadcast = u32::from(same24.broadcast());
    let in_same24 = |addr: u32| (same24_base..=same24_broadcast).contains(&addr);

    // Hosts sharing the LAN /24, in address order. At most 254 entries.
    let mut candidates: Vec<Ipv4Addr> = (first_host.max(same24_base)
        ..=last_host.min(same24_broadcast))
        .filter(|addr| in_same24(*addr))
        .map(Ipv4Addr::from)
        .collect();

    // Then the rest of the network, skipping over the /24 block. Collection
    // stops at max_hosts; the prioritisation below never needs more.
    let mut cursor = first_host;
    let mut secondary = 0usize;
    while cursor <= last_host && secondary < max_hosts {
        if in_same24(cursor) {
            match same24_broadcast.checked_add(1) {
                Some(next) => {
                    cursor = next;
                    continue;
                }
                None => break,
            }
        }
        candidates.push(Ipv4Addr::from(cursor));
        secondary += 1;
        match cursor.checked_add(1) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    if candidates.is_empty() {
        return Ok((Vec::new(), network_text));
    }

    // Self first, then the common gateway, then everything else in order.
    let gateway = Ipv4Addr::from((u32::from(local) & 0xffff_ff00) | 1);
    let mut prioritized = Vec::with_capacity(candidates.len());
    for special in [local, gateway] {
        if let Some(pos) = candidates.iter().position(|c| *c == special) {
            prioritized.push(candidates.remove(pos));
        }
    }
    prioritized.extend(candidates);
    prioritized.truncate(max_hosts);
    Ok((prioritized, network_text))
}

/// Per-host probe timeout derived from the stage timeout.
pub(crate) fn per_host_timeout(stage_timeout: Duration) -> Duration {
    let scaled = stage_timeout.mul_f64(0.35);
    scaled.clamp(Duration::from_millis(80), Duration::from_millis(250))
}

/// Run the sweep. Returns the winning endpoint (if any) and a message for
/// the scan step; the message always names the target network.
pub(crate) fn sweep_for_server(
    http: &reqwest::blocking::Client,
    port: u16,
    stage_timeout: Duration,
    max_hosts: usize,
    workers: usize,
    sweep_prefix: u8,
    sweep_cidr: Option<&str>,
) -> (Option<DiscoveryResult>, String) {
    let Some(lan_ip) = netinfo::detect_lan_ip() else {
        return (None, "no LAN IP detected for subnet sweep".to_string());
    };

    let (candidates, network_text) =
        match build_subnet_candidates(&lan_ip, max_hosts, sweep_prefix, sweep_cidr) {
            Ok(built) => built,
            Err(err) => return (None, err.to_string()),
        };
    if candidates.is_empty() {
        let message = match sweep_cidr.map(str::trim).filter(|s| !s.is_empty()) {
            Some(cidr) => format!("invalid or empty sweep CIDR: {cidr}"),
            None => format!("could not derive subnet candidates from LAN IP {lan_ip}"),
        };
        return (None, message);
    }

    let probe_timeout = per_host_timeout(stage_timeout);
    let total = candidates.len();
    let worker_count = workers.min(total).max(SWEEP_MIN_WORKERS);
    tracing::debug!(total, worker_count, network = %network_text, "starting subnet sweep");

    let (job_tx, job_rx) = crossbeam_channel::unbounded::<Ipv4Addr>();
    for candidate in &candidates {
        let _ = job_tx.send(*candidate);
    }
    drop(job_tx);
    let (hit_tx, hit_rx) = crossbeam_channel::unbounded::<(Ipv4Addr, bool)>();
    let stop = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(worker_count);
    for worker in 0..worker_count {
        let job_rx = job_rx.clone();
        let hit_tx = hit_tx.clone();
        let stop = stop.clone();
        let http = http.clone();
        let handle = std::thread::Builder::new()
            .name(format!("sweep-{worker}"))
            .spawn(move || {
                for candidate in job_rx.iter() {
                    if stop.load(Relaxed) {
                        break;
                    }
                    let base_url = format!("http://{candidate}:{port}");
                    let ok = try_healthz(&http, &base_url, probe_timeout);
                    if hit_tx.send((candidate, ok)).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn sweep worker");
        handles.push(handle);
    }
    drop(hit_tx);

    let mut scanned = 0usize;
    let mut winner: Option<Ipv4Addr> = None;
    for (candidate, ok) in hit_rx.iter() {
        scanned += 1;
        if ok {
            winner = Some(candidate);
            stop.store(true, Relaxed);
            break;
        }
        if scanned == total {
            break;
        }
    }
    // Workers still mid-probe finish within the per-host timeout and exit.
    for handle in handles {
        let _ = handle.join();
    }

    match winner {
        Some(ip) => {
            tracing::info!(%ip, port, scanned, total, "subnet sweep found a server");
            let result = DiscoveryResult {
                base_url: format!("http://{ip}:{port}"),
                ip: ip.to_string(),
                port,
                service: DISCOVERY_SERVICE_NAME.to_string(),
                version: 1,
                via: "subnet-sweep".to_string(),
            };
            let message =
                format!("found server after scanning {scanned}/{total} hosts on {network_text}");
            (Some(result), message)
        }
        None => (
            None,
            format!("no host responded on {network_text} ({total} hosts scanned)"),
        ),
    }
}
