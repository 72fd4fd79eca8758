//! Device and network identity helpers.

use std::net::{IpAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

pub const LOCALHOST_IP: &str = "127.0.0.1";

/// Plain-text services queried for the device's public address, in order.
pub const PUBLIC_IP_SERVICES: [&str; 3] = [
    "https://api.ipify.org",
    "https://ifconfig.me/ip",
    "https://ident.me",
];

const USER_AGENT: &str = "betterclock-time/0.1";

pub(crate) fn is_valid_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

/// Address of the interface that would route outward.
///
/// No packet leaves the host; connecting a UDP socket only asks the OS to
/// pick a route, and the socket's local name is that interface's address.
pub fn detect_lan_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let local = socket.local_addr().ok()?;
    if local.ip().is_unspecified() {
        return None;
    }
    Some(local.ip().to_string())
}

/// A-record lookup; `None` on empty input or resolution failure.
pub fn resolve_hostname_ip(hostname: &str) -> Option<String> {
    let trimmed = hostname.trim();
    if trimmed.is_empty() {
        return None;
    }
    let addrs = (trimmed, 0u16).to_socket_addrs().ok()?;
    addrs
        .filter(|addr| addr.is_ipv4())
        .map(|addr| addr.ip().to_string())
        .next()
}

/// Name this device reports for itself; empty string if unavailable.
pub fn device_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_default()
}

/// Ask the public-IP services, in order, for this device's external address.
///
/// The first response that parses as an IP wins. Failures are never
/// surfaced; every service failing yields `None`.
pub fn lookup_public_ip(timeout: Duration) -> Option<String> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .ok()?;
    let timeout = timeout.max(Duration::from_millis(100));
    for url in PUBLIC_IP_SERVICES {
        let response = match client
            .get(url)
            .timeout(timeout)
            .header("Accept", "text/plain")
            .send()
        {
            Ok(response) if response.status().is_success() => response,
            _ => continue,
        };
        let Ok(text) = response.text() else { continue };
        let candidate = text.trim();
        if !candidate.is_empty() && is_valid_ip(candidate) {
            return Some(candidate.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_ip() {
        assert!(is_valid_ip("127.0.0.1"));
        assert!(is_valid_ip("::1"));
        assert!(!is_valid_ip(""));
        assert!(!is_valid_ip("not-an-ip"));
        assert!(!is_valid_ip("300.1.2.3"));
    }

    #[test]
    fn test_resolve_rejects_empty() {
        assert!(resolve_hostname_ip("").is_none());
        assert!(resolve_hostname_ip("   ").is_none());
    }

    #[test]
    fn test_resolve_localhost() {
        // /etc/hosts ships a localhost entry everywhere this crate targets.
        if let Some(ip) = resolve_hostname_ip("localhost") {
            assert!(is_valid_ip(&ip));
        }
    }
}
