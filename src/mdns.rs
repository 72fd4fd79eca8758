//! mDNS service discovery stage.
//!
//! Browses `_betterclock._tcp.local.` for an announced server. The whole
//! stage is a plug-in capability behind the `mdns` cargo feature (on by
//! default): compiled out, [`browse`] reports nothing and the scan step
//! tells the operator how to get it back.

use std::time::Duration;

use crate::discover::DiscoveryResult;

pub const MDNS_SERVICE_TYPE: &str = "_betterclock._tcp.local.";

/// Whether mDNS support was compiled in.
pub fn is_available() -> bool {
    cfg!(feature = "mdns")
}

/// TXT `version` property, defaulting to 1 on absence or parse failure.
#[cfg(feature = "mdns")]
fn parse_txt_version(raw: Option<&str>) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(1)
}

/// Browse for up to `timeout`, returning the first resolved service that
/// carries an IPv4 address and a non-zero port.
#[cfg(feature = "mdns")]
pub(crate) fn browse(timeout: Duration) -> Option<DiscoveryResult> {
    use crate::discover::DISCOVERY_SERVICE_NAME;
    use mdns_sd::{ServiceDaemon, ServiceEvent};
    use std::net::IpAddr;
    use std::time::Instant;

    let timeout = timeout.max(Duration::from_millis(100));
    let daemon = ServiceDaemon::new().ok()?;
    let events = match daemon.browse(MDNS_SERVICE_TYPE) {
        Ok(receiver) => receiver,
        Err(err) => {
            tracing::debug!(%err, "mDNS browse failed to start");
            let _ = daemon.shutdown();
            return None;
        }
    };

    let deadline = Instant::now() + timeout;
    let mut found: Option<DiscoveryResult> = None;
    while found.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        // Wake at least every 50ms so the deadline stays responsive.
        let poll = remaining.min(Duration::from_millis(50));
        match events.recv_timeout(poll) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                let port = info.get_port();
                if port == 0 {
                    continue;
                }
                let Some(ip) = info.get_addresses().iter().find_map(|addr| match addr {
                    IpAddr::V4(v4) => Some(*v4),
                    IpAddr::V6(_) => None,
                }) else {
                    continue;
                };
                let version = parse_txt_version(info.get_property_val_str("version"));
                tracing::info!(%ip, port, version, "mDNS service discovered");
                found = Some(DiscoveryResult {
                    base_url: format!("http://{ip}:{port}"),
                    ip: ip.to_string(),
                    port,
                    service: DISCOVERY_SERVICE_NAME.to_string(),
                    version,
                    via: "mdns".to_string(),
                });
            }
            Ok(_) => {}
            Err(_) => {}
        }
    }

    let _ = daemon.shutdown();
    found
}

#[cfg(not(feature = "mdns"))]
pub(crate) fn browse(_timeout: Duration) -> Option<DiscoveryResult> {
    None
}

#[cfg(all(test, feature = "mdns"))]
mod tests {
    use super::*;

    #[test]
    fn test_parse_txt_version() {
        assert_eq!(parse_txt_version(Some("3")), 3);
        assert_eq!(parse_txt_version(Some("  2 ")), 2);
        assert_eq!(parse_txt_version(Some("x")), 1);
        assert_eq!(parse_txt_version(Some("")), 1);
        assert_eq!(parse_txt_version(None), 1);
    }

    #[test]
    fn test_available_matches_feature() {
        assert!(is_available());
    }
}
