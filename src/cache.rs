//! Persistent discovery cache.
//!
//! A tiny JSON file remembering the last server that answered, so the next
//! start can skip straight to a healthz probe. The cache is an optimization,
//! never an authority: the loader treats any read or parse failure as "no
//! cache", and the writer swallows every error. No file locks; racing
//! writers are last-writer-wins.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::discover::DiscoveryResult;
use crate::fmt::unix_ms_now;
use crate::messages::coerce_i64;

pub const DISCOVERY_CACHE_DIR: &str = ".betterclock_time";
pub const DISCOVERY_CACHE_FILE: &str = "discovery_cache.json";

/// `~/.betterclock_time/discovery_cache.json`, or a cwd-relative fallback
/// when the home directory cannot be determined.
pub fn default_cache_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DISCOVERY_CACHE_DIR)
        .join(DISCOVERY_CACHE_FILE)
}

/// Load the cached endpoint, or `None` if the file is absent, unreadable,
/// or fails validation.
pub fn load_cached_discovery(cache_path: &Path) -> Option<DiscoveryResult> {
    let text = std::fs::read_to_string(cache_path).ok()?;
    let payload: Value = serde_json::from_str(&text).ok()?;

    let base_url = payload["base_url"].as_str()?.trim().trim_end_matches('/');
    let ip = payload["ip"].as_str()?.trim();
    let port = coerce_i64(&payload["port"])?;
    if base_url.is_empty() || ip.is_empty() || !(1..=65_535).contains(&port) {
        return None;
    }

    let service = payload["service"]
        .as_str()
        .unwrap_or(crate::discover::DISCOVERY_SERVICE_NAME);
    let version = coerce_i64(&payload["version"]).unwrap_or(1);
    let via = payload["via"].as_str().unwrap_or("cache");
    Some(DiscoveryResult {
        base_url: base_url.to_string(),
        ip: ip.to_string(),
        port: port as u16,
        service: service.to_string(),
        version,
        via: via.to_string(),
    })
}

/// Persist a discovery result. Best effort; failures are logged at debug
/// level and otherwise ignored, because a broken cache must never break
/// connectivity.
pub fn save_cached_discovery(discovery: &DiscoveryResult, cache_path: &Path) {
    let payload = json!({
        "base_url": discovery.base_url,
        "ip": discovery.ip,
        "port": discovery.port,
        "service": discovery.service,
        "version": discovery.version,
        "via": discovery.via,
        "updated_unix_ms": unix_ms_now(),
    });

    if let Some(parent) = cache_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::debug!(path = %cache_path.display(), %err, "discovery cache dir create failed");
                return;
            }
        }
    }
    if let Err(err) = std::fs::write(cache_path, payload.to_string()) {
        tracing::debug!(path = %cache_path.display(), %err, "discovery cache write failed");
    }
}
