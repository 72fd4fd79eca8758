//! BetterClock LAN time-sync client.
//!
//! Zero-configuration consumer side of the BetterClock time distribution
//! service: a layered discovery engine locates a server on the local network
//! (localhost, persistent cache, mDNS, UDP broadcast, subnet sweep), and a
//! slew-rate-limited correction loop keeps a corrected wall clock within a
//! few milliseconds of the server despite RTT jitter.
//!
//! Polling is caller-driven; a [`TimeClient`] does no background work. Each
//! [`TimeClient::get_corrected_time`] call runs one NTP-style four-timestamp
//! exchange over HTTP, feeds the sample window, and advances the display
//! offset by at most the slew budget.
//!
//! ```no_run
//! use betterclock_time::{connect_auto, DiscoveryOptions, SessionOptions};
//!
//! let mut client = connect_auto(SessionOptions::default(), &DiscoveryOptions::default())?;
//! for _ in 0..40 {
//!     let snapshot = client.get_corrected_time()?;
//!     println!("{} ({:+.1} ms)", snapshot.time_12h, snapshot.offset_ms);
//!     std::thread::sleep(std::time::Duration::from_millis(250));
//! }
//! # Ok::<(), betterclock_time::ClientError>(())
//! ```

pub mod cache;
pub mod discover;
pub mod error;
pub mod fmt;
pub mod mdns;
pub mod messages;
pub mod netinfo;
pub mod offset;
pub mod sample;
pub mod session;
pub mod sweep;
mod transport;

pub use cache::{default_cache_path, load_cached_discovery, save_cached_discovery};
pub use discover::{
    discover_server, scan_report, DiscoveryOptions, DiscoveryResult, ScanReport, ScanStep,
    StepStatus, DEFAULT_PORT,
};
pub use error::{ClientError, TransportErrorKind};
pub use fmt::{format_bytes_auto, format_unix_ms_local};
pub use messages::{
    ApiIndexResponse, ClientsResponse, ConnectionInfo, CorrectedTimeSnapshot, DeviceIpInfo,
    DisconnectResponse, PublicClient, RuntimeSnapshot, StateResponse,
};
pub use netinfo::{detect_lan_ip, lookup_public_ip, resolve_hostname_ip};
pub use offset::OffsetModel;
pub use sample::{NetworkSample, SampleWindow};
pub use session::{connect, connect_auto, connect_local, SessionOptions, SessionTraffic, TimeClient};
pub use sweep::build_subnet_candidates;
