//! Human-readable formatting helpers shared by snapshots and reports.

use chrono::{Local, TimeZone};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock as Unix milliseconds.
pub(crate) fn unix_ms_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Render a byte count with an auto-selected unit: `0 B`, `512 B`, `1.00 KB`.
///
/// Whole bytes print without decimals; everything above prints with two.
/// Negative or non-finite input collapses to `0 B`.
pub fn format_bytes_auto(value: f64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    };
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", size as u64, UNITS[unit])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

/// Render a Unix-millisecond timestamp as local `YYYY-MM-DD HH:MM:SS.mmm`.
///
/// Zero (the "never" sentinel used throughout the wire format) renders `--`.
pub fn format_unix_ms_local(unix_ms: i64) -> String {
    if unix_ms == 0 {
        return "--".to_string();
    }
    match Local.timestamp_millis_opt(unix_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => "--".to_string(),
    }
}

/// 12-hour clock label: hour 0 is `12 AM`, hour 12 is `12 PM`, hour 13 is `01 PM`.
pub fn format_time_12h(hour: u32, minute: u32, second: u32) -> String {
    let mut display_hour = hour % 12;
    if display_hour == 0 {
        display_hour = 12;
    }
    let meridiem = if hour % 24 >= 12 { "PM" } else { "AM" };
    format!("{:02}:{:02}:{:02} {}", display_hour, minute, second, meridiem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_auto_units() {
        assert_eq!(format_bytes_auto(0.0), "0 B");
        assert_eq!(format_bytes_auto(-42.0), "0 B");
        assert_eq!(format_bytes_auto(512.0), "512 B");
        assert_eq!(format_bytes_auto(1024.0), "1.00 KB");
        assert_eq!(format_bytes_auto(1024.0 * 1024.0), "1.00 MB");
        assert_eq!(format_bytes_auto(1536.0), "1.50 KB");
    }

    #[test]
    fn test_format_time_12h_edges() {
        assert_eq!(format_time_12h(0, 0, 0), "12:00:00 AM");
        assert_eq!(format_time_12h(12, 0, 0), "12:00:00 PM");
        assert_eq!(format_time_12h(13, 5, 9), "01:05:09 PM");
        assert_eq!(format_time_12h(23, 59, 59), "11:59:59 PM");
    }

    #[test]
    fn test_format_unix_ms_local_zero_is_dashes() {
        assert_eq!(format_unix_ms_local(0), "--");
    }

    #[test]
    fn test_format_unix_ms_local_has_millis() {
        let text = format_unix_ms_local(1_700_000_000_123);
        // Local timezone varies; only the shape is stable.
        assert_eq!(text.len(), "2023-11-14 22:13:20.123".len());
        assert!(text.ends_with(|c: char| c.is_ascii_digit()));
        assert!(text.contains('.'));
    }
}
