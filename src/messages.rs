//! Wire message mirrors for the BetterClock HTTP API.
//!
//! Server payloads are drained out of `serde_json::Value` with tolerant
//! coercion: numbers may arrive as floats or strings, missing or malformed
//! fields fall back to defaults, and unknown fields are ignored. That
//! tolerance is part of the protocol contract, not a convenience.

use serde::Serialize;
use serde_json::Value;

/// Coerce a JSON value into an integer the way the wire format expects:
/// numbers truncate, numeric strings parse, booleans map to 0/1.
pub(crate) fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Coerce a JSON value into a finite float; anything else is `None`.
pub(crate) fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

pub(crate) fn field_i64(payload: &Value, key: &str) -> i64 {
    coerce_i64(&payload[key]).unwrap_or(0)
}

pub(crate) fn field_f64(payload: &Value, key: &str) -> Option<f64> {
    coerce_f64(&payload[key])
}

pub(crate) fn field_bool(payload: &Value, key: &str) -> bool {
    payload[key].as_bool().unwrap_or(false)
}

pub(crate) fn field_string(payload: &Value, key: &str) -> String {
    payload[key].as_str().unwrap_or("").to_string()
}

/// Server-side runtime state: the display clock plus warning/bell machinery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeSnapshot {
    pub iso_local: String,
    pub hour: i64,
    pub minute: i64,
    pub second: i64,
    pub source_label: String,
    pub warning_enabled: bool,
    pub warning_active_count: i64,
    pub warning_pulse_on: bool,
    pub warning_lead_time_ms: i64,
    pub warning_pulse_time_ms: i64,
    pub triggered_count: i64,
    pub armed_count: i64,
    pub updated_unix_ms: i64,
}

impl RuntimeSnapshot {
    pub(crate) fn from_value(runtime: &Value) -> Self {
        Self {
            iso_local: field_string(runtime, "iso_local"),
            hour: field_i64(runtime, "hour"),
            minute: field_i64(runtime, "minute"),
            second: field_i64(runtime, "second"),
            source_label: field_string(runtime, "source_label"),
            warning_enabled: field_bool(runtime, "warning_enabled"),
            warning_active_count: field_i64(runtime, "warning_active_count"),
            warning_pulse_on: field_bool(runtime, "warning_pulse_on"),
            warning_lead_time_ms: field_i64(runtime, "warning_lead_time_ms"),
            warning_pulse_time_ms: field_i64(runtime, "warning_pulse_time_ms"),
            triggered_count: field_i64(runtime, "triggered_count"),
            armed_count: field_i64(runtime, "armed_count"),
            updated_unix_ms: field_i64(runtime, "updated_unix_ms"),
        }
    }
}

/// Full `/v1/state` payload: runtime snapshot, session traffic accounting,
/// and the server-side half of the four-timestamp exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateResponse {
    pub runtime: RuntimeSnapshot,
    pub clients_seen: i64,
    pub total_requests: i64,
    pub total_in_bytes: i64,
    pub total_out_bytes: i64,
    pub session_in_bytes_per_sec: f64,
    pub session_out_bytes_per_sec: f64,
    pub server_started_unix_ms: i64,
    pub session_first_in_unix_ms: i64,
    pub session_last_in_unix_ms: i64,
    pub session_last_out_unix_ms: i64,
    pub client_debug_mode: bool,
    pub request_received_unix_ms: i64,
    pub response_unix_ms: i64,
    pub response_send_unix_ms: i64,
    pub server_processing_ms: i64,
    pub response_iso_local: String,
}

impl StateResponse {
    pub(crate) fn from_value(payload: &Value) -> Self {
        Self {
            runtime: RuntimeSnapshot::from_value(&payload["runtime"]),
            clients_seen: field_i64(payload, "clients_seen"),
            total_requests: field_i64(payload, "total_requests"),
            total_in_bytes: field_i64(payload, "total_in_bytes"),
            total_out_bytes: field_i64(payload, "total_out_bytes"),
            session_in_bytes_per_sec: field_f64(payload, "session_in_bytes_per_sec")
                .unwrap_or(0.0),
            session_out_bytes_per_sec: field_f64(payload, "session_out_bytes_per_sec")
                .unwrap_or(0.0),
            server_started_unix_ms: field_i64(payload, "server_started_unix_ms"),
            session_first_in_unix_ms: field_i64(payload, "session_first_in_unix_ms"),
            session_last_in_unix_ms: field_i64(payload, "session_last_in_unix_ms"),
            session_last_out_unix_ms: field_i64(payload, "session_last_out_unix_ms"),
            client_debug_mode: field_bool(payload, "client_debug_mode"),
            request_received_unix_ms: field_i64(payload, "request_received_unix_ms"),
            response_unix_ms: field_i64(payload, "response_unix_ms"),
            response_send_unix_ms: field_i64(payload, "response_send_unix_ms"),
            server_processing_ms: field_i64(payload, "server_processing_ms"),
            response_iso_local: field_string(payload, "response_iso_local"),
        }
    }
}

/// One connected client as reported by `/v1/clients`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicClient {
    pub id: String,
    pub instance_id: String,
    pub debug_mode: bool,
    pub ip: String,
    pub request_count: i64,
    pub first_seen_unix_ms: i64,
    pub last_seen_unix_ms: i64,
    pub last_rtt_ms: Option<f64>,
    pub last_offset_ms: Option<f64>,
    pub last_desync_ms: Option<f64>,
    pub first_in_unix_ms: i64,
    pub last_in_unix_ms: i64,
    pub last_out_unix_ms: i64,
    pub last_in_bytes: i64,
    pub last_out_bytes: i64,
    pub total_in_bytes: i64,
    pub total_out_bytes: i64,
    pub in_bytes_per_sec: f64,
    pub out_bytes_per_sec: f64,
}

impl PublicClient {
    pub(crate) fn from_value(item: &Value) -> Self {
        Self {
            id: field_string(item, "id"),
            instance_id: field_string(item, "instance_id"),
            debug_mode: field_bool(item, "debug_mode"),
            ip: field_string(item, "ip"),
            request_count: field_i64(item, "request_count"),
            first_seen_unix_ms: field_i64(item, "first_seen_unix_ms"),
            last_seen_unix_ms: field_i64(item, "last_seen_unix_ms"),
            last_rtt_ms: field_f64(item, "last_rtt_ms"),
            last_offset_ms: field_f64(item, "last_offset_ms"),
            last_desync_ms: field_f64(item, "last_desync_ms"),
            first_in_unix_ms: field_i64(item, "first_in_unix_ms"),
            last_in_unix_ms: field_i64(item, "last_in_unix_ms"),
            last_out_unix_ms: field_i64(item, "last_out_unix_ms"),
            last_in_bytes: field_i64(item, "last_in_bytes"),
            last_out_bytes: field_i64(item, "last_out_bytes"),
            total_in_bytes: field_i64(item, "total_in_bytes"),
            total_out_bytes: field_i64(item, "total_out_bytes"),
            in_bytes_per_sec: field_f64(item, "in_bytes_per_sec").unwrap_or(0.0),
            out_bytes_per_sec: field_f64(item, "out_bytes_per_sec").unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientsResponse {
    pub count: i64,
    pub clients: Vec<PublicClient>,
}

impl ClientsResponse {
    pub(crate) fn from_value(payload: &Value) -> Self {
        let clients: Vec<PublicClient> = payload["clients"]
            .as_array()
            .map(|items| items.iter().map(PublicClient::from_value).collect())
            .unwrap_or_default();
        let count = coerce_i64(&payload["count"]).unwrap_or(clients.len() as i64);
        Self { count, clients }
    }
}

/// `/v1` index: the server's own map of its endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiIndexResponse {
    pub api_base: String,
    pub state_url: String,
    pub clients_url: String,
    pub health_url: String,
    pub runtime_code_url: String,
    pub disconnect_url: String,
    pub debug_url: String,
    pub openapi_url: String,
}

impl ApiIndexResponse {
    pub(crate) fn from_value(payload: &Value) -> Self {
        Self {
            api_base: field_string(payload, "api_base"),
            state_url: field_string(payload, "state_url"),
            clients_url: field_string(payload, "clients_url"),
            health_url: field_string(payload, "health_url"),
            runtime_code_url: field_string(payload, "runtime_code_url"),
            disconnect_url: field_string(payload, "disconnect_url"),
            debug_url: field_string(payload, "debug_url"),
            openapi_url: field_string(payload, "openapi_url"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisconnectResponse {
    pub disconnected: bool,
    pub client_id: String,
    pub instance_id: String,
}

/// Echo of the endpoint a session talks to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub local: bool,
    pub connection_ip: Option<String>,
}

/// Identity of the device the client runs on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceIpInfo {
    pub hostname: String,
    pub loopback_ip: String,
    pub resolved_local_ip: Option<String>,
    pub lan_ip: Option<String>,
    pub public_ip: Option<String>,
}

/// Result of one corrected-time poll: the adjusted clock plus the offset
/// model telemetry and the state payload it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectedTimeSnapshot {
    pub corrected_unix_ms: i64,
    pub corrected_iso_local: String,
    pub time_12h: String,
    pub date_text: String,
    pub rtt_ms: f64,
    pub offset_ms: f64,
    pub desync_ms: f64,
    pub state: StateResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_i64_variants() {
        assert_eq!(coerce_i64(&json!(42)), Some(42));
        assert_eq!(coerce_i64(&json!(42.9)), Some(42));
        assert_eq!(coerce_i64(&json!("17")), Some(17));
        assert_eq!(coerce_i64(&json!(" 17 ")), Some(17));
        assert_eq!(coerce_i64(&json!(true)), Some(1));
        assert_eq!(coerce_i64(&json!("nope")), None);
        assert_eq!(coerce_i64(&json!(null)), None);
        assert_eq!(coerce_i64(&json!([1])), None);
    }

    #[test]
    fn test_coerce_f64_rejects_non_finite() {
        assert_eq!(coerce_f64(&json!(1.5)), Some(1.5));
        assert_eq!(coerce_f64(&json!("2.25")), Some(2.25));
        assert_eq!(coerce_f64(&json!("inf")), None);
        assert_eq!(coerce_f64(&json!("NaN")), None);
        assert_eq!(coerce_f64(&json!(null)), None);
    }

    #[test]
    fn test_state_from_empty_payload_defaults() {
        let state = StateResponse::from_value(&json!({}));
        assert_eq!(state.clients_seen, 0);
        assert_eq!(state.request_received_unix_ms, 0);
        assert_eq!(state.session_in_bytes_per_sec, 0.0);
        assert!(!state.client_debug_mode);
        assert_eq!(state.runtime.hour, 0);
        assert_eq!(state.runtime.iso_local, "");
    }

    #[test]
    fn test_state_tolerates_string_numbers() {
        let state = StateResponse::from_value(&json!({
            "total_requests": "812",
            "session_in_bytes_per_sec": "19.5",
            "runtime": {"hour": "13", "warning_enabled": true},
            "unknown_future_field": {"ignored": true},
        }));
        assert_eq!(state.total_requests, 812);
        assert_eq!(state.session_in_bytes_per_sec, 19.5);
        assert_eq!(state.runtime.hour, 13);
        assert!(state.runtime.warning_enabled);
    }

    #[test]
    fn test_clients_count_falls_back_to_len() {
        let parsed = ClientsResponse::from_value(&json!({
            "clients": [
                {"id": "a", "instance_id": "i-1", "request_count": 3},
                {"id": "b", "instance_id": "i-2", "last_rtt_ms": 4.5},
            ]
        }));
        assert_eq!(parsed.count, 2);
        assert_eq!(parsed.clients[0].id, "a");
        assert_eq!(parsed.clients[1].last_rtt_ms, Some(4.5));
        assert_eq!(parsed.clients[0].last_rtt_ms, None);
    }
}
