//! Network timing samples and the low-jitter window estimator.
//!
//! Each state exchange yields one `(rtt, offset)` pair via the standard
//! four-timestamp formula. A bounded window of recent pairs feeds a weighted
//! estimator that trusts low-RTT probes: on asymmetric links, the samples
//! closest to the window's best RTT carry the least offset bias.

use serde_json::Value;
use std::collections::VecDeque;

use crate::messages::coerce_f64;

/// Window capacity for recent `(rtt, offset)` pairs.
pub const LATENCY_SAMPLE_WINDOW: usize = 24;
/// Minimum number of samples the estimator averages over; if the headroom
/// band selects fewer, it widens to the N lowest-RTT samples instead.
pub const LOW_RTT_SAMPLE_FLOOR: usize = 5;
/// Samples within this many ms of the window's best RTT are "low jitter".
pub const LOW_RTT_HEADROOM_MS: f64 = 8.0;
/// RTT values above this are clamped; they indicate measurement artifacts.
pub const MAX_REASONABLE_RTT_MS: f64 = 60_000.0;
/// Offset magnitude above this is clamped for the same reason.
pub const MAX_REASONABLE_OFFSET_MS: f64 = 60_000.0;

/// One `(rtt, offset)` measurement derived from a state exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkSample {
    pub rtt_ms: f64,
    pub offset_ms: f64,
}

/// Pull `(t2, t3)` out of a state payload.
///
/// `t3` falls back through `response_send_unix_ms`, `response_unix_ms`,
/// `runtime.updated_unix_ms`; servers older than the timestamped protocol
/// only populate the runtime clock.
pub(crate) fn server_timestamps_ms(payload: &Value) -> (Option<f64>, Option<f64>) {
    let request_received_ms = coerce_f64(&payload["request_received_unix_ms"]);
    let response_send_ms = coerce_f64(&payload["response_send_unix_ms"])
        .or_else(|| coerce_f64(&payload["response_unix_ms"]))
        .or_else(|| coerce_f64(&payload["runtime"]["updated_unix_ms"]));
    (request_received_ms, response_send_ms)
}

/// Convert one exchange into a clamped `(rtt, offset)` sample.
///
/// With both server timestamps present this is the NTP four-timestamp
/// formula; a negative or non-finite corrected RTT falls back to the
/// wall-clock measurement. With only a server clock available, the offset is
/// measured against the request midpoint.
pub(crate) fn compute_network_sample(
    payload: &Value,
    fallback_rtt_ms: f64,
    client_send_ms: i64,
    client_recv_ms: i64,
) -> NetworkSample {
    let (request_received_ms, response_send_ms) = server_timestamps_ms(payload);
    let t1 = client_send_ms as f64;
    let t4 = client_recv_ms as f64;

    let (mut rtt_ms, mut offset_ms) = match (request_received_ms, response_send_ms) {
        (Some(t2), Some(t3)) => {
            let mut rtt = (t4 - t1) - (t3 - t2);
            let offset = ((t2 - t1) + (t3 - t4)) / 2.0;
            if !rtt.is_finite() || rtt < 0.0 {
                rtt = fallback_rtt_ms;
            }
            (rtt, offset)
        }
        (_, maybe_t3) => {
            let midpoint_ms = (t1 + t4) / 2.0;
            let server_ms = maybe_t3.unwrap_or(midpoint_ms);
            (fallback_rtt_ms, server_ms - midpoint_ms)
        }
    };

    if !rtt_ms.is_finite() {
        rtt_ms = fallback_rtt_ms;
    }
    if !offset_ms.is_finite() {
        offset_ms = 0.0;
    }

    NetworkSample {
        rtt_ms: rtt_ms.clamp(0.0, MAX_REASONABLE_RTT_MS),
        offset_ms: offset_ms.clamp(-MAX_REASONABLE_OFFSET_MS, MAX_REASONABLE_OFFSET_MS),
    }
}

/// Bounded FIFO of recent samples with the low-jitter weighted estimator.
#[derive(Debug, Clone, Default)]
pub struct SampleWindow {
    samples: VecDeque<NetworkSample>,
}

impl SampleWindow {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LATENCY_SAMPLE_WINDOW),
        }
    }

    /// Append a sample, evicting the oldest when the window is full.
    pub fn push(&mut self, sample: NetworkSample) {
        if self.samples.len() >= LATENCY_SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Lowest RTT currently in the window.
    pub fn best_rtt_ms(&self) -> Option<f64> {
        self.samples
            .iter()
            .map(|s| s.rtt_ms)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Weighted `(rtt, offset)` target over the low-jitter subset.
    ///
    /// Samples within [`LOW_RTT_HEADROOM_MS`] of the best RTT are selected;
    /// if fewer than [`LOW_RTT_SAMPLE_FLOOR`] qualify, the N lowest-RTT
    /// samples are used instead. Each selected sample is weighted by
    /// `1 / (1 + rtt)^2`.
    pub fn low_jitter_target(&self) -> Option<NetworkSample> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted_by_rtt: Vec<NetworkSample> = self.samples.iter().copied().collect();
        sorted_by_rtt.sort_by(|a, b| a.rtt_ms.total_cmp(&b.rtt_ms));
        let best_rtt_ms = sorted_by_rtt[0].rtt_ms;

        let mut selected: Vec<NetworkSample> = self
            .samples
            .iter()
            .copied()
            .filter(|s| s.rtt_ms <= best_rtt_ms + LOW_RTT_HEADROOM_MS)
            .collect();
        if selected.len() < LOW_RTT_SAMPLE_FLOOR {
            selected = sorted_by_rtt[..sorted_by_rtt.len().min(LOW_RTT_SAMPLE_FLOOR)].to_vec();
        }

        let mut weight_sum = 0.0;
        let mut weighted_rtt = 0.0;
        let mut weighted_offset = 0.0;
        for sample in &selected {
            let weight = 1.0 / ((1.0 + sample.rtt_ms) * (1.0 + sample.rtt_ms));
            weighted_rtt += sample.rtt_ms * weight;
            weighted_offset += sample.offset_ms * weight;
            weight_sum += weight;
        }

        if weight_sum <= 0.0 {
            return Some(sorted_by_rtt[0]);
        }
        Some(NetworkSample {
            rtt_ms: weighted_rtt / weight_sum,
            offset_ms: weighted_offset / weight_sum,
        })
    }
}
