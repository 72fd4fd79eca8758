//! Slew-rate-limited display-offset integrator.
//!
//! The raw offset estimate jumps around with RTT jitter; displaying it
//! directly makes the clock visibly twitch. The model instead advances a
//! display offset toward the window's low-jitter target by a bounded step
//! each update. Low-RTT probes pull hard (fast gain), high-RTT probes barely
//! nudge, and no step may exceed the slew rate times the elapsed time.

use std::time::Instant;

use crate::sample::{NetworkSample, SampleWindow};

/// Hard cap on display-offset movement, in ms per second of wall time.
pub const OFFSET_SLEW_RATE_MS_PER_SEC: f64 = 240.0;
/// Gain applied when the fresh sample's RTT sits near the window minimum.
pub const OFFSET_DESYNC_GAIN_FAST: f64 = 0.35;
/// Gain applied to everything else.
pub const OFFSET_DESYNC_GAIN_SLOW: f64 = 0.16;
/// EWMA smoothing factor for the reported RTT.
pub const RTT_EWMA_ALPHA: f64 = 0.25;
/// A sample within this many ms of the window's best RTT gets the fast gain.
pub const FAST_GAIN_RTT_MARGIN_MS: f64 = 3.0;

/// Display-offset state for one session.
#[derive(Debug, Clone)]
pub struct OffsetModel {
    window: SampleWindow,
    initialized: bool,
    display_ms: f64,
    desync_ms: f64,
    rtt_ewma_ms: f64,
    last_update_mono: Instant,
}

impl Default for OffsetModel {
    fn default() -> Self {
        Self::new()
    }
}

impl OffsetModel {
    pub fn new() -> Self {
        Self {
            window: SampleWindow::new(),
            initialized: false,
            display_ms: 0.0,
            desync_ms: 0.0,
            rtt_ewma_ms: 0.0,
            last_update_mono: Instant::now(),
        }
    }

    /// Drop all state, as if the session had never polled.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// The offset currently applied to the displayed clock.
    pub fn display_ms(&self) -> f64 {
        self.display_ms
    }

    /// Slewing backlog: target offset minus display offset at last update.
    pub fn desync_ms(&self) -> f64 {
        self.desync_ms
    }

    pub fn rtt_ewma_ms(&self) -> f64 {
        self.rtt_ewma_ms
    }

    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    /// Feed one fresh sample and advance the display offset.
    pub fn update(&mut self, sample: NetworkSample) {
        self.update_at(Instant::now(), sample);
    }

    pub(crate) fn update_at(&mut self, now: Instant, sample: NetworkSample) {
        self.window.push(sample);
        let target = self.window.low_jitter_target().unwrap_or(sample);

        if !self.initialized {
            self.display_ms = target.offset_ms;
            self.rtt_ewma_ms = target.rtt_ms;
            self.desync_ms = 0.0;
            self.initialized = true;
            self.last_update_mono = now;
            return;
        }

        let best_rtt_ms = self.window.best_rtt_ms().unwrap_or(sample.rtt_ms);
        self.rtt_ewma_ms = (1.0 - RTT_EWMA_ALPHA) * self.rtt_ewma_ms + RTT_EWMA_ALPHA * target.rtt_ms;

        let delta_seconds = now
            .saturating_duration_since(self.last_update_mono)
            .as_secs_f64()
            .max(0.001);
        self.last_update_mono = now;
        let max_step_ms = OFFSET_SLEW_RATE_MS_PER_SEC * delta_seconds;

        let desync_ms = target.offset_ms - self.display_ms;
        self.desync_ms = desync_ms;
        let gain = if sample.rtt_ms <= best_rtt_ms + FAST_GAIN_RTT_MARGIN_MS {
            OFFSET_DESYNC_GAIN_FAST
        } else {
            OFFSET_DESYNC_GAIN_SLOW
        };
        let step_ms = (desync_ms * gain).clamp(-max_step_ms, max_step_ms);
        self.display_ms += step_ms;

        tracing::trace!(
            target_offset_ms = target.offset_ms,
            desync_ms,
            step_ms,
            rtt_ewma_ms = self.rtt_ewma_ms,
            "offset model advanced"
        );
    }
}
