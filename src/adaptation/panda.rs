//! Probe-and-adapt rate selection.
//!
//! The target rate grows by `KAPPA * (OMEGA - overshoot)` per second of
//! inter-request time, where overshoot is how far the target sits above the
//! measured throughput. The smoothed target is quantized with a dead zone,
//! and the next request is paced so the buffer drifts towards `MIN_BUFFER`.

use tracing::trace;

use super::{
    AdaptationContext, AdaptationDecision, PolicyKind, RateAdaptationPolicy, bitrate_of,
    highest_sustainable,
};
use crate::ewma::Ewma;
use crate::utils::{secs_to_us, us_to_secs};

const KAPPA: f64 = 0.14;
/// Probing increment in bits per second.
const OMEGA: f64 = 300_000.0;
const ALPHA: f64 = 0.2;
const BETA: f64 = 0.2;
/// Dead-zone width as a fraction of the smoothed target.
const EPSILON: f64 = 0.15;
const MIN_BUFFER_SECS: f64 = 26.0;

pub const CASE_STARTUP: u32 = 0;
pub const CASE_UP: u32 = 1;
pub const CASE_HOLD: u32 = 2;
pub const CASE_DOWN: u32 = 3;

pub const DELAY_NONE: u32 = 0;
pub const DELAY_PACING: u32 = 1;

#[derive(Debug)]
pub struct Panda {
    target_bps: Option<f64>,
    smoothed: Ewma,
}

impl Default for Panda {
    fn default() -> Self {
        Self::new()
    }
}

impl Panda {
    pub fn new() -> Self {
        Self {
            target_bps: None,
            smoothed: Ewma::new(ALPHA),
        }
    }

    /// Current smoothed target rate, `None` before the first sample.
    pub fn smoothed_target(&self) -> Option<f64> {
        self.smoothed.value()
    }
}

impl RateAdaptationPolicy for Panda {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Panda
    }

    fn next_representation(&mut self, ctx: &AdaptationContext<'_>) -> AdaptationDecision {
        let Some(last) = ctx.throughput.last() else {
            return AdaptationDecision::immediate(ctx, 0, CASE_STARTUP);
        };
        let Some(measured) = last.throughput_bps() else {
            let current = ctx.last_representation.unwrap_or(0);
            return AdaptationDecision::immediate(ctx, current, CASE_HOLD);
        };

        let segment_secs = us_to_secs(ctx.catalog.segment_duration_us());
        let download_secs = us_to_secs(last.transfer_time_us());
        let interval = download_secs.max(segment_secs);

        let target = match self.target_bps {
            None => measured,
            Some(target) => {
                let overshoot = (target - measured).max(0.0);
                (target + KAPPA * interval * (OMEGA - overshoot)).max(OMEGA)
            }
        };
        self.target_bps = Some(target);
        let smoothed = self.smoothed.update(target).unwrap_or(target);

        let current = ctx.last_representation.unwrap_or(0);
        let up = highest_sustainable(ctx.catalog, smoothed * (1.0 - EPSILON));
        let down = highest_sustainable(ctx.catalog, smoothed);
        let (representation, case) = if current < up {
            (up, CASE_UP)
        } else if current <= down {
            (current, CASE_HOLD)
        } else {
            (down, CASE_DOWN)
        };

        let buffer_secs = us_to_secs(ctx.buffer.level_at(ctx.now_us));
        let target_interval = bitrate_of(ctx.catalog, representation) * segment_secs / smoothed
            + BETA * (buffer_secs - MIN_BUFFER_SECS);
        let delay_secs = target_interval - download_secs;
        trace!(
            "panda client {}: target {:.0} smoothed {:.0} rep {} delay {:.3}s",
            ctx.client_id, target, smoothed, representation, delay_secs
        );

        let decision = AdaptationDecision::immediate(ctx, representation, case);
        if delay_secs > 0.0 && buffer_secs > MIN_BUFFER_SECS {
            decision.with_delay(secs_to_us(delay_secs), DELAY_PACING)
        } else {
            decision
        }
    }
}
