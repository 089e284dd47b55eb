//! Buffer-threshold rate selection.
//!
//! The buffer level splits the decision space into bands. Below `MIN_BUFFER`
//! the client drops to whatever a conservative share of the throughput can
//! carry; between `MIN_BUFFER` and `LOW_BUFFER` it only steps down; above
//! `LOW_BUFFER` it steps up when the next level fits. Requests pause when the
//! buffer sits above `HIGH_BUFFER`.

use tracing::trace;

use super::{
    AdaptationContext, AdaptationDecision, PolicyKind, RateAdaptationPolicy, bitrate_of,
    highest_sustainable,
};

const MIN_BUFFER_US: u64 = 10_000_000;
const LOW_BUFFER_US: u64 = 20_000_000;
const HIGH_BUFFER_US: u64 = 40_000_000;
/// Buffer level the pause aims to bring the client back to.
const OPTIMAL_BUFFER_US: u64 = (LOW_BUFFER_US + HIGH_BUFFER_US) / 2;

/// Throughput share a fast-start step may use.
const ALPHA_FAST_START: f64 = 0.75;
/// Throughput share used when the buffer is dangerously low.
const ALPHA_PANIC: f64 = 0.33;
/// Throughput share an upward step may use once the buffer is healthy.
const ALPHA_UP: f64 = 0.75;

/// Window of downloads the throughput estimate is taken over.
const THROUGHPUT_WINDOW: usize = 3;

pub const CASE_STARTUP: u32 = 0;
pub const CASE_FAST_START: u32 = 1;
pub const CASE_PANIC: u32 = 2;
pub const CASE_STEP_DOWN: u32 = 3;
pub const CASE_HOLD_LOW: u32 = 4;
pub const CASE_STEP_UP: u32 = 5;
pub const CASE_HOLD_HIGH: u32 = 6;

pub const DELAY_NONE: u32 = 0;
pub const DELAY_ABOVE_HIGH: u32 = 1;

#[derive(Debug)]
pub struct Tobasco {
    fast_start: bool,
    previous_level_us: u64,
}

impl Default for Tobasco {
    fn default() -> Self {
        Self::new()
    }
}

impl Tobasco {
    pub fn new() -> Self {
        Self {
            fast_start: true,
            previous_level_us: 0,
        }
    }

    pub fn in_fast_start(&self) -> bool {
        self.fast_start
    }
}

impl RateAdaptationPolicy for Tobasco {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Tobasco
    }

    fn next_representation(&mut self, ctx: &AdaptationContext<'_>) -> AdaptationDecision {
        let level_us = ctx.buffer.level_at(ctx.now_us);
        let previous_level_us = std::mem::replace(&mut self.previous_level_us, level_us);

        let Some(rho) = ctx.throughput.estimate_throughput(THROUGHPUT_WINDOW) else {
            return AdaptationDecision::immediate(ctx, 0, CASE_STARTUP);
        };

        let current = ctx.last_representation.unwrap_or(0);
        let highest = ctx.catalog.highest_rep_index();
        let next_fits =
            |share: f64| current < highest && bitrate_of(ctx.catalog, current + 1) <= share * rho;

        if self.fast_start {
            if level_us >= previous_level_us && next_fits(ALPHA_FAST_START) {
                return self.pace(ctx, current + 1, CASE_FAST_START, level_us);
            }
            self.fast_start = false;
        }

        let (representation, case) = if level_us < MIN_BUFFER_US {
            (
                highest_sustainable(ctx.catalog, ALPHA_PANIC * rho).min(current),
                CASE_PANIC,
            )
        } else if level_us < LOW_BUFFER_US {
            if current > 0 && bitrate_of(ctx.catalog, current) >= rho {
                (current - 1, CASE_STEP_DOWN)
            } else {
                (current, CASE_HOLD_LOW)
            }
        } else if next_fits(ALPHA_UP) {
            (current + 1, CASE_STEP_UP)
        } else {
            (current, CASE_HOLD_HIGH)
        };
        trace!(
            "tobasco client {}: level {}us rho {:.0} rep {} case {}",
            ctx.client_id, level_us, rho, representation, case
        );
        self.pace(ctx, representation, case, level_us)
    }
}

impl Tobasco {
    fn pace(
        &self,
        ctx: &AdaptationContext<'_>,
        representation: usize,
        case: u32,
        level_us: u64,
    ) -> AdaptationDecision {
        let decision = AdaptationDecision::immediate(ctx, representation, case);
        if level_us > HIGH_BUFFER_US {
            decision.with_delay(level_us - OPTIMAL_BUFFER_US, DELAY_ABOVE_HIGH)
        } else {
            decision
        }
    }
}
