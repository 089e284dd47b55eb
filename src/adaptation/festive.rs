//! Harmonic-mean rate selection with gradual switching.
//!
//! Each client draws its buffer target from its own seeded RNG so that
//! clients sharing a link do not pace their requests in lockstep.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use super::{
    AdaptationContext, AdaptationDecision, PolicyKind, RateAdaptationPolicy, bitrate_of,
    highest_sustainable,
};

/// Throughput samples feeding the harmonic mean.
const SAMPLE_WINDOW: usize = 20;
/// Fraction of the harmonic mean treated as usable.
const SAFETY_FACTOR: f64 = 0.85;
/// Weight of efficiency against stability in the switch score.
const EFFICIENCY_WEIGHT: f64 = 12.0;
const TARGET_BUFFER_US: u64 = 30_000_000;
/// Decisions remembered for the stability score.
const SWITCH_HISTORY: usize = 20;

pub const CASE_STARTUP: u32 = 0;
pub const CASE_UP: u32 = 1;
pub const CASE_DOWN: u32 = 2;
pub const CASE_HOLD: u32 = 3;

pub const DELAY_NONE: u32 = 0;
pub const DELAY_RANDOM_TARGET: u32 = 1;

#[derive(Debug)]
pub struct Festive {
    rng: StdRng,
    /// Consecutive decisions on the current representation.
    segments_on_level: usize,
    switches: VecDeque<bool>,
}

impl Festive {
    pub fn new(client_id: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(u64::from(client_id)),
            segments_on_level: 0,
            switches: VecDeque::with_capacity(SWITCH_HISTORY),
        }
    }

    fn recent_switches(&self) -> usize {
        self.switches.iter().filter(|&&s| s).count()
    }

    /// Lower is better: penalizes switching often and sitting far from
    /// `ideal`, the lesser of the reference rate and the wanted level.
    fn score(&self, bitrate: f64, ideal: f64, switching: bool) -> f64 {
        let switches = self.recent_switches() + usize::from(switching);
        let stability = 2f64.powi(switches as i32);
        let efficiency = (bitrate / ideal - 1.0).abs();
        stability + EFFICIENCY_WEIGHT * efficiency
    }

    fn remember(&mut self, switched: bool) {
        if self.switches.len() == SWITCH_HISTORY {
            self.switches.pop_front();
        }
        self.switches.push_back(switched);
        if switched {
            self.segments_on_level = 0;
        } else {
            self.segments_on_level += 1;
        }
    }

    /// Buffer target for this decision: the base target moved by up to one
    /// segment either way.
    fn random_target_us(&mut self, segment_duration_us: u64) -> u64 {
        let low = TARGET_BUFFER_US.saturating_sub(segment_duration_us);
        let high = TARGET_BUFFER_US + segment_duration_us;
        self.rng.random_range(low..=high)
    }
}

/// Harmonic mean of positive samples.
pub fn harmonic_mean(samples: &[f64]) -> Option<f64> {
    let positive: Vec<f64> = samples.iter().copied().filter(|s| *s > 0.0).collect();
    if positive.is_empty() {
        return None;
    }
    let inverse_sum: f64 = positive.iter().map(|s| 1.0 / s).sum();
    Some(positive.len() as f64 / inverse_sum)
}

impl RateAdaptationPolicy for Festive {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Festive
    }

    fn next_representation(&mut self, ctx: &AdaptationContext<'_>) -> AdaptationDecision {
        let samples = ctx.throughput.segment_throughputs(SAMPLE_WINDOW);
        let Some(mean) = harmonic_mean(&samples) else {
            self.remember(false);
            return AdaptationDecision::immediate(ctx, 0, CASE_STARTUP);
        };
        let reference = mean * SAFETY_FACTOR;
        let current = ctx.last_representation.unwrap_or(0);
        let wanted = highest_sustainable(ctx.catalog, reference);

        // one step at a time; going up at level k needs k segments on it
        let candidate = if wanted > current && self.segments_on_level >= current {
            current + 1
        } else if wanted < current {
            current - 1
        } else {
            current
        };

        let (representation, case) = if candidate == current {
            (current, CASE_HOLD)
        } else {
            let ideal = reference.min(bitrate_of(ctx.catalog, wanted));
            let stay = self.score(bitrate_of(ctx.catalog, current), ideal, false);
            let switch = self.score(bitrate_of(ctx.catalog, candidate), ideal, true);
            let overloaded = candidate < current && bitrate_of(ctx.catalog, current) > reference;
            if switch < stay || overloaded {
                let case = if candidate > current { CASE_UP } else { CASE_DOWN };
                (candidate, case)
            } else {
                (current, CASE_HOLD)
            }
        };
        self.remember(representation != current);

        let level_us = ctx.buffer.level_at(ctx.now_us);
        let target_us = self.random_target_us(ctx.catalog.segment_duration_us());
        trace!(
            "festive client {}: reference {:.0} rep {} level {}us target {}us",
            ctx.client_id, reference, representation, level_us, target_us
        );

        let decision = AdaptationDecision::immediate(ctx, representation, case);
        if level_us > target_us {
            decision.with_delay(level_us - target_us, DELAY_RANDOM_TARGET)
        } else {
            decision
        }
    }
}
