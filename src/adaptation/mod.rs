//! Rate adaptation policies.
//!
//! A policy picks the representation of the next segment and an optional
//! delay before the request goes out. Three policies ship:
//!
//! ## PANDA
//! - Probe-and-adapt target rate (additive increase, backoff on overshoot)
//! - EWMA smoothing of the target
//! - Dead-zone quantizer to avoid flip-flopping
//! - Request pacing from the buffer deviation
//!
//! ## TOBASCO
//! - Fast start while the buffer grows
//! - Buffer thresholds gate up and down switches
//! - Pauses requests when the buffer is above its upper bound
//!
//! ## FESTIVE
//! - Harmonic mean of the last 20 throughput samples
//! - One-step switches, upward switches gated by time on the current level
//! - Stability/efficiency score decides whether a switch is worth it
//! - Randomized buffer target per client for request pacing
//!
//! Only the contract matters to the controller: `representation` must not
//! exceed the catalog's highest index and `segment_index` must echo the
//! context. The controller rejects anything else.

pub mod festive;
pub mod kind;
pub mod panda;
pub mod tobasco;

pub use kind::PolicyKind;

use crate::buffer::PlaybackBuffer;
use crate::catalog::SegmentCatalog;
use crate::throughput::ThroughputTracker;

/// Read-only view of a client handed to a policy for one decision.
#[derive(Debug, Clone, Copy)]
pub struct AdaptationContext<'a> {
    pub segment_index: u64,
    pub client_id: u32,
    pub now_us: u64,
    pub catalog: &'a SegmentCatalog,
    pub throughput: &'a ThroughputTracker,
    pub buffer: &'a PlaybackBuffer,
    /// Representation of the previous request, `None` before the first.
    pub last_representation: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AdaptationDecision {
    pub segment_index: u64,
    pub representation: usize,
    /// Wait this long after the current download before requesting.
    pub extra_delay_us: u64,
    /// Opaque policy tag, passed through to the logs.
    pub decision_case: u32,
    pub delay_case: u32,
    pub decided_at_us: u64,
}

impl AdaptationDecision {
    pub fn immediate(ctx: &AdaptationContext<'_>, representation: usize, decision_case: u32) -> Self {
        Self {
            segment_index: ctx.segment_index,
            representation,
            extra_delay_us: 0,
            decision_case,
            delay_case: 0,
            decided_at_us: ctx.now_us,
        }
    }

    pub fn with_delay(mut self, extra_delay_us: u64, delay_case: u32) -> Self {
        self.extra_delay_us = extra_delay_us;
        self.delay_case = delay_case;
        self
    }
}

pub trait RateAdaptationPolicy: Send {
    fn kind(&self) -> PolicyKind;

    fn next_representation(&mut self, ctx: &AdaptationContext<'_>) -> AdaptationDecision;
}

pub fn create_policy(kind: PolicyKind, client_id: u32) -> Box<dyn RateAdaptationPolicy> {
    match kind {
        PolicyKind::Panda => Box::new(panda::Panda::new()),
        PolicyKind::Tobasco => Box::new(tobasco::Tobasco::new()),
        PolicyKind::Festive => Box::new(festive::Festive::new(client_id)),
    }
}

/// Highest representation whose average bitrate fits in `rate_bps`, or the
/// lowest one if none does.
pub(crate) fn highest_sustainable(catalog: &SegmentCatalog, rate_bps: f64) -> usize {
    (0..=catalog.highest_rep_index())
        .rev()
        .find(|&rep| catalog.average_bitrate(rep).is_ok_and(|b| b <= rate_bps))
        .unwrap_or(0)
}

/// Average bitrate of a representation known to be in range.
pub(crate) fn bitrate_of(catalog: &SegmentCatalog, representation: usize) -> f64 {
    catalog.average_bitrate(representation).unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> SegmentCatalog {
        // 2s segments: 1, 2 and 4 Mbps
        SegmentCatalog::from_sizes(
            vec![vec![250_000; 4], vec![500_000; 4], vec![1_000_000; 4]],
            2_000_000,
        )
        .unwrap()
    }

    #[test]
    fn test_highest_sustainable() {
        let catalog = catalog();
        assert_eq!(highest_sustainable(&catalog, 500_000.0), 0);
        assert_eq!(highest_sustainable(&catalog, 1_000_000.0), 0);
        assert_eq!(highest_sustainable(&catalog, 3_999_999.0), 1);
        assert_eq!(highest_sustainable(&catalog, 50_000_000.0), 2);
    }

    #[test]
    fn test_factory_kinds() {
        for kind in PolicyKind::ALL {
            assert_eq!(create_policy(kind, 0).kind(), kind);
        }
    }
}
