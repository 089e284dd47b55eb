//! Fluid model of a shared bottleneck link.
//!
//! Active flows split the link rate equally (processor sharing), which is
//! the long-run behaviour of competing TCP flows without modelling packets.
//! Each flow's bytes are handed out in chunks so receivers see data arrive
//! progressively; the caller asks [`SharedLink::next_event_us`] when the
//! next chunk boundary falls and calls [`SharedLink::service`] at that time.

use smallvec::SmallVec;
use tracing::trace;

use crate::rate::DataRate;

/// Chunk size used when the caller does not pick one: ten 1446-byte TCP
/// segments.
pub const DEFAULT_CHUNK_BYTES: u64 = 14_460;

const PROGRESS_EPSILON: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(u64);

/// Bytes that left the link for one flow during a [`SharedLink::service`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkDelivery {
    pub flow: FlowId,
    pub bytes: u64,
    /// True if this delivery completes the flow.
    pub finished: bool,
}

#[derive(Debug)]
struct Flow {
    id: FlowId,
    total: u64,
    delivered: u64,
    chunk: u64,
    progress: f64,
}

/// Deliveries from one service call; rarely more than a handful of flows
/// finish a chunk at the same instant.
pub type Deliveries = SmallVec<[ChunkDelivery; 4]>;

#[derive(Debug)]
pub struct SharedLink {
    rate: DataRate,
    chunk_bytes: u64,
    flows: Vec<Flow>,
    last_update_us: u64,
    next_flow: u64,
}

impl SharedLink {
    pub fn new(rate: DataRate, chunk_bytes: u64) -> Self {
        Self {
            rate,
            chunk_bytes: chunk_bytes.max(1),
            flows: Vec::new(),
            last_update_us: 0,
            next_flow: 0,
        }
    }

    pub fn rate(&self) -> DataRate {
        self.rate
    }

    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    /// Change the link rate. Progress made so far is kept at the old rate.
    pub fn set_rate(&mut self, now_us: u64, rate: DataRate) {
        self.advance(now_us);
        trace!("link rate {} -> {}", self.rate, rate);
        self.rate = rate;
    }

    /// Start transferring `bytes` over the link.
    pub fn start_flow(&mut self, now_us: u64, bytes: u64) -> FlowId {
        self.advance(now_us);
        let id = FlowId(self.next_flow);
        self.next_flow += 1;
        self.flows.push(Flow {
            id,
            total: bytes,
            delivered: 0,
            chunk: bytes.min(self.chunk_bytes),
            progress: 0.0,
        });
        id
    }

    /// Drop a flow without delivering the rest of it.
    pub fn abort_flow(&mut self, now_us: u64, id: FlowId) -> bool {
        self.advance(now_us);
        let before = self.flows.len();
        self.flows.retain(|f| f.id != id);
        before != self.flows.len()
    }

    /// Time of the next chunk boundary, or `None` when idle or stalled at
    /// zero rate.
    pub fn next_event_us(&self) -> Option<u64> {
        let nearest = self
            .flows
            .iter()
            .map(|f| (f.chunk as f64 - f.progress).max(0.0))
            .min_by(|a, b| a.total_cmp(b))?;
        if nearest <= PROGRESS_EPSILON {
            return Some(self.last_update_us);
        }
        let per_flow = self.per_flow_bytes_per_us();
        if per_flow <= 0.0 {
            return None;
        }
        let wait = (nearest / per_flow).ceil() as u64;
        Some(self.last_update_us.saturating_add(wait))
    }

    /// Advance to `now_us` and collect every chunk that completed.
    pub fn service(&mut self, now_us: u64) -> Deliveries {
        self.advance(now_us);
        let chunk_bytes = self.chunk_bytes;
        let mut deliveries = Deliveries::new();

        for flow in &mut self.flows {
            let mut bytes = 0;
            while flow.delivered < flow.total || flow.chunk == 0 {
                if flow.progress + PROGRESS_EPSILON < flow.chunk as f64 {
                    break;
                }
                bytes += flow.chunk;
                flow.delivered += flow.chunk;
                flow.progress = (flow.progress - flow.chunk as f64).max(0.0);
                flow.chunk = (flow.total - flow.delivered).min(chunk_bytes);
                if flow.chunk == 0 {
                    break;
                }
            }
            let finished = flow.delivered >= flow.total;
            if bytes > 0 || finished {
                deliveries.push(ChunkDelivery {
                    flow: flow.id,
                    bytes,
                    finished,
                });
            }
        }

        self.flows.retain(|f| f.delivered < f.total);
        deliveries
    }

    fn per_flow_bytes_per_us(&self) -> f64 {
        if self.flows.is_empty() {
            return 0.0;
        }
        self.rate.bps() as f64 / 8.0 / 1_000_000.0 / self.flows.len() as f64
    }

    fn advance(&mut self, now_us: u64) {
        let elapsed = now_us.saturating_sub(self.last_update_us);
        if elapsed > 0 {
            let bytes = self.per_flow_bytes_per_us() * elapsed as f64;
            for flow in &mut self.flows {
                flow.progress += bytes;
            }
        }
        self.last_update_us = self.last_update_us.max(now_us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the link until idle, returning (time, flow, bytes, finished).
    fn drain(link: &mut SharedLink) -> Vec<(u64, FlowId, u64, bool)> {
        let mut out = Vec::new();
        while let Some(t) = link.next_event_us() {
            for d in link.service(t) {
                out.push((t, d.flow, d.bytes, d.finished));
            }
        }
        out
    }

    #[test]
    fn single_flow_runs_at_full_rate() {
        // 8 Mbps = 1 byte/us
        let mut link = SharedLink::new(DataRate::from_mbps(8), 1_000);
        let id = link.start_flow(0, 2_500);
        let events = drain(&mut link);

        assert_eq!(
            events,
            vec![
                (1_000, id, 1_000, false),
                (2_000, id, 1_000, false),
                (2_500, id, 500, true),
            ]
        );
        assert_eq!(link.active_flows(), 0);
    }

    #[test]
    fn two_flows_share_equally() {
        let mut link = SharedLink::new(DataRate::from_mbps(8), 10_000);
        let a = link.start_flow(0, 10_000);
        let b = link.start_flow(0, 10_000);
        let events = drain(&mut link);

        // Each gets 0.5 byte/us, so both finish together at 20ms.
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.0 == 20_000 && e.3));
        assert_eq!(events[0].1, a);
        assert_eq!(events[1].1, b);
    }

    #[test]
    fn rate_change_mid_transfer() {
        let mut link = SharedLink::new(DataRate::from_mbps(8), 4_000);
        link.start_flow(0, 4_000);
        // Half done at 2ms, then the rate halves: remaining 2000 bytes take 4ms.
        link.set_rate(2_000, DataRate::from_mbps(4));
        assert_eq!(link.next_event_us(), Some(6_000));
        let done = link.service(6_000);
        assert_eq!(done.len(), 1);
        assert!(done[0].finished);
    }

    #[test]
    fn zero_rate_stalls() {
        let mut link = SharedLink::new(DataRate::from_bps(0), 1_000);
        link.start_flow(0, 1_000);
        assert_eq!(link.next_event_us(), None);
        link.set_rate(5_000, DataRate::from_mbps(8));
        assert_eq!(link.next_event_us(), Some(6_000));
    }

    #[test]
    fn empty_flow_finishes_immediately() {
        let mut link = SharedLink::new(DataRate::from_mbps(8), 1_000);
        let id = link.start_flow(100, 0);
        assert_eq!(link.next_event_us(), Some(100));
        let done = link.service(100);
        assert_eq!(
            done.as_slice(),
            &[ChunkDelivery {
                flow: id,
                bytes: 0,
                finished: true
            }]
        );
    }

    #[test]
    fn aborted_flow_is_dropped() {
        let mut link = SharedLink::new(DataRate::from_mbps(8), 1_000);
        let id = link.start_flow(0, 5_000);
        assert!(link.abort_flow(10, id));
        assert_eq!(link.next_event_us(), None);
    }
}
