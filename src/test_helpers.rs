#![cfg(any(test, feature = "test-internals"))]
#![allow(dead_code)] // Allow unused helpers - they're used by library tests but not binary tests

use std::sync::Arc;

use network_sim::{EventQueue, TimerId};

use crate::adaptation::{AdaptationContext, AdaptationDecision, PolicyKind, RateAdaptationPolicy};
use crate::catalog::SegmentCatalog;
use crate::client::{ClientIo, ControllerEvent, SegmentRequest, StreamController};
use crate::error::{Error, Result};
use crate::metrics::MemorySink;

pub const SEGMENT_US: u64 = 2_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestEvent {
    Controller(ControllerEvent),
    Deliver(u64),
}

/// In-process transport: every request is answered after a configurable
/// latency, in one piece or in fixed-size chunks.
pub struct LoopbackIo {
    queue: EventQueue<TestEvent>,
    /// Latency of the n-th request; requests past the end use `default_latency_us`.
    pub latencies_us: Vec<u64>,
    pub default_latency_us: u64,
    pub connect_delay_us: u64,
    pub chunk_bytes: Option<u64>,
    pub fail_connect: bool,

    pub requests: Vec<SegmentRequest>,
    pub cancelled: Vec<TimerId>,
    pub closed: bool,
}

impl Default for LoopbackIo {
    fn default() -> Self {
        Self {
            queue: EventQueue::new(),
            latencies_us: Vec::new(),
            default_latency_us: 0,
            connect_delay_us: 0,
            chunk_bytes: None,
            fail_connect: false,
            requests: Vec::new(),
            cancelled: Vec::new(),
            closed: false,
        }
    }
}

impl LoopbackIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latencies(latencies_us: &[u64]) -> Self {
        Self {
            latencies_us: latencies_us.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_default_latency(latency_us: u64) -> Self {
        Self {
            default_latency_us: latency_us,
            ..Self::default()
        }
    }

    /// Answer every request in pieces of at most `chunk_bytes`.
    pub fn with_chunks(chunk_bytes: u64) -> Self {
        Self {
            chunk_bytes: Some(chunk_bytes),
            ..Self::default()
        }
    }

    pub fn refusing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Deliver the next due event to `controller`. `None` once nothing is left.
    pub fn step(&mut self, controller: &mut StreamController) -> Option<Result<()>> {
        let next = self.queue.pop()?;
        Some(match next.event {
            TestEvent::Controller(event) => controller.handle_event(self, event),
            TestEvent::Deliver(bytes) => controller.on_receive(self, bytes),
        })
    }
}

impl ClientIo for LoopbackIo {
    fn now_us(&self) -> u64 {
        self.queue.now_us()
    }

    fn schedule(&mut self, delay_us: u64, event: ControllerEvent) -> TimerId {
        self.queue.schedule_in(delay_us, TestEvent::Controller(event))
    }

    fn cancel(&mut self, id: TimerId) {
        self.cancelled.push(id);
        self.queue.cancel(id);
    }

    fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(Error::Connect("loopback refused".into()));
        }
        self.queue.schedule_in(
            self.connect_delay_us,
            TestEvent::Controller(ControllerEvent::Init),
        );
        Ok(())
    }

    fn send(&mut self, request: &SegmentRequest) -> Result<()> {
        if self.closed {
            return Err(Error::Connect("loopback closed".into()));
        }
        let latency = self
            .latencies_us
            .get(self.requests.len())
            .copied()
            .unwrap_or(self.default_latency_us);
        self.requests.push(*request);

        match self.chunk_bytes {
            Some(chunk) if chunk > 0 && request.bytes > chunk => {
                let mut left = request.bytes;
                while left > 0 {
                    let part = left.min(chunk);
                    self.queue.schedule_in(latency, TestEvent::Deliver(part));
                    left -= part;
                }
            }
            _ => {
                self.queue
                    .schedule_in(latency, TestEvent::Deliver(request.bytes));
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Start `controller` and feed it events until it is terminal or nothing is
/// left to deliver. Returns the number of events delivered.
pub fn run_to_completion(controller: &mut StreamController, io: &mut LoopbackIo) -> usize {
    let _ = controller.start(io);
    pump(controller, io)
}

/// Feed already scheduled events until the controller is terminal or the
/// queue is empty.
pub fn pump(controller: &mut StreamController, io: &mut LoopbackIo) -> usize {
    let mut delivered = 0;
    while !controller.is_terminal() {
        if io.step(controller).is_none() {
            break;
        }
        delivered += 1;
    }
    delivered
}

/// Always picks the same representation and asks for the same delay.
pub struct FixedPolicy {
    pub representation: usize,
    pub delay_us: u64,
}

impl FixedPolicy {
    pub fn new(representation: usize) -> Self {
        Self {
            representation,
            delay_us: 0,
        }
    }

    pub fn with_delay(representation: usize, delay_us: u64) -> Self {
        Self {
            representation,
            delay_us,
        }
    }
}

impl RateAdaptationPolicy for FixedPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Panda
    }

    fn next_representation(&mut self, ctx: &AdaptationContext<'_>) -> AdaptationDecision {
        AdaptationDecision::immediate(ctx, self.representation, 0).with_delay(self.delay_us, 1)
    }
}

/// Picks a representation the catalog does not have.
pub struct OutOfRangePolicy;

impl RateAdaptationPolicy for OutOfRangePolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Tobasco
    }

    fn next_representation(&mut self, ctx: &AdaptationContext<'_>) -> AdaptationDecision {
        AdaptationDecision::immediate(ctx, ctx.catalog.highest_rep_index() + 1, 0)
    }
}

/// Catalog with `segments` segments per representation, each of the given
/// constant size.
pub fn uniform_catalog(sizes: &[u64], segments: usize) -> Arc<SegmentCatalog> {
    let rows = sizes.iter().map(|&size| vec![size; segments]).collect();
    Arc::new(SegmentCatalog::from_sizes(rows, SEGMENT_US).expect("valid catalog"))
}

/// Catalog text in the on-disk format.
pub fn catalog_text(sizes: &[u64], segments: usize) -> String {
    sizes
        .iter()
        .map(|&size| {
            let row: Vec<String> = (0..segments).map(|_| size.to_string()).collect();
            row.join(" ") + "\n"
        })
        .collect()
}

pub fn controller_with(
    policy: impl RateAdaptationPolicy + 'static,
    catalog: Arc<SegmentCatalog>,
) -> (StreamController, MemorySink) {
    let sink = MemorySink::new();
    let controller = StreamController::with_policy(0, catalog, Box::new(policy), Box::new(sink.clone()));
    (controller, sink)
}
