//! Simulation substrate for DASH streaming experiments.
//!
//! # Modules
//!
//! - [`queue`]: Discrete-event queue with FIFO tie-break and cancellable timers
//! - [`link`]: Processor-sharing bottleneck link delivering data in chunks
//! - [`rate`]: `5Mbps` / `2ms` parsing
//! - [`scenario`]: Deterministic random-walk bottleneck rate schedules

pub mod link;
pub mod queue;
pub mod rate;
pub mod scenario;

pub use link::{ChunkDelivery, DEFAULT_CHUNK_BYTES, Deliveries, FlowId, SharedLink};
pub use queue::{EventQueue, ScheduledEvent, TimerId};
pub use rate::{DataRate, parse_delay_us};
pub use scenario::{Scenario, ScenarioConfig, ScenarioFrame, render_schedule};
