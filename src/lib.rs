//! DASH streaming client simulator
//!
//! Simulates adaptive-bitrate video clients (PANDA, TOBASCO, FESTIVE)
//! downloading segments over a shared bottleneck link. Each client runs the
//! [`client::StreamController`] state machine against a discrete-event
//! network model and writes a per-client metrics log.

// Use mimalloc as the global allocator for tests (non-Windows only)
#[cfg(not(windows))]
#[cfg(test)]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod adaptation;
pub mod buffer;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod ewma;
pub mod metrics;
pub mod simulation;
pub mod stats;
pub mod throughput;
pub mod utils;

// Test helpers module - available when test-internals feature is enabled
#[cfg(any(test, feature = "test-internals"))]
pub mod test_helpers;

#[cfg(test)]
pub mod tests;

// Re-export commonly used items
pub use adaptation::{AdaptationDecision, PolicyKind, RateAdaptationPolicy};
pub use catalog::SegmentCatalog;
pub use client::{ClientIo, ControllerEvent, ControllerState, StreamController};
pub use config::{SessionConfig, SimulationConfig};
pub use error::{Error, Result};
pub use simulation::{Simulation, run_simulation};
pub use stats::{ClientStats, RunSummary, StopReason};
