//! Per-client and per-run summaries.
//!
//! Written once at the end of a run as `sim{id}_summary.json` so scripts can
//! compare runs without re-parsing every client log.

use std::path::Path;

use serde::Serialize;

use crate::adaptation::PolicyKind;
use crate::client::ControllerState;
use crate::error::{Error, Result};

/// Outcome of one client's session.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ClientStats {
    pub client_id: u32,
    pub policy: PolicyKind,
    pub final_state: ControllerState,
    /// True if the session ended on an error rather than end of stream.
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub segments_downloaded: u64,
    pub bytes_downloaded: u64,
    pub segments_played: u64,

    /// Underruns that started (the initial "not stalled" report is not one).
    pub underruns: u64,
    /// Seconds spent stalled after playback first started.
    pub stall_time_s: f64,
    /// Seconds from connect to the first played segment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_delay_s: Option<f64>,

    /// Mean representation index over downloaded segments.
    pub average_representation: f64,
    pub representation_switches: u64,

    /// State/event pairs the controller had no transition for.
    pub unexpected_events: u64,
}

/// Summary of one simulation run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub simulation_id: u32,
    pub simulation_name: String,
    pub number_of_clients: u32,
    /// Simulated time the run stopped at, in seconds.
    pub ended_at_s: f64,
    pub stop_reason: StopReason,
    pub bottleneck_changes: u64,
    /// Wall-clock time the run finished, Unix milliseconds.
    pub finished_at_ms: u64,
    pub clients: Vec<ClientStats>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every client reached its terminal state.
    AllClientsFinished,
    /// An `EndSimulation` command fired.
    EndSimulation,
    /// The configured stop time was reached.
    StopTime,
    /// Nothing left to simulate.
    QueueDrained,
}

impl RunSummary {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json() + "\n").map_err(|e| Error::io(path, e))
    }

    pub fn aborted_clients(&self) -> usize {
        self.clients.iter().filter(|c| c.aborted).count()
    }

    pub fn total_underruns(&self) -> u64 {
        self.clients.iter().map(|c| c.underruns).sum()
    }
}
