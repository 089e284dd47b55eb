//! Session and simulation configuration.
//!
//! A run is described by a [`SimulationConfig`] (usually built from the
//! command line) plus the client batch file in the run directory, which
//! expands into one [`SessionConfig`] per client.

use std::path::{Path, PathBuf};

use network_sim::DataRate;
use tracing::warn;

use crate::adaptation::PolicyKind;
use crate::error::{Error, Result};
use crate::utils::secs_to_us;

/// Simulated time at which every client connects.
pub const CLIENT_START_US: u64 = 2_000_000;
/// Interval at which the live control file is polled.
pub const LIVE_POLL_INTERVAL_US: u64 = 1_000_000;
/// Delay between reading a live `BottleneckRate` command and applying it.
pub const LIVE_APPLY_DELAY_US: u64 = 1_000;

pub const DEFAULT_LOG_DIR: &str = "dash-log-files";
pub const DEFAULT_VIDEO_DIR: &str = "DashVideos";

/// Everything one streaming client needs to start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub policy: PolicyKind,
    pub segment_duration_us: u64,
    pub catalog_path: PathBuf,
    pub client_id: u32,
    pub number_of_clients: u32,
}

impl SessionConfig {
    pub fn new(
        policy: &str,
        segment_duration_us: u64,
        catalog_path: impl Into<PathBuf>,
        client_id: u32,
        number_of_clients: u32,
    ) -> Result<Self> {
        let policy = policy.parse::<PolicyKind>()?;
        if segment_duration_us == 0 {
            return Err(Error::Config("segment duration must be positive".into()));
        }
        if client_id >= number_of_clients {
            return Err(Error::Config(format!(
                "client id {client_id} out of range for {number_of_clients} clients"
            )));
        }
        Ok(Self {
            policy,
            segment_duration_us,
            catalog_path: catalog_path.into(),
            client_id,
            number_of_clients,
        })
    }
}

/// One line of the client batch file: `amount policy video seconds`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientBatch {
    pub amount: u32,
    pub policy: PolicyKind,
    /// Catalog file name, relative to the video directory.
    pub video: String,
    pub segment_duration_us: u64,
}

#[derive(Debug, Default)]
pub struct ParsedBatches {
    pub batches: Vec<ClientBatch>,
    /// Lines that could not be parsed. Already logged.
    pub skipped: Vec<Error>,
}

impl ParsedBatches {
    pub fn total_clients(&self) -> u64 {
        self.batches.iter().map(|b| u64::from(b.amount)).sum()
    }

    /// Expand batches into sessions with consecutive client ids.
    ///
    /// The batch amounts must add up to `number_of_clients`.
    pub fn sessions(&self, video_dir: &Path, number_of_clients: u32) -> Result<Vec<SessionConfig>> {
        let total = self.total_clients();
        if total != u64::from(number_of_clients) {
            return Err(Error::Config(format!(
                "client batches add up to {total} clients, expected {number_of_clients}"
            )));
        }
        let mut sessions = Vec::with_capacity(number_of_clients as usize);
        for batch in &self.batches {
            for _ in 0..batch.amount {
                sessions.push(SessionConfig {
                    policy: batch.policy,
                    segment_duration_us: batch.segment_duration_us,
                    catalog_path: video_dir.join(&batch.video),
                    client_id: sessions.len() as u32,
                    number_of_clients,
                });
            }
        }
        Ok(sessions)
    }
}

/// Parse client batch lines. Malformed lines are logged and skipped.
pub fn parse_client_batches(origin: &str, text: &str) -> ParsedBatches {
    let mut parsed = ParsedBatches::default();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_batch_line(origin, idx + 1, line) {
            Ok(batch) => parsed.batches.push(batch),
            Err(e) => {
                warn!("skipping client batch: {e}");
                parsed.skipped.push(e);
            }
        }
    }
    parsed
}

fn parse_batch_line(origin: &str, line_no: usize, line: &str) -> Result<ClientBatch> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 4 {
        return Err(Error::format(
            origin,
            line_no,
            None,
            "expected 'amount policy video segment_seconds'",
        ));
    }
    let amount = parts[0]
        .parse::<u32>()
        .map_err(|_| Error::format(origin, line_no, Some(1), format!("bad amount '{}'", parts[0])))?;
    let policy = parts[1]
        .parse::<PolicyKind>()
        .map_err(|e| Error::format(origin, line_no, Some(2), e.to_string()))?;
    let seconds = parts[3]
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s > 0.0)
        .ok_or_else(|| {
            Error::format(
                origin,
                line_no,
                Some(4),
                format!("bad segment duration '{}'", parts[3]),
            )
        })?;
    Ok(ClientBatch {
        amount,
        policy,
        video: parts[2].to_string(),
        segment_duration_us: secs_to_us(seconds),
    })
}

/// Parameters of one simulation run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub simulation_name: String,
    pub simulation_id: u32,
    pub number_of_clients: u32,
    pub log_dir: PathBuf,
    pub video_dir: PathBuf,
    pub bottleneck_rate: DataRate,
    pub bottleneck_delay_us: u64,
    pub channel_delay_us: u64,
    /// Bytes the link hands to a receiver at a time.
    pub chunk_bytes: u64,
    /// Poll the live control file every simulated second.
    pub live_inputs: bool,
    /// Hard stop, in simulated time.
    pub stop_time_us: Option<u64>,
    /// Also write a `.jsonl` metrics file per client.
    pub json_metrics: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            simulation_name: "dumbbell".to_string(),
            simulation_id: 1,
            number_of_clients: 1,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            video_dir: PathBuf::from(DEFAULT_VIDEO_DIR),
            bottleneck_rate: DataRate::from_mbps(5),
            bottleneck_delay_us: 2_000,
            channel_delay_us: 2_000,
            chunk_bytes: network_sim::DEFAULT_CHUNK_BYTES,
            live_inputs: false,
            stop_time_us: None,
            json_metrics: false,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.simulation_name.is_empty() || self.simulation_name.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "invalid simulation name '{}'",
                self.simulation_name
            )));
        }
        if self.number_of_clients == 0 {
            return Err(Error::Config("number of clients must be positive".into()));
        }
        if self.chunk_bytes == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }
        Ok(())
    }

    /// One-way latency from server to client: two access links and the
    /// bottleneck.
    pub fn one_way_delay_us(&self) -> u64 {
        2 * self.channel_delay_us + self.bottleneck_delay_us
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout {
            run_dir: self
                .log_dir
                .join(&self.simulation_name)
                .join(self.number_of_clients.to_string()),
            simulation_id: self.simulation_id,
        }
    }
}

/// File locations of one run. Inputs and outputs share the run directory
/// `{log_dir}/{simulation_name}/{number_of_clients}/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    run_dir: PathBuf,
    simulation_id: u32,
}

impl OutputLayout {
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.run_dir
            .join(format!("sim{}_{}", self.simulation_id, suffix))
    }

    pub fn clients_file(&self) -> PathBuf {
        self.file("clients.txt")
    }

    pub fn event_schedule_file(&self) -> PathBuf {
        self.file("event_schedule.txt")
    }

    pub fn live_events_file(&self) -> PathBuf {
        self.file("real_time_events.txt")
    }

    pub fn event_log_file(&self) -> PathBuf {
        self.file("event_log.txt")
    }

    pub fn summary_file(&self) -> PathBuf {
        self.file("summary.json")
    }

    pub fn client_log(&self, client_id: u32, policy: PolicyKind) -> PathBuf {
        self.file(&format!("cl{client_id}_{policy}_output.txt"))
    }

    pub fn client_json_log(&self, client_id: u32, policy: PolicyKind) -> PathBuf {
        self.file(&format!("cl{client_id}_{policy}_output.jsonl"))
    }
}
