//! Per-client telemetry.
//!
//! The controller reports what happened as [`MetricsEvent`]s; sinks decide
//! where they go. The CSV sink writes the semicolon-separated client log
//! where each row fills only the columns its event kind owns:
//!
//! | column | filled by |
//! |---|---|
//! | `Time_Now` | every kind |
//! | `Segment_Index` | `download`, `adaptation`, `playback` |
//! | `Download_Request_Sent` .. `Download_OK` | `download` |
//! | `Quality_Level` | `playback` (representation played) |
//! | `Rep_Level`, `Case`, `DelayCase` | `adaptation` |
//! | `Buffer_Level` | `buffer_level` |
//! | `Bytes_Received` | `bytes_received` |
//! | `Buffer_Underrun` | `underrun` |

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::error::{Error, Result};

pub const CSV_HEADER: &str = "Time_Now;Segment_Index;Download_Request_Sent;Download_Start;\
Download_End;Segment_Size;Download_OK;Quality_Level;Rep_Level;Case;DelayCase;Buffer_Level;\
Bytes_Received;Buffer_Underrun";

const CSV_COLUMNS: usize = 14;

/// Something a client did, stamped with simulated time in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricsEvent {
    Download {
        time: f64,
        segment_index: u64,
        representation: usize,
        requested_at: f64,
        transfer_started_at: f64,
        transfer_ended_at: f64,
        bytes: u64,
    },
    Adaptation {
        time: f64,
        segment_index: u64,
        representation: usize,
        decision_case: u32,
        delay_case: u32,
    },
    BufferLevel {
        time: f64,
        level: f64,
    },
    Underrun {
        time: f64,
        active: bool,
    },
    Playback {
        time: f64,
        playback_index: u64,
        representation: usize,
    },
    BytesReceived {
        time: f64,
        bytes: u64,
    },
}

impl MetricsEvent {
    pub fn time(&self) -> f64 {
        match self {
            MetricsEvent::Download { time, .. }
            | MetricsEvent::Adaptation { time, .. }
            | MetricsEvent::BufferLevel { time, .. }
            | MetricsEvent::Underrun { time, .. }
            | MetricsEvent::Playback { time, .. }
            | MetricsEvent::BytesReceived { time, .. } => *time,
        }
    }

    /// One row of the client CSV log.
    pub fn csv_row(&self) -> String {
        let mut cols: [String; CSV_COLUMNS] = Default::default();
        cols[0] = self.time().to_string();
        match self {
            MetricsEvent::Download {
                segment_index,
                requested_at,
                transfer_started_at,
                transfer_ended_at,
                bytes,
                ..
            } => {
                cols[1] = segment_index.to_string();
                cols[2] = requested_at.to_string();
                cols[3] = transfer_started_at.to_string();
                cols[4] = transfer_ended_at.to_string();
                cols[5] = bytes.to_string();
                cols[6] = "Y".to_string();
            }
            MetricsEvent::Adaptation {
                segment_index,
                representation,
                decision_case,
                delay_case,
                ..
            } => {
                cols[1] = segment_index.to_string();
                cols[8] = representation.to_string();
                cols[9] = decision_case.to_string();
                cols[10] = delay_case.to_string();
            }
            MetricsEvent::BufferLevel { level, .. } => cols[11] = level.to_string(),
            MetricsEvent::Underrun { active, .. } => cols[13] = u8::from(*active).to_string(),
            MetricsEvent::Playback {
                playback_index,
                representation,
                ..
            } => {
                cols[1] = playback_index.to_string();
                cols[7] = representation.to_string();
            }
            MetricsEvent::BytesReceived { bytes, .. } => cols[12] = bytes.to_string(),
        }
        cols.join(";")
    }
}

/// Destination for a client's telemetry.
///
/// `record` never fails; sinks that write to files keep the first I/O error
/// and report it from `flush`.
pub trait MetricsSink: Send {
    fn record(&mut self, event: &MetricsEvent);

    fn flush(&mut self) -> io::Result<()>;
}

/// Semicolon-separated client log.
pub struct CsvLogSink<W: Write + Send> {
    writer: W,
    error: Option<io::Error>,
}

impl CsvLogSink<BufWriter<File>> {
    /// Create the log file (and its directory) and write the header.
    pub fn create(path: &Path) -> Result<Self> {
        let file = create_file(path)?;
        Self::new(BufWriter::new(file)).map_err(|e| Error::io(path, e))
    }
}

impl<W: Write + Send> CsvLogSink<W> {
    pub fn new(mut writer: W) -> io::Result<Self> {
        writeln!(writer, "{CSV_HEADER}")?;
        Ok(Self {
            writer,
            error: None,
        })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> MetricsSink for CsvLogSink<W> {
    fn record(&mut self, event: &MetricsEvent) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = writeln!(self.writer, "{}", event.csv_row()) {
            self.error = Some(e);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.writer.flush()
    }
}

/// One JSON object per line, tagged with `kind`.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    error: Option<io::Error>,
}

impl JsonLinesSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::new(BufWriter::new(create_file(path)?)))
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            error: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> MetricsSink for JsonLinesSink<W> {
    fn record(&mut self, event: &MetricsEvent) {
        if self.error.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut self.writer, event)
            .map_err(io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            self.error = Some(e);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.writer.flush()
    }
}

/// Keeps events in memory. Clones share the same buffer, so a test can keep
/// one handle while the controller owns another.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<RwLock<Vec<MetricsEvent>>>,
    flushes: Arc<RwLock<usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricsEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.read().map(|n| *n).unwrap_or_default()
    }
}

impl MetricsSink for MemorySink {
    fn record(&mut self, event: &MetricsEvent) {
        if let Ok(mut events) = self.events.write() {
            events.push(event.clone());
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Ok(mut n) = self.flushes.write() {
            *n += 1;
        }
        Ok(())
    }
}

/// Fans every event out to several sinks.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn MetricsSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricsSink for MultiSink {
    fn record(&mut self, event: &MetricsEvent) {
        for sink in &mut self.sinks {
            sink.record(event);
        }
    }

    /// Flushes every sink; the first error wins.
    fn flush(&mut self) -> io::Result<()> {
        let mut first = Ok(());
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush()
                && first.is_ok()
            {
                first = Err(e);
            }
        }
        first
    }
}

fn create_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    File::create(path).map_err(|e| Error::io(path, e))
}
