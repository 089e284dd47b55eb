//! Network events: the pre-scheduled event file, the live control file and
//! the run's event log.
//!
//! Commands:
//! - `BottleneckRate <rate>` - change the bottleneck link rate (`5Mbps`,
//!   `800kbps`, or a bare number of bits per second)
//! - `EndSimulation` - stop the run

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use network_sim::DataRate;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::utils::{secs_to_us, us_to_secs};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    BottleneckRate(DataRate),
    EndSimulation,
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::BottleneckRate(rate) => write!(f, "BottleneckRate {rate}"),
            ControlCommand::EndSimulation => f.write_str("EndSimulation"),
        }
    }
}

/// A command from the event schedule with its firing time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledCommand {
    pub at_us: u64,
    pub command: ControlCommand,
}

#[derive(Debug, Default)]
pub struct ParsedSchedule {
    pub commands: Vec<ScheduledCommand>,
    /// Lines that could not be parsed. Already logged.
    pub skipped: Vec<Error>,
}

/// Parse an event schedule: a header line, then `<Event> <seconds> [value]`
/// lines. Malformed lines are logged and skipped.
pub fn parse_event_schedule(origin: &str, text: &str) -> ParsedSchedule {
    let mut parsed = ParsedSchedule::default();
    for (idx, line) in text.lines().enumerate().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_schedule_line(origin, idx + 1, line) {
            Ok(cmd) => parsed.commands.push(cmd),
            Err(e) => {
                warn!("skipping scheduled event: {e}");
                parsed.skipped.push(e);
            }
        }
    }
    parsed
}

fn parse_schedule_line(origin: &str, line_no: usize, line: &str) -> Result<ScheduledCommand> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let seconds = parts
        .get(1)
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .ok_or_else(|| Error::format(origin, line_no, Some(2), "expected a time in seconds"))?;
    let mut rest = vec![parts[0]];
    rest.extend_from_slice(&parts[2..]);
    let command = parse_command(&rest).map_err(|reason| Error::format(origin, line_no, None, reason))?;
    Ok(ScheduledCommand {
        at_us: secs_to_us(seconds),
        command,
    })
}

/// Parse one live control line. Blank lines yield `None`.
pub fn parse_control_line(line: &str) -> std::result::Result<Option<ControlCommand>, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(None);
    }
    parse_command(&parts).map(Some)
}

fn parse_command(parts: &[&str]) -> std::result::Result<ControlCommand, String> {
    match parts {
        ["BottleneckRate", value] => value
            .parse::<DataRate>()
            .map(ControlCommand::BottleneckRate)
            .map_err(|e| e.to_string()),
        ["BottleneckRate", ..] => Err("usage: BottleneckRate <rate>".to_string()),
        // schedule generators write a dummy value after EndSimulation
        ["EndSimulation"] | ["EndSimulation", _] => Ok(ControlCommand::EndSimulation),
        [other, ..] => Err(format!("unknown event '{other}'")),
        [] => Err("empty command".to_string()),
    }
}

/// Live control file, read incrementally.
///
/// Each poll picks up the newline-terminated lines appended since the last
/// poll. A trailing partial line is left for the next poll.
#[derive(Debug)]
pub struct LiveControlFile {
    path: PathBuf,
    offset: usize,
}

impl LiveControlFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn poll(&mut self) -> Vec<ControlCommand> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("reading {}: {e}", self.path.display());
                return Vec::new();
            }
        };
        if data.len() < self.offset {
            warn!("{} shrank; reading it from the start", self.path.display());
            self.offset = 0;
        }
        let fresh = &data[self.offset..];
        let Some(end) = fresh.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let complete = &fresh[..=end];
        self.offset += complete.len();

        let mut commands = Vec::new();
        for line in String::from_utf8_lossy(complete).lines() {
            match parse_control_line(line) {
                Ok(Some(cmd)) => {
                    debug!("live event: {cmd}");
                    commands.push(cmd);
                }
                Ok(None) => {}
                Err(reason) => warn!("skipping live event '{}': {reason}", line.trim()),
            }
        }
        commands
    }
}

/// `Time_Now;Event;Value` log of network events.
pub struct EventLog<W: Write> {
    writer: W,
}

impl EventLog<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        Self::new(BufWriter::new(file)).map_err(|e| Error::io(path, e))
    }
}

impl<W: Write> EventLog<W> {
    pub fn new(mut writer: W) -> io::Result<Self> {
        writeln!(writer, "Time_Now;Event;Value")?;
        Ok(Self { writer })
    }

    pub fn log(&mut self, now_us: u64, event: &str, value: impl fmt::Display) -> io::Result<()> {
        writeln!(self.writer, "{};{};{}", us_to_secs(now_us), event, value)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
