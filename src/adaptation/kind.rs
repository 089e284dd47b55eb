//! Rate adaptation algorithm names.

use std::fmt;

use crate::error::Error;

/// Which rate adaptation algorithm a client runs.
///
/// Parsed from client batch files and the command line, so unknown names
/// are rejected when the session is configured rather than mid-run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Probe-and-adapt: grows a target rate until it overshoots the measured
    /// throughput, then backs off.
    #[default]
    Panda,

    /// Buffer-threshold switching with throughput safety margins.
    Tobasco,

    /// Harmonic-mean throughput with gradual switching and a randomized
    /// buffer target.
    Festive,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 3] = [PolicyKind::Panda, PolicyKind::Tobasco, PolicyKind::Festive];

    pub const fn as_str(self) -> &'static str {
        match self {
            PolicyKind::Panda => "panda",
            PolicyKind::Tobasco => "tobasco",
            PolicyKind::Festive => "festive",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PolicyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown adaptation algorithm '{s}': use panda, tobasco, or festive"
                ))
            })
    }
}

impl clap::ValueEnum for PolicyKind {
    fn value_variants<'a>() -> &'a [Self] {
        &PolicyKind::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}
