//! Error taxonomy shared by the catalog, policies, controller and driver.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A catalog, schedule or client file could not be parsed.
    #[error(
        "{origin}, line {line}{}: {reason}",
        .field.map(|f| format!(", field {f}")).unwrap_or_default()
    )]
    Format {
        origin: String,
        line: usize,
        field: Option<usize>,
        reason: String,
    },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("segment index out of range: representation {representation}, segment {segment}")]
    Index { representation: usize, segment: u64 },

    /// A component broke its contract; the affected session cannot continue.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn format(
        origin: impl Into<String>,
        line: usize,
        field: Option<usize>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Format {
            origin: origin.into(),
            line,
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that end a running session rather than aborting its setup.
    pub fn is_mid_session(&self) -> bool {
        matches!(
            self,
            Error::Index { .. } | Error::InvariantViolation(_) | Error::Connect(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
