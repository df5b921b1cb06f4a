//! Error taxonomy for a harness run.
//!
//! Every fatal condition carries the [`Phase`] it occurred in plus the
//! underlying OS error, so a caller can tell "the program never started"
//! apart from "the program started but went quiet".

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

/// Where a run currently is (or where it stopped).
///
/// ```text
/// Init -> Launched -> Writing -> Draining -> Reading -> Done
///            |           |          |           |
///            +-----------+----------+-----------+--> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Launched,
    Writing,
    Draining,
    Reading,
    Done,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::Launched => "launched",
            Phase::Writing => "writing",
            Phase::Draining => "draining",
            Phase::Reading => "reading",
            Phase::Done => "done",
            Phase::Error => "error",
        };
        f.write_str(s)
    }
}

/// Fatal failures of a single run.
///
/// Early child exit and short output are *not* represented here; they show
/// up as fields of [`crate::RunReport`].
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid harness configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to launch {}", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write command {index} to child stdin")]
    Write {
        /// Zero-based position of the command that failed.
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("no output from child within {}ms", waited.as_millis())]
    DrainTimeout { waited: Duration },

    #[error("failed to read child stdout")]
    Read {
        #[source]
        source: io::Error,
    },
}

impl HarnessError {
    /// The phase the run was in when this error ended it.
    pub fn phase(&self) -> Phase {
        match self {
            HarnessError::Config(_) => Phase::Init,
            HarnessError::Launch { .. } => Phase::Launched,
            HarnessError::Write { .. } => Phase::Writing,
            HarnessError::DrainTimeout { .. } => Phase::Draining,
            HarnessError::Read { .. } => Phase::Reading,
        }
    }
}
