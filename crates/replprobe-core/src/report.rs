use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// The observable result of a completed run.
///
/// A run that completes may still be degraded: the child can exit before
/// every command is delivered, or produce fewer lines than the cap. Both
/// are reported here rather than as errors, for the caller's assertions to
/// judge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub program: PathBuf,
    /// Extracted lines, newline delimiters removed, at most `line_cap`.
    pub lines: Vec<String>,
    pub line_cap: usize,
    /// Complete lines present in the captured bytes, ignoring the cap.
    pub lines_captured: usize,
    pub bytes_read: usize,
    pub commands_total: usize,
    pub commands_sent: usize,
    pub child_exited_early: bool,
    /// Stdout closed before any byte arrived.
    pub output_closed: bool,
    /// Exit code observed at teardown; `None` if the child was killed by a
    /// signal or left running.
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
}

impl RunReport {
    pub fn all_commands_sent(&self) -> bool {
        self.commands_sent == self.commands_total
    }

    /// Fewer lines were extracted than the cap allowed.
    pub fn is_short(&self) -> bool {
        self.lines.len() < self.line_cap
    }
}
