//! Run configuration for a [`crate::Harness`].
//!
//! [`HarnessConfig`] is the resolved, validated form. Script files on disk
//! map onto it through [`crate::script`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::command::CommandSequence;

/// Errors raised by [`HarnessConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("executable path must not be empty")]
    EmptyProgramPath,

    #[error("buffer capacity must be at least one byte")]
    ZeroBufferCapacity,

    #[error("drain sentinel must not be empty")]
    EmptySentinel,

    #[error("drain timeout must be greater than zero (disable it instead)")]
    ZeroDrainTimeout,
}

/// The program under test and how to start it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    /// Path to the executable. Relative paths without a separator are
    /// looked up on `$PATH` by the OS.
    pub path: PathBuf,
    /// Arguments passed verbatim. Empty by default.
    pub args: Vec<String>,
}

impl ProgramSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// How the harness waits for the child's first byte in [`DrainStrategy::Grace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityWait {
    /// Readiness wait on the pipe. No CPU is spent while waiting.
    Blocking,
    /// Repeatedly ask the OS how many bytes are buffered (`FIONREAD`),
    /// sleeping `interval` between queries. A zero interval spins, yielding
    /// to the runtime between queries. A pipe that reports readable with no
    /// bytes buffered has been closed, which ends the wait the same way it
    /// does for [`AvailabilityWait::Blocking`]. Unix only; other platforms
    /// fall back to [`AvailabilityWait::Blocking`].
    Poll { interval: Duration },
}

impl AvailabilityWait {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

    pub fn poll() -> Self {
        AvailabilityWait::Poll {
            interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// How the harness decides the child's output is ready to be captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStrategy {
    /// Sleep the initial drain delay, wait for at least one byte, then take
    /// a single read.
    Grace { wait: AvailabilityWait },
    /// Skip the delay and keep reading until the captured bytes contain this
    /// marker, stdout closes, or the buffer is full.
    ///
    /// The first occurrence anywhere in the output ends the capture, so the
    /// marker should be something the program prints once after everything
    /// of interest (a goodbye line), not a prompt it repeats before every
    /// reply.
    Sentinel(String),
    /// Skip the delay and keep reading until stdout closes or the buffer is
    /// full.
    Eof,
}

impl Default for DrainStrategy {
    fn default() -> Self {
        DrainStrategy::Grace {
            wait: AvailabilityWait::Blocking,
        }
    }
}

/// Fully resolved configuration for one or more harness runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub program: ProgramSpec,
    /// Capacity of the captured output buffer. Output beyond this is
    /// silently dropped.
    pub buffer_capacity: usize,
    /// Grace period between closing stdin and the first availability check.
    pub initial_drain_delay: Duration,
    /// Line extraction cap. `None` means "command count + 1".
    pub max_lines: Option<usize>,
    /// Upper bound on the wait for output. The same limit applies to
    /// delivering the command sequence. `None` waits forever.
    pub drain_timeout: Option<Duration>,
    pub drain: DrainStrategy,
    /// Terminate and reap the child at teardown. When `false` a child that
    /// is still running is left behind.
    pub terminate_on_teardown: bool,
    /// Time between SIGTERM and SIGKILL during teardown.
    pub terminate_grace: Duration,
}

impl HarnessConfig {
    pub const DEFAULT_BUFFER_CAPACITY: usize = 4096 * 100;
    pub const DEFAULT_DRAIN_DELAY: Duration = Duration::from_millis(1000);
    pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(10_000);
    pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_millis(2000);

    /// Defaults for every option, targeting `program`.
    pub fn new(program: ProgramSpec) -> Self {
        Self {
            program,
            buffer_capacity: Self::DEFAULT_BUFFER_CAPACITY,
            initial_drain_delay: Self::DEFAULT_DRAIN_DELAY,
            max_lines: None,
            drain_timeout: Some(Self::DEFAULT_DRAIN_TIMEOUT),
            drain: DrainStrategy::default(),
            terminate_on_teardown: true,
            terminate_grace: Self::DEFAULT_TERMINATE_GRACE,
        }
    }

    pub fn with_buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = bytes;
        self
    }

    pub fn with_initial_drain_delay(mut self, delay: Duration) -> Self {
        self.initial_drain_delay = delay;
        self
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = Some(max_lines);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_drain(mut self, drain: DrainStrategy) -> Self {
        self.drain = drain;
        self
    }

    pub fn with_terminate_on_teardown(mut self, terminate: bool) -> Self {
        self.terminate_on_teardown = terminate;
        self
    }

    /// The line cap for a run over `commands`.
    pub fn line_cap(&self, commands: &CommandSequence) -> usize {
        self.max_lines.unwrap_or_else(|| commands.default_line_cap())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyProgramPath);
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::ZeroBufferCapacity);
        }
        if let DrainStrategy::Sentinel(marker) = &self.drain {
            if marker.is_empty() {
                return Err(ConfigError::EmptySentinel);
            }
        }
        if self.drain_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroDrainTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = HarnessConfig::new(ProgramSpec::new("/bin/cat"));
        assert_eq!(cfg.buffer_capacity, 409_600);
        assert_eq!(cfg.initial_drain_delay, Duration::from_secs(1));
        assert_eq!(cfg.drain_timeout, Some(Duration::from_secs(10)));
        assert_eq!(
            cfg.drain,
            DrainStrategy::Grace {
                wait: AvailabilityWait::Blocking
            }
        );
        assert!(cfg.terminate_on_teardown);
        assert!(cfg.program.args.is_empty());
        assert_eq!(cfg.validate(), Ok(()));

        let cfg = cfg.with_terminate_on_teardown(false);
        assert!(!cfg.terminate_on_teardown);
    }

    #[test]
    fn line_cap_defaults_to_commands_plus_one() {
        let cfg = HarnessConfig::new(ProgramSpec::new("/bin/cat"));
        let commands = CommandSequence::from_lines(["a", "b", "c"]);
        assert_eq!(cfg.line_cap(&commands), 4);

        let cfg = cfg.with_max_lines(2);
        assert_eq!(cfg.line_cap(&commands), 2);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let base = HarnessConfig::new(ProgramSpec::new("/bin/cat"));

        let cfg = HarnessConfig::new(ProgramSpec::new(""));
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyProgramPath));

        let cfg = base.clone().with_buffer_capacity(0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroBufferCapacity));

        let cfg = base.clone().with_drain(DrainStrategy::Sentinel(String::new()));
        assert_eq!(cfg.validate(), Err(ConfigError::EmptySentinel));

        let cfg = base.clone().with_drain_timeout(Some(Duration::ZERO));
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroDrainTimeout));

        let cfg = base.with_drain_timeout(None);
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn program_args() {
        let spec = ProgramSpec::new("db").with_args(["test.db"]);
        assert_eq!(spec.args, vec!["test.db".to_string()]);
    }
}
