//! The harness run: launch, write, drain, read, extract, tear down.

use std::io;
use std::time::Instant;

use chrono::Utc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::command::CommandSequence;
use crate::config::HarnessConfig;
use crate::drain::{self, Captured};
use crate::error::{HarnessError, Phase};
use crate::extract::{count_lines, extract_lines};
use crate::process::{self, ChildProcess};
use crate::report::RunReport;
use crate::writer::{WriteOutcome, write_commands};

/// Drives one child process per [`Harness::run`] call.
///
/// The harness holds only immutable configuration. Each run owns its own
/// child handle, buffer, and command sequence, so a single `Harness` can be
/// shared between runs.
#[derive(Debug, Clone)]
pub struct Harness {
    config: HarnessConfig,
}

/// What the write and drain phases produced before teardown.
struct Exchange {
    write: WriteOutcome,
    captured: Captured,
}

impl Harness {
    /// Validate `config` and build a harness from it.
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run the program once against `commands` and report the first lines
    /// of its output.
    ///
    /// Fatal I/O failures and drain timeouts are returned as errors. The
    /// child is torn down on every path once it has been launched.
    pub async fn run(&self, commands: &CommandSequence) -> Result<RunReport, HarnessError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "harness_run",
            %run_id,
            program = %self.config.program.path.display()
        );
        self.run_inner(run_id, commands).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        commands: &CommandSequence,
    ) -> Result<RunReport, HarnessError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let line_cap = self.config.line_cap(commands);

        let mut child = process::launch(&self.config.program, self.config.terminate_on_teardown)
            .inspect_err(|e| warn!(phase = %Phase::Error, error = %e, "launch failed"))?;
        info!(
            phase = %Phase::Launched,
            pid = child.pid(),
            commands = commands.len(),
            line_cap,
            "child launched"
        );

        let exchange = self.exchange(&mut child, commands).await;

        let exit_status = child
            .teardown(self.config.terminate_on_teardown, self.config.terminate_grace)
            .await;

        let Exchange { write, captured } = exchange.inspect_err(|e| {
            warn!(phase = %Phase::Error, failed_in = %e.phase(), error = %e, "run failed");
        })?;

        let lines = extract_lines(&captured.bytes, line_cap);
        let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

        let report = RunReport {
            run_id,
            started_at,
            program: self.config.program.path.clone(),
            line_cap,
            lines_captured: count_lines(&captured.bytes),
            bytes_read: captured.bytes.len(),
            commands_total: commands.len(),
            commands_sent: write.sent,
            child_exited_early: write.stopped_early,
            output_closed: captured.closed && captured.bytes.is_empty(),
            exit_code: exit_status.and_then(|s| s.code()),
            duration_ms,
            lines,
        };

        info!(
            phase = %Phase::Done,
            lines = report.lines.len(),
            bytes = report.bytes_read,
            commands_sent = report.commands_sent,
            child_exited_early = report.child_exited_early,
            "run complete"
        );

        Ok(report)
    }

    /// The write and drain phases. Teardown is the caller's job.
    async fn exchange(
        &self,
        child: &mut ChildProcess,
        commands: &CommandSequence,
    ) -> Result<Exchange, HarnessError> {
        debug!(phase = %Phase::Writing, "writing commands");
        let write = match child.take_stdin() {
            Some(stdin) => {
                let timeout = self.config.drain_timeout;
                write_commands(stdin, commands, || child.is_alive(), timeout).await?
            }
            None => WriteOutcome {
                sent: 0,
                stopped_early: !commands.is_empty(),
            },
        };
        if write.stopped_early {
            warn!(
                sent = write.sent,
                total = commands.len(),
                "child exited before every command was delivered"
            );
        }

        debug!(phase = %Phase::Draining, strategy = ?self.config.drain, "draining child output");
        let stdout = child.take_stdout().ok_or_else(|| HarnessError::Read {
            source: io::Error::new(io::ErrorKind::NotConnected, "child stdout is not piped"),
        })?;
        let captured = drain::capture(stdout, &self.config).await?;
        debug!(phase = %Phase::Reading, bytes = captured.bytes.len(), "output captured");

        Ok(Exchange { write, captured })
    }
}
