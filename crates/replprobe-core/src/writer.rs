//! Sequenced delivery of commands to the child's stdin.

use std::io;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::command::CommandSequence;
use crate::error::HarnessError;

/// How much of the command sequence reached the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    /// Commands written and flushed.
    pub sent: usize,
    /// The child went away before every command was delivered.
    pub stopped_early: bool,
}

/// Write every command in order, flushing after each one, then close `sink`.
///
/// `is_alive` is consulted before each write; once it reports `false` the
/// remaining commands are skipped. A write failing with
/// [`io::ErrorKind::BrokenPipe`] means the child closed its end and is
/// treated the same way. Any other I/O failure is fatal.
///
/// `timeout` bounds the whole sequence. A child that stops reading stdin
/// (typically because its own stdout pipe is full) fails the write in
/// progress with [`io::ErrorKind::TimedOut`] once it elapses.
///
/// `sink` is consumed so it is closed on every return path, including an
/// empty sequence.
pub async fn write_commands<W, F>(
    mut sink: W,
    commands: &CommandSequence,
    mut is_alive: F,
    timeout: Option<Duration>,
) -> Result<WriteOutcome, HarnessError>
where
    W: AsyncWrite + Unpin,
    F: FnMut() -> bool,
{
    let mut outcome = WriteOutcome {
        sent: 0,
        stopped_early: false,
    };
    let deadline = timeout.map(|limit| Instant::now() + limit);

    for (index, command) in commands.iter().enumerate() {
        if !is_alive() {
            debug!(index, "child exited before command could be written");
            outcome.stopped_early = true;
            break;
        }

        let written = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, write_one(&mut sink, command))
                .await
                .unwrap_or_else(|_| Err(stalled(timeout))),
            None => write_one(&mut sink, command).await,
        };

        match written {
            Ok(()) => {
                trace!(index, bytes = command.len(), "command written");
                outcome.sent += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(index, "child closed stdin before command could be written");
                outcome.stopped_early = true;
                break;
            }
            Err(source) => {
                if source.kind() == io::ErrorKind::TimedOut {
                    warn!(index, sent = outcome.sent, "child stopped reading stdin");
                }
                return Err(HarnessError::Write { index, source });
            }
        }
    }

    // Closing is best-effort: the child may already be gone.
    if let Err(e) = sink.shutdown().await {
        debug!(error = %e, "error shutting down child stdin");
    }
    drop(sink);

    Ok(outcome)
}

fn stalled(timeout: Option<Duration>) -> io::Error {
    let waited = timeout.map_or(0, |limit| limit.as_millis());
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("child did not accept input within {waited}ms"),
    )
}

async fn write_one<W: AsyncWrite + Unpin>(sink: &mut W, command: &str) -> io::Result<()> {
    sink.write_all(command.as_bytes()).await?;
    sink.flush().await
}
