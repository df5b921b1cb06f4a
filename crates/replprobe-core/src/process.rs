//! Child process launch, liveness, and teardown.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::ProgramSpec;
use crate::error::HarnessError;

/// A spawned program under test plus its three piped streams.
///
/// Streams are handed out once with the `take_*` methods; whatever is still
/// held here is closed by [`ChildProcess::teardown`].
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    exit_status: Option<ExitStatus>,
}

/// Spawn `program` with stdin, stdout, and stderr all piped.
///
/// With `kill_on_drop` set, the child is killed if the returned handle is
/// dropped without [`ChildProcess::teardown`] (cancelled run, panic).
pub fn launch(program: &ProgramSpec, kill_on_drop: bool) -> Result<ChildProcess, HarnessError> {
    let mut cmd = Command::new(&program.path);
    cmd.args(&program.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(kill_on_drop);

    let mut child = cmd.spawn().map_err(|source| HarnessError::Launch {
        path: program.path.clone(),
        source,
    })?;

    let pid = child.id();
    debug!(path = %program.path.display(), pid, "spawned child process");

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    Ok(ChildProcess {
        child,
        pid,
        stdin,
        stdout,
        stderr,
        exit_status: None,
    })
}

impl ChildProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Non-blocking liveness check. Records the exit status once observed.
    pub fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = self.pid, %status, "child process has exited");
                self.exit_status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(pid = self.pid, error = %e, "error checking child process status");
                false
            }
        }
    }

    /// Close every stream still held and, when `terminate` is set, stop and
    /// reap the child: SIGTERM first, then SIGKILL once `grace` elapses.
    ///
    /// Returns the exit status if the child is known to have exited.
    pub async fn teardown(mut self, terminate: bool, grace: Duration) -> Option<ExitStatus> {
        drop(self.stdin.take());
        drop(self.stdout.take());
        drop(self.stderr.take());

        if !self.is_alive() {
            return self.exit_status;
        }

        if !terminate {
            warn!(pid = self.pid, "leaving child process running after teardown");
            return None;
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                // SAFETY: pid belongs to a child we spawned and have not reaped.
                let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if ret != 0 {
                    warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
                }
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = self.pid, %status, "child exited after SIGTERM");
                self.exit_status = Some(status);
            }
            _ => {
                debug!(pid = self.pid, "child did not exit after SIGTERM, sending SIGKILL");
                if let Err(e) = self.child.kill().await {
                    warn!(pid = self.pid, error = %e, "failed to kill child process");
                }
                self.exit_status = self.child.try_wait().ok().flatten();
            }
        }

        self.exit_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn launch_missing_executable_fails() {
        let spec = ProgramSpec::new("/definitely/not/here/replprobe_missing");
        let err = launch(&spec, true).expect_err("launch should fail");
        assert!(matches!(err, HarnessError::Launch { .. }));
        assert!(err.to_string().contains("replprobe_missing"));
    }

    #[tokio::test]
    async fn launch_gives_out_streams_once() {
        let spec = ProgramSpec::new("cat");
        let mut child = launch(&spec, true).expect("cat should spawn");
        assert!(child.pid().is_some());
        assert!(child.take_stdin().is_some());
        assert!(child.take_stdin().is_none());
        assert!(child.take_stdout().is_some());
        assert!(child.take_stdout().is_none());
        child.teardown(true, Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn teardown_terminates_running_child() {
        let spec = ProgramSpec::new("sleep").with_args(["30"]);
        let mut child = launch(&spec, true).expect("sleep should spawn");
        assert!(child.is_alive());

        let status = child.teardown(true, Duration::from_secs(2)).await;
        let status = status.expect("terminated child should have a status");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn teardown_reports_natural_exit() {
        let spec = ProgramSpec::new("true");
        let mut child = launch(&spec, true).expect("true should spawn");
        // Give the child a moment to exit on its own.
        for _ in 0..100 {
            if !child.is_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = child.teardown(true, Duration::from_secs(1)).await;
        assert_eq!(status.and_then(|s| s.code()), Some(0));
    }

    #[tokio::test]
    async fn teardown_without_terminate_leaves_child_running() {
        let spec = ProgramSpec::new("sleep").with_args(["1"]);
        let child = launch(&spec, false).expect("sleep should spawn");
        let status = child.teardown(false, Duration::from_millis(10)).await;
        assert!(status.is_none());
    }
}
