//! `replprobe run` and `replprobe exec`: drive a program and print what it
//! said.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use replprobe_core::script::{DrainKind, RunToml, WaitKind};
use replprobe_core::{CommandSequence, Harness, ProgramSpec, RunReport, parse_script};

use crate::config::{self, ConfigFile};

/// Options shared by `run` and `exec`. Each one overrides the script, the
/// environment, and the config file.
#[derive(Debug, Default, Args)]
pub struct RunOpts {
    /// Grace period after closing stdin before waiting for output
    #[arg(long, value_name = "MS")]
    pub delay_ms: Option<u64>,
    /// Give up waiting for output after this long (0 disables)
    #[arg(long, value_name = "MS", conflicts_with = "no_timeout")]
    pub timeout_ms: Option<u64>,
    /// Wait for output indefinitely
    #[arg(long)]
    pub no_timeout: bool,
    /// Maximum number of lines to extract (default: command count + 1)
    #[arg(long)]
    pub max_lines: Option<usize>,
    /// Capacity of the captured output buffer
    #[arg(long, value_name = "BYTES")]
    pub buffer_bytes: Option<usize>,
    /// How to wait for the first byte of output
    #[arg(long, value_enum)]
    pub wait: Option<WaitArg>,
    /// Read until the output contains this marker instead of sleeping
    /// (first occurrence wins, so avoid a repeated prompt)
    #[arg(long, conflicts_with_all = ["until_eof", "wait"])]
    pub sentinel: Option<String>,
    /// Read until the program closes stdout instead of sleeping
    #[arg(long, conflicts_with = "wait")]
    pub until_eof: bool,
    /// Leave the program running after the run instead of terminating it
    #[arg(long)]
    pub keep_child: bool,
    /// Print the full run report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WaitArg {
    /// Readiness wait on the pipe
    Blocking,
    /// Busy-poll the number of buffered bytes
    Poll,
}

impl RunOpts {
    /// The `[run]` overlay these flags describe.
    pub fn overlay(&self) -> RunToml {
        RunToml {
            buffer_capacity: self.buffer_bytes,
            initial_drain_delay_ms: self.delay_ms,
            max_lines: self.max_lines,
            drain_timeout_ms: if self.no_timeout {
                Some(0)
            } else {
                self.timeout_ms
            },
            drain: if self.until_eof {
                Some(DrainKind::Eof)
            } else {
                None
            },
            wait: self.wait.map(|w| match w {
                WaitArg::Blocking => WaitKind::Blocking,
                WaitArg::Poll => WaitKind::Poll,
            }),
            poll_interval_ms: None,
            sentinel: self.sentinel.clone(),
            terminate_on_teardown: self.keep_child.then_some(false),
        }
    }
}

/// Execute `replprobe run <script>`.
pub async fn run_script(
    script_path: &Path,
    opts: &RunOpts,
    config_file: Option<&ConfigFile>,
) -> Result<()> {
    let content = std::fs::read_to_string(script_path)
        .with_context(|| format!("failed to read script {}", script_path.display()))?;
    let script = parse_script(&content)
        .with_context(|| format!("failed to parse script {}", script_path.display()))?;

    let mut program = script.program_spec();
    program.path = resolve_program_path(script_path, &program.path);
    let commands = script.command_sequence();

    run_and_print(program, commands, Some(&script.run), opts, config_file).await
}

/// Execute `replprobe exec <program> -c ...`.
pub async fn run_exec(
    program: PathBuf,
    args: Vec<String>,
    commands: Vec<String>,
    opts: &RunOpts,
    config_file: Option<&ConfigFile>,
) -> Result<()> {
    let program = ProgramSpec::new(program).with_args(args);
    let commands = CommandSequence::from_lines(commands);
    run_and_print(program, commands, None, opts, config_file).await
}

async fn run_and_print(
    program: ProgramSpec,
    commands: CommandSequence,
    script_run: Option<&RunToml>,
    opts: &RunOpts,
    config_file: Option<&ConfigFile>,
) -> Result<()> {
    let env = config::env_overlay(|name| std::env::var(name).ok())?;
    let harness_config =
        config::resolve(program, config_file, script_run, &env, &opts.overlay())?;
    let harness = Harness::new(harness_config)?;
    tracing::debug!(config = ?harness.config(), "resolved harness configuration");

    let report = harness.run(&commands).await.map_err(|e| {
        let phase = e.phase();
        anyhow::Error::new(e).context(format!("run failed during {phase}"))
    })?;

    print!("{}", render(&report, opts.json)?);
    Ok(())
}

/// Relative program paths in a script are resolved against the script's
/// directory. Bare names are left for `$PATH` lookup.
fn resolve_program_path(script_path: &Path, program: &Path) -> PathBuf {
    let is_bare_name = program.components().count() == 1 && !program.is_absolute();
    if program.is_absolute() || is_bare_name {
        return program.to_path_buf();
    }
    match script_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(program),
        _ => program.to_path_buf(),
    }
}

/// Render the report for stdout: one extracted line per output line, or the
/// whole report as pretty JSON.
fn render(report: &RunReport, json: bool) -> Result<String> {
    if json {
        let mut out =
            serde_json::to_string_pretty(report).context("failed to serialize run report")?;
        out.push('\n');
        return Ok(out);
    }
    let mut out = String::new();
    for line in &report.lines {
        out.push_str(line);
        out.push('\n');
    }
    Ok(out)
}
