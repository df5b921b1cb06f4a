//! On-disk script format.
//!
//! A script names the program, the commands to feed it, and optional run
//! settings:
//!
//! ```toml
//! commands = ["insert 1 user1 person1@example.com", "select", ".exit"]
//!
//! [program]
//! path = "./build/db"
//! args = ["test.db"]
//!
//! [run]
//! drain_timeout_ms = 5000
//! drain = "sentinel"
//! sentinel = "db > bye"
//! ```
//!
//! The sentinel ends the capture at its first occurrence, so it names the
//! program's final line rather than its prompt.
//!
//! Every `[run]` field is optional; absent fields keep whatever the layer
//! below set (user defaults, then the [`HarnessConfig`] defaults).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::CommandSequence;
use crate::config::{AvailabilityWait, DrainStrategy, HarnessConfig, ProgramSpec};

/// Errors from parsing a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("drain = \"sentinel\" requires a non-empty `sentinel` value")]
    MissingSentinel,

    #[error("`sentinel` is only valid with drain = \"sentinel\"")]
    UnexpectedSentinel,
}

/// Top-level structure of a script file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptToml {
    /// Lines to send, in order. A trailing newline is added when missing.
    #[serde(default)]
    pub commands: Vec<String>,
    pub program: ProgramToml,
    #[serde(default)]
    pub run: RunToml,
}

/// `[program]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgramToml {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// `[run]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_drain_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_lines: Option<usize>,
    /// `0` disables the timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain: Option<DrainKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentinel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_on_teardown: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrainKind {
    Grace,
    Sentinel,
    Eof,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    Blocking,
    Poll,
}

/// Parse a script from TOML text and check that its `[run]` table is
/// consistent on its own.
pub fn parse_script(content: &str) -> Result<ScriptToml, ScriptError> {
    let script: ScriptToml = toml::from_str(content)?;
    script.run.check()?;
    Ok(script)
}

impl RunToml {
    /// Reject combinations that are wrong whatever layer sits below.
    pub fn check(&self) -> Result<(), ScriptError> {
        match (&self.sentinel, self.drain) {
            (Some(marker), _) if marker.is_empty() => Err(ScriptError::MissingSentinel),
            (Some(_), Some(DrainKind::Grace | DrainKind::Eof)) => {
                Err(ScriptError::UnexpectedSentinel)
            }
            _ => Ok(()),
        }
    }

    /// Overlay the fields set here onto `config`.
    pub fn apply(&self, mut config: HarnessConfig) -> Result<HarnessConfig, ScriptError> {
        self.check()?;

        if let Some(bytes) = self.buffer_capacity {
            config.buffer_capacity = bytes;
        }
        if let Some(ms) = self.initial_drain_delay_ms {
            config.initial_drain_delay = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_lines {
            config.max_lines = Some(max);
        }
        if let Some(ms) = self.drain_timeout_ms {
            config.drain_timeout = timeout_from_ms(ms);
        }
        if let Some(terminate) = self.terminate_on_teardown {
            config.terminate_on_teardown = terminate;
        }

        let current_wait = match config.drain {
            DrainStrategy::Grace { wait } => wait,
            _ => AvailabilityWait::Blocking,
        };
        let current_interval = match current_wait {
            AvailabilityWait::Poll { interval } => interval,
            AvailabilityWait::Blocking => AvailabilityWait::DEFAULT_POLL_INTERVAL,
        };
        let wait = match self.wait {
            Some(WaitKind::Poll) => AvailabilityWait::Poll {
                interval: self
                    .poll_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(current_interval),
            },
            Some(WaitKind::Blocking) => AvailabilityWait::Blocking,
            None => match (current_wait, self.poll_interval_ms) {
                (AvailabilityWait::Poll { .. }, Some(ms)) => AvailabilityWait::Poll {
                    interval: Duration::from_millis(ms),
                },
                (wait, _) => wait,
            },
        };

        let kind = self.drain.or(match (&self.sentinel, self.wait) {
            (Some(_), _) => Some(DrainKind::Sentinel),
            (None, Some(_)) => Some(DrainKind::Grace),
            (None, None) => None,
        });

        match kind {
            Some(DrainKind::Grace) => config.drain = DrainStrategy::Grace { wait },
            Some(DrainKind::Sentinel) => {
                let marker = match (&self.sentinel, &config.drain) {
                    (Some(marker), _) => marker.clone(),
                    (None, DrainStrategy::Sentinel(marker)) => marker.clone(),
                    (None, _) => return Err(ScriptError::MissingSentinel),
                };
                config.drain = DrainStrategy::Sentinel(marker);
            }
            Some(DrainKind::Eof) => config.drain = DrainStrategy::Eof,
            None => {
                if let DrainStrategy::Grace { .. } = config.drain {
                    config.drain = DrainStrategy::Grace { wait };
                }
            }
        }

        Ok(config)
    }
}

impl ScriptToml {
    /// The `[program]` table as given. Relative paths are left for the caller
    /// to resolve.
    pub fn program_spec(&self) -> ProgramSpec {
        ProgramSpec::new(self.program.path.clone()).with_args(self.program.args.iter().cloned())
    }

    pub fn command_sequence(&self) -> CommandSequence {
        CommandSequence::from_lines(self.commands.iter().cloned())
    }
}

/// Millisecond timeout where `0` means "no timeout".
pub fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Loaded {
        config: HarnessConfig,
        commands: CommandSequence,
    }

    /// Parse `content` and apply its `[run]` table over the built-in defaults.
    fn load(content: &str) -> Result<Loaded, ScriptError> {
        let script = parse_script(content)?;
        let config = script.run.apply(HarnessConfig::new(script.program_spec()))?;
        Ok(Loaded {
            config,
            commands: script.command_sequence(),
        })
    }

    #[test]
    fn minimal_script_uses_defaults() {
        let script = load(
            r#"
            commands = ["select", ".exit"]

            [program]
            path = "/usr/local/bin/db"
            "#,
        )
        .unwrap();

        assert_eq!(script.config.program.path, PathBuf::from("/usr/local/bin/db"));
        assert!(script.config.program.args.is_empty());
        assert_eq!(
            script.config.buffer_capacity,
            HarnessConfig::DEFAULT_BUFFER_CAPACITY
        );
        assert_eq!(script.config.drain, DrainStrategy::default());
        assert_eq!(script.commands.iter().collect::<Vec<_>>(), vec!["select\n", ".exit\n"]);
        assert_eq!(script.config.line_cap(&script.commands), 3);
    }

    #[test]
    fn full_run_table() {
        let script = load(
            r#"
            commands = ["select"]

            [program]
            path = "db"
            args = ["test.db"]

            [run]
            buffer_capacity = 1024
            initial_drain_delay_ms = 250
            max_lines = 8
            drain_timeout_ms = 0
            wait = "poll"
            poll_interval_ms = 5
            terminate_on_teardown = false
            "#,
        )
        .unwrap();

        let cfg = &script.config;
        assert_eq!(cfg.program.args, vec!["test.db".to_string()]);
        assert_eq!(cfg.buffer_capacity, 1024);
        assert_eq!(cfg.initial_drain_delay, Duration::from_millis(250));
        assert_eq!(cfg.max_lines, Some(8));
        assert_eq!(cfg.drain_timeout, None);
        assert_eq!(
            cfg.drain,
            DrainStrategy::Grace {
                wait: AvailabilityWait::Poll {
                    interval: Duration::from_millis(5)
                }
            }
        );
        assert!(!cfg.terminate_on_teardown);
    }

    #[test]
    fn sentinel_drain() {
        let script = load(
            r#"
            [program]
            path = "db"

            [run]
            drain = "sentinel"
            sentinel = "bye"
            "#,
        )
        .unwrap();
        assert_eq!(script.config.drain, DrainStrategy::Sentinel("bye".into()));
        assert!(script.commands.is_empty());
    }

    #[test]
    fn sentinel_alone_implies_sentinel_drain() {
        let script = load(
            r#"
            [program]
            path = "db"

            [run]
            sentinel = "db > "
            "#,
        )
        .unwrap();
        assert_eq!(script.config.drain, DrainStrategy::Sentinel("db > ".into()));
    }

    #[test]
    fn sentinel_drain_without_marker_is_rejected() {
        let err = load(
            r#"
            [program]
            path = "db"

            [run]
            drain = "sentinel"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::MissingSentinel));
    }

    #[test]
    fn sentinel_with_eof_is_rejected() {
        let err = load(
            r#"
            [program]
            path = "db"

            [run]
            drain = "eof"
            sentinel = "x"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::UnexpectedSentinel));
    }

    #[test]
    fn missing_program_table_is_a_toml_error() {
        let err = load(r#"commands = ["select"]"#).unwrap_err();
        assert!(matches!(err, ScriptError::Toml(_)));
    }

    #[test]
    fn unknown_drain_kind_is_a_toml_error() {
        let err = load(
            r#"
            [program]
            path = "db"

            [run]
            drain = "whenever"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::Toml(_)));
    }

    #[test]
    fn zero_timeout_disables_it() {
        assert_eq!(timeout_from_ms(0), None);
        assert_eq!(timeout_from_ms(10), Some(Duration::from_millis(10)));
    }

    #[test]
    fn parse_rejects_sentinel_with_explicit_grace() {
        let err = parse_script(
            r#"
            [program]
            path = "db"

            [run]
            drain = "grace"
            sentinel = "bye"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::UnexpectedSentinel));
    }

    #[test]
    fn parse_leaves_program_path_untouched() {
        let script = parse_script(
            r#"
            commands = ["select"]

            [program]
            path = "../build/db"
            args = ["test.db"]
            "#,
        )
        .unwrap();
        let program = script.program_spec();
        assert_eq!(program.path, PathBuf::from("../build/db"));
        assert_eq!(program.args, vec!["test.db".to_string()]);
        assert_eq!(script.command_sequence().len(), 1);
    }

    #[test]
    fn poll_wait_keeps_interval_from_lower_layer() {
        let lower = RunToml {
            wait: Some(WaitKind::Poll),
            poll_interval_ms: Some(7),
            ..RunToml::default()
        };
        let upper = RunToml {
            wait: Some(WaitKind::Poll),
            ..RunToml::default()
        };

        let base = HarnessConfig::new(ProgramSpec::new("db"));
        let cfg = upper.apply(lower.apply(base).unwrap()).unwrap();
        assert_eq!(
            cfg.drain,
            DrainStrategy::Grace {
                wait: AvailabilityWait::Poll {
                    interval: Duration::from_millis(7)
                }
            }
        );
    }

    #[test]
    fn sentinel_drain_reuses_marker_from_lower_layer() {
        let lower = RunToml {
            sentinel: Some("db > bye".to_string()),
            ..RunToml::default()
        };
        let upper = RunToml {
            drain: Some(DrainKind::Sentinel),
            initial_drain_delay_ms: Some(5),
            ..RunToml::default()
        };

        let base = HarnessConfig::new(ProgramSpec::new("db"));
        let cfg = upper.apply(lower.apply(base).unwrap()).unwrap();
        assert_eq!(cfg.drain, DrainStrategy::Sentinel("db > bye".into()));
        assert_eq!(cfg.initial_drain_delay, Duration::from_millis(5));
    }

    #[test]
    fn unrelated_overlay_keeps_lower_drain() {
        let lower = RunToml {
            drain: Some(DrainKind::Eof),
            ..RunToml::default()
        };
        let upper = RunToml {
            max_lines: Some(3),
            ..RunToml::default()
        };

        let base = HarnessConfig::new(ProgramSpec::new("db"));
        let cfg = upper.apply(lower.apply(base).unwrap()).unwrap();
        assert_eq!(cfg.drain, DrainStrategy::Eof);
        assert_eq!(cfg.max_lines, Some(3));
    }
}
