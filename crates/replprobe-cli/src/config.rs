//! Configuration file management for replprobe.
//!
//! Provides a TOML defaults file at `~/.config/replprobe/config.toml` and a
//! resolution chain: CLI flag > env var > script file > config file >
//! built-in default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use replprobe_core::script::RunToml;
use replprobe_core::{HarnessConfig, ProgramSpec};

/// Environment variable overriding the initial drain delay (milliseconds).
pub const ENV_DRAIN_DELAY_MS: &str = "REPLPROBE_DRAIN_DELAY_MS";
/// Environment variable overriding the drain timeout (milliseconds, `0`
/// disables it).
pub const ENV_DRAIN_TIMEOUT_MS: &str = "REPLPROBE_DRAIN_TIMEOUT_MS";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Run settings applied to every run before the script's own `[run]`.
    #[serde(default)]
    pub defaults: RunToml,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the replprobe config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/replprobe` or
/// `~/.config/replprobe`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("replprobe");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("replprobe")
}

/// Return the path to the replprobe config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file at `path`. A missing file is not an
/// error and yields `None`.
pub fn load_config(path: &Path) -> Result<Option<ConfigFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

/// The defaults written by `replprobe init`.
pub fn initial_config() -> ConfigFile {
    ConfigFile {
        defaults: RunToml {
            buffer_capacity: Some(HarnessConfig::DEFAULT_BUFFER_CAPACITY),
            initial_drain_delay_ms: Some(HarnessConfig::DEFAULT_DRAIN_DELAY.as_millis() as u64),
            drain_timeout_ms: Some(HarnessConfig::DEFAULT_DRAIN_TIMEOUT.as_millis() as u64),
            ..RunToml::default()
        },
    }
}

// -----------------------------------------------------------------------
// Environment
// -----------------------------------------------------------------------

/// Read the `REPLPROBE_*` overrides through `lookup`.
pub fn env_overlay(lookup: impl Fn(&str) -> Option<String>) -> Result<RunToml> {
    let parse = |name: &str| -> Result<Option<u64>> {
        lookup(name)
            .map(|value| {
                value
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{name} must be a whole number of milliseconds, got {value:?}"))
            })
            .transpose()
    };

    Ok(RunToml {
        initial_drain_delay_ms: parse(ENV_DRAIN_DELAY_MS)?,
        drain_timeout_ms: parse(ENV_DRAIN_TIMEOUT_MS)?,
        ..RunToml::default()
    })
}

// -----------------------------------------------------------------------
// Resolution
// -----------------------------------------------------------------------

/// Build the harness configuration for `program` by applying, in order:
/// config file defaults, the script's `[run]` table, environment
/// overrides, and CLI flags. Later layers win.
pub fn resolve(
    program: ProgramSpec,
    file: Option<&ConfigFile>,
    script: Option<&RunToml>,
    env: &RunToml,
    cli: &RunToml,
) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::new(program);

    if let Some(file) = file {
        config = file
            .defaults
            .apply(config)
            .context("invalid [defaults] in config file")?;
    }
    if let Some(script) = script {
        config = script.apply(config).context("invalid [run] table in script")?;
    }
    config = env.apply(config).context("invalid environment override")?;
    config = cli.apply(config).context("invalid command-line options")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use replprobe_core::DrainStrategy;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        save_config(&path, &initial_config()).unwrap();
        let loaded = load_config(&path).unwrap().expect("file should exist");
        assert_eq!(loaded.defaults.initial_drain_delay_ms, Some(1000));
        assert_eq!(loaded.defaults.drain_timeout_ms, Some(10_000));
        assert_eq!(loaded.defaults.buffer_capacity, Some(409_600));
    }

    #[test]
    fn missing_config_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("absent.toml")).unwrap().is_none());
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "defaults = 3").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    fn env_overlay_parses_milliseconds() {
        let overlay = env_overlay(env_from(&[
            (ENV_DRAIN_DELAY_MS, "250"),
            (ENV_DRAIN_TIMEOUT_MS, " 0 "),
        ]))
        .unwrap();
        assert_eq!(overlay.initial_drain_delay_ms, Some(250));
        assert_eq!(overlay.drain_timeout_ms, Some(0));

        let empty = env_overlay(env_from(&[])).unwrap();
        assert_eq!(empty, RunToml::default());
    }

    #[test]
    fn env_overlay_rejects_garbage() {
        let err = env_overlay(env_from(&[(ENV_DRAIN_DELAY_MS, "soon")])).unwrap_err();
        assert!(err.to_string().contains(ENV_DRAIN_DELAY_MS));
    }

    #[test]
    fn later_layers_win() {
        let file = ConfigFile {
            defaults: RunToml {
                initial_drain_delay_ms: Some(100),
                drain_timeout_ms: Some(1000),
                buffer_capacity: Some(64),
                ..RunToml::default()
            },
        };
        let script = RunToml {
            initial_drain_delay_ms: Some(200),
            drain: Some(replprobe_core::script::DrainKind::Eof),
            ..RunToml::default()
        };
        let env = RunToml {
            drain_timeout_ms: Some(0),
            ..RunToml::default()
        };
        let cli = RunToml {
            initial_drain_delay_ms: Some(300),
            ..RunToml::default()
        };

        let cfg = resolve(
            ProgramSpec::new("db"),
            Some(&file),
            Some(&script),
            &env,
            &cli,
        )
        .unwrap();

        assert_eq!(cfg.buffer_capacity, 64);
        assert_eq!(cfg.initial_drain_delay, Duration::from_millis(300));
        assert_eq!(cfg.drain_timeout, None);
        assert_eq!(cfg.drain, DrainStrategy::Eof);
    }

    #[test]
    fn no_layers_gives_builtin_defaults() {
        let cfg = resolve(
            ProgramSpec::new("db"),
            None,
            None,
            &RunToml::default(),
            &RunToml::default(),
        )
        .unwrap();
        assert_eq!(cfg, HarnessConfig::new(ProgramSpec::new("db")));
    }
}
