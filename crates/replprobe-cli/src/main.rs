mod config;
mod run_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use run_cmd::RunOpts;

#[derive(Parser)]
#[command(
    name = "replprobe",
    about = "Feed scripted commands to a line-oriented program and print its replies"
)]
struct Cli {
    /// Config file path (defaults to ~/.config/replprobe/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a replprobe config file with the default run settings
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run a TOML script against its program
    Run {
        /// Path to the script TOML file
        script: PathBuf,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Run a program with commands given on the command line
    Exec {
        /// Program to launch
        program: PathBuf,
        /// Command to send (repeatable, sent in order)
        #[arg(short = 'c', long = "command", value_name = "LINE")]
        commands: Vec<String>,
        /// Arguments passed to the program
        #[arg(last = true)]
        args: Vec<String>,
        #[command(flatten)]
        opts: RunOpts,
    },
}

/// Execute the `replprobe init` command: write config file.
fn cmd_init(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::initial_config();
    config::save_config(path, &cfg)?;

    println!("Config written to {}", path.display());
    if let Some(ms) = cfg.defaults.initial_drain_delay_ms {
        println!("  defaults.initial_drain_delay_ms = {ms}");
    }
    if let Some(ms) = cfg.defaults.drain_timeout_ms {
        println!("  defaults.drain_timeout_ms = {ms}");
    }
    if let Some(bytes) = cfg.defaults.buffer_capacity {
        println!("  defaults.buffer_capacity = {bytes}");
    }

    Ok(())
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.unwrap_or_else(config::config_path);

    match cli.command {
        Commands::Init { force } => cmd_init(&config_path, force),
        Commands::Run { script, opts } => {
            let file = config::load_config(&config_path)?;
            run_cmd::run_script(&script, &opts, file.as_ref()).await
        }
        Commands::Exec {
            program,
            commands,
            args,
            opts,
        } => {
            let file = config::load_config(&config_path)?;
            run_cmd::run_exec(program, args, commands, &opts, file.as_ref()).await
        }
    }
}

#[tokio::main]
async fn main() {
    // Stdout carries the extracted lines; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
