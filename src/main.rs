//! src/main.rs
//!
//! Binary entry point: a small `clap` CLI over the simulation core.
//! `run` executes one session end-to-end (spec.md §6 "for reference"
//! CLI) — it does not offer the sweep/merge/plot/stats subcommands the
//! original tooling has, since config-sweep orchestration, plotting, and
//! log post-processing stay out of scope (spec.md §1).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nommix_sim::app::{load_topology, App};
use nommix_sim::config::RunConfig;

#[derive(Parser)]
#[command(name = "nommix-sim", about = "Core discrete-event mixnet simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one simulation session and write dissemination-time output.
    Run {
        /// Path to the YAML run configuration.
        #[arg(long)]
        config: PathBuf,
        /// Path to an edge-list file describing the network topology.
        #[arg(long)]
        topology: PathBuf,
        /// Directory to write dissemination-time output into.
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { config, topology, out } => {
            let config = RunConfig::load(&config).context("failed to load run configuration")?;
            let topology = load_topology(&topology).context("failed to load topology")?;
            if let Err(err) = App::new(config, topology, out).run() {
                tracing::error!(error = %err, "simulation run failed");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
