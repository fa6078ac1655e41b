//! src/app.rs
//!
//! Defines the main `App` struct, which wires a loaded [`RunConfig`] and an
//! externally-supplied topology into one [`Simulation`] session, and drives
//! it to completion. Replaces the teacher's multi-service, tokio-spawned
//! lifecycle (`Transport`/`Engine`/`ApiServer` tasks racing a shutdown
//! signal) with a single synchronous call: the whole simulation core is
//! driven by one `Scheduler`, which is its own executor (spec.md §4.A), so
//! there is nothing here for `tokio` to schedule.

use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::config::RunConfig;
use crate::crypto::FixedSizeCrypto;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use crate::sim::{Edge, Simulation};
use crate::stats::DisseminationTracker;

/// Encapsulates one run of the simulator: a loaded configuration, the
/// topology it runs over, and where to write dissemination-time output.
pub struct App {
    config: RunConfig,
    topology: Vec<Edge>,
    out_dir: PathBuf,
}

impl App {
    pub fn new(config: RunConfig, topology: Vec<Edge>, out_dir: PathBuf) -> Self {
        Self {
            config,
            topology,
            out_dir,
        }
    }

    /// Runs the simulation session to completion and writes
    /// `mix_propagation_times.txt` / `broadcast_dissemination_times.txt`
    /// into `out_dir`, one float per line (spec.md §6).
    pub fn run(self) -> Result<()> {
        if self.config.simulation.show_plots {
            tracing::warn!("simulation.show_plots is set, but plotting is out of scope here; ignoring");
        }

        fs::create_dir_all(&self.out_dir)?;
        let mix_propagation_path = self.out_dir.join("mix_propagation_times.txt");
        let broadcast_dissemination_path = self.out_dir.join("broadcast_dissemination_times.txt");
        let mix_propagation_out = File::create(&mix_propagation_path)?;
        let broadcast_dissemination_out = File::create(&broadcast_dissemination_path)?;

        let scheduler = Scheduler::new();
        let crypto = Rc::new(FixedSizeCrypto::new(self.config.mix.max_message_size));
        let dissemination = Rc::new(RefCell::new(DisseminationTracker::new(
            self.config.network.num_nodes,
            mix_propagation_out,
            broadcast_dissemination_out,
        )));

        tracing::info!(
            num_nodes = self.config.network.num_nodes,
            edges = self.topology.len(),
            duration_sec = self.config.simulation.duration_sec,
            "starting simulation session"
        );

        let sim = Simulation::build(&scheduler, self.config, crypto, &self.topology, dissemination)?;
        sim.run();

        tracing::info!(
            mix_propagation_path = %mix_propagation_path.display(),
            broadcast_dissemination_path = %broadcast_dissemination_path.display(),
            "simulation session complete"
        );
        Ok(())
    }
}

/// Reads an undirected edge list, one `"a b"` pair of node indices per
/// line, blank lines and `#`-prefixed comments ignored. Topology
/// *generation* is out of scope (spec.md §1); this only parses an
/// externally-supplied one.
pub fn load_topology(path: impl AsRef<Path>) -> Result<Vec<Edge>> {
    let file = File::open(path.as_ref())?;
    let mut edges = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(a), Some(b), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::Config(figment::Error::from(format!(
                "malformed topology line: {line:?}"
            ))));
        };
        let a: usize = a
            .parse()
            .map_err(|_| Error::Config(figment::Error::from(format!("invalid node index: {a:?}"))))?;
        let b: usize = b
            .parse()
            .map_err(|_| Error::Config(figment::Error::from(format!("invalid node index: {b:?}"))))?;
        edges.push((a, b));
    }
    Ok(edges)
}
