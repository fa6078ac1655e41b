//! src/config.rs
//!
//! Strongly-typed run configuration loaded from a YAML file and environment
//! variables via `figment`, grounded on
//! `examples/original_source/mixnet/sim/config.py`'s `Config` /
//! `SimulationConfig` / `NetworkConfig` / `LatencyConfig` / `MixConfig` /
//! `MixPathConfig` / `LogicConfig` / `LotteryConfig` hierarchy. Field names
//! follow spec.md §6 exactly; validation mirrors the Python's
//! `__post_init__` assertions, surfaced as `Error::Config` rather than bare
//! `assert`.

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mix::TemporalMixConfig;

/// Top-level run configuration: one simulated network, one set of mix
/// parameters, one sender-lottery schedule (spec.md §6 "Simulation
/// inputs").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub simulation: SimulationConfig,
    pub network: NetworkConfig,
    pub logic: LogicConfig,
    pub mix: MixConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Desired duration of the run in seconds. Because the scheduler
    /// advances in discrete steps, the actual last-event time may fall
    /// short of or past this value (spec.md §4.A).
    pub duration_sec: u64,
    pub show_plots: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub num_nodes: usize,
    pub latency: LatencyConfig,
    pub gossip: GossipNetConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyConfig {
    pub min_latency_sec: f64,
    pub max_latency_sec: f64,
    pub seed: u64,
}

/// Shared by both of a node's overlays (spec.md §4.F: "a NomMix overlay
/// for mix traffic, and a plain gossip overlay for post-mix broadcast"
/// sit on the same topology edges, so they share one peering degree).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GossipNetConfig {
    pub peering_degree: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixConfig {
    /// Global constant transmission rate, messages per second per
    /// connection (spec.md §4.D).
    pub transmission_rate_per_sec: u32,
    /// Maximum plaintext message size accepted by `PacketCrypto::build`.
    pub max_message_size: usize,
    pub mix_path: MixPathConfig,
    pub temporal_mix: TemporalMixConfig,
    /// Optimization only for experiments without bandwidth measurement: if
    /// true, the GTR pipeline drops noise frames instead of sending them.
    #[serde(default)]
    pub skip_sending_noise: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixPathConfig {
    pub min_length: usize,
    pub max_length: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogicConfig {
    pub sender_lottery: LotteryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotteryConfig {
    pub interval_sec: f64,
    pub probability: f64,
    pub seed: u64,
}

impl RunConfig {
    /// Loads configuration from `path` (YAML) with `NOMMIX_`-prefixed
    /// environment variables taking precedence, then validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: RunConfig = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("NOMMIX_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration starting from `defaults`, the same way as
    /// `load`, but useful in tests via `figment::Jail` where only a subset
    /// of fields needs overriding.
    pub fn load_with_defaults(path: impl AsRef<Path>, defaults: &RunConfig) -> Result<Self> {
        let config: RunConfig = Figment::new()
            .merge(Serialized::defaults(defaults))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("NOMMIX_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        fail_if(self.simulation.duration_sec == 0, "simulation.duration_sec must be > 0")?;
        fail_if(self.network.num_nodes == 0, "network.num_nodes must be > 0")?;

        let lat = &self.network.latency;
        fail_if(
            !(0.0 <= lat.min_latency_sec && lat.min_latency_sec <= lat.max_latency_sec),
            "network.latency.min_latency_sec must be in [0, max_latency_sec]",
        )?;

        fail_if(
            self.network.gossip.peering_degree == 0,
            "network.gossip.peering_degree must be > 0",
        )?;

        fail_if(
            self.mix.transmission_rate_per_sec == 0,
            "mix.transmission_rate_per_sec must be > 0",
        )?;
        fail_if(self.mix.max_message_size == 0, "mix.max_message_size must be > 0")?;
        fail_if(
            self.mix.temporal_mix.min_queue_size == 0,
            "mix.temporal_mix.min_queue_size must be > 0",
        )?;

        let path = &self.mix.mix_path;
        fail_if(
            !(0 < path.min_length && path.min_length <= path.max_length),
            "mix.mix_path.min_length must be in (0, max_length]",
        )?;

        let lottery = &self.logic.sender_lottery;
        fail_if(lottery.interval_sec <= 0.0, "logic.sender_lottery.interval_sec must be > 0")?;
        fail_if(
            !(0.0..=1.0).contains(&lottery.probability),
            "logic.sender_lottery.probability must be in [0, 1]",
        )?;

        Ok(())
    }
}

fn fail_if(condition: bool, message: &str) -> Result<()> {
    if condition {
        Err(Error::Config(figment::Error::from(message.to_string())))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn sample_yaml() -> &'static str {
        r#"
simulation:
  duration_sec: 60
  show_plots: false
network:
  num_nodes: 10
  latency:
    min_latency_sec: 0.01
    max_latency_sec: 0.05
    seed: 1
  gossip:
    peering_degree: 6
logic:
  sender_lottery:
    interval_sec: 1.0
    probability: 0.1
    seed: 3
mix:
  transmission_rate_per_sec: 10
  max_message_size: 245
  mix_path:
    min_length: 2
    max_length: 4
    seed: 4
  temporal_mix:
    mix_type: noisy-coin-flipping
    min_queue_size: 1
    rng_seed: 2
  skip_sending_noise: false
"#
    }

    #[test]
    fn loads_a_well_formed_config() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", sample_yaml())?;
            let config = RunConfig::load("config.yaml")?;
            assert_eq!(config.network.num_nodes, 10);
            assert_eq!(config.network.gossip.peering_degree, 6);
            assert_eq!(config.mix.mix_path.max_length, 4);
            Ok(())
        });
    }

    #[test]
    fn env_override_takes_precedence_over_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", sample_yaml())?;
            jail.set_env("NOMMIX_NETWORK__NUM_NODES", "42");
            let config = RunConfig::load("config.yaml")?;
            assert_eq!(config.network.num_nodes, 42);
            Ok(())
        });
    }

    #[test]
    fn rejects_zero_duration() {
        Jail::expect_with(|jail| {
            let bad = sample_yaml().replace("duration_sec: 60", "duration_sec: 0");
            jail.create_file("config.yaml", &bad)?;
            assert!(RunConfig::load("config.yaml").is_err());
            Ok(())
        });
    }

    #[test]
    fn rejects_inverted_latency_range() {
        Jail::expect_with(|jail| {
            let bad = sample_yaml().replace("max_latency_sec: 0.05", "max_latency_sec: 0.001");
            jail.create_file("config.yaml", &bad)?;
            assert!(RunConfig::load("config.yaml").is_err());
            Ok(())
        });
    }

    #[test]
    fn rejects_out_of_range_probability() {
        Jail::expect_with(|jail| {
            let bad = sample_yaml().replace("probability: 0.1", "probability: 1.5");
            jail.create_file("config.yaml", &bad)?;
            assert!(RunConfig::load("config.yaml").is_err());
            Ok(())
        });
    }
}
