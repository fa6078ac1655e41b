//! src/sim.rs
//!
//! The simulation harness: binds a `RunConfig` and an externally-supplied
//! topology into a set of connected `Node`s, runs the sender lottery on
//! each, and collects dissemination-time statistics. Grounded on
//! `examples/original_source/mixnet/sim/simulation.py`'s `Simulation`
//! class; topology generation itself (`sim/topology.py`'s
//! `build_full_random_topology`) stays out of scope (spec.md §1), so
//! `Simulation::build` takes the edge list as an argument instead of
//! generating one.

use std::cell::RefCell;
use std::io::Write as IoWrite;
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::crypto::PacketCrypto;
use crate::domain::{BroadcastMessage, GossipPayload, Identity};
use crate::error::Result;
use crate::gossip::{GossipHandler, NomMessage};
use crate::node::{Node, NomssipConfig};
use crate::scheduler::Scheduler;
use crate::stats::DisseminationTracker;
use crate::transport::{RemoteSimplexConnection, SimplexConnection};

/// An undirected edge between two node indices, in `[0, num_nodes)`.
pub type Edge = (usize, usize);

/// The harness's own wire format for a timestamped, uniquely-identified
/// message body, grounded on `sim/message.py`'s `Message`/`InnerMessage`
/// pair: `created_at` (f64, 8 bytes LE) + `id` (u64, 8 bytes LE) + the
/// opaque body. Re-encoded (with a fresh `created_at`) each time a message
/// crosses from mix propagation into broadcast, so the two legs of its
/// journey can be timed independently.
fn encode_inner(created_at: f64, id: u64, body: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16 + body.len());
    bytes.extend_from_slice(&created_at.to_le_bytes());
    bytes.extend_from_slice(&id.to_le_bytes());
    bytes.extend_from_slice(body);
    bytes
}

fn decode_inner(bytes: &[u8]) -> (f64, u64, &[u8]) {
    let created_at = f64::from_le_bytes(bytes[0..8].try_into().expect("inner message missing created_at"));
    let id = u64::from_le_bytes(bytes[8..16].try_into().expect("inner message missing id"));
    (created_at, id, &bytes[16..])
}

/// A simulation session: a fixed set of nodes wired up over a given
/// topology, ready to be driven to completion by the scheduler
/// (`sim/simulation.py`'s `Simulation.__run`).
pub struct Simulation<C: PacketCrypto + 'static> {
    scheduler: Scheduler,
    config: RunConfig,
    nodes: Vec<Rc<Node<C>>>,
    /// Shared across every node's sender-lottery activity, the way
    /// `sim/config.py`'s `LotteryConfig.seed` is one `random.Random`
    /// instance reused (not re-seeded) across all of `__run_node_logic`'s
    /// invocations.
    lottery_rng: Rc<RefCell<StdRng>>,
    /// Shared across every node's sender-lottery activity so message ids
    /// stay unique network-wide (`sim/message.py`'s
    /// `UniqueMessageBuilder`, a single instance per `Simulation`).
    next_msg_id: Rc<RefCell<u64>>,
}

impl<C: PacketCrypto + 'static> Simulation<C> {
    /// Constructs every node and wires them per `topology`, sharing one
    /// [`DisseminationTracker`] across all of them the way
    /// `simulation.py` passes its own `__process_broadcasted_msg` and
    /// `__process_recovered_msg` bound methods identically to every
    /// `Node`.
    pub fn build<W: IoWrite + 'static>(
        scheduler: &Scheduler,
        config: RunConfig,
        crypto: Rc<C>,
        topology: &[Edge],
        dissemination: Rc<RefCell<DisseminationTracker<W>>>,
    ) -> Result<Self> {
        let msg_size = crypto.size(config.mix.mix_path.max_length);
        let nomssip = NomssipConfig {
            peering_degree: config.network.gossip.peering_degree,
            transmission_rate_per_sec: config.mix.transmission_rate_per_sec,
            msg_size,
            temporal_mix: config.mix.temporal_mix.clone(),
            skip_sending_noise: config.mix.skip_sending_noise,
        };

        let broadcast_handler = make_broadcast_handler(scheduler.clone(), dissemination.clone());

        let mut mix_path_rng = StdRng::seed_from_u64(config.mix.mix_path.seed);
        let mut nodes = Vec::with_capacity(config.network.num_nodes);
        for i in 0..config.network.num_nodes {
            let mix_path_length = mix_path_rng.gen_range(config.mix.mix_path.min_length..=config.mix.mix_path.max_length);
            let recovered_msg_handler = make_recovered_msg_handler(scheduler.clone(), dissemination.clone());
            let node = Node::with_recovered_msg_handler(
                scheduler,
                Identity::from_index(i as u32),
                crypto.clone(),
                mix_path_length,
                &nomssip,
                broadcast_handler.clone(),
                recovered_msg_handler,
            );
            nodes.push(node);
        }

        let mut latency_rng = StdRng::seed_from_u64(config.network.latency.seed);
        for &(a, b) in topology {
            connect_edge(scheduler, &config, &nodes, a, b, &mut latency_rng)?;
        }

        for (i, node) in nodes.iter().enumerate() {
            info!(node = i, id = %node.identity.node_id, "node wired");
        }

        let lottery_rng = Rc::new(RefCell::new(StdRng::seed_from_u64(config.logic.sender_lottery.seed)));
        Ok(Self {
            scheduler: scheduler.clone(),
            config,
            nodes,
            lottery_rng,
            next_msg_id: Rc::new(RefCell::new(0)),
        })
    }

    /// Sends `body` from `node_idx` immediately, outside the sender
    /// lottery, tagging it with the harness's own message id so its
    /// dissemination is tracked the same way a lottery-triggered send
    /// would be. Useful for deterministic scenarios that send from a
    /// specific node rather than waiting on the lottery's coin flips.
    pub fn send_from(&self, node_idx: usize, body: &[u8]) -> Result<()> {
        let id = {
            let mut next = self.next_msg_id.borrow_mut();
            let id = *next;
            *next += 1;
            id
        };
        let msg = encode_inner(self.scheduler.now(), id, body);
        self.nodes[node_idx].send_message(&msg)
    }

    /// Spawns the sender-lottery activity on every node (`sim/simulation.py`'s
    /// `__run_node_logic`) and drives the scheduler to completion.
    pub fn run(&self) {
        self.run_with_lottery(true);
    }

    /// Drives the scheduler to completion, optionally without spawning any
    /// sender-lottery activity — useful for deterministic scenarios that
    /// only send via [`Simulation::send_from`] and want no other traffic.
    pub fn run_with_lottery(&self, spawn_lottery: bool) {
        if spawn_lottery {
            for node in &self.nodes {
                self.spawn_sender_lottery(node.clone());
            }
        }
        self.scheduler
            .run_until(Duration::from_secs(self.config.simulation.duration_sec));
    }

    fn spawn_sender_lottery(&self, node: Rc<Node<C>>) {
        let lottery = self.config.logic.sender_lottery;
        let scheduler = self.scheduler.clone();
        let rng = self.lottery_rng.clone();
        let next_msg_id = self.next_msg_id.clone();
        scheduler.clone().spawn(async move {
            loop {
                scheduler.sleep(Duration::from_secs_f64(lottery.interval_sec)).await;
                let drawn: f64 = rng.borrow_mut().gen();
                if drawn < lottery.probability {
                    let id = {
                        let mut next = next_msg_id.borrow_mut();
                        let id = *next;
                        *next += 1;
                        id
                    };
                    let body = encode_inner(scheduler.now(), id, b"selected block");
                    if let Err(err) = node.send_message(&body) {
                        warn!(?err, "sender lottery failed to send message");
                    }
                }
            }
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn connect_edge<C: PacketCrypto + 'static>(
    scheduler: &Scheduler,
    config: &RunConfig,
    nodes: &[Rc<Node<C>>],
    a: usize,
    b: usize,
    rng: &mut StdRng,
) -> Result<()> {
    assert_ne!(a, b, "topology edge must connect two distinct nodes");
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    let node = &nodes[lo];
    let peer = &nodes[hi];
    let lat = &config.network.latency;

    let mix_inbound: Rc<dyn SimplexConnection<NomMessage<Vec<u8>>>> =
        Rc::new(RemoteSimplexConnection::new(scheduler, lat.min_latency_sec, lat.max_latency_sec, rng));
    let mix_outbound: Rc<dyn SimplexConnection<NomMessage<Vec<u8>>>> =
        Rc::new(RemoteSimplexConnection::new(scheduler, lat.min_latency_sec, lat.max_latency_sec, rng));
    node.connect_mix(peer, mix_inbound, mix_outbound)?;

    let bcast_inbound: Rc<dyn SimplexConnection<BroadcastMessage>> =
        Rc::new(RemoteSimplexConnection::new(scheduler, lat.min_latency_sec, lat.max_latency_sec, rng));
    let bcast_outbound: Rc<dyn SimplexConnection<BroadcastMessage>> =
        Rc::new(RemoteSimplexConnection::new(scheduler, lat.min_latency_sec, lat.max_latency_sec, rng));
    node.connect_broadcast(peer, bcast_inbound, bcast_outbound)?;

    Ok(())
}

fn make_broadcast_handler<W: IoWrite + 'static>(
    scheduler: Scheduler,
    dissemination: Rc<RefCell<DisseminationTracker<W>>>,
) -> Rc<dyn GossipHandler<BroadcastMessage>> {
    Rc::new(move |msg: BroadcastMessage| {
        let (created_at, _id, _body) = decode_inner(&msg.0);
        let elapsed = scheduler.now() - created_at;
        dissemination.borrow_mut().add_broadcasted_msg(msg.id(), elapsed);
    })
}

fn make_recovered_msg_handler<W: IoWrite + 'static>(
    scheduler: Scheduler,
    dissemination: Rc<RefCell<DisseminationTracker<W>>>,
) -> Box<dyn Fn(&[u8]) -> Vec<u8>> {
    Box::new(move |payload: &[u8]| {
        let (created_at, id, body) = decode_inner(payload);
        let elapsed = scheduler.now() - created_at;
        dissemination.borrow_mut().add_mix_propagation_time(elapsed);
        encode_inner(scheduler.now(), id, body)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        GossipNetConfig, LatencyConfig, LogicConfig, LotteryConfig, MixConfig, MixPathConfig, NetworkConfig,
        SimulationConfig,
    };
    use crate::crypto::FixedSizeCrypto;
    use crate::mix::{TemporalMixConfig, TemporalMixType};

    fn test_config(num_nodes: usize, duration_sec: u64) -> RunConfig {
        RunConfig {
            simulation: SimulationConfig {
                duration_sec,
                show_plots: false,
            },
            network: NetworkConfig {
                num_nodes,
                latency: LatencyConfig {
                    min_latency_sec: 0.001,
                    max_latency_sec: 0.005,
                    seed: 1,
                },
                gossip: GossipNetConfig { peering_degree: num_nodes },
            },
            logic: LogicConfig {
                sender_lottery: LotteryConfig {
                    interval_sec: 0.1,
                    probability: 1.0,
                    seed: 7,
                },
            },
            mix: MixConfig {
                transmission_rate_per_sec: 1000,
                max_message_size: 64,
                mix_path: MixPathConfig {
                    min_length: 2,
                    max_length: 2,
                    seed: 2,
                },
                temporal_mix: TemporalMixConfig {
                    mix_type: TemporalMixType::None,
                    min_queue_size: 1,
                    rng_seed: 3,
                },
                skip_sending_noise: false,
            },
        }
    }

    #[test]
    fn a_fully_connected_triangle_disseminates_to_every_node() {
        let sched = Scheduler::new();
        let config = test_config(3, 2);
        let crypto = Rc::new(FixedSizeCrypto::new(config.mix.max_message_size));
        let dissemination = Rc::new(RefCell::new(DisseminationTracker::new(3, Vec::<u8>::new(), Vec::<u8>::new())));

        let topology = vec![(0, 1), (1, 2), (0, 2)];
        let sim = Simulation::build(&sched, config, crypto, &topology, dissemination).unwrap();
        sim.run();
    }
}
