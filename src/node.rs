//! src/node.rs
//!
//! A simulated network participant: owns an identity, a NomMix overlay for
//! mix traffic, and a plain gossip overlay for post-mix broadcast (spec.md
//! §4.F). Builds and unwraps mix packets via `PacketCrypto`, forwarding,
//! delivering, or dropping each inbound hop. Grounded on
//! `examples/original_source/mixnet/protocol/node.py`'s `Node` and
//! `examples/original_source/mixnet/sim/simulation.py`'s per-edge
//! `connect_mix` + `connect_broadcast` wiring.

use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::crypto::{PacketCrypto, Processed};
use crate::domain::{BroadcastMessage, Identity};
use crate::error::{Error, Result};
use crate::gossip::{GossipConfig, GossipHandler, GossipOverlay, NomMessage, NomMixOverlay};
use crate::mix::TemporalMixConfig;
use crate::scheduler::Scheduler;
use crate::transport::SimplexConnection;

/// Internal wiring parameters for a `Node`'s NomMix overlay — not part of
/// `RunConfig`'s YAML schema (spec.md §6 has no `nomssip` section; `msg_size`
/// is derived from `PacketCrypto::size` once, by the simulation harness, and
/// `peering_degree` comes from `network.gossip.peering_degree`).
#[derive(Debug, Clone)]
pub struct NomssipConfig {
    pub peering_degree: usize,
    pub transmission_rate_per_sec: u32,
    /// Fixed wire size of every NomMix frame, including the 1-byte flag.
    pub msg_size: usize,
    pub temporal_mix: TemporalMixConfig,
    pub skip_sending_noise: bool,
}

/// Transforms a fully-recovered mix payload before it is broadcast
/// network-wide. `node.py`'s `__process_msg` just forwards the recovered
/// bytes unchanged; `simulation.py`'s `__process_recovered_msg` re-stamps a
/// timestamp before handing it to the broadcast overlay. This hook
/// generalizes that without `Node` needing to know about run-level
/// bookkeeping. Identity by default.
pub type RecoveredMsgHandler = Box<dyn Fn(&[u8]) -> Vec<u8>>;

/// One participant in the simulated mix network. Generic over the packet
/// crypto so tests can swap in a different `PacketCrypto` without touching
/// the node logic (spec.md §1: Sphinx itself is out of scope).
///
/// Holds a `Weak` reference to its own `Rc` for the same reason
/// `GossipOverlay` does (`gossip::mod` doc comment): the mix overlay's
/// handler must call back into `process_msg` after an `.await`.
pub struct Node<C: PacketCrypto + 'static> {
    pub identity: Identity,
    crypto: Rc<C>,
    mix_path_length: usize,
    pub mix_overlay: Rc<NomMixOverlay<Vec<u8>>>,
    pub broadcast_overlay: Rc<GossipOverlay<BroadcastMessage>>,
    recovered_msg_handler: RecoveredMsgHandler,
}

impl<C: PacketCrypto + 'static> Node<C> {
    pub fn new(
        scheduler: &Scheduler,
        identity: Identity,
        crypto: Rc<C>,
        mix_path_length: usize,
        nomssip: &NomssipConfig,
        broadcast_handler: Rc<dyn GossipHandler<BroadcastMessage>>,
    ) -> Rc<Self> {
        Self::with_recovered_msg_handler(
            scheduler,
            identity,
            crypto,
            mix_path_length,
            nomssip,
            broadcast_handler,
            Box::new(|payload: &[u8]| payload.to_vec()),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_recovered_msg_handler(
        scheduler: &Scheduler,
        identity: Identity,
        crypto: Rc<C>,
        mix_path_length: usize,
        nomssip: &NomssipConfig,
        broadcast_handler: Rc<dyn GossipHandler<BroadcastMessage>>,
        recovered_msg_handler: RecoveredMsgHandler,
    ) -> Rc<Self> {
        // `msg_size` is the wire length of every built packet
        // (`PacketCrypto::size`); `assert_message_size` checks the inner
        // payload `M` directly, so noise must match it exactly, not the
        // framed `NomMessage` length (which adds its own flag byte on top).
        let noise = vec![0u8; nomssip.msg_size];

        Rc::new_cyclic(|self_weak: &Weak<Self>| {
            let weak_for_handler: Weak<Self> = self_weak.clone();
            let mix_handler: Rc<dyn GossipHandler<Vec<u8>>> = Rc::new(move |packet: Vec<u8>| {
                if let Some(node) = weak_for_handler.upgrade() {
                    node.process_msg(packet);
                }
            });
            let mix_overlay = NomMixOverlay::new(
                scheduler,
                nomssip.peering_degree,
                nomssip.transmission_rate_per_sec,
                nomssip.msg_size,
                nomssip.temporal_mix.clone(),
                nomssip.skip_sending_noise,
                noise,
                mix_handler,
            );
            let broadcast_overlay = GossipOverlay::new(
                scheduler,
                GossipConfig {
                    peering_degree: nomssip.peering_degree,
                },
                broadcast_handler,
            );
            Self {
                identity,
                crypto,
                mix_path_length,
                mix_overlay,
                broadcast_overlay,
                recovered_msg_handler,
            }
        })
    }

    /// Unwraps one hop of an inbound mix packet and either re-gossips the
    /// next hop's bytes, hands the recovered payload to the broadcast
    /// overlay, or silently drops it (spec.md §4.F, `node.py`'s
    /// `Forward`/`Final`/reject match).
    fn process_msg(&self, packet: Vec<u8>) {
        match self.crypto.process(&packet, &self.identity.private_key()) {
            Processed::Forward(next) => {
                if let Err(err) = self.mix_overlay.publish(next) {
                    warn!(node = %self.identity.node_id, ?err, "failed to re-gossip forwarded packet");
                }
            }
            Processed::Final(payload) => {
                debug!(node = %self.identity.node_id, "message fully recovered, broadcasting");
                let broadcast_payload = (self.recovered_msg_handler)(&payload);
                self.broadcast_overlay.publish(BroadcastMessage(broadcast_payload));
            }
            Processed::Reject => {
                debug!(node = %self.identity.node_id, "packet could not be unwrapped, dropped");
            }
        }
    }

    /// Builds a mix packet for `msg` and gossips it to every connected peer
    /// (spec.md §4.F `send_message`).
    pub fn send_message(&self, msg: &[u8]) -> Result<()> {
        let packet = self.crypto.build(msg, self.mix_path_length)?;
        self.mix_overlay.publish(packet)
    }

    pub fn can_accept_mix_conn(&self) -> bool {
        self.mix_overlay.can_accept_conn()
    }

    pub fn can_accept_broadcast_conn(&self) -> bool {
        self.broadcast_overlay.can_accept_conn()
    }

    /// Establishes a duplex mix-link between `self` and `peer`
    /// (`node.py`'s `connect`): rejects if either side is already at its
    /// peering degree, then registers the connection symmetrically.
    pub fn connect_mix(
        &self,
        peer: &Self,
        inbound: Rc<dyn SimplexConnection<NomMessage<Vec<u8>>>>,
        outbound: Rc<dyn SimplexConnection<NomMessage<Vec<u8>>>>,
    ) -> Result<()> {
        if !self.can_accept_mix_conn() || !peer.can_accept_mix_conn() {
            return Err(Error::PeeringDegreeReached);
        }
        self.mix_overlay.add_conn(inbound.clone(), outbound.clone())?;
        peer.mix_overlay.add_conn(outbound, inbound)?;
        Ok(())
    }

    /// Establishes a duplex broadcast-link between `self` and `peer`
    /// (`simulation.py`'s `connect_broadcast`): a plain gossip edge, with
    /// no GTR pipeline, carrying fully-recovered messages network-wide.
    pub fn connect_broadcast(
        &self,
        peer: &Self,
        inbound: Rc<dyn SimplexConnection<BroadcastMessage>>,
        outbound: Rc<dyn SimplexConnection<BroadcastMessage>>,
    ) -> Result<()> {
        if !self.can_accept_broadcast_conn() || !peer.can_accept_broadcast_conn() {
            return Err(Error::PeeringDegreeReached);
        }
        self.broadcast_overlay.add_conn(inbound.clone(), outbound.clone())?;
        peer.broadcast_overlay.add_conn(outbound, inbound)?;
        Ok(())
    }
}
