//! src/gossip/mod.rs
//!
//! The duplicate-suppressing broadcast overlay (`GossipOverlay`) and its
//! NomMix extension (`NomMixOverlay`), which wraps every outbound edge in a
//! GTR transmit pipeline and strips the REAL/NOISE flag. Grounded on
//! `examples/original_source/mixnet/protocol/gossip.py` and
//! `examples/original_source/mixnet/protocol/nomssip.py`, with the
//! duplicate cache policy changed from `gossip.py`'s never-evicted hash
//! set (superseded) to the count-keyed, evict-at-`d` policy that has no
//! counterpart anywhere in the original sources and is built fresh here.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::domain::{Flag, GossipPayload, MessageId};
use crate::error::{Error, Result};
use crate::mix::{MixSimplexConnection, TemporalMixConfig};
use crate::scheduler::Scheduler;
use crate::transport::{DuplexConnection, HasLen, SimplexConnection};

/// `peering_degree` is the only overlay-wide knob shared by the plain
/// broadcast overlay and its NomMix extension.
#[derive(Debug, Clone, Copy)]
pub struct GossipConfig {
    pub peering_degree: usize,
}

/// `msg_id -> received_count`, evicted once `count >= peering_degree`
/// (spec.md §3 "Gossip duplicate cache"). Publishing a message seeds its
/// count at 0 rather than 1, so that the first peer arrival of the same
/// message increments to 1 without re-triggering gossip, and eviction
/// still happens after exactly `d` peer arrivals.
struct DuplicateCache {
    counts: HashMap<MessageId, usize>,
    peering_degree: usize,
}

impl DuplicateCache {
    fn new(peering_degree: usize) -> Self {
        Self {
            counts: HashMap::new(),
            peering_degree,
        }
    }

    /// Returns `true` if `id` was already tracked (so the caller must not
    /// re-gossip), after applying the insert/increment/evict transition.
    fn check_update(&mut self, id: MessageId, publishing: bool) -> bool {
        if let Some(count) = self.counts.get_mut(&id) {
            *count += 1;
            if *count >= self.peering_degree {
                self.counts.remove(&id);
            }
            return true;
        }
        self.counts.insert(id, if publishing { 0 } else { 1 });
        false
    }

    fn len(&self) -> usize {
        self.counts.len()
    }
}

/// A broadcast handler invoked once per distinct message this overlay
/// first observes (either via `publish` or from a peer).
pub trait GossipHandler<M> {
    fn handle(&self, msg: M);
}

impl<M, F: Fn(M)> GossipHandler<M> for F {
    fn handle(&self, msg: M) {
        self(msg)
    }
}

/// The plain duplicate-suppressing broadcast overlay (spec.md §4.E),
/// generic over any `GossipPayload`. `NomMixOverlay` below composes one of
/// these with REAL/NOISE framing rather than re-implementing dedup.
///
/// Holds a `Weak` reference to its own `Rc` (populated via
/// `Rc::new_cyclic`) so the inbound-processing activity it spawns can hold
/// a strong `Rc<Self>` without every method needing an `Rc<Self>` receiver.
pub struct GossipOverlay<M: GossipPayload + 'static> {
    scheduler: Scheduler,
    conns: RefCell<Vec<Rc<DuplexConnection<M>>>>,
    cache: RefCell<DuplicateCache>,
    config: GossipConfig,
    handler: Rc<dyn GossipHandler<M>>,
    /// Inbound messages for which this returns `true` are dropped before
    /// the duplicate cache, `gossip`, or the handler ever see them. Used by
    /// `NomMixOverlay` to drop NOISE frames; plain broadcast overlays pass
    /// `None`, since every `BroadcastMessage` is real by construction.
    drop_inbound_if: Option<Rc<dyn Fn(&M) -> bool>>,
    self_weak: Weak<Self>,
}

impl<M: GossipPayload + 'static> GossipOverlay<M> {
    pub fn new(scheduler: &Scheduler, config: GossipConfig, handler: Rc<dyn GossipHandler<M>>) -> Rc<Self> {
        Self::new_with_inbound_filter(scheduler, config, handler, None)
    }

    pub(crate) fn new_with_inbound_filter(
        scheduler: &Scheduler,
        config: GossipConfig,
        handler: Rc<dyn GossipHandler<M>>,
        drop_inbound_if: Option<Rc<dyn Fn(&M) -> bool>>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|self_weak| Self {
            scheduler: scheduler.clone(),
            conns: RefCell::new(Vec::new()),
            cache: RefCell::new(DuplicateCache::new(config.peering_degree)),
            config,
            handler,
            drop_inbound_if,
            self_weak: self_weak.clone(),
        })
    }

    pub fn can_accept_conn(&self) -> bool {
        self.conns.borrow().len() < self.config.peering_degree
    }

    pub fn cache_len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Registers a duplex peer and spawns its inbound-processing activity.
    /// `outbound` is wrapped by the caller (plain passthrough here; NomMix
    /// wraps it in a GTR pipeline first).
    pub fn add_conn(&self, inbound: Rc<dyn SimplexConnection<M>>, outbound: Rc<dyn SimplexConnection<M>>) -> Result<()> {
        if !self.can_accept_conn() {
            return Err(Error::PeeringDegreeReached);
        }
        let conn = Rc::new(DuplexConnection::new(inbound, outbound));
        self.conns.borrow_mut().push(conn.clone());
        self.spawn_inbound_processor(conn);
        Ok(())
    }

    fn spawn_inbound_processor(&self, conn: Rc<DuplexConnection<M>>) {
        let overlay = self.self_weak.upgrade().expect("overlay outlives its own activities");
        self.scheduler.clone().spawn(async move {
            loop {
                let msg = conn.recv().await;
                if let Some(drop_if) = &overlay.drop_inbound_if {
                    if drop_if(&msg) {
                        continue;
                    }
                }
                let seen = overlay.cache.borrow_mut().check_update(msg.id(), false);
                if seen {
                    continue;
                }
                overlay.process_inbound_msg(msg, &conn);
            }
        });
    }

    fn process_inbound_msg(&self, msg: M, from: &Rc<DuplexConnection<M>>) {
        self.gossip(&msg, Some(from));
        self.handler.handle(msg);
    }

    /// Self-publish path: publishes `msg` to every peer unless it has
    /// already been seen (spec.md §4.E `publish`).
    pub fn publish(&self, msg: M) {
        let seen = self.cache.borrow_mut().check_update(msg.id(), true);
        if seen {
            return;
        }
        self.gossip(&msg, None);
        self.handler.handle(msg);
    }

    fn gossip(&self, msg: &M, exclude: Option<&Rc<DuplexConnection<M>>>) {
        for conn in self.conns.borrow().iter() {
            if let Some(excluded) = exclude {
                if Rc::ptr_eq(conn, excluded) {
                    continue;
                }
            }
            conn.send(msg.clone());
        }
    }
}

/// The 1-byte REAL/NOISE framing the NomMix overlay adds on top of
/// `GossipPayload`, mirroring `nomssip.py`'s `NomssipMessage`. Public so
/// callers (`Node`, the simulation harness) can type the mix-link
/// connections they build, the way `connection.py`'s callers parameterize
/// `SimplexConnection[NomssipMessage[T]]` directly.
#[derive(Clone)]
pub struct NomMessage<M: Clone> {
    pub flag: Flag,
    pub payload: M,
}

impl<M: Clone> NomMessage<M> {
    pub fn is_noise(&self) -> bool {
        self.flag == Flag::Noise
    }
}

impl<M: GossipPayload> HasLen for NomMessage<M> {
    fn wire_len(&self) -> usize {
        1 + self.payload.wire_len()
    }
}

impl<M: GossipPayload> GossipPayload for NomMessage<M> {
    fn id(&self) -> MessageId {
        self.payload.id()
    }
}

impl<M: GossipPayload + PartialEq> PartialEq for NomMessage<M> {
    fn eq(&self, other: &Self) -> bool {
        self.flag == other.flag && self.payload == other.payload
    }
}

/// The NomMix extension: wraps every outbound edge in a GTR pipeline,
/// enforces the fixed packet size, and drops inbound NOISE before it ever
/// reaches the duplicate cache (spec.md §4.E "NomMix extension").
pub struct NomMixOverlay<M: GossipPayload + PartialEq + 'static> {
    base: Rc<GossipOverlay<NomMessage<M>>>,
    scheduler: Scheduler,
    transmission_rate_per_sec: u32,
    msg_size: usize,
    temporal_mix: TemporalMixConfig,
    skip_sending_noise: bool,
    noise: M,
}

impl<M: GossipPayload + PartialEq + 'static> NomMixOverlay<M> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: &Scheduler,
        peering_degree: usize,
        transmission_rate_per_sec: u32,
        msg_size: usize,
        temporal_mix: TemporalMixConfig,
        skip_sending_noise: bool,
        noise: M,
        handler: Rc<dyn GossipHandler<M>>,
    ) -> Rc<Self> {
        let base_handler: Rc<dyn GossipHandler<NomMessage<M>>> = Rc::new(move |msg: NomMessage<M>| {
            handler.handle(msg.payload);
        });
        let drop_noise: Rc<dyn Fn(&NomMessage<M>) -> bool> = Rc::new(|msg: &NomMessage<M>| msg.is_noise());
        let base = GossipOverlay::new_with_inbound_filter(
            scheduler,
            GossipConfig { peering_degree },
            base_handler,
            Some(drop_noise),
        );
        Rc::new(Self {
            base,
            scheduler: scheduler.clone(),
            transmission_rate_per_sec,
            msg_size,
            temporal_mix,
            skip_sending_noise,
            noise,
        })
    }

    pub fn can_accept_conn(&self) -> bool {
        self.base.can_accept_conn()
    }

    pub fn cache_len(&self) -> usize {
        self.base.cache_len()
    }

    fn assert_message_size(&self, msg: &M) -> Result<()> {
        let len = msg.wire_len();
        if len != self.msg_size {
            return Err(Error::SizeInvariant {
                expected: self.msg_size,
                actual: len,
            });
        }
        Ok(())
    }

    /// Wraps `outbound` in a GTR pipeline before handing it to the base
    /// overlay (spec.md §4.E `add_conn`: "wraps the outbound in a transmit
    /// pipeline (NomMix variant) and spawns an inbound-processing
    /// activity").
    pub fn add_conn(
        &self,
        inbound: Rc<dyn SimplexConnection<NomMessage<M>>>,
        outbound: Rc<dyn SimplexConnection<NomMessage<M>>>,
    ) -> Result<()> {
        let noise_msg = NomMessage {
            flag: Flag::Noise,
            payload: self.noise.clone(),
        };
        let pipeline: Rc<dyn SimplexConnection<NomMessage<M>>> = Rc::new(MixSimplexConnection::new(
            &self.scheduler,
            outbound,
            self.transmission_rate_per_sec,
            noise_msg,
            &self.temporal_mix,
            self.skip_sending_noise,
        ));
        self.base.add_conn(inbound, pipeline)
    }

    pub fn publish(&self, msg: M) -> Result<()> {
        self.assert_message_size(&msg)?;
        self.base.publish(NomMessage {
            flag: Flag::Real,
            payload: msg,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BroadcastMessage;
    use std::cell::RefCell as StdCell;
    use std::time::Duration;

    #[test]
    fn publish_then_inbound_arrival_does_not_regossip_and_evicts_at_peering_degree() {
        let sched = Scheduler::new();
        let received = Rc::new(StdCell::new(Vec::new()));
        let received2 = received.clone();
        let handler: Rc<dyn GossipHandler<BroadcastMessage>> = Rc::new(move |m: BroadcastMessage| {
            received2.borrow_mut().push(m);
        });
        let overlay = GossipOverlay::new(&sched, GossipConfig { peering_degree: 3 }, handler);

        let msg = BroadcastMessage(b"hello".to_vec());

        // peer B's inbound line carries `msg` back to us after we publish.
        let b_to_us = Rc::new(crate::transport::LocalSimplexConnection::<BroadcastMessage>::new(&sched));
        let us_to_b = Rc::new(crate::transport::LocalSimplexConnection::<BroadcastMessage>::new(&sched));
        overlay.add_conn(b_to_us.clone(), us_to_b).unwrap();

        // two more peers, never send anything back; just count cache state.
        let c_in = Rc::new(crate::transport::LocalSimplexConnection::<BroadcastMessage>::new(&sched));
        let c_out = Rc::new(crate::transport::LocalSimplexConnection::<BroadcastMessage>::new(&sched));
        overlay.add_conn(c_in, c_out).unwrap();
        let d_in = Rc::new(crate::transport::LocalSimplexConnection::<BroadcastMessage>::new(&sched));
        let d_out = Rc::new(crate::transport::LocalSimplexConnection::<BroadcastMessage>::new(&sched));
        overlay.add_conn(d_in, d_out).unwrap();

        overlay.publish(msg.clone());
        assert_eq!(overlay.cache_len(), 1);

        b_to_us.send(msg.clone());
        sched.run_until(Duration::from_millis(10));

        // only one handler invocation: the publish, not the echo from B.
        assert_eq!(received.borrow().len(), 1);
        assert_eq!(overlay.cache_len(), 1);
    }

    #[test]
    fn third_connection_over_peering_degree_is_rejected() {
        let sched = Scheduler::new();
        let handler: Rc<dyn GossipHandler<BroadcastMessage>> = Rc::new(|_: BroadcastMessage| {});
        let overlay = GossipOverlay::new(&sched, GossipConfig { peering_degree: 2 }, handler);

        for _ in 0..2 {
            let inbound = Rc::new(crate::transport::LocalSimplexConnection::<BroadcastMessage>::new(&sched));
            let outbound = Rc::new(crate::transport::LocalSimplexConnection::<BroadcastMessage>::new(&sched));
            overlay.add_conn(inbound, outbound).unwrap();
        }

        let inbound = Rc::new(crate::transport::LocalSimplexConnection::<BroadcastMessage>::new(&sched));
        let outbound = Rc::new(crate::transport::LocalSimplexConnection::<BroadcastMessage>::new(&sched));
        assert!(matches!(
            overlay.add_conn(inbound, outbound),
            Err(Error::PeeringDegreeReached)
        ));
    }

    #[test]
    fn inbound_noise_is_dropped_before_cache_gossip_or_handler() {
        use crate::mix::{TemporalMixConfig, TemporalMixType};

        let sched = Scheduler::new();
        let received = Rc::new(StdCell::new(Vec::new()));
        let received2 = received.clone();
        let handler: Rc<dyn GossipHandler<BroadcastMessage>> = Rc::new(move |m: BroadcastMessage| {
            received2.borrow_mut().push(m);
        });
        let temporal_mix = TemporalMixConfig {
            mix_type: TemporalMixType::None,
            min_queue_size: 1,
            rng_seed: 0,
        };
        let overlay = NomMixOverlay::new(
            &sched,
            2,
            1000,
            5,
            temporal_mix,
            false,
            BroadcastMessage(vec![0u8; 5]),
            handler,
        );

        let a_to_us = Rc::new(crate::transport::LocalSimplexConnection::<NomMessage<BroadcastMessage>>::new(&sched));
        let us_to_a = Rc::new(crate::transport::LocalSimplexConnection::<NomMessage<BroadcastMessage>>::new(&sched));
        overlay.add_conn(a_to_us.clone(), us_to_a).unwrap();

        a_to_us.send(NomMessage {
            flag: Flag::Noise,
            payload: BroadcastMessage(vec![0u8; 5]),
        });
        sched.run_until(Duration::from_millis(10));

        assert!(received.borrow().is_empty(), "NOISE must never reach the handler");
        assert_eq!(overlay.cache_len(), 0, "NOISE must never enter the duplicate cache");
    }
}
