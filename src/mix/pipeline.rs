//! src/mix/pipeline.rs
//!
//! The GTR (Global Transmission Rate) transmit pipeline: wraps an outbound
//! simplex connection so every `1/R` seconds it draws exactly one packet
//! from a temporal-mix queue and forwards it, making the link's emission
//! rate independent of offered load. Grounded on
//! `examples/original_source/mixnet/protocol/connection.py`'s
//! `MixSimplexConnection.__run`.

use std::rc::Rc;
use std::time::Duration;

use crate::mix::queue::{MixQueue, TemporalMix, TemporalMixConfig};
use crate::scheduler::queue::QueueGet;
use crate::scheduler::Scheduler;
use crate::transport::SimplexConnection;

/// A `SimplexConnection` that buffers sends through a temporal-mix queue
/// and drains it at a constant rate, rather than forwarding immediately.
pub struct MixSimplexConnection<T: Clone> {
    queue: Rc<TemporalMix<T>>,
    conn: Rc<dyn SimplexConnection<T>>,
}

impl<T: Clone + PartialEq + 'static> MixSimplexConnection<T> {
    /// Constructs the pipeline and spawns its GTR activity.
    pub fn new(
        scheduler: &Scheduler,
        conn: Rc<dyn SimplexConnection<T>>,
        transmission_rate_per_sec: u32,
        noise_msg: T,
        temporal_mix_config: &TemporalMixConfig,
        skip_sending_noise: bool,
    ) -> Self {
        let queue = Rc::new(TemporalMix::new(temporal_mix_config, noise_msg.clone()));
        let pipeline = Self {
            queue: queue.clone(),
            conn: conn.clone(),
        };
        pipeline.spawn_emitter(scheduler, transmission_rate_per_sec, noise_msg, skip_sending_noise);
        pipeline
    }

    fn spawn_emitter(
        &self,
        scheduler: &Scheduler,
        transmission_rate_per_sec: u32,
        noise_msg: T,
        skip_sending_noise: bool,
    ) {
        let queue = self.queue.clone();
        let conn = self.conn.clone();
        let interval = Duration::from_secs_f64(1.0 / transmission_rate_per_sec as f64);
        let scheduler_inner = scheduler.clone();
        scheduler.clone().spawn(async move {
            loop {
                scheduler_inner.sleep(interval).await;
                let msg = queue.get();
                if skip_sending_noise && msg == noise_msg {
                    continue;
                }
                conn.send(msg);
            }
        });
    }
}

impl<T: Clone + PartialEq + 'static> SimplexConnection<T> for MixSimplexConnection<T> {
    fn send(&self, data: T) {
        self.queue.put(data);
    }

    fn recv(&self) -> QueueGet<'_, T> {
        self.conn.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Flag, Packet};
    use crate::mix::queue::TemporalMixType;
    use crate::transport::LocalSimplexConnection;
    use std::cell::RefCell;

    fn noise() -> Packet {
        Packet {
            flag: Flag::Noise,
            payload: vec![0u8; 4],
        }
    }

    #[test]
    fn emits_exactly_one_fixed_size_frame_per_interval() {
        let sched = Scheduler::new();
        let downstream = Rc::new(LocalSimplexConnection::<Packet>::new(&sched));
        let config = TemporalMixConfig {
            mix_type: TemporalMixType::None,
            min_queue_size: 1,
            rng_seed: 0,
        };
        let pipeline = MixSimplexConnection::new(
            &sched,
            downstream.clone(),
            10,
            noise(),
            &config,
            false,
        );
        pipeline.send(Packet {
            flag: Flag::Real,
            payload: vec![1, 2, 3, 4],
        });

        let received = Rc::new(RefCell::new(Vec::new()));
        let received2 = received.clone();
        sched.spawn(async move {
            for _ in 0..5 {
                let pkt = downstream.recv().await;
                received2.borrow_mut().push(pkt);
            }
        });
        sched.run_until(Duration::from_secs(1));

        let received = received.borrow();
        assert_eq!(received.len(), 5);
        for pkt in received.iter() {
            assert_eq!(pkt.payload.len(), 4);
        }
        assert_eq!(received[0].flag, Flag::Real);
        assert!(received.iter().skip(1).all(|p| p.flag == Flag::Noise));
    }
}
