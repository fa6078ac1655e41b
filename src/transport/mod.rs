//! src/transport/mod.rs
//!
//! Simplex and duplex connections between simulated nodes. Grounded on
//! `examples/original_source/mixnet/protocol/connection.py`'s
//! `SimplexConnection` / `LocalSimplexConnection` / `MixSimplexConnection`
//! hierarchy, rendered as a small trait-object family instead of Python's
//! ABC, and kept single-threaded (`Rc`, not the teacher's
//! `Arc<Mutex<HashMap<..>>>` connection cache — there is exactly one
//! consumer per direction here, spec.md §5).

use std::rc::Rc;
use std::time::Duration;

use rand::Rng;

use crate::scheduler::queue::QueueGet;
use crate::scheduler::{Queue, Scheduler};

/// Types carried over a connection report their own wire length so overlays
/// can enforce fixed packet sizes without parsing payloads (spec.md §9
/// "packet framing" note).
pub trait HasLen {
    fn wire_len(&self) -> usize;
}

impl HasLen for Vec<u8> {
    fn wire_len(&self) -> usize {
        self.len()
    }
}

/// One direction of communication. `send` never suspends (it enqueues);
/// `recv` suspends until data is available.
pub trait SimplexConnection<T> {
    fn send(&self, data: T);
    fn recv(&self) -> QueueGet<'_, T>;
}

/// Zero-latency simplex connection: a direct FIFO.
pub struct LocalSimplexConnection<T> {
    queue: Queue<T>,
}

impl<T> LocalSimplexConnection<T> {
    pub fn new(scheduler: &Scheduler) -> Self {
        Self {
            queue: scheduler.queue(),
        }
    }
}

impl<T> SimplexConnection<T> for LocalSimplexConnection<T> {
    fn send(&self, data: T) {
        self.queue.put(data);
    }

    fn recv(&self) -> QueueGet<'_, T> {
        self.queue.get()
    }
}

/// Remote simplex connection with a constant per-connection latency drawn
/// once at construction from `U(lat_min, lat_max)`, rounded to ms. A single
/// relayer activity re-emits each `(sent_at, data)` pair after the latency
/// has elapsed, which guarantees FIFO ordering per direction even though
/// latency differs across connections.
pub struct RemoteSimplexConnection<T> {
    scheduler: Scheduler,
    send_q: Queue<(f64, T)>,
    recv_q: Queue<T>,
    latency_sec: f64,
}

impl<T: 'static> RemoteSimplexConnection<T> {
    /// Constructs the connection and spawns its relayer activity.
    pub fn new(scheduler: &Scheduler, lat_min_sec: f64, lat_max_sec: f64, rng: &mut impl Rng) -> Self {
        let latency_sec = round_to_ms(if lat_max_sec > lat_min_sec {
            rng.gen_range(lat_min_sec..=lat_max_sec)
        } else {
            lat_min_sec
        });
        let conn = Self {
            scheduler: scheduler.clone(),
            send_q: scheduler.queue(),
            recv_q: scheduler.queue(),
            latency_sec,
        };
        conn.spawn_relayer();
        conn
    }

    fn spawn_relayer(&self) {
        let send_q = self.send_q.clone();
        let recv_q = self.recv_q.clone();
        let latency_sec = self.latency_sec;
        let scheduler = self.scheduler.clone();
        scheduler.clone().spawn(async move {
            loop {
                let (sent_at, data) = send_q.get().await;
                let remaining = latency_sec - (scheduler.now() - sent_at);
                if remaining > 0.0 {
                    scheduler.sleep(Duration::from_secs_f64(remaining)).await;
                }
                recv_q.put(data);
            }
        });
    }

    pub fn latency_sec(&self) -> f64 {
        self.latency_sec
    }
}

impl<T: 'static> SimplexConnection<T> for RemoteSimplexConnection<T> {
    fn send(&self, data: T) {
        self.send_q.put((self.scheduler.now(), data));
    }

    fn recv(&self) -> QueueGet<'_, T> {
        self.recv_q.get()
    }
}

/// A bidirectional pair of simplex connections, jointly owned by an edge
/// rather than by either endpoint (spec.md §9 "cyclic topologies" note).
pub struct DuplexConnection<T> {
    pub inbound: Rc<dyn SimplexConnection<T>>,
    pub outbound: Rc<dyn SimplexConnection<T>>,
}

impl<T> DuplexConnection<T> {
    pub fn new(inbound: Rc<dyn SimplexConnection<T>>, outbound: Rc<dyn SimplexConnection<T>>) -> Self {
        Self { inbound, outbound }
    }

    pub fn recv(&self) -> QueueGet<'_, T> {
        self.inbound.recv()
    }

    pub fn send(&self, data: T) {
        self.outbound.send(data);
    }
}

fn round_to_ms(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::time::Duration;

    #[test]
    fn local_connection_preserves_fifo_order() {
        let sched = Scheduler::new();
        let conn = LocalSimplexConnection::<u32>::new(&sched);
        conn.send(1);
        conn.send(2);

        let results = Rc::new(std::cell::RefCell::new(Vec::new()));
        let results2 = results.clone();
        sched.spawn(async move {
            let a = conn.recv().await;
            let b = conn.recv().await;
            results2.borrow_mut().push(a);
            results2.borrow_mut().push(b);
        });
        sched.run_until(Duration::from_secs(1));
        assert_eq!(*results.borrow(), vec![1, 2]);
    }

    #[test]
    fn remote_connection_draws_latency_within_range_and_preserves_order() {
        let sched = Scheduler::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let conn = RemoteSimplexConnection::<Vec<u8>>::new(&sched, 0.01, 0.05, &mut rng);
        assert!(conn.latency_sec() >= 0.01 && conn.latency_sec() <= 0.05);

        conn.send(vec![1, 2, 3]);
        conn.send(vec![4, 5]);
        let results = Rc::new(std::cell::RefCell::new(Vec::new()));
        let results2 = results.clone();
        sched.spawn(async move {
            let a = conn.recv().await;
            let b = conn.recv().await;
            results2.borrow_mut().push(a);
            results2.borrow_mut().push(b);
        });
        sched.run_until(Duration::from_secs(1));
        assert_eq!(*results.borrow(), vec![vec![1, 2, 3], vec![4, 5]]);
    }
}
