//! src/mix/queue.rs
//!
//! The five (six, counting the open-question variant) temporal-mix
//! disciplines. Grounded closely on
//! `examples/original_source/deprecated/mixnet-v1/fullcycle/protocol/temporalmix.py`
//! (`NonMixQueue`, `MixQueue`, `MinSizeMixQueue`, `PureCoinFlipppingQueue`,
//! `PureRandomSamplingQueue`, `PermutedCoinFlipppingQueue`,
//! `NoisyCoinFlippingQueue`): none of these disciplines actually suspend in
//! the original (`get()` is `async` there only because it sits on top of an
//! async `Queue`, never because it awaits with nothing ready), so `get`
//! here is a plain synchronous call — the GTR pipeline (`mix::pipeline`)
//! is what sleeps.

use std::cell::RefCell;
use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Picks which buffered message to actually release once a coin-flipping
/// scan finds a successful flip. `flipped_at` is the scan position whose
/// flip succeeded; the default reproduces plain NOISY_COIN_FLIPPING by
/// returning it unchanged.
///
/// This hook exists because `NOISY_COIN_FLIPPING_RANDOM_RELEASE` names an
/// additional uniform-random release step but the core doesn't pin its
/// exact interaction with the position-0 noise short-circuit; implementers
/// are told to surface a configurable knob rather than guess, so this
/// trait is that knob. `UniformRandomRelease` is a documented best-effort
/// default, not an authoritative reproduction of an unspecified rule.
pub trait ReleasePolicy {
    fn choose_release_index(&self, rng: &mut StdRng, queue_len: usize, flipped_at: usize) -> usize;
}

/// Best-effort default: release a uniformly random buffered message rather
/// than the one whose flip actually succeeded.
#[derive(Debug, Default)]
pub struct UniformRandomRelease;

impl ReleasePolicy for UniformRandomRelease {
    fn choose_release_index(&self, rng: &mut StdRng, queue_len: usize, _flipped_at: usize) -> usize {
        rng.gen_range(0..queue_len)
    }
}

/// Which discipline configuration `rng_seed` + `min_queue_size` should be
/// applied to new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemporalMixType {
    None,
    PureCoinFlipping,
    PureRandomSampling,
    PermutedCoinFlipping,
    NoisyCoinFlipping,
    NoisyCoinFlippingRandomRelease,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalMixConfig {
    pub mix_type: TemporalMixType,
    pub min_queue_size: usize,
    pub rng_seed: u64,
}

/// A temporal-mix queue: one message out per `get`, independent of how
/// many are buffered.
pub trait MixQueue<T: Clone> {
    fn put(&self, item: T);
    fn get(&self) -> T;
    fn is_empty(&self) -> bool;
}

/// NONE: plain FIFO, noise only filling a fully empty queue.
pub struct NonMixQueue<T> {
    buf: RefCell<VecDeque<T>>,
    noise: T,
}

impl<T: Clone> NonMixQueue<T> {
    pub fn new(noise: T) -> Self {
        Self {
            buf: RefCell::new(VecDeque::new()),
            noise,
        }
    }
}

impl<T: Clone> MixQueue<T> for NonMixQueue<T> {
    fn put(&self, item: T) {
        self.buf.borrow_mut().push_back(item);
    }

    fn get(&self) -> T {
        let mut buf = self.buf.borrow_mut();
        buf.pop_front().unwrap_or_else(|| self.noise.clone())
    }

    fn is_empty(&self) -> bool {
        self.buf.borrow().is_empty()
    }
}

/// Shared state for the pad-to-min-size coin-flipping family: a plain
/// `Vec` (not a `VecDeque` — selection removes from the middle, and the
/// original always refills from the back) plus an owned RNG.
struct MinSizePool<T> {
    buf: RefCell<Vec<T>>,
    rng: RefCell<StdRng>,
    min_pool_size: usize,
    noise: T,
}

impl<T: Clone> MinSizePool<T> {
    fn new(min_pool_size: usize, seed: u64, noise: T) -> Self {
        Self {
            buf: RefCell::new(Vec::new()),
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            min_pool_size,
            noise,
        }
    }

    fn put(&self, item: T) {
        self.buf.borrow_mut().push(item);
    }

    fn is_empty(&self) -> bool {
        self.buf.borrow().is_empty()
    }

    fn pad(&self) {
        let mut buf = self.buf.borrow_mut();
        while buf.len() < self.min_pool_size {
            buf.push(self.noise.clone());
        }
    }

    /// Repeated left-to-right coin-flipping scans until one flip succeeds.
    fn coin_flip_select(&self) -> T {
        let mut buf = self.buf.borrow_mut();
        let mut rng = self.rng.borrow_mut();
        loop {
            for i in 0..buf.len() {
                if rng.gen_range(0..=1u8) == 1 {
                    return buf.remove(i);
                }
            }
        }
    }

    fn shuffle(&self) {
        self.buf.borrow_mut().shuffle(&mut *self.rng.borrow_mut());
    }
}

pub struct PureCoinFlippingQueue<T> {
    pool: MinSizePool<T>,
}

impl<T: Clone> PureCoinFlippingQueue<T> {
    pub fn new(min_queue_size: usize, seed: u64, noise: T) -> Self {
        Self {
            pool: MinSizePool::new(min_queue_size, seed, noise),
        }
    }
}

impl<T: Clone> MixQueue<T> for PureCoinFlippingQueue<T> {
    fn put(&self, item: T) {
        self.pool.put(item);
    }

    fn get(&self) -> T {
        self.pool.pad();
        self.pool.coin_flip_select()
    }

    fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

pub struct PureRandomSamplingQueue<T> {
    pool: MinSizePool<T>,
}

impl<T: Clone> PureRandomSamplingQueue<T> {
    pub fn new(min_queue_size: usize, seed: u64, noise: T) -> Self {
        Self {
            pool: MinSizePool::new(min_queue_size, seed, noise),
        }
    }
}

impl<T: Clone> MixQueue<T> for PureRandomSamplingQueue<T> {
    fn put(&self, item: T) {
        self.pool.put(item);
    }

    fn get(&self) -> T {
        self.pool.pad();
        let mut buf = self.pool.buf.borrow_mut();
        let i = self.pool.rng.borrow_mut().gen_range(0..buf.len());
        buf.remove(i)
    }

    fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

pub struct PermutedCoinFlippingQueue<T> {
    pool: MinSizePool<T>,
}

impl<T: Clone> PermutedCoinFlippingQueue<T> {
    pub fn new(min_queue_size: usize, seed: u64, noise: T) -> Self {
        Self {
            pool: MinSizePool::new(min_queue_size, seed, noise),
        }
    }
}

impl<T: Clone> MixQueue<T> for PermutedCoinFlippingQueue<T> {
    fn put(&self, item: T) {
        self.pool.put(item);
    }

    fn get(&self) -> T {
        self.pool.pad();
        self.pool.shuffle();
        self.pool.coin_flip_select()
    }

    fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

/// No minimum-size padding; empty queue returns noise, and the scan's
/// position-0 flip doubles as a noise short-circuit.
pub struct NoisyCoinFlippingQueue<T> {
    buf: RefCell<Vec<T>>,
    rng: RefCell<StdRng>,
    noise: T,
}

impl<T: Clone> NoisyCoinFlippingQueue<T> {
    pub fn new(seed: u64, noise: T) -> Self {
        Self {
            buf: RefCell::new(Vec::new()),
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            noise,
        }
    }

    fn scan_and_select(&self, release: Option<&dyn ReleasePolicy>) -> T {
        let mut buf = self.buf.borrow_mut();
        if buf.is_empty() {
            return self.noise.clone();
        }
        let mut rng = self.rng.borrow_mut();
        loop {
            for i in 0..buf.len() {
                if rng.gen_range(0..=1u8) == 1 {
                    let release_at = match release {
                        Some(policy) => policy.choose_release_index(&mut rng, buf.len(), i),
                        None => i,
                    };
                    return buf.remove(release_at);
                } else if i == 0 {
                    return self.noise.clone();
                }
            }
        }
    }
}

impl<T: Clone> MixQueue<T> for NoisyCoinFlippingQueue<T> {
    fn put(&self, item: T) {
        self.buf.borrow_mut().push(item);
    }

    fn get(&self) -> T {
        self.scan_and_select(None)
    }

    fn is_empty(&self) -> bool {
        self.buf.borrow().is_empty()
    }
}

/// NOISY_COIN_FLIPPING with a `ReleasePolicy` applied once a flip succeeds.
pub struct NoisyCoinFlippingRandomReleaseQueue<T> {
    inner: NoisyCoinFlippingQueue<T>,
    policy: Box<dyn ReleasePolicy>,
}

impl<T: Clone> NoisyCoinFlippingRandomReleaseQueue<T> {
    pub fn new(seed: u64, noise: T) -> Self {
        Self {
            inner: NoisyCoinFlippingQueue::new(seed, noise),
            policy: Box::new(UniformRandomRelease),
        }
    }

    pub fn with_policy(seed: u64, noise: T, policy: Box<dyn ReleasePolicy>) -> Self {
        Self {
            inner: NoisyCoinFlippingQueue::new(seed, noise),
            policy,
        }
    }
}

impl<T: Clone> MixQueue<T> for NoisyCoinFlippingRandomReleaseQueue<T> {
    fn put(&self, item: T) {
        self.inner.put(item);
    }

    fn get(&self) -> T {
        self.inner.scan_and_select(Some(self.policy.as_ref()))
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Tagged dispatch over the six discipline kinds (spec design note:
/// "model as a tagged variant ... dispatch via a method per variant").
pub enum TemporalMix<T> {
    None(NonMixQueue<T>),
    PureCoinFlipping(PureCoinFlippingQueue<T>),
    PureRandomSampling(PureRandomSamplingQueue<T>),
    PermutedCoinFlipping(PermutedCoinFlippingQueue<T>),
    NoisyCoinFlipping(NoisyCoinFlippingQueue<T>),
    NoisyCoinFlippingRandomRelease(NoisyCoinFlippingRandomReleaseQueue<T>),
}

impl<T: Clone> TemporalMix<T> {
    pub fn new(config: &TemporalMixConfig, noise: T) -> Self {
        match config.mix_type {
            TemporalMixType::None => TemporalMix::None(NonMixQueue::new(noise)),
            TemporalMixType::PureCoinFlipping => {
                TemporalMix::PureCoinFlipping(PureCoinFlippingQueue::new(config.min_queue_size, config.rng_seed, noise))
            }
            TemporalMixType::PureRandomSampling => {
                TemporalMix::PureRandomSampling(PureRandomSamplingQueue::new(config.min_queue_size, config.rng_seed, noise))
            }
            TemporalMixType::PermutedCoinFlipping => TemporalMix::PermutedCoinFlipping(
                PermutedCoinFlippingQueue::new(config.min_queue_size, config.rng_seed, noise),
            ),
            TemporalMixType::NoisyCoinFlipping => {
                TemporalMix::NoisyCoinFlipping(NoisyCoinFlippingQueue::new(config.rng_seed, noise))
            }
            TemporalMixType::NoisyCoinFlippingRandomRelease => TemporalMix::NoisyCoinFlippingRandomRelease(
                NoisyCoinFlippingRandomReleaseQueue::new(config.rng_seed, noise),
            ),
        }
    }
}

impl<T: Clone> MixQueue<T> for TemporalMix<T> {
    fn put(&self, item: T) {
        match self {
            TemporalMix::None(q) => q.put(item),
            TemporalMix::PureCoinFlipping(q) => q.put(item),
            TemporalMix::PureRandomSampling(q) => q.put(item),
            TemporalMix::PermutedCoinFlipping(q) => q.put(item),
            TemporalMix::NoisyCoinFlipping(q) => q.put(item),
            TemporalMix::NoisyCoinFlippingRandomRelease(q) => q.put(item),
        }
    }

    fn get(&self) -> T {
        match self {
            TemporalMix::None(q) => q.get(),
            TemporalMix::PureCoinFlipping(q) => q.get(),
            TemporalMix::PureRandomSampling(q) => q.get(),
            TemporalMix::PermutedCoinFlipping(q) => q.get(),
            TemporalMix::NoisyCoinFlipping(q) => q.get(),
            TemporalMix::NoisyCoinFlippingRandomRelease(q) => q.get(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            TemporalMix::None(q) => q.is_empty(),
            TemporalMix::PureCoinFlipping(q) => q.is_empty(),
            TemporalMix::PureRandomSampling(q) => q.is_empty(),
            TemporalMix::PermutedCoinFlipping(q) => q.is_empty(),
            TemporalMix::NoisyCoinFlipping(q) => q.is_empty(),
            TemporalMix::NoisyCoinFlippingRandomRelease(q) => q.is_empty(),
        }
    }
}
