//! src/scheduler/mod.rs
//!
//! A deterministic, single-threaded, virtual-time discrete-event runtime.
//!
//! This is intentionally NOT built on `tokio`: `tokio`'s timers and
//! multi-worker wakers are driven by wall-clock time, which would make two
//! runs with identical seeds race against real scheduling jitter instead of
//! producing bitwise-identical output (the reproducibility property the
//! simulator is measured against). Instead, activities are plain
//! `std::future::Future`s driven by a hand-rolled executor: a ready queue of
//! runnable tasks plus a priority queue of `(virtual_time, insertion_seq)`
//! timers, exactly the structure this design calls for.
//!
//! `CancellationToken` (from `tokio-util`) is kept for scope cancellation:
//! it is plain `Notify`-based state that composes with any `Waker`, tokio's
//! reactor included or not, so the teacher's shutdown-fan-on idiom survives
//! unchanged even though nothing here runs on the tokio runtime.

pub mod queue;

pub use queue::Queue;

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

type BoxFuture = Pin<Box<dyn Future<Output = ()>>>;

fn duration_to_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

struct TimerEntry {
    deadline_ms: u64,
    seq: u64,
    waker: Waker,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline (and,
        // among ties, the earliest insertion) sorts to the top.
        other
            .deadline_ms
            .cmp(&self.deadline_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct TaskSlot {
    future: Option<BoxFuture>,
    waker: Waker,
}

struct Inner {
    now_ms: Cell<u64>,
    seq: Cell<u64>,
    tasks: RefCell<Vec<Option<TaskSlot>>>,
    ready: RefCell<VecDeque<usize>>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
}

/// Handle to a spawned activity. Dropping the handle does not cancel the
/// activity; call `cancel()` explicitly.
pub struct TaskHandle {
    id: usize,
    inner: Rc<Inner>,
}

impl TaskHandle {
    /// Cancels the activity immediately: its future is dropped, running any
    /// destructors and releasing held queue or connection references. Any
    /// suspension the activity was parked on (`sleep`, `queue.get`) is
    /// simply discarded — per spec.md §4.A this is how cancellation
    /// unblocks current suspensions.
    pub fn cancel(&self) {
        if let Some(slot) = self.inner.tasks.borrow_mut().get_mut(self.id) {
            *slot = None;
        }
    }
}

/// A deterministic discrete-event scheduler over virtual time.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                now_ms: Cell::new(0),
                seq: Cell::new(0),
                tasks: RefCell::new(Vec::new()),
                ready: RefCell::new(VecDeque::new()),
                timers: RefCell::new(BinaryHeap::new()),
            }),
        }
    }

    /// Current virtual time, in seconds. Monotone non-decreasing.
    pub fn now(&self) -> f64 {
        self.inner.now_ms.get() as f64 / 1000.0
    }

    fn now_ms(&self) -> u64 {
        self.inner.now_ms.get()
    }

    fn next_seq(&self) -> u64 {
        let seq = self.inner.seq.get();
        self.inner.seq.set(seq + 1);
        seq
    }

    /// Constructs an async FIFO queue.
    pub fn queue<T>(&self) -> Queue<T> {
        Queue::new()
    }

    /// Registers a cooperative activity. Ready activities run in the order
    /// they became ready; a freshly spawned activity is ready immediately,
    /// so activities run in spawn order until one of them suspends.
    pub fn spawn<F>(&self, fut: F) -> TaskHandle
    where
        F: Future<Output = ()> + 'static,
    {
        let id = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let id = tasks.len();
            tasks.push(None);
            id
        };
        let waker = make_waker(id, self.inner.clone());
        self.inner.tasks.borrow_mut()[id] = Some(TaskSlot {
            future: Some(Box::pin(fut)),
            waker,
        });
        self.inner.ready.borrow_mut().push_back(id);
        TaskHandle {
            id,
            inner: self.inner.clone(),
        }
    }

    /// Suspends the calling activity until `now() + dur`.
    pub fn sleep(&self, dur: Duration) -> Sleep {
        Sleep {
            inner: self.inner.clone(),
            deadline_ms: None,
            dur_ms: duration_to_ms(dur),
        }
    }

    /// Bounds a group of activities: returns a token that is cancelled the
    /// instant virtual time reaches `now() + dur`. Activities written with
    /// [`cancellable`] observe the cancellation at their next suspension
    /// point.
    pub fn scope(&self, dur: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let child = token.clone();
        let sleep = self.sleep(dur);
        self.spawn(async move {
            sleep.await;
            child.cancel();
        });
        token
    }

    /// Drives the event loop until virtual time reaches `deadline`, or until
    /// no activity is runnable and no timer is pending (quiescence).
    pub fn run_until(&self, deadline: Duration) {
        let deadline_ms = duration_to_ms(deadline);
        loop {
            loop {
                let next_id = self.inner.ready.borrow_mut().pop_front();
                let Some(id) = next_id else { break };
                self.poll_task(id);
            }

            if self.now_ms() >= deadline_ms {
                break;
            }

            let next_deadline = self.inner.timers.borrow().peek().map(|t| t.deadline_ms);
            let Some(next_deadline) = next_deadline else {
                break;
            };
            if next_deadline > deadline_ms {
                self.inner.now_ms.set(deadline_ms);
                break;
            }

            self.inner.now_ms.set(next_deadline);
            loop {
                let due = matches!(
                    self.inner.timers.borrow().peek(),
                    Some(t) if t.deadline_ms <= next_deadline
                );
                if !due {
                    break;
                }
                let entry = self.inner.timers.borrow_mut().pop().unwrap();
                entry.waker.wake();
            }
        }
    }

    fn poll_task(&self, id: usize) {
        let taken = {
            let mut tasks = self.inner.tasks.borrow_mut();
            match tasks.get_mut(id).and_then(|s| s.as_mut()) {
                Some(slot) => slot.future.take().map(|f| (f, slot.waker.clone())),
                None => None,
            }
        };
        let Some((mut fut, waker)) = taken else {
            return;
        };
        let mut cx = Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                if let Some(slot) = self.inner.tasks.borrow_mut().get_mut(id) {
                    *slot = None;
                }
            }
            Poll::Pending => {
                if let Some(Some(slot)) = self.inner.tasks.borrow_mut().get_mut(id) {
                    slot.future = Some(fut);
                }
                // Else: the activity cancelled itself mid-poll; drop `fut`.
            }
        }
    }
}

/// A future that resolves once virtual time reaches the scheduling point's
/// `now() + dur`.
pub struct Sleep {
    inner: Rc<Inner>,
    deadline_ms: Option<u64>,
    dur_ms: u64,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let deadline_ms = *self.deadline_ms.get_or_insert_with(|| {
            let seq = {
                let s = self.inner.seq.get();
                self.inner.seq.set(s + 1);
                s
            };
            let deadline = self.inner.now_ms.get() + self.dur_ms;
            self.inner.timers.borrow_mut().push(TimerEntry {
                deadline_ms: deadline,
                seq,
                waker: cx.waker().clone(),
            });
            deadline
        });
        if self.inner.now_ms.get() >= deadline_ms {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Polls `fut` and the scope's cancellation together. Returns `None` if the
/// scope is cancelled before `fut` resolves, else `Some` of its output. This
/// is the scheduler's analogue of the teacher's `tokio::select!` shutdown
/// branch, without depending on the tokio runtime.
pub async fn cancellable<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    let mut fut = std::pin::pin!(fut);
    let mut cancelled = std::pin::pin!(token.cancelled());
    std::future::poll_fn(move |cx| {
        if let Poll::Ready(v) = fut.as_mut().poll(cx) {
            return Poll::Ready(Some(v));
        }
        if cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }
        Poll::Pending
    })
    .await
}

struct WakerData {
    id: usize,
    inner: Rc<Inner>,
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_fn, wake_fn, wake_by_ref_fn, drop_fn);

fn make_waker(id: usize, inner: Rc<Inner>) -> Waker {
    let data = Rc::new(WakerData { id, inner });
    let raw = Rc::into_raw(data) as *const ();
    unsafe { Waker::from_raw(RawWaker::new(raw, &VTABLE)) }
}

unsafe fn clone_fn(ptr: *const ()) -> RawWaker {
    Rc::increment_strong_count(ptr as *const WakerData);
    RawWaker::new(ptr, &VTABLE)
}

unsafe fn wake_fn(ptr: *const ()) {
    wake_by_ref_fn(ptr);
    drop_fn(ptr);
}

unsafe fn wake_by_ref_fn(ptr: *const ()) {
    let data = &*(ptr as *const WakerData);
    data.inner.ready.borrow_mut().push_back(data.id);
}

unsafe fn drop_fn(ptr: *const ()) {
    drop(Rc::from_raw(ptr as *const WakerData));
}
