use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    rc::Rc,
    sync::{Condvar, LazyLock, Mutex},
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use futures::future::LocalBoxFuture;
use slabmap::SlabMap;


/// Clock and timer facility used by the store's effect executor.
///
/// [`ThreadTimer`] is the real-time implementation; [`TestScheduler`] drives
/// timers from virtual time so tests never wait on the wall clock.
pub trait TimeSource {
    fn now(&self) -> Instant;

    /// A future resolving once `duration` has elapsed. Dropping the future
    /// deregisters the timer.
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DeadlineKey {
    at: Instant,
    seq: u64,
}

struct TimerEntry {
    waker: Waker,
    key: DeadlineKey,
}
impl TimerEntry {
    fn refresh_waker(&mut self, waker: &Waker) {
        if !self.waker.will_wake(waker) {
            self.waker = waker.clone();
        }
    }
}

/// Deadline-ordered timer registry. Entries whose deadline has been reached
/// are taken out of `due` and left as `None` in the arena until the owning
/// future polls again and observes completion.
struct TimerQueue {
    due: BTreeMap<DeadlineKey, usize>,
    entries: SlabMap<Option<TimerEntry>>,
    next_seq: u64,
}

impl TimerQueue {
    fn new() -> Self {
        Self {
            due: BTreeMap::new(),
            entries: SlabMap::new(),
            next_seq: 0,
        }
    }

    fn insert(&mut self, at: Instant, waker: Waker) -> (DeadlineKey, usize) {
        let key = DeadlineKey {
            at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        let id = self.entries.insert(Some(TimerEntry { waker, key }));
        self.due.insert(key, id);
        (key, id)
    }

    /// Wakes and removes the earliest entry due at or before `now`.
    /// Returns `false` once nothing further is due.
    fn fire_next(&mut self, now: Instant) -> bool {
        let Some((&key, &id)) = self.due.first_key_value() else {
            return false;
        };
        if key.at > now {
            return false;
        }
        self.due.remove(&key);
        if let Some(entry) = self.entries[id].take() {
            entry.waker.wake();
        }
        true
    }

    fn poll_entry(&mut self, id: usize, cx: &Context<'_>) -> Poll<()> {
        match &mut self.entries[id] {
            Some(entry) => {
                entry.refresh_waker(cx.waker());
                Poll::Pending
            }
            None => {
                self.entries.remove(id);
                Poll::Ready(())
            }
        }
    }

    fn remove(&mut self, id: usize) {
        if let Some(Some(entry)) = self.entries.remove(id) {
            self.due.remove(&entry.key);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.due.first_key_value().map(|(key, _)| key.at)
    }
}

static SHARED: LazyLock<SharedTimer> = LazyLock::new(|| SharedTimer {
    queue: Mutex::new(SharedQueue {
        queue: TimerQueue::new(),
        worker_running: false,
    }),
    condvar: Condvar::new(),
});

struct SharedTimer {
    queue: Mutex<SharedQueue>,
    condvar: Condvar,
}

struct SharedQueue {
    queue: TimerQueue,
    worker_running: bool,
}

impl SharedTimer {
    fn run_worker(&self) {
        let mut shared = self.queue.lock().unwrap();
        loop {
            let now = Instant::now();
            while shared.queue.fire_next(now) {}
            shared = match shared.queue.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(now);
                    self.condvar.wait_timeout(shared, wait).unwrap().0
                }
                None => self.condvar.wait(shared).unwrap(),
            };
        }
    }
}

/// Real-time [`TimeSource`] backed by one lazily-started worker thread shared
/// by every store in the process.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadTimer;

impl ThreadTimer {
    pub fn new() -> Self {
        ThreadTimer
    }
}

impl TimeSource for ThreadTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        if duration.is_zero() {
            return Box::pin(std::future::ready(()));
        }
        let at = Instant::now() + duration;
        let id = {
            let mut shared = SHARED.queue.lock().unwrap();
            if !shared.worker_running {
                shared.worker_running = true;
                std::thread::spawn(|| SHARED.run_worker());
            }
            let earliest = shared.queue.next_deadline();
            let (key, id) = shared.queue.insert(at, Waker::noop().clone());
            if earliest.is_none_or(|deadline| key.at < deadline) {
                SHARED.condvar.notify_one();
            }
            id
        };
        Box::pin(SharedSleep { id: Some(id) })
    }
}

struct SharedSleep {
    id: Option<usize>,
}

impl Future for SharedSleep {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(id) = this.id else {
            return Poll::Ready(());
        };
        let poll = SHARED.queue.lock().unwrap().queue.poll_entry(id, cx);
        if poll.is_ready() {
            this.id = None;
        }
        poll
    }
}
impl Drop for SharedSleep {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            SHARED.queue.lock().unwrap().queue.remove(id);
        }
    }
}

/// Virtual-time [`TimeSource`] for deterministic tests.
///
/// Timers only fire inside [`advance`](TestScheduler::advance); pair every
/// advance with [`Store::run_effects`](crate::Store::run_effects) so the
/// woken effect futures actually run.
#[derive(Clone)]
pub struct TestScheduler(Rc<TestSchedulerState>);

struct TestSchedulerState {
    now: Cell<Instant>,
    queue: RefCell<TimerQueue>,
}

impl TestScheduler {
    pub fn new() -> Self {
        TestScheduler(Rc::new(TestSchedulerState {
            now: Cell::new(Instant::now()),
            queue: RefCell::new(TimerQueue::new()),
        }))
    }

    /// Moves virtual time forward by `duration`, waking every timer whose
    /// deadline is reached, in deadline order. `now` steps through each
    /// intermediate deadline so timers observing the clock see consistent
    /// values.
    pub fn advance(&self, duration: Duration) {
        let target = self.0.now.get() + duration;
        loop {
            let next = self.0.queue.borrow().next_deadline();
            match next {
                Some(deadline) if deadline <= target => {
                    self.0.now.set(deadline);
                    self.0.queue.borrow_mut().fire_next(deadline);
                }
                _ => break,
            }
        }
        self.0.now.set(target);
    }
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TestScheduler {
    fn now(&self) -> Instant {
        self.0.now.get()
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        if duration.is_zero() {
            return Box::pin(std::future::ready(()));
        }
        let at = self.0.now.get() + duration;
        let (_, id) = self
            .0
            .queue
            .borrow_mut()
            .insert(at, Waker::noop().clone());
        Box::pin(TestSleep {
            state: self.0.clone(),
            id: Some(id),
        })
    }
}

struct TestSleep {
    state: Rc<TestSchedulerState>,
    id: Option<usize>,
}

impl Future for TestSleep {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(id) = this.id else {
            return Poll::Ready(());
        };
        let poll = this.state.queue.borrow_mut().poll_entry(id, cx);
        if poll.is_ready() {
            this.id = None;
        }
        poll
    }
}
impl Drop for TestSleep {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.state.queue.borrow_mut().remove(id);
        }
    }
}
