use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    rc::Rc,
    time::{Duration, Instant},
};

use derive_ex::derive_ex;
use futures::{
    executor::{LocalPool, LocalSpawner},
    future::{AbortHandle, Abortable, Aborted},
    task::LocalSpawnExt,
};

use crate::{
    effect::{Effect, EffectError, EffectFuture, EffectKey, RawEffect, RunFn, SetupFn, Teardown},
    reducer::Reducer,
    subscription::Subscription,
    time::{ThreadTimer, TimeSource},
};


/// Hook receiving failures reported by effect callbacks.
pub type ErrorHook = Rc<dyn Fn(&EffectError)>;

fn default_error_hook() -> ErrorHook {
    Rc::new(|error| tracing::error!(%error, "effect failed"))
}

/// Handle passed to effect callbacks for sending actions back into the
/// owning store. Each send is a fresh, fully-synchronous transition cycle.
/// Sends on a destroyed store are dropped.
#[derive_ex(Clone, bound())]
pub struct Dispatcher<A: 'static> {
    send: Rc<dyn Fn(A)>,
}

impl<A: 'static> Dispatcher<A> {
    pub(crate) fn from_fn(send: Rc<dyn Fn(A)>) -> Self {
        Dispatcher { send }
    }

    pub fn dispatch(&self, action: A) {
        (*self.send)(action);
    }

    pub(crate) fn premap<B: 'static>(self, f: impl Fn(B) -> A + 'static) -> Dispatcher<B> {
        let send = self.send;
        Dispatcher {
            send: Rc::new(move |action| (*send)(f(action))),
        }
    }
}

/// The only stateful component of the runtime.
///
/// Owns the current state tree, runs the reducer for every dispatched
/// action, notifies observers, and executes the returned effects, including
/// per-key cancellation, debouncing, throttling, delayed actions and
/// long-lived subscriptions.
///
/// A `Store` is a cheap `Rc`-backed handle; clones share the same state.
/// Dropping the last handle destroys the store.
#[derive_ex(Clone, bound())]
pub struct Store<S: 'static, A: 'static, D: 'static>(Rc<StoreNode<S, A, D>>);

impl<S: 'static, A: Clone + 'static, D: 'static> Store<S, A, D> {
    pub fn new(
        initial: S,
        reducer: impl Reducer<State = S, Action = A, Deps = D> + 'static,
        deps: D,
    ) -> Self {
        Self::builder(reducer, deps).build(initial)
    }

    pub fn builder(
        reducer: impl Reducer<State = S, Action = A, Deps = D> + 'static,
        deps: D,
    ) -> StoreBuilder<S, A, D> {
        StoreBuilder {
            reducer: Box::new(reducer),
            deps,
            time: Rc::new(ThreadTimer::new()),
            error_hook: default_error_hook(),
            history_capacity: None,
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> Rc<S> {
        self.0.state.borrow().clone()
    }

    /// Derived pure read over the current snapshot.
    pub fn select<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        f(&self.state())
    }

    /// Runs the reducer, commits and publishes the transition, then executes
    /// the returned effect. Runs to completion before returning; effects
    /// never unwind into the caller.
    pub fn dispatch(&self, action: A) {
        self.0.dispatch(action);
        self.0.pump();
    }

    /// Registers a state observer and immediately invokes it once with the
    /// current snapshot. Observers run synchronously after every committed
    /// change, in registration order.
    pub fn subscribe(&self, listener: impl Fn(&Rc<S>) + 'static) -> Subscription {
        let listener: Rc<dyn Fn(&Rc<S>)> = Rc::new(listener);
        let id = self.0.state_subs.borrow_mut().insert(listener.clone());
        (*listener)(&self.state());
        let node = Rc::downgrade(&self.0);
        Subscription::from_fn(move || {
            if let Some(node) = node.upgrade() {
                node.state_subs.borrow_mut().remove(id);
            }
        })
    }

    /// Registers an action observer invoked with `(action, current_state)`
    /// for every dispatch, whether or not state changed.
    pub fn subscribe_actions(&self, listener: impl Fn(&A, &Rc<S>) + 'static) -> Subscription {
        let id = self.0.action_subs.borrow_mut().insert(Rc::new(listener));
        let node = Rc::downgrade(&self.0);
        Subscription::from_fn(move || {
            if let Some(node) = node.upgrade() {
                node.action_subs.borrow_mut().remove(id);
            }
        })
    }

    /// Runs every effect future that can currently make progress, returning
    /// whether any ran to completion. Hosts call this after a timer or
    /// external wake-up; `dispatch` already pumps on its own.
    pub fn run_effects(&self) -> bool {
        self.0.pump()
    }

    /// The most recent dispatched actions, oldest first. Empty unless
    /// [`StoreBuilder::history_capacity`] was set.
    pub fn history(&self) -> Vec<A> {
        self.0
            .history
            .as_ref()
            .map(|history| history.snapshot())
            .unwrap_or_default()
    }

    /// Aborts all in-flight work, tears down every live subscription, clears
    /// timers, throttle state, observers and history. Idempotent.
    pub fn destroy(&self) {
        self.0.destroy();
    }
}

pub struct StoreBuilder<S: 'static, A: 'static, D: 'static> {
    reducer: Box<dyn Reducer<State = S, Action = A, Deps = D>>,
    deps: D,
    time: Rc<dyn TimeSource>,
    error_hook: ErrorHook,
    history_capacity: Option<usize>,
}

impl<S: 'static, A: Clone + 'static, D: 'static> StoreBuilder<S, A, D> {
    /// Clock and timer facility for delayed, debounced and throttled
    /// effects. Defaults to [`ThreadTimer`].
    pub fn time_source(mut self, time: impl TimeSource + 'static) -> Self {
        self.time = Rc::new(time);
        self
    }

    /// Replaces the default `tracing`-based sink for effect failures.
    pub fn error_hook(mut self, hook: impl Fn(&EffectError) + 'static) -> Self {
        self.error_hook = Rc::new(hook);
        self
    }

    /// Keeps the most recent `capacity` dispatched actions for debugging and
    /// replay.
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = Some(capacity);
        self
    }

    pub fn build(self, initial: S) -> Store<S, A, D> {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Store(Rc::new(StoreNode {
            reducer: self.reducer,
            deps: self.deps,
            state: RefCell::new(Rc::new(initial)),
            state_subs: RefCell::new(Listeners::new()),
            action_subs: RefCell::new(Listeners::new()),
            history: self.history_capacity.map(History::new),
            time: self.time,
            error_hook: self.error_hook,
            pool: RefCell::new(pool),
            spawner: RefCell::new(spawner),
            pumping: Cell::new(false),
            destroyed: Cell::new(false),
            generation: Cell::new(0),
            inflight: RefCell::new(HashMap::new()),
            debounces: RefCell::new(HashMap::new()),
            throttles: RefCell::new(HashMap::new()),
            subscriptions: RefCell::new(HashMap::new()),
        }))
    }
}

struct StoreNode<S: 'static, A: 'static, D: 'static> {
    reducer: Box<dyn Reducer<State = S, Action = A, Deps = D>>,
    deps: D,
    state: RefCell<Rc<S>>,
    state_subs: RefCell<Listeners<Rc<dyn Fn(&Rc<S>)>>>,
    action_subs: RefCell<Listeners<Rc<dyn Fn(&A, &Rc<S>)>>>,
    history: Option<History<A>>,
    time: Rc<dyn TimeSource>,
    error_hook: ErrorHook,
    pool: RefCell<LocalPool>,
    spawner: RefCell<LocalSpawner>,
    /// Set while the outermost dispatch (or `run_effects`) drives the pool;
    /// nested dispatches only enqueue.
    pumping: Cell<bool>,
    destroyed: Cell<bool>,
    generation: Cell<u64>,
    inflight: RefCell<HashMap<EffectKey, FlightSlot>>,
    debounces: RefCell<HashMap<EffectKey, FlightSlot>>,
    throttles: RefCell<HashMap<EffectKey, ThrottleSlot<A>>>,
    subscriptions: RefCell<HashMap<EffectKey, Teardown>>,
}

struct FlightSlot {
    generation: u64,
    handle: AbortHandle,
}

struct ThrottleSlot<A: 'static> {
    last_run: Instant,
    trailing: Option<TrailingSlot<A>>,
}

struct TrailingSlot<A: 'static> {
    payload: Rc<RefCell<Option<RunFn<A>>>>,
    handle: AbortHandle,
}

impl<S: 'static, A: 'static, D: 'static> StoreNode<S, A, D> {
    fn pump(&self) -> bool {
        if self.destroyed.get() || self.pumping.replace(true) {
            return false;
        }
        let mut ran = false;
        {
            let mut pool = self.pool.borrow_mut();
            while !self.destroyed.get() && pool.try_run_one() {
                ran = true;
            }
        }
        self.pumping.set(false);
        if self.destroyed.get() {
            self.release_pool();
        }
        ran
    }

    /// Dropping the old pool drops every pending effect future together with
    /// its timers. Deferred to the end of the pump when destroy happens from
    /// inside an effect callback.
    fn release_pool(&self) {
        let fresh = LocalPool::new();
        *self.spawner.borrow_mut() = fresh.spawner();
        *self.pool.borrow_mut() = fresh;
    }

    fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        for (_, slot) in self.inflight.borrow_mut().drain() {
            slot.handle.abort();
        }
        for (_, slot) in self.debounces.borrow_mut().drain() {
            slot.handle.abort();
        }
        for (_, slot) in self.throttles.borrow_mut().drain() {
            if let Some(trailing) = slot.trailing {
                trailing.handle.abort();
            }
        }
        let teardowns: Vec<Teardown> = self
            .subscriptions
            .borrow_mut()
            .drain()
            .map(|(_, teardown)| teardown)
            .collect();
        for teardown in teardowns {
            if catch_unwind(AssertUnwindSafe(move || teardown())).is_err() {
                tracing::error!("subscription teardown panicked during destroy");
            }
        }
        self.state_subs.borrow_mut().clear();
        self.action_subs.borrow_mut().clear();
        if let Some(history) = &self.history {
            history.clear();
        }
        if !self.pumping.get() {
            self.release_pool();
        }
    }

    fn next_generation(&self) -> u64 {
        let generation = self.generation.get();
        self.generation.set(generation + 1);
        generation
    }

    fn spawn(&self, fut: impl Future<Output = ()> + 'static) {
        if self.spawner.borrow().spawn_local(fut).is_err() {
            tracing::debug!("effect dropped; executor is shut down");
        }
    }

    fn spawn_logged(&self, fut: EffectFuture) {
        let hook = self.error_hook.clone();
        self.spawn(async move {
            if let Err(error) = fut.await {
                (*hook)(&error);
            }
        });
    }

    fn cancel(&self, key: &EffectKey) {
        if let Some(slot) = self.inflight.borrow_mut().remove(key) {
            slot.handle.abort();
        }
    }
}

impl<S: 'static, A: Clone + 'static, D: 'static> StoreNode<S, A, D> {
    fn dispatch(self: &Rc<Self>, action: A) {
        if self.destroyed.get() {
            tracing::warn!("dispatch on a destroyed store is ignored");
            return;
        }
        if let Some(history) = &self.history {
            history.push(&action);
        }
        let observed = (!self.action_subs.borrow().is_empty()).then(|| action.clone());

        let prev = self.state.borrow().clone();
        let (next, effect) = self.reducer.reduce(&prev, action, &self.deps);
        if !Rc::ptr_eq(&prev, &next) {
            *self.state.borrow_mut() = next.clone();
            let listeners = self.state_subs.borrow().snapshot();
            for listener in listeners {
                if catch_unwind(AssertUnwindSafe(|| (*listener)(&next))).is_err() {
                    tracing::error!("state subscriber panicked; remaining subscribers still run");
                }
            }
        }
        if let Some(action) = observed {
            let current = self.state.borrow().clone();
            let listeners = self.action_subs.borrow().snapshot();
            for listener in listeners {
                if catch_unwind(AssertUnwindSafe(|| (*listener)(&action, &current))).is_err() {
                    tracing::error!("action subscriber panicked; remaining subscribers still run");
                }
            }
        }
        if !effect.is_none() {
            self.schedule(effect);
        }
    }

    fn dispatcher(self: &Rc<Self>) -> Dispatcher<A> {
        let node = Rc::downgrade(self);
        Dispatcher::from_fn(Rc::new(move |action| {
            let Some(node) = node.upgrade() else { return };
            if node.destroyed.get() {
                return;
            }
            node.dispatch(action);
            node.pump();
        }))
    }

    fn schedule(self: &Rc<Self>, effect: Effect<A>) {
        match effect.0 {
            RawEffect::None => {}
            RawEffect::Run(run) => self.spawn_logged(run(self.dispatcher())),
            RawEffect::FireAndForget(fire) => self.spawn_logged(fire()),
            RawEffect::Batch(members) => {
                for member in members {
                    self.schedule(member);
                }
            }
            RawEffect::Cancellable { key, run } => self.spawn_cancellable(key, run),
            RawEffect::Cancel { key } => self.cancel(&key),
            RawEffect::Debounced { key, delay, run } => self.spawn_debounced(key, delay, run),
            RawEffect::Throttled { key, delay, run } => self.spawn_throttled(key, delay, run),
            RawEffect::AfterDelay { delay, run } => self.spawn_after_delay(delay, run),
            RawEffect::Subscription { key, setup } => self.install_subscription(key, setup),
        }
    }

    fn spawn_cancellable(self: &Rc<Self>, key: EffectKey, run: RunFn<A>) {
        // abort the previous flight before the new one starts
        if let Some(previous) = self.inflight.borrow_mut().remove(&key) {
            previous.handle.abort();
        }
        let generation = self.next_generation();
        let (handle, registration) = AbortHandle::new_pair();
        self.inflight
            .borrow_mut()
            .insert(key.clone(), FlightSlot { generation, handle });
        let fut = Abortable::new(run(self.dispatcher()), registration);
        let node = Rc::downgrade(self);
        let hook = self.error_hook.clone();
        self.spawn(async move {
            match fut.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => (*hook)(&error),
                // cancellation is not a failure
                Err(Aborted) => {}
            }
            if let Some(node) = node.upgrade() {
                let mut inflight = node.inflight.borrow_mut();
                if inflight
                    .get(&key)
                    .is_some_and(|slot| slot.generation == generation)
                {
                    inflight.remove(&key);
                }
            }
        });
    }

    fn spawn_debounced(self: &Rc<Self>, key: EffectKey, delay: Duration, run: RunFn<A>) {
        if let Some(previous) = self.debounces.borrow_mut().remove(&key) {
            previous.handle.abort();
        }
        let generation = self.next_generation();
        let (handle, registration) = AbortHandle::new_pair();
        self.debounces
            .borrow_mut()
            .insert(key.clone(), FlightSlot { generation, handle });
        let timer = Abortable::new(self.time.sleep(delay), registration);
        let dispatcher = self.dispatcher();
        let node = Rc::downgrade(self);
        let hook = self.error_hook.clone();
        self.spawn(async move {
            // only the timer is abortable; a started execution runs to completion
            if timer.await.is_err() {
                return;
            }
            let Some(node) = node.upgrade() else { return };
            {
                let mut debounces = node.debounces.borrow_mut();
                if debounces
                    .get(&key)
                    .is_some_and(|slot| slot.generation == generation)
                {
                    debounces.remove(&key);
                }
            }
            if let Err(error) = run(dispatcher).await {
                (*hook)(&error);
            }
        });
    }

    fn spawn_throttled(self: &Rc<Self>, key: EffectKey, delay: Duration, run: RunFn<A>) {
        let now = self.time.now();
        let mut throttles = self.throttles.borrow_mut();
        if let Some(slot) = throttles.get_mut(&key) {
            if let Some(trailing) = &slot.trailing {
                // coalesce: replace the pending trailing payload
                *trailing.payload.borrow_mut() = Some(run);
                return;
            }
            let elapsed = now.duration_since(slot.last_run);
            if elapsed < delay {
                let payload = Rc::new(RefCell::new(Some(run)));
                let (handle, registration) = AbortHandle::new_pair();
                slot.trailing = Some(TrailingSlot {
                    payload: payload.clone(),
                    handle,
                });
                drop(throttles);
                let timer = Abortable::new(self.time.sleep(delay - elapsed), registration);
                let dispatcher = self.dispatcher();
                let node = Rc::downgrade(self);
                let hook = self.error_hook.clone();
                self.spawn(async move {
                    if timer.await.is_err() {
                        return;
                    }
                    let Some(node) = node.upgrade() else { return };
                    let run = {
                        let mut throttles = node.throttles.borrow_mut();
                        if let Some(slot) = throttles.get_mut(&key) {
                            slot.trailing = None;
                            slot.last_run = node.time.now();
                        }
                        payload.borrow_mut().take()
                    };
                    if let Some(run) = run {
                        if let Err(error) = run(dispatcher).await {
                            (*hook)(&error);
                        }
                    }
                });
                return;
            }
            // window fully elapsed: run immediately and restart the window
            slot.last_run = now;
            drop(throttles);
            self.spawn_logged(run(self.dispatcher()));
            return;
        }
        throttles.insert(
            key,
            ThrottleSlot {
                last_run: now,
                trailing: None,
            },
        );
        drop(throttles);
        self.spawn_logged(run(self.dispatcher()));
    }

    fn spawn_after_delay(self: &Rc<Self>, delay: Duration, run: RunFn<A>) {
        let timer = self.time.sleep(delay);
        let dispatcher = self.dispatcher();
        let hook = self.error_hook.clone();
        self.spawn(async move {
            timer.await;
            if let Err(error) = run(dispatcher).await {
                (*hook)(&error);
            }
        });
    }

    fn install_subscription(self: &Rc<Self>, key: EffectKey, setup: SetupFn<A>) {
        // idempotent resubscription: the previous holder of the key goes first
        let previous = self.subscriptions.borrow_mut().remove(&key);
        if let Some(teardown) = previous {
            if catch_unwind(AssertUnwindSafe(move || teardown())).is_err() {
                tracing::error!("subscription teardown panicked");
            }
        }
        let teardown = setup(self.dispatcher());
        self.subscriptions.borrow_mut().insert(key, teardown);
    }
}

impl<S: 'static, A: 'static, D: 'static> Drop for StoreNode<S, A, D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Observer registry preserving exact registration order, including across
/// removals.
struct Listeners<T> {
    entries: Vec<(u64, T)>,
    next_id: u64,
}

impl<T: Clone> Listeners<T> {
    fn new() -> Self {
        Listeners {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    fn insert(&mut self, listener: T) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    fn remove(&mut self, id: u64) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn snapshot(&self) -> Vec<T> {
        self.entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}

struct History<A> {
    capacity: usize,
    buf: RefCell<VecDeque<A>>,
}

impl<A> History<A> {
    fn new(capacity: usize) -> Self {
        History {
            capacity,
            buf: RefCell::new(VecDeque::new()),
        }
    }

    fn clear(&self) {
        self.buf.borrow_mut().clear();
    }
}

impl<A: Clone> History<A> {
    fn push(&self, action: &A) {
        if self.capacity == 0 {
            return;
        }
        let mut buf = self.buf.borrow_mut();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(action.clone());
    }

    fn snapshot(&self) -> Vec<A> {
        self.buf.borrow().iter().cloned().collect()
    }
}
