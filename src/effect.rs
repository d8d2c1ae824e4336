use std::{borrow::Cow, future::Future, time::Duration};

use futures::{future::LocalBoxFuture, FutureExt};
use parse_display::Display;

use crate::store::Dispatcher;


/// Key scoping the store's cancellation, debounce, throttle and subscription
/// bookkeeping. Issuing a new keyed effect under an already-used key
/// supersedes whatever the key previously referred to.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[display("{0}")]
pub struct EffectKey(Cow<'static, str>);

impl From<&'static str> for EffectKey {
    fn from(key: &'static str) -> Self {
        EffectKey(Cow::Borrowed(key))
    }
}
impl From<String> for EffectKey {
    fn from(key: String) -> Self {
        EffectKey(Cow::Owned(key))
    }
}

/// Failure reported by an effect callback.
///
/// Caught at the store boundary and routed to the error hook; never
/// propagated to the caller of [`Store::dispatch`](crate::Store::dispatch).
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("{message}")]
pub struct EffectError {
    message: String,
}

impl EffectError {
    pub fn new(message: impl Into<String>) -> Self {
        EffectError {
            message: message.into(),
        }
    }
    pub fn message(&self) -> &str {
        &self.message
    }
}
impl std::error::Error for EffectError {}
impl From<&str> for EffectError {
    fn from(message: &str) -> Self {
        EffectError::new(message)
    }
}
impl From<String> for EffectError {
    fn from(message: String) -> Self {
        EffectError::new(message)
    }
}

pub type EffectResult = Result<(), EffectError>;
pub type EffectFuture = LocalBoxFuture<'static, EffectResult>;

/// Cleanup action returned by a subscription's setup.
pub type Teardown = Box<dyn FnOnce()>;

pub(crate) type RunFn<A> = Box<dyn FnOnce(Dispatcher<A>) -> EffectFuture>;
pub(crate) type FireFn = Box<dyn FnOnce() -> EffectFuture>;
pub(crate) type SetupFn<A> = Box<dyn FnOnce(Dispatcher<A>) -> Teardown>;

/// An inert description of work to perform after a state transition.
///
/// Constructing an effect performs no work; the owning
/// [`Store`](crate::Store) executes it after the triggering state commit and
/// subscriber notification. Callbacks receive a [`Dispatcher`] and may send
/// any number of follow-up actions, each starting a fresh transition cycle.
pub struct Effect<A: 'static>(pub(crate) RawEffect<A>);

pub(crate) enum RawEffect<A: 'static> {
    None,
    Run(RunFn<A>),
    Batch(Vec<Effect<A>>),
    Cancellable { key: EffectKey, run: RunFn<A> },
    Cancel { key: EffectKey },
    Debounced { key: EffectKey, delay: Duration, run: RunFn<A> },
    Throttled { key: EffectKey, delay: Duration, run: RunFn<A> },
    AfterDelay { delay: Duration, run: RunFn<A> },
    FireAndForget(FireFn),
    Subscription { key: EffectKey, setup: SetupFn<A> },
}

impl<A: 'static> Effect<A> {
    /// The effect that does nothing.
    pub fn none() -> Self {
        Effect(RawEffect::None)
    }

    /// Runs `f` as soon as the triggering transition has been committed and
    /// observed.
    pub fn run<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> Fut + 'static,
        Fut: Future<Output = EffectResult> + 'static,
    {
        Effect(RawEffect::Run(box_run(f)))
    }

    /// Merges several effects into one. `none` members are dropped and nested
    /// batches are flattened; zero surviving members collapse back to `none`.
    ///
    /// Members are issued in order but have no relative completion-order
    /// guarantee.
    pub fn batch(effects: impl IntoIterator<Item = Effect<A>>) -> Self {
        let mut members = Vec::new();
        for effect in effects {
            match effect.0 {
                RawEffect::None => {}
                RawEffect::Batch(nested) => members.extend(nested),
                raw => members.push(Effect(raw)),
            }
        }
        match members.len() {
            0 => Effect::none(),
            1 => members.pop().unwrap(),
            _ => Effect(RawEffect::Batch(members)),
        }
    }

    /// Single-flight work: issuing another `cancellable` under the same key
    /// aborts the in-flight instance before this one starts.
    pub fn cancellable<F, Fut>(key: impl Into<EffectKey>, f: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> Fut + 'static,
        Fut: Future<Output = EffectResult> + 'static,
    {
        Effect(RawEffect::Cancellable {
            key: key.into(),
            run: box_run(f),
        })
    }

    /// Aborts whatever is in flight under `key` without starting new work.
    pub fn cancel(key: impl Into<EffectKey>) -> Self {
        Effect(RawEffect::Cancel { key: key.into() })
    }

    /// Runs `f` once `delay` has elapsed without another `debounced` being
    /// issued under the same key; earlier pending issues are discarded.
    pub fn debounced<F, Fut>(key: impl Into<EffectKey>, delay: Duration, f: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> Fut + 'static,
        Fut: Future<Output = EffectResult> + 'static,
    {
        Effect(RawEffect::Debounced {
            key: key.into(),
            delay,
            run: box_run(f),
        })
    }

    /// Leading-plus-trailing rate limiting: the first issue under `key` runs
    /// immediately; issues inside the window replace a single trailing run
    /// executed at the window boundary.
    pub fn throttled<F, Fut>(key: impl Into<EffectKey>, delay: Duration, f: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> Fut + 'static,
        Fut: Future<Output = EffectResult> + 'static,
    {
        Effect(RawEffect::Throttled {
            key: key.into(),
            delay,
            run: box_run(f),
        })
    }

    /// Runs `f` exactly once after `delay`. Not keyed; only
    /// [`Store::destroy`](crate::Store::destroy) stops it.
    pub fn after_delay<F, Fut>(delay: Duration, f: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> Fut + 'static,
        Fut: Future<Output = EffectResult> + 'static,
    {
        Effect(RawEffect::AfterDelay {
            delay,
            run: box_run(f),
        })
    }

    /// Runs `f` without a dispatch handle; the work cannot feed actions back
    /// into the store.
    pub fn fire_and_forget<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = EffectResult> + 'static,
    {
        Effect(RawEffect::FireAndForget(Box::new(move || {
            f().boxed_local()
        })))
    }

    /// Installs a long-lived event source. `setup` runs once and returns the
    /// teardown; reissuing the key tears the previous subscription down
    /// first, and [`Store::destroy`](crate::Store::destroy) tears down every
    /// live one.
    pub fn subscription<F, T>(key: impl Into<EffectKey>, setup: F) -> Self
    where
        F: FnOnce(Dispatcher<A>) -> T + 'static,
        T: FnOnce() + 'static,
    {
        Effect(RawEffect::Subscription {
            key: key.into(),
            setup: Box::new(move |dispatcher| Box::new(setup(dispatcher)) as Teardown),
        })
    }

    pub fn is_none(&self) -> bool {
        matches!(self.0, RawEffect::None)
    }

    /// Rewrites every action this effect would dispatch through `f`,
    /// re-expressing a child effect in a parent's action space.
    ///
    /// Structure-preserving: batches map member-wise, keys and delays are
    /// kept, and a subscription's setup-provided dispatch handle is wrapped
    /// too.
    pub fn map<B: 'static>(self, f: impl Fn(A) -> B + Clone + 'static) -> Effect<B> {
        Effect(match self.0 {
            RawEffect::None => RawEffect::None,
            RawEffect::Run(run) => RawEffect::Run(map_run(run, f)),
            RawEffect::Batch(members) => RawEffect::Batch(
                members
                    .into_iter()
                    .map(|member| member.map(f.clone()))
                    .collect(),
            ),
            RawEffect::Cancellable { key, run } => RawEffect::Cancellable {
                key,
                run: map_run(run, f),
            },
            RawEffect::Cancel { key } => RawEffect::Cancel { key },
            RawEffect::Debounced { key, delay, run } => RawEffect::Debounced {
                key,
                delay,
                run: map_run(run, f),
            },
            RawEffect::Throttled { key, delay, run } => RawEffect::Throttled {
                key,
                delay,
                run: map_run(run, f),
            },
            RawEffect::AfterDelay { delay, run } => RawEffect::AfterDelay {
                delay,
                run: map_run(run, f),
            },
            RawEffect::FireAndForget(fire) => RawEffect::FireAndForget(fire),
            RawEffect::Subscription { key, setup } => RawEffect::Subscription {
                key,
                setup: Box::new(move |dispatcher: Dispatcher<B>| setup(dispatcher.premap(f))),
            },
        })
    }
}

fn box_run<A: 'static, F, Fut>(f: F) -> RunFn<A>
where
    F: FnOnce(Dispatcher<A>) -> Fut + 'static,
    Fut: Future<Output = EffectResult> + 'static,
{
    Box::new(move |dispatcher| f(dispatcher).boxed_local())
}

fn map_run<A: 'static, B: 'static>(run: RunFn<A>, f: impl Fn(A) -> B + 'static) -> RunFn<B> {
    Box::new(move |dispatcher: Dispatcher<B>| run(dispatcher.premap(f)))
}

// Callbacks are not `Debug`, so only the shape is shown.
impl<A> std::fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            RawEffect::None => write!(f, "Effect::None"),
            RawEffect::Run(_) => write!(f, "Effect::Run"),
            RawEffect::Batch(members) => f.debug_list().entries(members).finish(),
            RawEffect::Cancellable { key, .. } => write!(f, "Effect::Cancellable({key})"),
            RawEffect::Cancel { key } => write!(f, "Effect::Cancel({key})"),
            RawEffect::Debounced { key, delay, .. } => {
                write!(f, "Effect::Debounced({key}, {delay:?})")
            }
            RawEffect::Throttled { key, delay, .. } => {
                write!(f, "Effect::Throttled({key}, {delay:?})")
            }
            RawEffect::AfterDelay { delay, .. } => write!(f, "Effect::AfterDelay({delay:?})"),
            RawEffect::FireAndForget(_) => write!(f, "Effect::FireAndForget"),
            RawEffect::Subscription { key, .. } => write!(f, "Effect::Subscription({key})"),
        }
    }
}
