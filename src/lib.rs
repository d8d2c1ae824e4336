//! An effect-driven reducer/store runtime for composable stateful features.
//!
//! State transitions are pure functions `(state, action, deps) -> (state, effect)`.
//! A [`Store`] owns the state tree, runs the [`Reducer`] for every dispatched
//! action, notifies observers, and executes the returned [`Effect`]s,
//! including per-key cancellation, debouncing, throttling, delayed actions
//! and long-lived subscriptions. Everything is single-threaded and
//! cooperative: reducers never suspend, effect callbacks run as local
//! futures on a store-owned executor, and timers come from an injectable
//! [`TimeSource`].
//!
//! Reducers compose: [`scope`] embeds a child feature inside a parent,
//! [`combine`] lets independent slices observe the same actions,
//! [`for_each`] routes actions into an identified collection, and
//! [`integrate`] wires several scoped children over a core reducer. The
//! [`PresentationState`] machine implements the guarded animated lifecycle
//! shared by every overlay feature.
//!
//! ```
//! use std::rc::Rc;
//! use reflux::{reducer_fn, Effect, Store};
//!
//! #[derive(Clone)]
//! enum Action {
//!     Increment,
//! }
//!
//! let reducer = reducer_fn(|state: &Rc<i32>, action: Action, _deps: &()| match action {
//!     Action::Increment => (Rc::new(**state + 1), Effect::none()),
//! });
//!
//! let store = Store::new(0, reducer, ());
//! store.dispatch(Action::Increment);
//! assert_eq!(*store.state(), 1);
//! ```

mod compose;
mod effect;
mod presentation;
mod reducer;
mod store;
mod subscription;
mod time;

pub use compose::{
    combine, element_action, for_each, integrate, scope, Combine, ElementAction, ForEach,
    Identified, Integrated, Integration, Scoped,
};
pub use effect::{Effect, EffectError, EffectFuture, EffectKey, EffectResult, Teardown};
pub use presentation::{
    PresentationAction, PresentationReducer, PresentationState, PresentationStatus,
};
pub use reducer::{reducer_fn, FnReducer, Reducer, Transition};
pub use store::{Dispatcher, ErrorHook, Store, StoreBuilder};
pub use subscription::Subscription;
pub use time::{TestScheduler, ThreadTimer, TimeSource};
