use std::{marker::PhantomData, rc::Rc, time::Duration};

use parse_display::Display;
use serde::{Deserialize, Serialize};

use crate::{
    effect::Effect,
    reducer::{Reducer, Transition},
};


/// Where an optionally-shown feature is in its animated lifecycle.
///
/// Exactly one live instance exists per overlay feature; the
/// [`PresentationReducer`] fragment is the only thing that moves it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentationState<C> {
    Idle,
    Presenting { content: C, duration: Duration },
    Presented { content: C },
    Dismissing { content: C, duration: Duration },
}

impl<C> Default for PresentationState<C> {
    fn default() -> Self {
        PresentationState::Idle
    }
}

impl<C> PresentationState<C> {
    pub fn status(&self) -> PresentationStatus {
        match self {
            PresentationState::Idle => PresentationStatus::Idle,
            PresentationState::Presenting { .. } => PresentationStatus::Presenting,
            PresentationState::Presented { .. } => PresentationStatus::Presented,
            PresentationState::Dismissing { .. } => PresentationStatus::Dismissing,
        }
    }

    /// The presented content, in every phase that still carries it.
    pub fn content(&self) -> Option<&C> {
        match self {
            PresentationState::Idle => None,
            PresentationState::Presenting { content, .. }
            | PresentationState::Presented { content }
            | PresentationState::Dismissing { content, .. } => Some(content),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, PresentationState::Idle)
    }
}

/// Flat discriminant of [`PresentationState`] for observers and logs.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display(style = "snake_case")]
pub enum PresentationStatus {
    Idle,
    Presenting,
    Presented,
    Dismissing,
}

/// Inputs to the lifecycle machine. `PresentationCompleted` and
/// `DismissalCompleted` are dispatched by the animation-completion effects
/// the machine itself schedules (or by a rendering layer's completion
/// callbacks).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresentationAction<C> {
    Open { content: C, duration: Duration },
    PresentationCompleted,
    Close,
    DismissalCompleted,
}

/// The animated-lifecycle reducer fragment:
/// `idle → presenting → presented → dismissing → idle`.
///
/// Content-parametric and deps-agnostic; overlay features embed it with
/// [`scope`](crate::scope) instead of re-deriving the machine. `Close` is
/// guarded and only acts from `Presented`, so a second dismiss can never
/// race an in-progress animation, and a completion event arriving after the
/// feature already closed cannot resurrect state.
pub struct PresentationReducer<C, D = ()> {
    dismiss_duration: Duration,
    _marker: PhantomData<fn(C, D)>,
}

impl<C, D> PresentationReducer<C, D> {
    /// `dismiss_duration` is how long the dismissal animation runs before
    /// `DismissalCompleted` fires; the presenting duration travels with each
    /// `Open`.
    pub fn new(dismiss_duration: Duration) -> Self {
        PresentationReducer {
            dismiss_duration,
            _marker: PhantomData,
        }
    }
}

impl<C: Clone + 'static, D: 'static> Reducer for PresentationReducer<C, D> {
    type State = PresentationState<C>;
    type Action = PresentationAction<C>;
    type Deps = D;

    fn reduce(
        &self,
        state: &Rc<PresentationState<C>>,
        action: PresentationAction<C>,
        _deps: &D,
    ) -> Transition<PresentationState<C>, PresentationAction<C>> {
        match (state.as_ref(), action) {
            (PresentationState::Idle, PresentationAction::Open { content, duration }) => (
                Rc::new(PresentationState::Presenting { content, duration }),
                Effect::after_delay(duration, |d| async move {
                    d.dispatch(PresentationAction::PresentationCompleted);
                    Ok(())
                }),
            ),
            (
                PresentationState::Presenting { content, .. },
                PresentationAction::PresentationCompleted,
            ) => (
                Rc::new(PresentationState::Presented {
                    content: content.clone(),
                }),
                Effect::none(),
            ),
            (PresentationState::Presented { content }, PresentationAction::Close) => {
                let duration = self.dismiss_duration;
                (
                    Rc::new(PresentationState::Dismissing {
                        content: content.clone(),
                        duration,
                    }),
                    Effect::after_delay(duration, |d| async move {
                        d.dispatch(PresentationAction::DismissalCompleted);
                        Ok(())
                    }),
                )
            }
            (PresentationState::Dismissing { .. }, PresentationAction::DismissalCompleted) => {
                (Rc::new(PresentationState::Idle), Effect::none())
            }
            // everything else is a guarded no-op: opens over live content,
            // closes during an animation, stray completion events
            _ => (state.clone(), Effect::none()),
        }
    }
}
