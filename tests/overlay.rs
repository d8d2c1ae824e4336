use std::{rc::Rc, time::Duration};

use reflux::{
    integrate, reducer_fn, scope, Effect, PresentationAction, PresentationReducer,
    PresentationState, PresentationStatus, Reducer, Store, TestScheduler,
};

const PRESENT: Duration = Duration::from_millis(150);
const DISMISS: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, PartialEq)]
enum OverlayAction {
    Toggled,
    Escape,
    Presentation(PresentationAction<String>),
}

struct OverlayState {
    is_open: bool,
    presentation: Rc<PresentationState<String>>,
}

fn core() -> impl Reducer<State = OverlayState, Action = OverlayAction, Deps = ()> {
    reducer_fn(
        |state: &Rc<OverlayState>, action: OverlayAction, _deps: &()| match action {
            OverlayAction::Toggled if !state.is_open => (
                Rc::new(OverlayState {
                    is_open: true,
                    presentation: state.presentation.clone(),
                }),
                Effect::run(|d| async move {
                    d.dispatch(OverlayAction::Presentation(PresentationAction::Open {
                        content: "menu".to_string(),
                        duration: PRESENT,
                    }));
                    Ok(())
                }),
            ),
            OverlayAction::Toggled => (state.clone(), Effect::none()),
            OverlayAction::Escape => (
                state.clone(),
                Effect::run(|d| async move {
                    d.dispatch(OverlayAction::Presentation(PresentationAction::Close));
                    Ok(())
                }),
            ),
            OverlayAction::Presentation(PresentationAction::DismissalCompleted) => (
                Rc::new(OverlayState {
                    is_open: false,
                    presentation: state.presentation.clone(),
                }),
                Effect::none(),
            ),
            OverlayAction::Presentation(_) => (state.clone(), Effect::none()),
        },
    )
}

fn overlay_reducer() -> impl Reducer<State = OverlayState, Action = OverlayAction, Deps = ()> {
    integrate(core())
        .with(scope(
            |state: &OverlayState| state.presentation.clone(),
            |state: &OverlayState, presentation| OverlayState {
                is_open: state.is_open,
                presentation,
            },
            |action: &OverlayAction| match action {
                OverlayAction::Presentation(action) => Some(action.clone()),
                _ => None,
            },
            OverlayAction::Presentation,
            PresentationReducer::new(DISMISS),
        ))
        .build()
}

fn overlay_store(scheduler: &TestScheduler) -> Store<OverlayState, OverlayAction, ()> {
    Store::builder(overlay_reducer(), ())
        .time_source(scheduler.clone())
        .build(OverlayState {
            is_open: false,
            presentation: Rc::new(PresentationState::Idle),
        })
}

#[test]
fn the_overlay_lifecycle_round_trips() {
    let scheduler = TestScheduler::new();
    let store = overlay_store(&scheduler);

    store.dispatch(OverlayAction::Toggled);
    assert!(store.state().is_open);
    assert_eq!(
        store.state().presentation.status(),
        PresentationStatus::Presenting
    );

    scheduler.advance(PRESENT);
    store.run_effects();
    assert_eq!(
        store.state().presentation.status(),
        PresentationStatus::Presented
    );

    store.dispatch(OverlayAction::Escape);
    assert_eq!(
        store.state().presentation.status(),
        PresentationStatus::Dismissing
    );

    scheduler.advance(DISMISS);
    store.run_effects();
    assert!(store.state().presentation.is_idle());
    assert!(!store.state().is_open);
}

#[test]
fn escape_during_the_presenting_animation_is_ignored() {
    let scheduler = TestScheduler::new();
    let store = overlay_store(&scheduler);

    store.dispatch(OverlayAction::Toggled);
    store.dispatch(OverlayAction::Escape);
    assert_eq!(
        store.state().presentation.status(),
        PresentationStatus::Presenting
    );
    assert!(store.state().is_open);

    scheduler.advance(PRESENT);
    store.run_effects();
    assert_eq!(
        store.state().presentation.status(),
        PresentationStatus::Presented
    );
}

#[test]
fn toggling_an_open_overlay_does_not_restart_the_animation() {
    let scheduler = TestScheduler::new();
    let store = overlay_store(&scheduler);

    store.dispatch(OverlayAction::Toggled);
    let presentation_before = store.state().presentation.clone();
    store.dispatch(OverlayAction::Toggled);
    assert!(Rc::ptr_eq(&presentation_before, &store.state().presentation));
}
