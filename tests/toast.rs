use std::{
    cell::Cell,
    rc::Rc,
    time::{Duration, Instant},
};

use reflux::{reducer_fn, Effect, Reducer, Store, TestScheduler, TimeSource};

#[derive(Clone, Debug, PartialEq)]
struct Toast {
    id: u64,
    description: String,
    created_at: Instant,
}

#[derive(Clone, Debug)]
enum ToastAction {
    Added { description: String },
    AutoDismissed { id: u64 },
}

struct ToastDeps {
    next_id: Cell<u64>,
    clock: Rc<dyn TimeSource>,
    max_toasts: usize,
    default_duration: Duration,
}

#[derive(Debug, PartialEq)]
struct ToastState {
    toasts: Vec<Toast>,
}

fn toast_reducer() -> impl Reducer<State = ToastState, Action = ToastAction, Deps = ToastDeps> {
    reducer_fn(
        |state: &Rc<ToastState>, action: ToastAction, deps: &ToastDeps| match action {
            ToastAction::Added { description } => {
                let id = deps.next_id.get();
                deps.next_id.set(id + 1);
                let mut toasts = state.toasts.clone();
                toasts.push(Toast {
                    id,
                    description,
                    created_at: deps.clock.now(),
                });
                // oldest out first once the cap is reached
                while toasts.len() > deps.max_toasts {
                    toasts.remove(0);
                }
                let duration = deps.default_duration;
                (
                    Rc::new(ToastState { toasts }),
                    Effect::after_delay(duration, move |d| async move {
                        d.dispatch(ToastAction::AutoDismissed { id });
                        Ok(())
                    }),
                )
            }
            ToastAction::AutoDismissed { id } => {
                if !state.toasts.iter().any(|toast| toast.id == id) {
                    return (state.clone(), Effect::none());
                }
                let toasts = state
                    .toasts
                    .iter()
                    .filter(|toast| toast.id != id)
                    .cloned()
                    .collect();
                (Rc::new(ToastState { toasts }), Effect::none())
            }
        },
    )
}

fn toast_store(scheduler: &TestScheduler) -> Store<ToastState, ToastAction, ToastDeps> {
    let deps = ToastDeps {
        next_id: Cell::new(1),
        clock: Rc::new(scheduler.clone()),
        max_toasts: 3,
        default_duration: Duration::from_millis(5000),
    };
    Store::builder(toast_reducer(), deps)
        .time_source(scheduler.clone())
        .build(ToastState { toasts: Vec::new() })
}

#[test]
fn a_toast_gets_an_id_and_auto_dismisses() {
    let scheduler = TestScheduler::new();
    let store = toast_store(&scheduler);
    let shown_at = scheduler.now();
    store.dispatch(ToastAction::Added {
        description: "Saved".to_string(),
    });
    {
        let state = store.state();
        assert_eq!(state.toasts.len(), 1);
        assert_eq!(state.toasts[0].id, 1);
        assert_eq!(state.toasts[0].description, "Saved");
        assert_eq!(state.toasts[0].created_at, shown_at);
    }
    scheduler.advance(Duration::from_millis(5000));
    store.run_effects();
    assert!(store.state().toasts.is_empty());
}

#[test]
fn the_toast_list_is_capped() {
    let scheduler = TestScheduler::new();
    let store = toast_store(&scheduler);
    for n in 1..=4 {
        store.dispatch(ToastAction::Added {
            description: format!("toast {n}"),
        });
    }
    let state = store.state();
    assert_eq!(state.toasts.len(), 3);
    assert_eq!(state.toasts[0].id, 2);
    assert_eq!(state.toasts[2].id, 4);
}

#[test]
fn a_dismissal_for_an_already_gone_toast_changes_nothing() {
    let scheduler = TestScheduler::new();
    let store = toast_store(&scheduler);
    store.dispatch(ToastAction::Added {
        description: "Saved".to_string(),
    });
    scheduler.advance(Duration::from_millis(5000));
    store.run_effects();
    let before = store.state();
    store.dispatch(ToastAction::AutoDismissed { id: 1 });
    assert!(Rc::ptr_eq(&before, &store.state()));
}

#[test]
fn each_toast_dismisses_on_its_own_schedule() {
    let scheduler = TestScheduler::new();
    let store = toast_store(&scheduler);
    store.dispatch(ToastAction::Added {
        description: "first".to_string(),
    });
    scheduler.advance(Duration::from_millis(2000));
    store.run_effects();
    store.dispatch(ToastAction::Added {
        description: "second".to_string(),
    });
    scheduler.advance(Duration::from_millis(3000));
    store.run_effects();
    let state = store.state();
    assert_eq!(state.toasts.len(), 1);
    assert_eq!(state.toasts[0].description, "second");
    scheduler.advance(Duration::from_millis(2000));
    store.run_effects();
    assert!(store.state().toasts.is_empty());
}
