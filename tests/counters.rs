use std::rc::Rc;

use reflux::{element_action, for_each, reducer_fn, Effect, ElementAction, Identified, Reducer, Store};

#[derive(Clone, Debug, PartialEq)]
enum CounterAction {
    Increment,
}

#[derive(Clone, Debug)]
enum AppAction {
    Counter(ElementAction<u64, CounterAction>),
}

struct AppState {
    counters: Rc<Vec<Identified<u64, i32>>>,
}

fn app_reducer() -> impl Reducer<State = AppState, Action = AppAction, Deps = ()> {
    for_each(
        |app: &AppState| app.counters.clone(),
        |_app: &AppState, counters| AppState { counters },
        |action: &AppAction| match action {
            AppAction::Counter(element) => Some(element.clone()),
        },
        AppAction::Counter,
        reducer_fn(|state: &Rc<i32>, action: CounterAction, _deps: &()| match action {
            CounterAction::Increment => (Rc::new(**state + 1), Effect::none()),
        }),
    )
}

fn app_store() -> Store<AppState, AppAction, ()> {
    Store::new(
        AppState {
            counters: Rc::new(vec![Identified::new(1, 0), Identified::new(2, 0)]),
        },
        app_reducer(),
        (),
    )
}

#[test]
fn incrementing_one_counter_leaves_the_rest_untouched() {
    let store = app_store();
    let first_before = store.state().counters[0].state.clone();

    store.dispatch(AppAction::Counter(element_action(2, CounterAction::Increment)));

    let state = store.state();
    assert_eq!(state.counters[0].id, 1);
    assert_eq!(*state.counters[0].state, 0);
    assert_eq!(state.counters[1].id, 2);
    assert_eq!(*state.counters[1].state, 1);
    // the untouched entry is the same allocation as before the dispatch
    assert!(Rc::ptr_eq(&first_before, &state.counters[0].state));
}

#[test]
fn an_action_for_an_absent_counter_is_ignored() {
    let store = app_store();
    let before = store.state();
    store.dispatch(AppAction::Counter(element_action(99, CounterAction::Increment)));
    assert!(Rc::ptr_eq(&before, &store.state()));
}
