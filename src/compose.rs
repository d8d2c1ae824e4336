use std::{marker::PhantomData, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::{
    effect::Effect,
    reducer::{Reducer, Transition},
};


/// Embeds a child reducer's state and action space inside a parent's.
///
/// `extract` selects the child actions this reducer reacts to; anything else
/// is a strict no-op: the parent state comes back pointer-identical with no
/// effect, and no unrelated logic runs. On a match the child runs against
/// `get_child`'s slice, the parent is rebuilt through `set_child` only when
/// the child actually changed, and the child's effect is lifted with
/// [`Effect::map`] so its later dispatches stay addressable to the same
/// child.
pub fn scope<P, C, PA, CA, D, R, Get, Set, Extract, Embed>(
    get_child: Get,
    set_child: Set,
    extract: Extract,
    embed: Embed,
    child: R,
) -> Scoped<P, PA, R, Get, Set, Extract, Embed>
where
    P: 'static,
    C: 'static,
    PA: 'static,
    CA: 'static,
    D: 'static,
    R: Reducer<State = C, Action = CA, Deps = D>,
    Get: Fn(&P) -> Rc<C>,
    Set: Fn(&P, Rc<C>) -> P,
    Extract: Fn(&PA) -> Option<CA>,
    Embed: Fn(CA) -> PA + Clone + 'static,
{
    Scoped {
        get_child,
        set_child,
        extract,
        embed,
        child,
        _marker: PhantomData,
    }
}

pub struct Scoped<P, PA, R, Get, Set, Extract, Embed> {
    get_child: Get,
    set_child: Set,
    extract: Extract,
    embed: Embed,
    child: R,
    _marker: PhantomData<fn(P, PA)>,
}

impl<P, C, PA, CA, D, R, Get, Set, Extract, Embed> Reducer
    for Scoped<P, PA, R, Get, Set, Extract, Embed>
where
    P: 'static,
    C: 'static,
    PA: 'static,
    CA: 'static,
    D: 'static,
    R: Reducer<State = C, Action = CA, Deps = D>,
    Get: Fn(&P) -> Rc<C>,
    Set: Fn(&P, Rc<C>) -> P,
    Extract: Fn(&PA) -> Option<CA>,
    Embed: Fn(CA) -> PA + Clone + 'static,
{
    type State = P;
    type Action = PA;
    type Deps = D;

    fn reduce(&self, state: &Rc<P>, action: PA, deps: &D) -> Transition<P, PA> {
        let Some(child_action) = (self.extract)(&action) else {
            return (state.clone(), Effect::none());
        };
        let child_before = (self.get_child)(state);
        let (child_after, effect) = self.child.reduce(&child_before, child_action, deps);
        let next = if Rc::ptr_eq(&child_before, &child_after) {
            state.clone()
        } else {
            Rc::new((self.set_child)(state, child_after))
        };
        (next, effect.map(self.embed.clone()))
    }
}

/// Builds a reducer whose slices all observe the same incoming action.
///
/// There is no routing: every slice reducer sees its own clone of the action
/// and decides for itself whether to react. The parent is rebuilt only for
/// slices that changed their state reference; when none did, the original
/// parent `Rc` comes back unchanged. All slice effects merge into one batch
/// in slice-registration order.
pub fn combine<P: 'static, PA: 'static, D: 'static>() -> Combine<P, PA, D> {
    Combine { slices: Vec::new() }
}

pub struct Combine<P: 'static, PA: 'static, D: 'static> {
    slices: Vec<Box<dyn SliceReducer<P, PA, D>>>,
}

impl<P: 'static, PA: Clone + 'static, D: 'static> Combine<P, PA, D> {
    /// Registers a slice: a lens pair and the reducer owning that slice.
    pub fn slice<C: 'static>(
        mut self,
        get: impl Fn(&P) -> Rc<C> + 'static,
        set: impl Fn(&P, Rc<C>) -> P + 'static,
        reducer: impl Reducer<State = C, Action = PA, Deps = D> + 'static,
    ) -> Self {
        self.slices.push(Box::new(Slice { get, set, reducer }));
        self
    }
}

impl<P: 'static, PA: Clone + 'static, D: 'static> Reducer for Combine<P, PA, D> {
    type State = P;
    type Action = PA;
    type Deps = D;

    fn reduce(&self, state: &Rc<P>, action: PA, deps: &D) -> Transition<P, PA> {
        let mut current = state.clone();
        let mut effects = Vec::with_capacity(self.slices.len());
        for slice in &self.slices {
            let (next, effect) = slice.reduce_slice(&current, &action, deps);
            if let Some(next) = next {
                current = next;
            }
            effects.push(effect);
        }
        (current, Effect::batch(effects))
    }
}

trait SliceReducer<P, PA, D> {
    /// `None` state means the slice did not change.
    fn reduce_slice(&self, state: &Rc<P>, action: &PA, deps: &D)
        -> (Option<Rc<P>>, Effect<PA>);
}

struct Slice<Get, Set, R> {
    get: Get,
    set: Set,
    reducer: R,
}

impl<P, PA, D, C, Get, Set, R> SliceReducer<P, PA, D> for Slice<Get, Set, R>
where
    P: 'static,
    PA: Clone + 'static,
    D: 'static,
    C: 'static,
    Get: Fn(&P) -> Rc<C>,
    Set: Fn(&P, Rc<C>) -> P,
    R: Reducer<State = C, Action = PA, Deps = D>,
{
    fn reduce_slice(
        &self,
        state: &Rc<P>,
        action: &PA,
        deps: &D,
    ) -> (Option<Rc<P>>, Effect<PA>) {
        let before = (self.get)(state);
        let (after, effect) = self.reducer.reduce(&before, action.clone(), deps);
        let next =
            (!Rc::ptr_eq(&before, &after)).then(|| Rc::new((self.set)(state, after)));
        (next, effect)
    }
}

/// An element of an identified collection managed by [`for_each`].
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identified<I, S> {
    pub id: I,
    pub state: Rc<S>,
}

impl<I, S> Identified<I, S> {
    pub fn new(id: I, state: S) -> Self {
        Identified {
            id,
            state: Rc::new(state),
        }
    }
}

impl<I: Clone, S> Clone for Identified<I, S> {
    fn clone(&self) -> Self {
        Identified {
            id: self.id.clone(),
            state: self.state.clone(),
        }
    }
}

/// Parent-level wrapper addressing an action to one element of a collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementAction<I, CA> {
    pub id: I,
    pub action: CA,
}

/// Shorthand for the wrapper shape [`for_each`] routes on.
pub fn element_action<I, CA>(id: I, action: CA) -> ElementAction<I, CA> {
    ElementAction { id, action }
}

/// Runs a child reducer against one element of an ordered identified
/// collection.
///
/// Elements are located by linear scan over their ids. An action addressed
/// to an id that is no longer present is silently ignored; an in-flight
/// effect racing the element's removal is not an error. When an element
/// changes, only its slot is replaced; every other slot keeps its prior
/// state reference. The child's effect is mapped back into the same wrapper
/// shape carrying the same id.
pub fn for_each<P, I, C, PA, CA, D, R, Get, Set, Extract, Embed>(
    get_elements: Get,
    set_elements: Set,
    extract: Extract,
    embed: Embed,
    child: R,
) -> ForEach<P, PA, R, Get, Set, Extract, Embed>
where
    P: 'static,
    I: PartialEq + Clone + 'static,
    C: 'static,
    PA: 'static,
    CA: 'static,
    D: 'static,
    R: Reducer<State = C, Action = CA, Deps = D>,
    Get: Fn(&P) -> Rc<Vec<Identified<I, C>>>,
    Set: Fn(&P, Rc<Vec<Identified<I, C>>>) -> P,
    Extract: Fn(&PA) -> Option<ElementAction<I, CA>>,
    Embed: Fn(ElementAction<I, CA>) -> PA + Clone + 'static,
{
    ForEach {
        get_elements,
        set_elements,
        extract,
        embed,
        child,
        _marker: PhantomData,
    }
}

pub struct ForEach<P, PA, R, Get, Set, Extract, Embed> {
    get_elements: Get,
    set_elements: Set,
    extract: Extract,
    embed: Embed,
    child: R,
    _marker: PhantomData<fn(P, PA)>,
}

impl<P, I, C, PA, CA, D, R, Get, Set, Extract, Embed> Reducer
    for ForEach<P, PA, R, Get, Set, Extract, Embed>
where
    P: 'static,
    I: PartialEq + Clone + 'static,
    C: 'static,
    PA: 'static,
    CA: 'static,
    D: 'static,
    R: Reducer<State = C, Action = CA, Deps = D>,
    Get: Fn(&P) -> Rc<Vec<Identified<I, C>>>,
    Set: Fn(&P, Rc<Vec<Identified<I, C>>>) -> P,
    Extract: Fn(&PA) -> Option<ElementAction<I, CA>>,
    Embed: Fn(ElementAction<I, CA>) -> PA + Clone + 'static,
{
    type State = P;
    type Action = PA;
    type Deps = D;

    fn reduce(&self, state: &Rc<P>, action: PA, deps: &D) -> Transition<P, PA> {
        let Some(ElementAction { id, action: child_action }) = (self.extract)(&action) else {
            return (state.clone(), Effect::none());
        };
        let elements = (self.get_elements)(state);
        // a stale effect may address an element that has since been removed
        let Some(index) = elements.iter().position(|element| element.id == id) else {
            return (state.clone(), Effect::none());
        };
        let before = elements[index].state.clone();
        let (after, effect) = self.child.reduce(&before, child_action, deps);
        let next = if Rc::ptr_eq(&before, &after) {
            state.clone()
        } else {
            let mut elements = Vec::clone(&elements);
            elements[index] = Identified {
                id: id.clone(),
                state: after,
            };
            Rc::new((self.set_elements)(state, Rc::new(elements)))
        };
        let embed = self.embed.clone();
        (
            next,
            effect.map(move |child_action| {
                embed(ElementAction {
                    id: id.clone(),
                    action: child_action,
                })
            }),
        )
    }
}

/// Threads one or more already-scoped child reducers over a core reducer,
/// batching every contributing effect.
///
/// Equivalent to running `core` and then each child by hand and batching the
/// results; it removes the wiring, not the semantics. Effects are batched
/// core-first, then children in `with` order.
pub fn integrate<R: Reducer>(core: R) -> Integration<R> {
    Integration {
        core,
        children: Vec::new(),
    }
}

pub struct Integration<R: Reducer> {
    core: R,
    children: Vec<Box<dyn Reducer<State = R::State, Action = R::Action, Deps = R::Deps>>>,
}

impl<R: Reducer> Integration<R> {
    /// Adds a parent-shaped child reducer, typically produced by [`scope`]
    /// or [`for_each`].
    pub fn with(
        mut self,
        child: impl Reducer<State = R::State, Action = R::Action, Deps = R::Deps> + 'static,
    ) -> Self {
        self.children.push(Box::new(child));
        self
    }

    pub fn build(self) -> Integrated<R> {
        Integrated {
            core: self.core,
            children: self.children,
        }
    }
}

pub struct Integrated<R: Reducer> {
    core: R,
    children: Vec<Box<dyn Reducer<State = R::State, Action = R::Action, Deps = R::Deps>>>,
}

impl<R: Reducer> Reducer for Integrated<R>
where
    R::Action: Clone,
{
    type State = R::State;
    type Action = R::Action;
    type Deps = R::Deps;

    fn reduce(
        &self,
        state: &Rc<R::State>,
        action: R::Action,
        deps: &R::Deps,
    ) -> Transition<R::State, R::Action> {
        let mut effects = Vec::with_capacity(self.children.len() + 1);
        let (mut current, core_effect) = self.core.reduce(state, action.clone(), deps);
        effects.push(core_effect);
        for child in &self.children {
            let (next, effect) = child.reduce(&current, action.clone(), deps);
            current = next;
            effects.push(effect);
        }
        (current, Effect::batch(effects))
    }
}
