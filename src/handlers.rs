// vim: foldmarker=<([{,}])> foldmethod=marker

// Module level Doc <([{
//! The module defines [StateToken] -- the comparable, stable-named token identifying a logical
//! state, and [HandlerTable] -- the explicit registration table binding a token to its handler
//! roles.
//!
//! The table replaces name-convention reflection lookup: the owner registers each
//! `{token}_{role}` pair once at startup through [HandlerTableBuilder], and resolution afterwards
//! is a plain map hit. The table is append-only, built once, shared behind `Arc` -- the same
//! amortized behavior a per-type method cache gives, without any process-wide mutable state.
//!
//! ## Roles
//! 1. `enter`: factory producing the coroutine run when the state is entered.
//! 2. `exit`: factory producing the coroutine run when the state is left.
//! 3. `update`: plain callback invoked every tick while the state is current.
//!
//! A state may register any subset, including none: a missing handler resolves to an inert
//! default and is never an error -- many states intentionally implement one role only.
//!
//! ## StateToken
//! `name`/`parse` give every token a stable string form, which is what the developer console,
//! transcripts and logging address states by. Use `#[derive(StateToken)]` from
//! `prompter_macro_utils` on a fieldless enum instead of writing the impl by hand.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::coroutine::{Coroutine, Tick};
// }])>

// StateToken <([{
/// A logical state identifier: cheap to copy, comparable, and round-trippable through its
/// variant name.
pub trait StateToken: Copy + Eq + Hash + Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn parse(name: &str) -> Option<Self>
    where
        Self: Sized;
}
// }])>

// HandlerTable <([{
type FlowFn = Box<dyn Fn() -> Box<dyn Coroutine> + Send + Sync>;
type UpdateFn = Box<dyn Fn(&Tick) + Send + Sync>;

/// Token-to-handler bindings for one machine (or one shared sprite kind). Registering the same
/// (token, role) twice keeps the last registration.
pub struct HandlerTable<S: StateToken> {
    enter: HashMap<S, FlowFn>,
    exit: HashMap<S, FlowFn>,
    update: HashMap<S, UpdateFn>,
}

impl<S: StateToken> HandlerTable<S> {
    pub fn builder() -> HandlerTableBuilder<S> {
        HandlerTableBuilder {
            table: HandlerTable { enter: HashMap::new(), exit: HashMap::new(), update: HashMap::new() },
        }
    }

    /// Fresh enter coroutine for `token`, or None when the role isn't registered.
    pub fn enter(&self, token: S) -> Option<Box<dyn Coroutine>> {
        self.enter.get(&token).map(|f| f())
    }

    /// Fresh exit coroutine for `token`, or None when the role isn't registered.
    pub fn exit(&self, token: S) -> Option<Box<dyn Coroutine>> {
        self.exit.get(&token).map(|f| f())
    }

    /// Runs the update callback for `token` if one is registered.
    pub fn update(&self, token: S, tick: &Tick) {
        if let Some(f) = self.update.get(&token) {
            f(tick);
        }
    }
}

pub struct HandlerTableBuilder<S: StateToken> {
    table: HandlerTable<S>,
}

impl<S: StateToken> HandlerTableBuilder<S> {
    pub fn enter(mut self, token: S, f: impl Fn() -> Box<dyn Coroutine> + Send + Sync + 'static) -> Self {
        self.table.enter.insert(token, Box::new(f));
        self
    }

    pub fn exit(mut self, token: S, f: impl Fn() -> Box<dyn Coroutine> + Send + Sync + 'static) -> Self {
        self.table.exit.insert(token, Box::new(f));
        self
    }

    pub fn update(mut self, token: S, f: impl Fn(&Tick) + Send + Sync + 'static) -> Self {
        self.table.update.insert(token, Box::new(f));
        self
    }

    pub fn build(self) -> Arc<HandlerTable<S>> {
        Arc::new(self.table)
    }
}
// }])>

// mod tests <([{
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::coroutine::Idle;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Toy {
        A,
        B,
    }

    impl StateToken for Toy {
        fn name(&self) -> &'static str {
            match self {
                Toy::A => "A",
                Toy::B => "B",
            }
        }

        fn parse(name: &str) -> Option<Self> {
            match name {
                "A" => Some(Toy::A),
                "B" => Some(Toy::B),
                _ => None,
            }
        }
    }

    #[test]
    fn missing_roles_resolve_to_none() {
        let table = HandlerTable::<Toy>::builder().enter(Toy::A, || Box::new(Idle)).build();
        assert!(table.enter(Toy::A).is_some());
        assert!(table.exit(Toy::A).is_none());
        assert!(table.enter(Toy::B).is_none());
        // Unregistered update is a silent no-op.
        table.update(Toy::B, &Tick::ZERO);
    }

    #[test]
    fn factories_produce_fresh_coroutines() {
        let built = Arc::new(AtomicUsize::new(0));
        let built2 = built.clone();
        let table = HandlerTable::<Toy>::builder()
            .enter(Toy::A, move || {
                built2.fetch_add(1, Ordering::SeqCst);
                Box::new(Idle)
            })
            .build();
        let _a = table.enter(Toy::A);
        let _b = table.enter(Toy::A);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn last_registration_wins() {
        let hits = Arc::new(AtomicUsize::new(0));
        let first = hits.clone();
        let second = hits.clone();
        let table = HandlerTable::<Toy>::builder()
            .update(Toy::A, move |_| {
                first.fetch_add(1, Ordering::SeqCst);
            })
            .update(Toy::A, move |_| {
                second.fetch_add(10, Ordering::SeqCst);
            })
            .build();
        table.update(Toy::A, &Tick::ZERO);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn token_names_round_trip() {
        assert_eq!(Toy::A.name(), "A");
        assert_eq!(Toy::parse("B"), Some(Toy::B));
        assert_eq!(Toy::parse("C"), None);
    }
}
// }])>
