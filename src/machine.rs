// vim: foldmarker=<([{,}])> foldmethod=marker

// Module level Doc <([{
//! The module defines [Machine], a hierarchical state machine whose state flows are interruptible
//! coroutines.
//!
//! A machine owns one current [StateRecord], a history stack for call/return nesting, and two
//! [Runner]s: one drives the current state's enter flow, one its exit flow. Three transition
//! shapes exist:
//!
//! 1. [Machine::set_state]: plain teleport. The old state's exit flow starts, the new state's
//!    enter flow starts, history is untouched.
//! 2. [Machine::call] / [Machine::call_on]: push. The current record is suspended -- both runners
//!    detached mid-flight, elapsed time snapshotted -- and parked on the history stack; only the
//!    new state's enter flow starts. `call_on` resolves the new state's handlers from another
//!    machine, so one sprite can temporarily borrow another's behavior while keeping its own
//!    history.
//! 3. [Machine::ret] / [Machine::ret_or]: pop. The current state's exit flow starts, then the
//!    parked record is reinstalled and both runners resume exactly where they were suspended,
//!    including inside a pending wait cue. `time_in_state` continues as if the call had never
//!    happened.
//!
//! ## Who calls transitions
//! External event sources (input systems, collision callbacks, the developer console via a
//! [drive](crate::driver::drive) loop) call transitions as plain methods; they take effect
//! immediately, no queuing. A state's own coroutines can't borrow the machine, so they request
//! transitions indirectly: send a [Directive](crate::from_bevy::Directive) through the machine's
//! inbox and let the driving task apply it.
//!
//! ## Returning with empty history
//! [Machine::ret] on an empty history runs the exit flow and leaves the token unchanged. Prefer
//! [Machine::ret_or] with a base state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bevy::log::debug;
use tokio::time::Duration;

use crate::coroutine::Tick;
use crate::handlers::{HandlerTable, StateToken};
use crate::runner::{Runner, Suspended};
// }])>

// MachineId <([{
static MACHINE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a machine, used to observe cross-machine delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineId(u64);

impl MachineId {
    fn next() -> Self {
        Self(MACHINE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}
// }])>

// StateRecord <([{
/// Everything describing one logical state: its token, which machine's handler set drives it,
/// when it was entered, and -- once suspended by a call -- its detached flows.
struct StateRecord<S: StateToken> {
    token: S,
    executing: MachineId,
    handlers: Arc<HandlerTable<S>>,
    entered_at: Duration,
    // Time already spent in the state when it was suspended; restores entered_at on return.
    elapsed: Duration,
    enter_flow: Option<Suspended>,
    exit_flow: Option<Suspended>,
}

impl<S: StateToken> StateRecord<S> {
    fn new(token: S, executing: MachineId, handlers: Arc<HandlerTable<S>>, entered_at: Duration) -> Self {
        Self { token, executing, handlers, entered_at, elapsed: Duration::ZERO, enter_flow: None, exit_flow: None }
    }
}
// }])>

// Machine <([{
/// Hierarchical state machine over token type `S`.
pub struct Machine<S: StateToken> {
    id: MachineId,
    handlers: Arc<HandlerTable<S>>,
    current: StateRecord<S>,
    history: Vec<StateRecord<S>>,
    previous: Option<S>,
    enter_fl: Runner,
    exit_fl: Runner,
    tick: Tick,
}

impl<S: StateToken> Machine<S> {
    /// Creates the machine in `initial` and starts its enter flow at time zero.
    pub fn new(initial: S, handlers: Arc<HandlerTable<S>>) -> Self {
        let id = MachineId::next();
        let mut machine = Self {
            id,
            handlers: handlers.clone(),
            current: StateRecord::new(initial, id, handlers, Duration::ZERO),
            history: Vec::new(),
            previous: None,
            enter_fl: Runner::new(),
            exit_fl: Runner::new(),
            tick: Tick::ZERO,
        };
        if let Some(co) = machine.current.handlers.enter(initial) {
            let tick = machine.tick;
            machine.enter_fl.run(co, &tick);
        }
        machine
    }

    // accessors <([{
    pub fn id(&self) -> MachineId {
        self.id
    }

    pub fn current_state(&self) -> S {
        self.current.token
    }

    pub fn previous_state(&self) -> Option<S> {
        self.previous
    }

    /// Which machine's handler set drives the current state; differs from [Machine::id] while a
    /// delegated call is active.
    pub fn executing_machine(&self) -> MachineId {
        self.current.executing
    }

    pub fn time_in_state(&self) -> Duration {
        self.tick.now.saturating_sub(self.current.entered_at)
    }

    pub fn call_depth(&self) -> usize {
        self.history.len()
    }
    // }])>

    /// Advances the machine one frame: update callback first, then one step of the exit flow, then
    /// one step of the enter flow.
    pub fn tick(&mut self, tick: &Tick) {
        self.tick = *tick;
        self.current.handlers.update(self.current.token, tick);
        self.exit_fl.tick(tick);
        self.enter_fl.tick(tick);
    }

    /// Plain transition. Entering the state already current is a no-op: no flow is constructed,
    /// `time_in_state` is unaffected.
    pub fn set_state(&mut self, token: S) {
        if token == self.current.token {
            return;
        }
        debug!("machine {:?}: {} -> {}", self.id, self.current.token.name(), token.name());

        let record = StateRecord::new(token, self.id, self.handlers.clone(), self.tick.now);
        let old = std::mem::replace(&mut self.current, record);
        self.previous = Some(old.token);

        let tick = self.tick;
        // The old state's exit flow replaces whatever the exit runner was still unwinding; a
        // missing handler leaves the runner idle rather than running a stale flow.
        match old.handlers.exit(old.token) {
            Some(co) => self.exit_fl.run(co, &tick),
            None => self.exit_fl.cancel(),
        }
        match self.current.handlers.enter(token) {
            Some(co) => self.enter_fl.run(co, &tick),
            None => self.enter_fl.cancel(),
        }
    }

    /// Suspends the current state and enters `token` on top of it. No exit flow runs for the
    /// suspended state -- it is parked, not left.
    pub fn call(&mut self, token: S) {
        let executing = self.id;
        let handlers = self.handlers.clone();
        self.call_record(token, executing, handlers);
    }

    /// Like [Machine::call], but `token` is driven by `other`'s handler set. Both machines observe
    /// `token` as current afterwards; only `self` records the history entry, and only `self` can
    /// return from it.
    pub fn call_on(&mut self, other: &mut Machine<S>, token: S) {
        other.install_shadow(token);
        self.call_record(token, other.id, other.handlers.clone());
    }

    fn call_record(&mut self, token: S, executing: MachineId, handlers: Arc<HandlerTable<S>>) {
        debug!("machine {:?}: call {} (from {})", self.id, token.name(), self.current.token.name());

        let record = StateRecord::new(token, executing, handlers, self.tick.now);
        let mut old = std::mem::replace(&mut self.current, record);
        old.elapsed = self.tick.now.saturating_sub(old.entered_at);
        old.enter_flow = Some(self.enter_fl.suspend());
        old.exit_flow = Some(self.exit_fl.suspend());
        self.previous = Some(old.token);
        self.history.push(old);

        let tick = self.tick;
        if let Some(co) = self.current.handlers.enter(token) {
            self.enter_fl.run(co, &tick);
        }
    }

    // Delegation updates the target's current token without touching its runners or history; the
    // target keeps whatever flows it was driving.
    fn install_shadow(&mut self, token: S) {
        if token == self.current.token {
            return;
        }
        self.previous = Some(self.current.token);
        self.current.token = token;
        self.current.entered_at = self.tick.now;
    }

    /// Pops back to the state suspended by the latest call. With empty history the token stays
    /// put (the exit flow still runs once).
    pub fn ret(&mut self) {
        self.do_return(None);
    }

    /// Like [Machine::ret], but an empty history falls back to a plain transition into
    /// `fallback` instead of staying put.
    pub fn ret_or(&mut self, fallback: S) {
        self.do_return(Some(fallback));
    }

    fn do_return(&mut self, fallback: Option<S>) {
        if self.history.is_empty() {
            match fallback {
                Some(base) => self.set_state(base),
                None => {
                    debug!("machine {:?}: return with empty history, staying in {}", self.id, self.current.token.name());
                    let tick = self.tick;
                    if let Some(co) = self.current.handlers.exit(self.current.token) {
                        self.exit_fl.run(co, &tick);
                    }
                }
            }
            return;
        }

        debug!("machine {:?}: return from {}", self.id, self.current.token.name());
        let tick = self.tick;
        match self.current.handlers.exit(self.current.token) {
            Some(co) => self.exit_fl.run(co, &tick),
            None => self.exit_fl.cancel(),
        }

        let mut saved = self.history.pop().unwrap();
        saved.entered_at = self.tick.now.saturating_sub(saved.elapsed);
        let enter_flow = saved.enter_flow.take();
        let exit_flow = saved.exit_flow.take();
        self.previous = Some(self.current.token);
        self.current = saved;
        if let Some(flow) = enter_flow {
            self.enter_fl.resume(flow);
        }
        if let Some(flow) = exit_flow {
            self.exit_fl.resume(flow);
        }
    }
}
// }])>

// mod tests <([{
#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::coroutine::{Idle, WaitTimer, Yield, from_fn};
    use crate::handlers::HandlerTableBuilder;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Guard {
        Idle,
        Chase,
        Attack,
        Flee,
    }

    impl StateToken for Guard {
        fn name(&self) -> &'static str {
            match self {
                Guard::Idle => "Idle",
                Guard::Chase => "Chase",
                Guard::Attack => "Attack",
                Guard::Flee => "Flee",
            }
        }

        fn parse(name: &str) -> Option<Self> {
            match name {
                "Idle" => Some(Guard::Idle),
                "Chase" => Some(Guard::Chase),
                "Attack" => Some(Guard::Attack),
                "Flee" => Some(Guard::Flee),
                _ => None,
            }
        }
    }

    // Counts enter/exit flow constructions and completions per token.
    #[derive(Default)]
    struct Counters {
        enter: AtomicUsize,
        exit: AtomicUsize,
    }

    fn counted(counters: &Arc<Counters>) -> HandlerTableBuilder<Guard> {
        let table = HandlerTable::builder();
        let c = counters.clone();
        let table = table.enter(Guard::Chase, move || {
            c.enter.fetch_add(1, Ordering::SeqCst);
            Box::new(Idle)
        });
        let c = counters.clone();
        table.exit(Guard::Chase, move || {
            c.exit.fetch_add(1, Ordering::SeqCst);
            Box::new(Idle)
        })
    }

    fn at(ms: u64) -> Tick {
        Tick::from_frame(Duration::from_millis(ms), Duration::from_millis(100))
    }

    #[test]
    fn reenter_same_state_is_noop() {
        // The second set_state(Chase) constructs no flows.
        let counters = Arc::new(Counters::default());
        let table = counted(&counters).build();
        let mut machine = Machine::new(Guard::Idle, table);

        machine.tick(&at(100));
        machine.set_state(Guard::Chase);
        assert_eq!(counters.enter.load(Ordering::SeqCst), 1);

        machine.tick(&at(200));
        let before = machine.time_in_state();
        machine.set_state(Guard::Chase);
        assert_eq!(counters.enter.load(Ordering::SeqCst), 1);
        assert_eq!(counters.exit.load(Ordering::SeqCst), 0);
        assert_eq!(machine.time_in_state(), before);
    }

    #[test]
    fn call_return_round_trip() {
        // Idle -> call(Chase) -> ret restores Idle without re-entering it.
        let idle_enters = Arc::new(AtomicUsize::new(0));
        let c = idle_enters.clone();
        let counters = Arc::new(Counters::default());
        let table = counted(&counters)
            .enter(Guard::Idle, move || {
                c.fetch_add(1, Ordering::SeqCst);
                Box::new(Idle)
            })
            .build();
        let mut machine = Machine::new(Guard::Idle, table);
        assert_eq!(idle_enters.load(Ordering::SeqCst), 1);

        machine.tick(&at(100));
        machine.call(Guard::Chase);
        assert_eq!(machine.current_state(), Guard::Chase);
        assert_eq!(machine.call_depth(), 1);

        machine.tick(&at(200));
        machine.ret();
        assert_eq!(machine.current_state(), Guard::Idle);
        assert_eq!(machine.executing_machine(), machine.id());
        assert_eq!(machine.call_depth(), 0);
        // Chase was exited exactly once, Idle was restored, not re-entered.
        assert_eq!(counters.exit.load(Ordering::SeqCst), 1);
        assert_eq!(idle_enters.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn time_in_state_survives_call_return() {
        // Time accounting continues as if the call never happened.
        let table = HandlerTable::<Guard>::builder().build();
        let mut machine = Machine::new(Guard::Idle, table);

        machine.tick(&at(1000));
        assert_eq!(machine.time_in_state(), Duration::from_millis(1000));
        machine.call(Guard::Chase);

        machine.tick(&at(1100));
        machine.tick(&at(3000));
        machine.ret();
        assert_eq!(machine.current_state(), Guard::Idle);
        assert_eq!(machine.time_in_state(), Duration::from_millis(1000));

        machine.tick(&at(3500));
        assert_eq!(machine.time_in_state(), Duration::from_millis(1500));
    }

    #[test]
    fn suspended_wait_is_not_restarted() {
        // A 3-second wait interrupted at 1.0 and resumed right away completes at 3.0, not 4.0.
        let finished = Arc::new(Mutex::new(Vec::new()));
        let f = finished.clone();
        let table = HandlerTable::<Guard>::builder()
            .enter(Guard::Idle, move || {
                let f = f.clone();
                let mut waited = false;
                from_fn(move |tick| {
                    if !waited {
                        waited = true;
                        return Yield::wait(WaitTimer::secs(3.0));
                    }
                    f.lock().unwrap().push(tick.now);
                    Yield::Done
                })
            })
            .build();
        let mut machine = Machine::new(Guard::Idle, table);

        machine.tick(&at(0)); // cue polled, deadline armed at 3.0s.
        machine.tick(&at(500));
        machine.tick(&at(1000));
        machine.call(Guard::Chase);
        machine.ret();

        machine.tick(&at(2900)); // same cue instance, still pending.
        assert!(finished.lock().unwrap().is_empty());
        machine.tick(&at(3000)); // cue ready, adapter done.
        machine.tick(&at(3100)); // enter flow resumes past the wait.
        assert_eq!(*finished.lock().unwrap(), vec![Duration::from_millis(3100)]);
    }

    #[test]
    fn nested_calls_unwind_in_lifo_order() {
        let table = HandlerTable::<Guard>::builder().build();
        let mut machine = Machine::new(Guard::Idle, table);
        machine.tick(&at(100));

        machine.call(Guard::Chase);
        machine.call(Guard::Attack);
        machine.call(Guard::Flee);
        assert_eq!(machine.call_depth(), 3);

        machine.ret();
        assert_eq!(machine.current_state(), Guard::Attack);
        machine.ret();
        assert_eq!(machine.current_state(), Guard::Chase);
        machine.ret();
        assert_eq!(machine.current_state(), Guard::Idle);
        assert_eq!(machine.call_depth(), 0);
    }

    #[test]
    fn return_with_empty_history_stays_put() {
        // No panic, token unchanged, exit flow runs once.
        let counters = Arc::new(Counters::default());
        let table = counted(&counters).build();
        let mut machine = Machine::new(Guard::Chase, table);
        machine.tick(&at(100));

        machine.ret();
        assert_eq!(machine.current_state(), Guard::Chase);
        assert_eq!(counters.exit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn return_with_fallback_transitions_once() {
        // Over-returning with a fallback becomes a plain transition; the exit flow runs exactly
        // once, through the transition path.
        let counters = Arc::new(Counters::default());
        let table = counted(&counters).build();
        let mut machine = Machine::new(Guard::Chase, table);
        machine.tick(&at(100));

        machine.ret_or(Guard::Idle);
        assert_eq!(machine.current_state(), Guard::Idle);
        assert_eq!(counters.exit.load(Ordering::SeqCst), 1);
        assert_eq!(machine.previous_state(), Some(Guard::Chase));
    }

    #[test]
    fn unhandled_state_runs_nothing() {
        // A token with zero registered roles neither runs flows nor panics.
        let table = HandlerTable::<Guard>::builder().build();
        let mut machine = Machine::new(Guard::Idle, table);
        machine.tick(&at(100));
        machine.set_state(Guard::Flee);
        machine.tick(&at(200));
        assert_eq!(machine.current_state(), Guard::Flee);
    }

    #[test]
    fn delegated_call_is_observed_by_both() {
        // call_on shows the borrowed state on both machines; the invoker executes on the
        // delegate's id and keeps the only history entry.
        let enters = Arc::new(AtomicUsize::new(0));
        let e = enters.clone();
        let own = HandlerTable::<Guard>::builder().build();
        let borrowed = HandlerTable::<Guard>::builder()
            .enter(Guard::Flee, move || {
                e.fetch_add(1, Ordering::SeqCst);
                Box::new(Idle)
            })
            .build();
        let mut invoker = Machine::new(Guard::Idle, own);
        let mut delegate = Machine::new(Guard::Chase, borrowed);
        invoker.tick(&at(100));
        delegate.tick(&at(100));

        invoker.call_on(&mut delegate, Guard::Flee);
        assert_eq!(invoker.current_state(), Guard::Flee);
        assert_eq!(delegate.current_state(), Guard::Flee);
        assert_eq!(invoker.executing_machine(), delegate.id());
        assert_eq!(invoker.call_depth(), 1);
        assert_eq!(delegate.call_depth(), 0);
        // The delegate's handler set produced the enter flow.
        assert_eq!(enters.load(Ordering::SeqCst), 1);

        invoker.ret();
        assert_eq!(invoker.current_state(), Guard::Idle);
        assert_eq!(invoker.executing_machine(), invoker.id());
    }

    #[test]
    fn update_runs_for_current_state_only() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let table = HandlerTable::<Guard>::builder()
            .update(Guard::Idle, move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        let mut machine = Machine::new(Guard::Idle, table);
        machine.tick(&at(100));
        machine.tick(&at(200));
        machine.set_state(Guard::Chase);
        machine.tick(&at(300));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
// }])>
