// vim: foldmarker=<([{,}])> foldmethod=marker

// Module level Doc <([{
//! The module defines [Runner], a single-threaded cooperative executor driving one tree of nested
//! [Coroutine]s one suspension step per tick.
//!
//! The runner owns exactly one active coroutine plus a private LIFO stack of its suspended
//! parents. [Yield::Call] and [Yield::Wait] push and descend, [Yield::Done] pops and unwinds.
//! Replacing or cancelling the active tree takes effect on the very next step without any
//! cooperation from the old coroutines -- that's the whole point: a flow stuck inside a 10-second
//! wait can be abandoned immediately.
//!
//! ## Run starts synchronously
//! [Runner::run] advances the new coroutine one step right away (engine coroutines behave the
//! same: start runs to the first yield). A one-step flow therefore completes even if the runner is
//! reconfigured immediately afterwards, which state transitions rely on for exit flows.
//!
//! ## No cleanup channel
//! [Runner::cancel] drops the active coroutine and its whole stack with no teardown notification.
//! A coroutine must not assume some "finally" of its own will run. There's no error channel
//! either: a step that panics propagates straight to the driver.

use crate::coroutine::{Coroutine, CueWait, Tick, Yield};
// }])>

// Suspended <([{
/// A detached in-flight flow: the active coroutine plus its stack, exactly as the runner held
/// them. Produced by [Runner::suspend], consumed by [Runner::resume].
pub struct Suspended {
    active: Option<Box<dyn Coroutine>>,
    stack: Vec<Box<dyn Coroutine>>,
}

impl Suspended {
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.stack.is_empty()
    }
}
// }])>

// Runner <([{
/// Interruptible coroutine runner. One lives per flow: a state machine keeps one for enter flows
/// and one for exit flows.
pub struct Runner {
    active: Option<Box<dyn Coroutine>>,
    stack: Vec<Box<dyn Coroutine>>,
}

impl Runner {
    pub fn new() -> Self {
        Self { active: None, stack: Vec::new() }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    /// Discards whatever is running and installs `co`, advancing it one step immediately.
    pub fn run(&mut self, co: Box<dyn Coroutine>, tick: &Tick) {
        self.cancel();
        self.active = Some(co);
        self.tick(tick);
    }

    /// Pushes the active coroutine and makes `co` active. This is what a [Yield::Call] does from
    /// the inside; it's public so a flow can be spliced by hand.
    pub fn call(&mut self, co: Box<dyn Coroutine>) {
        if let Some(parent) = self.active.take() {
            self.stack.push(parent);
        }
        self.active = Some(co);
    }

    /// Atomically detaches the in-flight flow, leaving the runner idle. Used by the state
    /// machine's call operation to snapshot the calling state's flow before installing an
    /// unrelated one.
    pub fn suspend(&mut self) -> Suspended {
        Suspended { active: self.active.take(), stack: std::mem::take(&mut self.stack) }
    }

    /// Splices a previously detached flow back in, replacing whatever is running. Nothing is
    /// advanced: the flow continues exactly where it left off on the next tick, including inside
    /// a pending wait cue.
    pub fn resume(&mut self, flow: Suspended) {
        self.active = flow.active;
        self.stack = flow.stack;
    }

    /// Drops the active coroutine and its stack. No cleanup callbacks run.
    pub fn cancel(&mut self) {
        self.active = None;
        self.stack.clear();
    }

    /// Advances the active coroutine by one step.
    pub fn tick(&mut self, tick: &Tick) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        match active.step(tick) {
            Yield::Pending => {}
            Yield::Call(child) => {
                // Descend; the child gets its first step next tick.
                let parent = self.active.take().unwrap();
                self.stack.push(parent);
                self.active = Some(child);
            }
            Yield::Wait(cue) => {
                // A wait is just a nested one-shot coroutine, so cancelling the parent abandons
                // the wait mid-flight instead of blocking the runner.
                let parent = self.active.take().unwrap();
                self.stack.push(parent);
                self.active = Some(Box::new(CueWait::new(cue)));
            }
            Yield::Done => {
                // The parent observes its child finished and resumes next tick.
                self.active = self.stack.pop();
            }
        }
    }
}
// }])>

// }])>
