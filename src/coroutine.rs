// vim: foldmarker=<([{,}])> foldmethod=marker

// Module level Doc <([{
//! The module defines [Coroutine] -- a resumable computation advanced one step per frame, and
//! [WaitCue] -- an opaque blocking primitive a coroutine can wait on.
//!
//! Rust has no native generator on stable, so a coroutine here is an explicit state machine:
//! [Coroutine::step] is called once per tick and answers with a [Yield] telling the runner what to
//! do next. The four answers mirror what a `yield return` can produce in engine scripting:
//!
//! 1. [Yield::Pending]: plain suspension, step me again next tick.
//! 2. [Yield::Call]: run this child coroutine first, resume me when it's done.
//! 3. [Yield::Wait]: block me until the cue reports ready.
//! 4. [Yield::Done]: I'm exhausted, unwind to my parent.
//!
//! ## WaitCue
//! A cue isn't interpreted by the runner at all. The runner wraps it into [CueWait], a one-shot
//! child coroutine which polls the cue every tick, so abandoning the parent abandons the wait too
//! -- that's what makes a wait interruptible. Built-in cues: [WaitTimer], [WaitFrames],
//! [WaitUntil].
//!
//! ## Time
//! There's no global clock. Whoever drives the system (a bevy frame or a tokio interval) samples
//! time into a [Tick] and hands it down, so tests can replay any time sequence they want.

use std::collections::VecDeque;

use mockall::automock;
use tokio::time::Duration;
// }])>

// Tick <([{
/// One frame of time, sampled by the driver and passed down to every step and poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub now: Duration,
    pub delta: Duration,
}

impl Tick {
    pub const ZERO: Tick = Tick { now: Duration::ZERO, delta: Duration::ZERO };

    pub fn from_frame(now: Duration, delta: Duration) -> Self {
        Self { now, delta }
    }

    /// Next frame after `delta` more time. Mostly a test convenience.
    pub fn advanced(&self, delta: Duration) -> Self {
        Self { now: self.now + delta, delta }
    }
}
// }])>

// Coroutine and Yield <([{
/// What a [Coroutine::step] answers to the runner.
pub enum Yield {
    Pending,
    Call(Box<dyn Coroutine>),
    Wait(Box<dyn WaitCue>),
    Done,
}

impl Yield {
    pub fn call(co: impl Coroutine + 'static) -> Yield {
        Yield::Call(Box::new(co))
    }

    pub fn wait(cue: impl WaitCue + 'static) -> Yield {
        Yield::Wait(Box::new(cue))
    }

    pub fn wait_secs(secs: f32) -> Yield {
        Yield::Wait(Box::new(WaitTimer::new(Duration::from_secs_f32(secs))))
    }
}

/// A resumable computation. A coroutine which has answered [Yield::Done] is dropped by the runner
/// and never stepped again.
pub trait Coroutine: Send {
    fn step(&mut self, tick: &Tick) -> Yield;
}
// }])>

// WaitCue and its adapter <([{
/// Opaque blocking primitive. The runner only polls it, the implementor decides what "ready"
/// means: time elapsed, animation reached ratio, sprite arrived at position etc.
#[automock]
pub trait WaitCue: Send {
    fn poll(&mut self, tick: &Tick) -> bool;
}

/// One-shot adapter which runs a [WaitCue] as a nested coroutine.
pub(crate) struct CueWait {
    cue: Box<dyn WaitCue>,
}

impl CueWait {
    pub(crate) fn new(cue: Box<dyn WaitCue>) -> Self {
        Self { cue }
    }
}

impl Coroutine for CueWait {
    fn step(&mut self, tick: &Tick) -> Yield {
        if self.cue.poll(tick) { Yield::Done } else { Yield::Pending }
    }
}
// }])>

// built-in cues <([{
/// Ready once `dur` has elapsed. The deadline is armed at the first poll, so a wait suspended by a
/// state call and resumed later still expires at its original wall-clock deadline.
pub struct WaitTimer {
    dur: Duration,
    deadline: Option<Duration>,
}

impl WaitTimer {
    pub fn new(dur: Duration) -> Self {
        Self { dur, deadline: None }
    }

    pub fn secs(secs: f32) -> Self {
        Self::new(Duration::from_secs_f32(secs))
    }
}

impl WaitCue for WaitTimer {
    fn poll(&mut self, tick: &Tick) -> bool {
        let deadline = *self.deadline.get_or_insert(tick.now + self.dur);
        tick.now >= deadline
    }
}

/// Ready after being polled `n` times.
pub struct WaitFrames {
    left: u32,
}

impl WaitFrames {
    pub fn new(n: u32) -> Self {
        Self { left: n }
    }
}

impl WaitCue for WaitFrames {
    fn poll(&mut self, _tick: &Tick) -> bool {
        if self.left == 0 {
            return true;
        }
        self.left -= 1;
        self.left == 0
    }
}

/// Ready once the predicate says so.
pub struct WaitUntil {
    pred: Box<dyn FnMut(&Tick) -> bool + Send>,
}

impl WaitUntil {
    pub fn new(pred: impl FnMut(&Tick) -> bool + Send + 'static) -> Self {
        Self { pred: Box::new(pred) }
    }
}

impl WaitCue for WaitUntil {
    fn poll(&mut self, tick: &Tick) -> bool {
        (self.pred)(tick)
    }
}
// }])>

// coroutine helpers <([{
/// Builds a coroutine from a closure, the usual way to write a state flow:
///
/// ```plaintext
/// let mut phase = 0;
/// from_fn(move |_tick| match phase {
///     0 => { phase = 1; Yield::wait_secs(3.0) }
///     _ => Yield::Done,
/// })
/// ```
pub fn from_fn(f: impl FnMut(&Tick) -> Yield + Send + 'static) -> Box<dyn Coroutine> {
    Box::new(FnCoroutine { f: Box::new(f) })
}

struct FnCoroutine {
    f: Box<dyn FnMut(&Tick) -> Yield + Send>,
}

impl Coroutine for FnCoroutine {
    fn step(&mut self, tick: &Tick) -> Yield {
        (self.f)(tick)
    }
}

/// Runs its children in order, each as a nested call.
pub struct Seq {
    items: VecDeque<Box<dyn Coroutine>>,
}

impl Seq {
    pub fn new(items: Vec<Box<dyn Coroutine>>) -> Self {
        Self { items: items.into() }
    }
}

impl Coroutine for Seq {
    fn step(&mut self, _tick: &Tick) -> Yield {
        match self.items.pop_front() {
            Some(co) => Yield::Call(co),
            None => Yield::Done,
        }
    }
}

/// Already-finished coroutine, the inert default where a flow is optional.
pub struct Idle;

impl Coroutine for Idle {
    fn step(&mut self, _tick: &Tick) -> Yield {
        Yield::Done
    }
}
// }])>

// mod tests <([{
#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(step_ms: u64, n: u64) -> impl Iterator<Item = Tick> {
        let delta = Duration::from_millis(step_ms);
        (1..=n).map(move |i| Tick { now: delta * i as u32, delta })
    }

    #[test]
    fn wait_timer_arms_at_first_poll() {
        let mut cue = WaitTimer::secs(0.3);
        // First poll at now=1.0s arms the deadline at 1.3s, absolute time before doesn't count.
        assert!(!cue.poll(&Tick::from_frame(Duration::from_secs(1), Duration::ZERO)));
        assert!(!cue.poll(&Tick::from_frame(Duration::from_millis(1200), Duration::ZERO)));
        assert!(cue.poll(&Tick::from_frame(Duration::from_millis(1300), Duration::ZERO)));
    }

    #[test]
    fn wait_timer_deadline_survives_a_gap() {
        // The poll gap simulates the wait being suspended by a state call; the deadline must not
        // shift.
        let mut cue = WaitTimer::secs(3.0);
        assert!(!cue.poll(&Tick::from_frame(Duration::ZERO, Duration::ZERO)));
        assert!(!cue.poll(&Tick::from_frame(Duration::from_secs(2), Duration::ZERO)));
        assert!(cue.poll(&Tick::from_frame(Duration::from_secs(3), Duration::ZERO)));
    }

    #[test]
    fn wait_frames_counts_polls() {
        let mut cue = WaitFrames::new(2);
        let mut it = ticks(16, 3);
        assert!(!cue.poll(&it.next().unwrap()));
        assert!(cue.poll(&it.next().unwrap()));
        // Exhausted cue stays ready.
        assert!(cue.poll(&it.next().unwrap()));
    }

    #[test]
    fn cue_wait_is_one_shot() {
        let mut cue = MockWaitCue::new();
        let mut seq = mockall::Sequence::new();
        cue.expect_poll().times(2).in_sequence(&mut seq).returning(|_| false);
        cue.expect_poll().times(1).in_sequence(&mut seq).returning(|_| true);

        let mut adapter = CueWait::new(Box::new(cue));
        let mut it = ticks(16, 3);
        assert!(matches!(adapter.step(&it.next().unwrap()), Yield::Pending));
        assert!(matches!(adapter.step(&it.next().unwrap()), Yield::Pending));
        assert!(matches!(adapter.step(&it.next().unwrap()), Yield::Done));
    }

    #[test]
    fn seq_delegates_in_order() {
        let mut seq = Seq::new(vec![Box::new(Idle), Box::new(Idle)]);
        let tick = Tick::ZERO;
        assert!(matches!(seq.step(&tick), Yield::Call(_)));
        assert!(matches!(seq.step(&tick), Yield::Call(_)));
        assert!(matches!(seq.step(&tick), Yield::Done));
    }

    #[test]
    fn from_fn_keeps_state_between_steps() {
        let mut phase = 0;
        let mut co = from_fn(move |_| {
            phase += 1;
            if phase < 3 { Yield::Pending } else { Yield::Done }
        });
        let tick = Tick::ZERO;
        assert!(matches!(co.step(&tick), Yield::Pending));
        assert!(matches!(co.step(&tick), Yield::Pending));
        assert!(matches!(co.step(&tick), Yield::Done));
    }
}
// }])>
