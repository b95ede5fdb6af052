// vim: foldmarker=<([{,}])> foldmethod=marker

// Module level Doc <([{
//! The module defines [drive], the tokio-side loop that owns one [Machine] and feeds it from two
//! clocks:
//!
//! 1. a fixed-period frame interval, turned into [Tick]s for [Machine::tick].
//! 2. an [Inbox] of [Directive]s from the backends (keyboard, console, replay, user).
//!
//! Directives address states by name, so the loop parses them back through [StateToken::parse]
//! before asking the machine to transition. After every step the machine's current state name is
//! reported back through the inbox, which is what the console's `list inbox` shows.
//!
//! [Directive::UserDefined] is out of the loop's vocabulary and handed to the `user` hook
//! untouched, together with mutable access to the machine.

use bevy::log::error;
use tokio::time::{Duration, Instant, interval};

use crate::coroutine::Tick;
use crate::from_bevy::{Directive, Inbox};
use crate::handlers::StateToken;
use crate::machine::Machine;

#[cfg(not(test))]
use crate::callboard::callboard;

#[cfg(test)]
use crate::driver::tests::driver_boundaryclass::callboard;
// }])>

// drive <([{
/// Drives `machine` until [Directive::Exit] arrives or tokio is cancelled. The caller keeps
/// ownership of the inbox so it can `async_drop` it afterwards.
pub async fn drive<S, F>(machine: &mut Machine<S>, inbox: &mut Inbox, period: Duration, mut user: F)
where
    S: StateToken,
    F: FnMut(&mut Machine<S>, Directive),
{
    let cancellation_token = callboard().get_ct();
    let start = Instant::now();
    let mut frames = interval(period);
    frames.tick().await; // skip immediate tick.

    loop {
        inbox.report(machine.current_state().name());

        tokio::select! {
            _ = cancellation_token.cancelled() => { break; }
            directive = inbox.wait_directive() => {
                match directive {
                    Directive::Goto { state } => match S::parse(&state) {
                        Some(s) => machine.set_state(s),
                        None => error!("unknown state {:?}", state),
                    },
                    Directive::CallState { state } => match S::parse(&state) {
                        Some(s) => machine.call(s),
                        None => error!("unknown state {:?}", state),
                    },
                    Directive::Ret => { machine.ret(); }
                    Directive::Exit => { break; }
                    directive => { user(machine, directive); }
                }
            }
            _ = frames.tick() => {
                machine.tick(&Tick { now: start.elapsed(), delta: period });
            }
        }
    }
}
// }])>

// }])>
