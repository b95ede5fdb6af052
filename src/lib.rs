// vim: foldmarker=<([{,}])> foldmethod=marker

// Module level Doc <([{
//! Prompter is an interruptible-coroutine state machine framework based on tokio and bevy.
//!
//! Later pseudo-code gives an overview:
//!
//! ```plaintext
//! guard machine:
//!     Idle.enter   = stand_up()        // a coroutine, one step per frame
//!     Chase.enter  = draw_weapon()
//!     Chase.update = |tick| { run_at_target(tick) }
//!     Attack.enter = swing_three_times()
//!
//! driver loop:
//!     select! {
//!         directive = from_bevy().await => match directive {
//!             Directive::Goto { state } => machine.set_state(state),
//!             Directive::CallState { state } => machine.call(state),   // Chase >> Attack
//!             Directive::Ret => machine.ret(),                         // back to Chase
//!             ...
//!         },
//!         frame => machine.tick(frame),
//!     }
//! }
//! ```
//!
//! 1. Game logic should be a state machine whose enter/exit flows are coroutines, rather than
//!    being split to fit with ECS.
//! 2. A state can [call](machine::Machine::call) another state like a subroutine and
//!    [ret](machine::Machine::ret) back; the interrupted flows resume exactly where they stopped,
//!    waits included.
//! 3. Prompter treats bevy as a display and peripheral wrapper library -- from_bevy translates
//!    keys to [Directive](from_bevy::Directive), the developer console and the tape replay inject
//!    more.
//! 4. Prompter supports tokio, that is, the driver loop is an ordinary coroutine and you can run
//!    time-cost algorithm beside it.
//!
//! And `demos/hello.rs` shows more about how to use prompter components.
//!
//! ## Why interruptible coroutines
//! A coroutine reads like the story it tells -- walk there, wait a second, swing twice. But a
//! game flow is interrupted all the time: the player retargets mid-walk, a called state borrows
//! the body for a while. Async/await can't be abandoned from outside without infecting every
//! line with cancellation checks.
//!
//! 1. [coroutine::Coroutine] is a plain state-stepping object, one [coroutine::Yield] per frame.
//! 2. [runner::Runner] can drop or suspend the whole nested flow between two steps, no
//!    cooperation needed.
//! 3. [machine::Machine] builds Call/Return on top of suspension, so a flow stuck in a 10-second
//!    wait survives a detour through another state.
// }])>

pub mod callboard;
pub mod console;
pub mod coroutine;
pub mod driver;
pub mod from_bevy;
pub mod handlers;
pub mod machine;
pub mod runner;
pub mod transcript;
pub mod utils;

pub mod prelude {
    pub use crate::callboard::*;
    pub use crate::console::*;
    pub use crate::coroutine::*;
    pub use crate::driver::*;
    pub use crate::from_bevy::*;
    pub use crate::handlers::*;
    pub use crate::machine::*;
    pub use crate::runner::*;
    pub use crate::transcript::*;
    pub use crate::utils::*;
}
