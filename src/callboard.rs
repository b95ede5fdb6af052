// vim: foldmarker=<([{,}])> foldmethod=marker

// Module level Doc <([{
//! Callboard defines a global pointer to access prompter components.
//!
//! It also includes several auxiliary functions to exit tokio/bevy, wait bevy start.
//!
//! ## Safety
//! All components from [callboard()] are independent each other, goto their document for safety.
//!
//! ## Howto exit tokio
//! Goto [Graceful Shutdown tokio](https://tokio.rs/tokio/topics/shutdown) for more. I implements
//! an inner struct tokio to cover the topic.
//! - [Callboard::spawn] to replace tokio::spawn to let your coroutine be the charge of
//! callboard().tokio.
//! - [Callboard::get_ct] to get a CancellationToken then `ct.cancelled()` when you're ready for
//! exit current coroutine, just like call `yield` in coroutine.
//! - [Callboard::exit_tokio] to exit all tokio coroutines gracefully. A bevy watchdog system
//! observes the same token and exits bevy too.
//!
//! ## Howto get start notification from bevy.
//! await [Callboard::bevy_started].

use std::{future::Future, sync::OnceLock};

use bevy::prelude::*;
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTracker;

use crate::console::{Console, ConsoleCallback};
use crate::from_bevy::{Inbox, KeyBackend, from_bevy_init};
use crate::transcript::{RecordBackend, ReplayBackend};
// }])>

// CALLBOARD, global object <([{
static mut CALLBOARD: OnceLock<Callboard> = OnceLock::new();

/// Global function to access global object -- Callboard.
pub fn callboard() -> &'static mut Callboard {
    // Safety: all fields of Callboard are independent of each other and protected by their lock.
    unsafe { (*(&raw mut CALLBOARD)).get_mut().unwrap() }
}

/// Initialize global pointer Callboard and App initialization.
pub fn callboard_new(mut app: App, config: Option<ConsoleCallback>) -> App {
    app = from_bevy_init(app);

    // Safety: CALLBOARD should be init once.
    unsafe {
        (*(&raw mut CALLBOARD))
            .set(Callboard {
                tokio: Tokio { ct: CancellationToken::new(), tt: TaskTracker::new() },
                key_backend: Mutex::new(Vec::new()),
                console: Console::new(config),
                record_backend: RecordBackend::new(),
                replay_backend: ReplayBackend::new(),
                bevy_start_notification: Notify::new(),
            })
            .unwrap();
    }

    app
}

pub async fn callboard_run() {
    let cb = callboard();
    if cb.console.user_callback.is_some() {
        cb.spawn(async move {
            callboard().console.fore_run().await;
        });
    }
    cb.spawn(async move {
        callboard().console.back_run().await;
    });
    cb.spawn(async move {
        callboard().replay_backend.run().await;
    });
}

/// Drop global pointer -- Callboard.
pub fn callboard_drop() {
    // Safety: CALLBOARD should be drop once.
    unsafe {
        let _ = (*(&raw mut CALLBOARD)).take().unwrap();
    }
}
// }])>

#[derive(Debug)]
struct Tokio {
    ct: CancellationToken,
    tt: TaskTracker,
}

/// Global object provides a lots of methods to access prompter objects.
#[derive(Debug)]
pub struct Callboard {
    tokio: Tokio,

    pub(crate) key_backend: Mutex<Vec<Box<KeyBackend>>>,
    pub(crate) console: Console,
    pub(crate) record_backend: RecordBackend,
    pub(crate) replay_backend: ReplayBackend,
    bevy_start_notification: Notify,
}

impl Callboard {
    // tokio <([{
    pub fn get_ct(&self) -> CancellationToken {
        self.tokio.ct.clone()
    }

    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tokio.tt.spawn(task)
    }

    pub fn exit_tokio(&self) {
        self.tokio.ct.cancel();
    }

    pub async fn wait_tasktracker_exit(&self) {
        self.tokio.tt.close();
        self.tokio.tt.wait().await;
    }
    // }])>

    // from bevy <([{
    pub async fn new_inbox(&mut self, desc: String) -> Inbox {
        Inbox::new(desc).await
    }

    pub fn get_console(&self) -> &Console {
        &self.console
    }

    pub fn get_record_backend(&mut self) -> &mut RecordBackend {
        &mut self.record_backend
    }

    pub fn get_replay_backend(&mut self) -> &mut ReplayBackend {
        &mut self.replay_backend
    }

    pub(crate) fn bevy_start(&self) {
        self.bevy_start_notification.notify_one();
    }

    pub async fn bevy_started(&self) {
        self.bevy_start_notification.notified().await;
    }
    // }])>
}
