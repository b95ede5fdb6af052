// vim: foldmarker=<([{,}])> foldmethod=marker

// Module level Doc <([{
//! from_bevy module defines [Directive] and uses classic [Inbox]-Backends (1 vs N) model to pass
//! Directive from bevy by tokio::unbounded_channel.
//!
//! ## Backend Overview
//! There're several Backends available to developer.
//! 1. [KeyBackend] translates keys to Directive.
//! 2. [Console](crate::console::Console) lets developer inject Directive directly into the
//!    machines, observe their current state etc.
//! 3. [RecordBackend](crate::transcript::RecordBackend)/[ReplayBackend](crate::transcript::ReplayBackend)
//!    can record and replay Directive -- session recording feature.
//!
//! ### UserDefined Backend and SendFail-Drop Rule
//! Developer can define their own Backends by [Inbox::create_user_backend] and
//! [Console::create_user_backend](crate::console::Console::create_user_backend).
//!
//! SendFail-Drop rule is when a backend fails to send data to the corresponding `Inbox`, it's the
//! time to recycle inner resource, goto `key_backend_broadcast` for more.

use bevy::{
    input::{
        ButtonState,
        keyboard::{Key, KeyboardInput},
    },
    prelude::*,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::{
    sync::{
        Mutex,
        mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
        watch,
    },
    time::{Duration, Instant},
};

use crate::callboard::callboard;
use crate::transcript::RecordProxy;
// }])>

// Directive <([{
/// Directive is a logic event which is sent from `Backend` to `Inbox`, asking the receiving state
/// machine driver to do something. It's recommended to integrate them into your code because it
/// makes user can remap keyboard shortcut conveniently.
///
/// ## Glimpse of Directive
/// Directive is consist of:
/// 1. transitions addressed by state name such as [Directive::Goto].
/// 2. system events such as [Directive::Exit].
/// 3. user-defined [Directive::UserDefined].
///
/// States travel as their [name](crate::handlers::StateToken::name) string so a directive can be
/// typed in the console and serialized into a tape; the driver parses it back with
/// [StateToken::parse](crate::handlers::StateToken::parse).
///
/// ## Extension of Directive, [Directive::UserDefined].
/// It's done by `num_enum` crate.
///
/// ```plaintext
/// #[derive(TryFromPrimitive, IntoPrimitive)]
/// #[repr(u32)]
/// enum UserEventID {
///     A = 1,
/// }
///
/// pub struct A {
///     ...
/// }
/// ```
///
/// Then developer can fill `Directive::UserDefined {id, payload: box2usize(A { ... })}`.
///
/// ## Safety of Directive
/// When Directive need to include a ptr, it should be stored as usize_t. It's recommended to
/// allocate ptr by Backend and free ptr by Inbox user. There're auxiliary functions
/// [box2usize](crate::utils::box2usize) and [usize2box](crate::utils::usize2box) for it.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub enum Directive {
    Goto { state: String },
    CallState { state: String },
    Ret,

    // System event.
    Exit,

    UserDefined { id: u32, payload: usize },
}
// }])>

// inbox <([{
/// Inbox is used to accept Directive from Backends. One lives per driven state machine.
#[derive(Debug)]
pub struct Inbox {
    id: usize,
    sender: UnboundedSender<Directive>,
    receiver: UnboundedReceiver<Directive>,
    state_tx: watch::Sender<String>,
}

impl Inbox {
    pub fn get_id(&self) -> usize {
        self.id
    }

    pub async fn new(desc: String) -> Self {
        let (sender, receiver) = unbounded_channel();
        let state_tx = watch::Sender::new(String::new());
        let id = callboard().console.register(desc, sender.clone(), state_tx.subscribe()).await;
        Self { id, sender, receiver, state_tx }
    }

    pub async fn create_key_backend(&self) -> &mut KeyBackend {
        let mut lock = callboard().key_backend.lock().await;
        lock.push(Box::new(KeyBackend::new(self.create_user_backend(), self.id).await));
        let ret = lock.last_mut().unwrap();
        // Safety: we can safe return a KeyBackend reference to our caller, here, ret is a Box<_>.
        // Caller is free to drop KeyBackend, see create_user_backend().
        //
        // Here the lifetime of returned KeyBackend is enlarged to self.
        unsafe { std::mem::transmute::<&'_ mut KeyBackend, &'_ mut KeyBackend>(ret) }
    }

    // TODO: automatically free.
    pub fn create_user_backend(&self) -> UnboundedSender<Directive> {
        self.sender.clone()
    }

    /// Publishes the machine's current state name, shown by the console's `list inbox`.
    pub fn report(&self, state: &str) {
        self.state_tx.send_replace(state.to_string());
    }

    pub async fn wait_directive(&mut self) -> Directive {
        self.receiver.recv().await.unwrap()
    }

    pub fn empty_directives(&mut self) {
        while self.receiver.try_recv().is_ok() {}
    }

    pub async fn async_drop(&mut self) {
        callboard().console.unregister(self.id).await;
    }

    #[cfg(test)]
    pub(crate) fn detached(id: usize) -> Self {
        let (sender, receiver) = unbounded_channel();
        Self { id, sender, receiver, state_tx: watch::Sender::new(String::new()) }
    }

    #[cfg(test)]
    pub(crate) fn state_watch(&self) -> watch::Receiver<String> {
        self.state_tx.subscribe()
    }
}
// }])>

// key backend <([{
/// ## Syntax of key-combination
/// KeyBackend supports a simple syntax to describe key-combination when [KeyBackend::register].
/// 1. `ii` double-click i keys.
/// 2. `<ctrl>i`: ctrl + i.
#[derive(Debug)]
pub struct KeyBackend {
    key_to_directive: Mutex<HashMap<String, Directive>>,
    sender: UnboundedSender<Directive>,
    record_proxy: RecordProxy,
}

impl KeyBackend {
    async fn new(sender: UnboundedSender<Directive>, id: usize) -> Self {
        Self {
            key_to_directive: Mutex::new(HashMap::new()),
            sender,
            record_proxy: callboard().record_backend.register(id).await,
        }
    }

    pub async fn register(&mut self, key: String, directive: Directive) {
        let mut lock = self.key_to_directive.lock().await;
        (*lock).insert(key, directive);
    }

    fn broadcast(&mut self, key: &str) -> bool {
        let lock = self.key_to_directive.blocking_lock();
        if let Some(directive) = (*lock).get(key) {
            self.record_proxy.send((*directive).clone());
            return self.sender.send((*directive).clone()).is_ok();
        }
        return true;
    }
}

fn key_backend_broadcast(key_combination: &String) {
    let mut lock = callboard().key_backend.blocking_lock();
    lock.retain_mut(|item| item.broadcast(&key_combination));
}

fn key_backend_callback(mut double_click: Local<(Option<Instant>, String)>, mut er: EventReader<KeyboardInput>) {
    for i in er.read() {
        if i.state == ButtonState::Released {
            info!("{:?}", i);
            let cur = match &i.logical_key {
                Key::Character(c) => c.as_str(),
                Key::Space => "<space>",
                Key::Control => "<ctrl>",
                _ => "",
            }
            .to_owned();
            let now = Instant::now();
            let diff = now.duration_since(double_click.0.unwrap_or(now));
            let mut key_combination = cur.clone();
            if diff <= Duration::from_millis(200) {
                let prev = &double_click.1;
                info!("double click!!!!{:?}-{:?}", prev, cur);
                if cur == "<ctrl>" {
                    key_combination = cur.clone() + prev;
                } else {
                    key_combination = prev.to_owned() + &cur;
                }
            }

            if key_combination != "" {
                key_backend_broadcast(&key_combination);
            }

            double_click.0 = Some(now);
            double_click.1 = cur;
        }
    }
}
// }])>

fn startup() {
    callboard().bevy_start();
}

// Bevy leaves when tokio leaves, goto Callboard::exit_tokio for more.
fn exit_watchdog(mut ew: EventWriter<AppExit>) {
    if callboard().get_ct().is_cancelled() {
        ew.write(AppExit::Success);
    }
}

pub(crate) fn from_bevy_init(mut app: App) -> App {
    app.add_systems(Update, key_backend_callback).add_systems(Update, exit_watchdog);
    app.add_systems(Startup, startup);
    app
}
