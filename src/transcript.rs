// vim: foldmarker=<([{,}])> foldmethod=marker

// Module level Doc <([{
//! The module records and replays [Directive] traffic -- the session recording feature.
//!
//! 1. [RecordBackend::register] hands a [RecordProxy] to a directive source (the key backend does
//!    this automatically for every inbox).
//! 2. [RecordProxy::send] mirrors each directive into the recording when enabled.
//! 3. [RecordBackend::toggle] switches recording per inbox, [RecordBackend::dump] empties the
//!    recording into a serializable [Tape].
//! 4. [ReplayBackend::play] queues a tape whose directives are re-injected through the developer
//!    console with the recorded inter-arrival gaps.
//!
//! Note, due to schedule uncertainty, it's impossible to replay a session precisely! Directives
//! re-arrive with the recorded timing, but the machine's coroutines run against real frame time.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::{
    Mutex,
    mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    watch,
};
use tokio::time::{Duration, Instant, sleep};

use crate::from_bevy::Directive;

#[cfg(not(test))]
use crate::callboard::callboard;

#[cfg(test)]
use crate::transcript::tests::replay_boundaryclass::callboard;
// }])>

// Tape <([{
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TapeUnit {
    directive: Directive,
    interval: u64,
}

impl TapeUnit {
    pub(crate) fn new(directive: Directive, interval: Duration) -> Self {
        Self { directive, interval: interval.as_millis() as u64 }
    }
}

/// Recording format, supports serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct Tape {
    owner: usize,
    data: VecDeque<TapeUnit>,
}
// }])>

// record backend <([{
type RecordClientChan = (watch::Receiver<Option<Instant>>, UnboundedSender<TapeUnit>);
type RecordServerChan = (watch::Sender<Option<Instant>>, UnboundedReceiver<TapeUnit>);

/// Record proxy, accepts directives; recording can be enabled any time.
#[derive(Debug)]
pub struct RecordProxy {
    chan: RecordClientChan,
    enabled: Option<Instant>,
}

impl RecordProxy {
    pub fn send(&mut self, directive: Directive) {
        let ctrl = &mut self.chan.0;
        if ctrl.has_changed().unwrap() {
            ctrl.mark_unchanged();
            self.enabled = *ctrl.borrow();
        }
        if self.enabled.is_some() {
            let now = Instant::now();
            self.chan.1.send(TapeUnit::new(directive, now - self.enabled.unwrap())).unwrap();
            self.enabled = Some(now);
        }
    }
}

/// Per-inbox directive recorder.
#[derive(Debug)]
pub struct RecordBackend {
    lock: Mutex<()>,
    clients: HashMap<usize, (bool, RecordServerChan)>,
}

impl RecordBackend {
    pub(crate) fn new() -> Self {
        Self { lock: Mutex::new(()), clients: HashMap::new() }
    }

    pub async fn register(&mut self, id: usize) -> RecordProxy {
        let _ = self.lock.lock().await;
        let (s, r) = unbounded_channel();
        let ctrl = watch::Sender::new(None);
        let mut ctrl_r = ctrl.subscribe();
        ctrl_r.mark_unchanged();
        self.clients.insert(id, (false, (ctrl, r)));
        RecordProxy { chan: (ctrl_r, s), enabled: None }
    }

    pub async fn dump(&mut self, id: usize) -> Tape {
        let _ = self.lock.lock().await;
        let mut ret = Tape { owner: id, data: VecDeque::new() };
        let Some(client) = self.clients.get_mut(&id) else {
            return ret;
        };
        while let Ok(unit) = client.1.1.try_recv() {
            ret.data.push_back(unit);
        }
        ret
    }

    pub async fn toggle(&mut self, id: usize) -> bool {
        let _ = self.lock.lock().await;
        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };
        client.0 = !client.0;
        let mut ret = client.0;
        let tmp = { if client.0 { Some(Instant::now()) } else { None } };
        if client.1.0.send(tmp).is_err() {
            self.clients.remove(&id);
            ret = false;
        }
        ret
    }
}
// }])>

// replay backend <([{
/// Replays recorded directives. Tapes are played back one at a time in arrival order; each
/// directive goes through the console's redirect path, so it reaches the inbox exactly like a
/// console command would.
#[derive(Debug)]
pub struct ReplayBackend {
    lock: Mutex<()>,
    new_tape: (UnboundedSender<Tape>, UnboundedReceiver<Tape>),
}

impl ReplayBackend {
    pub(crate) fn new() -> Self {
        let (s, r) = unbounded_channel();
        Self { lock: Mutex::new(()), new_tape: (s, r) }
    }

    pub async fn play(&mut self, tape: Tape) {
        let _ = self.lock.lock().await;
        if tape.data.is_empty() {
            return;
        }
        self.new_tape.0.send(tape).unwrap();
    }

    pub(crate) async fn run(&mut self) {
        let cancellation_token = callboard().get_ct();

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => { break; }
                Some(tape) = self.new_tape.1.recv() => {
                    if !Self::play_tape(tape).await { break; }
                }
            }
        }
    }

    // Returns false when cancelled mid-tape.
    async fn play_tape(mut tape: Tape) -> bool {
        let cancellation_token = callboard().get_ct();
        while let Some(unit) = tape.data.pop_front() {
            tokio::select! {
                _ = cancellation_token.cancelled() => { return false; }
                _ = sleep(Duration::from_millis(unit.interval)) => {
                    callboard().console.redirect(tape.owner, unit.directive).await;
                }
            }
        }
        true
    }
}
// }])>

// }])>
