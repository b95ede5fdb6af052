// vim: foldmarker=<([{,}])> foldmethod=marker

// Module level Doc <([{
//! The module defines [Console], a developer console reusing the current terminal to poke at
//! running state machines -- inject [Directive]s, list registered inboxes and their last reported
//! state, type `help` in the console.
//!
//! ## Extension of the console
//! Pass a user-defined callback to [callboard_new](crate::callboard::callboard_new) to append more
//! commands. Pass `None` to disable the console.
//!
//! ## Console is the id authority
//! All [Inbox](crate::from_bevy::Inbox)es are registered to Console to get a unique id, which is
//! also the id the transcript backends and the `let` command address them by.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use clap::{Parser, Subcommand};
use mockall::automock;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{
        Mutex,
        mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
        watch,
    },
};

use crate::callboard::callboard;
use crate::from_bevy::Directive;
// }])>

pub type ConsoleSender = UnboundedSender<(usize, Directive)>;
pub(crate) type ConsoleCallback = fn(&String) -> bool;

type InboxEntry = (String, UnboundedSender<Directive>, watch::Receiver<String>);

/// Developer console. One per process, owned by the callboard.
#[derive(Debug)]
pub struct Console {
    counter: AtomicUsize,
    pool: Mutex<HashMap<usize, InboxEntry>>,
    sender: ConsoleSender,
    receiver: UnboundedReceiver<(usize, Directive)>,
    pub(crate) user_callback: Option<ConsoleCallback>,
}

#[automock]
impl Console {
    pub fn create_user_backend(&self) -> ConsoleSender {
        self.sender.clone()
    }

    pub(crate) fn new(user_callback: Option<ConsoleCallback>) -> Self {
        let (sender, receiver) = unbounded_channel();
        Self { counter: AtomicUsize::new(1), pool: Mutex::new(HashMap::new()), sender, receiver, user_callback }
    }

    pub(crate) async fn fore_run(&self) {
        let cancellation_token = callboard().get_ct();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => { break; }
                l = lines.next_line() => { let l = l.unwrap().unwrap(); self.exec(l).await; }
            }
        }
    }

    async fn exec(&self, l: String) {
        if l.trim().is_empty() || self.user_callback.is_none() || (self.user_callback.unwrap())(&l) {
            return;
        }

        // <([{
        #[derive(Parser, Debug)]
        #[command(disable_help_flag = true, disable_help_subcommand = true)]
        struct Cli {
            #[command(subcommand)]
            command: SubCommands,
        }
        // }])>

        #[derive(Subcommand, Debug)]
        enum SubCommands {
            Let { id: usize, action: String, state: Option<String> },
            List { action: String },
            Help,
        }

        // <([{
        let l = "foo ".to_owned() + &l;
        let l: Vec<_> = l.split_whitespace().collect();
        let l = Cli::try_parse_from(l);
        if l.is_err() {
            println!("illegal syntax");
            return;
        }
        let l = l.unwrap();
        // }])>
        match l.command {
            SubCommands::Let { id, action, state } => {
                let directive = match (action.as_str(), state) {
                    ("goto", Some(state)) => Directive::Goto { state },
                    ("call", Some(state)) => Directive::CallState { state },
                    ("ret", None) | ("return", None) => Directive::Ret,
                    ("exit", None) => Directive::Exit,
                    _ => {
                        println!("illegal syntax");
                        return;
                    }
                };
                self.sender.send((id, directive)).unwrap();
            }
            SubCommands::List { action } => {
                if action == "inbox" {
                    let lock = self.pool.lock().await;
                    (*lock).iter().for_each(|(k, v)| println!("{:?}-{:?}-{:?}", k, v.0, *v.2.borrow()));
                }
            }
            SubCommands::Help => {
                println!("let id goto/call state");
                println!("let id ret/exit");
                println!("list inbox");
            }
        }
    }

    pub(crate) async fn back_run(&mut self) {
        let cancellation_token = callboard().get_ct();

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => { break; }
                Some((id, directive)) = self.receiver.recv() => { self.redirect(id, directive).await; }
            }
        }
    }

    pub(crate) async fn redirect(&mut self, id: usize, directive: Directive) {
        let mut lock = self.pool.lock().await;
        let Some(inbox) = (*lock).get(&id) else {
            return;
        };
        if inbox.1.send(directive).is_err() {
            (*lock).remove(&id);
        }
    }

    pub(crate) async fn register(
        &mut self,
        desc: String,
        directives: UnboundedSender<Directive>,
        state: watch::Receiver<String>,
    ) -> usize {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut lock = self.pool.lock().await;
        (*lock).insert(id, (desc, directives, state));
        id
    }

    pub(crate) async fn unregister(&mut self, id: usize) {
        let mut lock = self.pool.lock().await;
        (*lock).remove(&id);
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        if self.user_callback.is_some() {
            println!("!!!!!press enter to exit to your console!!!!!");
            println!("!!!!!see https://docs.rs/tokio/latest/tokio/io/struct.Stdin.html for more!!!!!");
        }
    }
}

// mod tests <([{
#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough(_: &String) -> bool {
        false
    }

    #[tokio::test]
    async fn exec_let_builds_directives() {
        let mut console = Console::new(Some(passthrough));
        console.exec("let 3 goto Chase".to_string()).await;
        console.exec("let 3 call Attack".to_string()).await;
        console.exec("let 3 ret".to_string()).await;
        console.exec("let 7 exit".to_string()).await;

        assert_eq!(console.receiver.try_recv().unwrap(), (3, Directive::Goto { state: "Chase".to_string() }));
        assert_eq!(console.receiver.try_recv().unwrap(), (3, Directive::CallState { state: "Attack".to_string() }));
        assert_eq!(console.receiver.try_recv().unwrap(), (3, Directive::Ret));
        assert_eq!(console.receiver.try_recv().unwrap(), (7, Directive::Exit));
        assert!(console.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn exec_rejects_illegal_syntax() {
        let mut console = Console::new(Some(passthrough));
        console.exec("let three goto Chase".to_string()).await;
        console.exec("let 3 goto".to_string()).await;
        console.exec("let 3 ret Extra".to_string()).await;
        console.exec("nonsense".to_string()).await;
        assert!(console.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn exec_user_callback_consumes_line() {
        fn grabby(_: &String) -> bool {
            true
        }
        let mut console = Console::new(Some(grabby));
        console.exec("let 3 goto Chase".to_string()).await;
        assert!(console.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn redirect_prunes_closed_inbox() {
        let mut console = Console::new(None);
        let (s, r) = unbounded_channel();
        let state = watch::Sender::new("Idle".to_string());
        let id = console.register("guard".to_string(), s, state.subscribe()).await;

        drop(r);
        console.redirect(id, Directive::Ret).await;
        assert!(console.pool.lock().await.get(&id).is_none());
    }
}
// }])>
