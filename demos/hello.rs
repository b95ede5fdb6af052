// vim: foldmarker=<([{,}])> foldmethod=marker
// <([{
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use bevy::color::palettes::css::*;
use bevy::log::{Level, LogPlugin};
use bevy::prelude::*;
use bevy::tasks::block_on;
use clap::{Parser, Subcommand, crate_name};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use prompter_macro_utils::*;
use serde_json::{from_slice, to_vec};
use tokio::fs;
use tokio::time::Duration;

use prompter::prelude::*;
// }])>

// main() show:
// - mix bevy and tokio in main().
// main() <([{
#[tokio::main]
async fn main() {
    let mut app = App::new();
    app = callboard_new(app, Some(my_console_callback));
    app.add_plugins(DefaultPlugins.set(LogPlugin {
        level: Level::ERROR,
        filter: crate_name!().to_owned() + "=debug,prompter=debug",
        custom_layer: |_| None,
    }));
    app.add_systems(Startup, bevy_setup).add_systems(Update, bevy_sync_guard);

    // The coroutine ISN'T in the charge of callboard().tokio!!!, it's an exception.
    let mygame_future = tokio::spawn(async move {
        let callboard = callboard();
        callboard.bevy_started().await;
        new_mygame().await;
        // callboard_run() also forks some coroutine by callboard.spawn().
        callboard_run().await;
        mygame_run().await;
        // let's wait those coroutines spawned by callboard().spawn() to exit.
        callboard.wait_tasktracker_exit().await;
        drop_mygame();
    });
    app.run();

    // bevy hasn't End schedule, so there's no `callboard().bevy_ended().await`. Put later lines
    // after `app.run()` has the similar result.
    callboard().exit_tokio();
    block_on(mygame_future).unwrap();
    callboard_drop();
}
// }])>

// Show:
// 1. how to expand Console with user-defined commands.
// 2. how to use RecordBackend/ReplayBackend.
// my_console_callback(). Return true to stop propagate user input to prompter. <([{
fn my_console_callback(l: &String) -> bool {
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
        Exit,
        Record { id: usize },
        Dump { id: usize, file: PathBuf },
        Replay { file: PathBuf, id: usize },
        Help,
    }

    // <([{
    let l = "foo ".to_owned() + l;
    let l: Vec<_> = l.split_whitespace().collect();
    let l = Cli::try_parse_from(l);
    if l.is_err() {
        return false;
    }
    let l = l.unwrap();
    // }])>

    match l.command {
        SubCommands::Exit => {
            mygame().guard_tx.as_ref().unwrap().send(Directive::Exit).unwrap();
            return true;
        }
        SubCommands::Record { id } => {
            block_on(async move {
                let ret = callboard().get_record_backend().toggle(id).await;
                println!("id record state is {ret}");
            });
            return true;
        }
        SubCommands::Dump { id, file } => {
            block_on(async move {
                let v = callboard().get_record_backend().dump(id).await;
                println!("Dump directives for {id}: {:?}", v);
                let v = to_vec(&v).unwrap();
                fs::write(file, v).await.unwrap();
            });
            return true;
        }
        SubCommands::Replay { file, id } => {
            block_on(async move {
                let v = fs::read(file).await.unwrap();
                let v = from_slice::<Tape>(&v).unwrap();
                println!("Replay directives for {id}: {:?}", v);
                callboard().get_replay_backend().play(v).await
            });
            return true;
        }
        SubCommands::Help => {
            println!("Help from mygame():");
            println!("record id");
            println!("dump id file");
            println!("replay file id");
            println!("exit");
        }
    }
    false
}
// }])>

// MyGame Framework Overview:
// - A global object of all elements of the game.
// - Guard: a sprite whose logic is a Machine<GuardState> driven by drive().
// - guard_pos is shared with bevy: the driver side writes it, bevy_sync_guard displays it.
// My Game <([{
static mut MYGAME: OnceLock<MyGame> = OnceLock::new();

fn mygame() -> &'static mut MyGame {
    unsafe { (*(&raw mut MYGAME)).get_mut().unwrap() }
}

// Bevy systems may run before new_mygame(), they use the fallible accessor.
fn mygame_ready() -> Option<&'static mut MyGame> {
    unsafe { (*(&raw mut MYGAME)).get_mut() }
}

#[derive(Debug)]
struct MyGame {
    guard_pos: Mutex<Vec3>,
    guard_tx: Option<tokio::sync::mpsc::UnboundedSender<Directive>>,
}

async fn new_mygame() {
    unsafe {
        (*(&raw mut MYGAME)).set(MyGame { guard_pos: Mutex::new(Vec3::new(-4.0, 0.5, 0.0)), guard_tx: None }).unwrap();
    }
}

fn drop_mygame() {
    unsafe {
        let _ = (*(&raw mut MYGAME)).take().unwrap();
    }
}

async fn mygame_run() {
    let callboard = callboard();

    callboard.spawn(async move {
        guard_run().await;
    });

    callboard.get_ct().cancelled().await;

    println!("my game over!");
}
// }])>

// Guard shows how to:
// - define StateToken by derive.
// - register enter/exit/update handlers with coroutine flows.
// - setup inbox, initialize KeyBackend.
// - Call/Return between states from the keyboard.
// - user-defined Directive and links it to KeyBackend.
// Guard <([{
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StateToken)]
enum GuardState {
    Idle,
    Patrol,
    Chase,
    Attack,
}

// Attack enter flow, a hand-written Coroutine: three swings with a recovery wait between them.
struct SwingFlow {
    swings_left: u32,
    recovering: bool,
}

impl Coroutine for SwingFlow {
    fn step(&mut self, _tick: &Tick) -> Yield {
        if self.swings_left == 0 {
            return Yield::Done;
        }
        if self.recovering {
            self.recovering = false;
            return Yield::wait_secs(0.4);
        }
        self.swings_left -= 1;
        self.recovering = true;
        println!("guard swings! {} left", self.swings_left);
        Yield::Pending
    }
}

fn guard_handlers() -> std::sync::Arc<HandlerTable<GuardState>> {
    HandlerTable::<GuardState>::builder()
        .enter(GuardState::Idle, || {
            let mut announced = false;
            from_fn(move |_| {
                if !announced {
                    announced = true;
                    println!("guard stretches and leans on his spear");
                    return Yield::wait_secs(1.0);
                }
                Yield::Done
            })
        })
        .enter(GuardState::Patrol, || {
            // Walk to the east waypoint, one step per frame, then the flow is exhausted.
            from_fn(move |tick| {
                let mut pos = mygame().guard_pos.lock().unwrap();
                pos.x += 2.0 * tick.delta.as_secs_f32();
                if pos.x >= 4.0 { Yield::Done } else { Yield::Pending }
            })
        })
        .update(GuardState::Chase, |tick| {
            // Chase has no enter flow at all, its whole behavior is the per-frame update.
            let mut pos = mygame().guard_pos.lock().unwrap();
            let step = 4.0 * tick.delta.as_secs_f32();
            pos.x -= pos.x.signum() * step.min(pos.x.abs());
        })
        .enter(GuardState::Attack, || Box::new(SwingFlow { swings_left: 3, recovering: false }))
        .exit(GuardState::Attack, || {
            let mut sheathed = false;
            from_fn(move |_| {
                if !sheathed {
                    sheathed = true;
                    println!("guard sheathes his sword");
                    return Yield::wait(WaitFrames::new(10));
                }
                Yield::Done
            })
        })
        .build()
}

async fn guard_run() {
    let callboard = callboard();
    let mut inbox = callboard.new_inbox("Guard".to_string()).await;
    mygame().guard_tx = Some(inbox.create_user_backend());

    let key_backend = inbox.create_key_backend().await;
    key_backend.register("p".to_owned(), Directive::Goto { state: "Patrol".to_string() }).await;
    key_backend.register("c".to_owned(), Directive::Goto { state: "Chase".to_string() }).await;
    key_backend.register("a".to_owned(), Directive::CallState { state: "Attack".to_string() }).await;
    key_backend.register("r".to_owned(), Directive::Ret).await;
    key_backend.register("q".to_owned(), Directive::Exit).await;
    // Define our Directive and link it to a key-combination.
    let taunt = box2usize::<String>("you shall not pass".to_string());
    key_backend
        .register("tt".to_owned(), Directive::UserDefined { id: UserEventID::Taunt.into(), payload: taunt })
        .await;

    let mut machine = Machine::new(GuardState::Idle, guard_handlers());
    drive(&mut machine, &mut inbox, Duration::from_millis(16), |machine, directive| {
        let Directive::UserDefined { id, payload } = directive else {
            return;
        };
        match UserEventID::try_from(id).unwrap() {
            UserEventID::Taunt => {
                // Safety: Directive memory rule.
                let line = unsafe { usize2box::<String>(payload) };
                println!("guard ({:?}): {}", machine.current_state(), line);
                // Here, memory is leak again to support re-taunt.
                Box::leak(line);
            }
        }
    })
    .await;

    inbox.async_drop().await;
    println!("exit from loop, bye guard");

    callboard.exit_tokio();
}

// UserEvent, Directive::UserDefined <([{
#[derive(TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
enum UserEventID {
    Taunt = 1,
}
// }])>
// }])>

// Bevy side: a cuboid guard on a plane, synced from mygame().guard_pos every frame <([{
#[derive(Component)]
struct GuardBody;

fn bevy_setup(mut commands: Commands, mut meshes: ResMut<Assets<Mesh>>, mut materials: ResMut<Assets<StandardMaterial>>) {
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(0.0, 6., 12.0).looking_at(Vec3::new(0., 1., 0.), Vec3::Y),
    ));
    commands.spawn((
        PointLight { shadows_enabled: true, intensity: 10_000_000., range: 100.0, ..default() },
        Transform::from_xyz(8.0, 16.0, 8.0),
    ));
    commands.spawn((
        Mesh3d(meshes.add(Plane3d::default().mesh().size(20.0, 20.0))),
        MeshMaterial3d(materials.add(Color::from(GREEN))),
    ));
    commands.spawn((
        GuardBody,
        Mesh3d(meshes.add(Cuboid::default())),
        MeshMaterial3d(materials.add(Color::from(RED))),
        Transform::from_xyz(-4.0, 0.5, 0.0),
    ));
}

fn bevy_sync_guard(mut query: Query<&mut Transform, With<GuardBody>>) {
    let Some(mg) = mygame_ready() else {
        return;
    };
    let Ok(mut transform) = query.single_mut() else {
        return;
    };
    transform.translation = *mg.guard_pos.lock().unwrap();
}
// }])>
