// Copyright (C) 2025 The loom authors. This program is free software: you can
// redistribute it and/or modify it under the terms of the GNU General Public
// License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The server process:
//!   * Brings up the world database.
//!   * Instantiates the dispatcher and the script scheduler.
//!   * Exposes the RPC interface the portal talks to.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use eyre::{bail, eyre, Report};
use fs2::FileExt;
use tracing::{error, info, warn};

use loom_common::cmdset::CmdSet;
use loom_common::locks::LockFuncRegistry;
use loom_common::model::{
    CommitResult, Dbref, ObjectRecord, WorldState, WorldStateSource,
};
use loom_common::sessions::Session;
use loom_db::FjallStore;
use loom_kernel::channels::ChannelRegistry;
use loom_kernel::cmdsets::CmdSetRegistry;
use loom_kernel::dispatch::Dispatcher;
use loom_kernel::scripts::{RestartMode, Scheduler};
use loom_kernel::sessions::SessionRegistry;
use loom_kernel::typeclass::{
    BaseTypeclass, HookCtx, ScriptClassRegistry, TypeclassRegistry,
};
use rpc_common::MsgServer2Portal;

use crate::args::Args;
use crate::config::Config;
use crate::rpc_server::RpcServer;
use crate::session::DaemonSession;

mod args;
mod builtin;
mod config;
mod rpc_server;
mod session;

const BANNER_MSG: &str = r#"
 ___
|   |    loom
|___|___ ___ _____
|  |    |   |     |
|  | () | () | () |
|__|____|___|_|_|_|
"#;

/// Acquire an exclusive lock on the data directory so two daemons cannot
/// operate on the same world.
fn acquire_data_directory_lock(data_dir: &PathBuf) -> Result<File, Report> {
    std::fs::create_dir_all(data_dir)?;
    let lock_file_path = data_dir.join(".loom-daemon.lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&lock_file_path)?;
    match lock_file.try_lock_exclusive() {
        Ok(()) => {
            info!("Acquired exclusive lock on data directory: {:?}", data_dir);
            Ok(lock_file)
        }
        Err(e) => {
            error!(
                "Failed to acquire lock on data directory {:?}. Another loom-daemon instance may already be running in this directory.",
                data_dir
            );
            bail!("Directory lock acquisition failed: {}", e);
        }
    }
}

/// A fresh database gets one starting room; existing databases are left
/// alone. Returns the room the configuration or bootstrap settled on as the
/// default home.
fn bootstrap_world(
    state_source: &dyn WorldStateSource,
    config: &Config,
) -> Result<Option<Dbref>, Report> {
    let mut state = state_source.new_world_state()?;
    if let Some(home) = config.default_home {
        let home = Dbref(home);
        if !state.object_exists(home)? {
            bail!("configured default_home {home} does not exist");
        }
        state.rollback()?;
        return Ok(Some(home));
    }
    let objects = state.all_objects()?;
    if objects.is_empty() {
        let limbo = state.create_object(ObjectRecord::new(Dbref(0), "Limbo", "base"))?;
        info!(%limbo, "fresh database, created starting room");
        match state.commit()? {
            CommitResult::Success => return Ok(Some(limbo)),
            CommitResult::ConflictRetry => bail!("bootstrap commit conflicted"),
        }
    }
    // The lowest-numbered roomlike object anchors orphans.
    let home = objects
        .iter()
        .copied()
        .filter(|&obj| {
            state
                .object(obj)
                .map(|rec| rec.location.is_none() && !rec.is_exit() && !rec.going)
                .unwrap_or(false)
        })
        .min();
    state.rollback()?;
    Ok(home)
}

/// Fire `at_server_reload` or `at_server_shutdown` across the world. Hook
/// failures are logged and skipped; a broken object must not stall a
/// restart.
fn fire_server_hooks(
    state_source: &dyn WorldStateSource,
    typeclasses: &TypeclassRegistry,
    session: &dyn Session,
    shutdown: bool,
) -> Result<(), Report> {
    let mut state = state_source.new_world_state()?;
    for obj in state.all_objects()? {
        let Ok(rec) = state.object(obj) else {
            continue;
        };
        let class = typeclasses.resolve_for(&rec);
        let mut ctx = HookCtx {
            state: state.as_mut(),
            session,
        };
        let result = if shutdown {
            class.at_server_shutdown(&mut ctx, obj)
        } else {
            class.at_server_reload(&mut ctx, obj)
        };
        if let Err(e) = result {
            error!(%obj, error = %e, "server lifecycle hook failed");
        }
    }
    match state.commit()? {
        CommitResult::Success => {}
        CommitResult::ConflictRetry => warn!("server hook commit conflicted, dropped"),
    }
    Ok(())
}

fn main() -> Result<(), Report> {
    color_eyre::install()?;
    let args = Args::parse();

    eprintln!("Initializing...\n{BANNER_MSG}");

    let main_subscriber = tracing_subscriber::fmt()
        .compact()
        .with_ansi(true)
        .with_thread_names(true)
        .with_max_level(if args.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(main_subscriber)
        .map_err(|e| eyre!("Unable to configure logging: {}", e))?;

    let _data_dir_lock = acquire_data_directory_lock(&args.data_dir)?;
    let config = Config::load(args.config_file.as_deref())?;

    let resolved_db_path = args.resolved_db_path();
    info!("loom daemon starting. Using database at {resolved_db_path:?}");
    let state_source: Arc<dyn WorldStateSource> = Arc::new(
        FjallStore::open(&resolved_db_path)
            .map_err(|e| eyre!("Unable to open world database: {}", e))?,
    );
    let default_home = bootstrap_world(state_source.as_ref(), &config)?;

    let mut typeclasses = TypeclassRegistry::new();
    typeclasses.register("base", Arc::new(BaseTypeclass));
    let typeclasses = Arc::new(typeclasses);
    let script_classes = Arc::new(ScriptClassRegistry::new());
    let cmdsets = Arc::new(CmdSetRegistry::new());

    let mut channels = ChannelRegistry::new();
    for name in &config.channels {
        channels.create(name);
    }

    let zmq_ctx = zmq::Context::new();
    zmq_ctx
        .set_io_threads(args.num_io_threads)
        .map_err(|e| eyre!("Failed to set number of IO threads: {}", e))?;
    let publish = zmq_ctx
        .socket(zmq::SocketType::PUB)
        .map_err(|e| eyre!("Unable to create ZMQ PUB socket: {}", e))?;
    publish
        .bind(&args.events_listen)
        .map_err(|e| eyre!("Unable to bind ZMQ PUB socket: {}", e))?;
    let publish = Arc::new(Mutex::new(publish));

    let registry = Arc::new(Mutex::new(SessionRegistry::new(
        config.idle_timeout_seconds.map(Duration::from_secs),
        config.allow_multisession,
    )));
    let daemon_session = Arc::new(DaemonSession::new(
        publish.clone(),
        registry.clone(),
        state_source.clone(),
    ));

    let (auth_tx, auth_rx) = flume::unbounded();
    let session_cmdset: CmdSet = builtin::session_cmdset(
        auth_tx,
        typeclasses.clone(),
        Arc::new(LockFuncRegistry::core()),
        config.permission_hierarchy.clone(),
        default_home,
    );
    let dispatcher = Dispatcher {
        typeclasses: typeclasses.clone(),
        cmdsets,
        locks: LockFuncRegistry::core(),
        aliases: config.aliases.clone(),
        channels,
        perm_hierarchy: config.permission_hierarchy.clone(),
        default_home,
        session_cmdset,
    };

    let kill_switch = Arc::new(AtomicBool::new(false));
    let reload_flag = Arc::new(AtomicBool::new(false));
    let reset_flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, kill_switch.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, kill_switch.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGHUP, reload_flag.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGUSR2, reset_flag.clone())?;

    let mut rpc_server = RpcServer::new(
        zmq_ctx.clone(),
        kill_switch.clone(),
        state_source.clone(),
        registry.clone(),
        daemon_session.clone(),
        dispatcher,
        typeclasses.clone(),
        auth_rx,
        config.channels.clone(),
    );
    let rpc_listen = args.rpc_listen.clone();
    let rpc_loop_thread = std::thread::Builder::new()
        .name("loom-rpc".to_string())
        .spawn(move || {
            if let Err(e) = rpc_server.request_loop(&rpc_listen) {
                error!("RPC server failed on {}: {}", rpc_listen, e);
            }
        })?;

    // Idle sweep thread.
    {
        let registry = registry.clone();
        let session = daemon_session.clone();
        let kill_switch = kill_switch.clone();
        std::thread::Builder::new()
            .name("loom-idle".to_string())
            .spawn(move || {
                while !kill_switch.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_secs(10));
                    let swept = registry
                        .lock()
                        .unwrap()
                        .idle_sweep(std::time::SystemTime::now(), session.as_ref());
                    if !swept.is_empty() {
                        info!(?swept, "idle sweep disconnected sessions");
                    }
                }
            })?;
    }

    info!(
        rpc_endpoint = args.rpc_listen,
        events_endpoint = args.events_listen,
        "Daemon started. Listening for RPC events."
    );

    // Scheduler supervision: each pass owns one scheduler generation; reload
    // and reset come back around, shutdown falls out.
    let scheduler_session: Arc<dyn Session> = daemon_session.clone();
    loop {
        let scheduler = Scheduler::new(
            state_source.clone(),
            script_classes.clone(),
            scheduler_session.clone(),
        );
        let client = scheduler.client();
        let scheduler_jh = std::thread::Builder::new()
            .name("loom-scheduler".to_string())
            .spawn(move || scheduler.run())?;

        let mut stop_sent = false;
        while !scheduler_jh.is_finished() {
            let mode = if kill_switch.load(Ordering::Relaxed) {
                Some(RestartMode::Shutdown)
            } else if reload_flag.swap(false, Ordering::Relaxed) {
                Some(RestartMode::Reload)
            } else if reset_flag.swap(false, Ordering::Relaxed) {
                Some(RestartMode::Reset)
            } else {
                None
            };
            if let Some(mode) = mode {
                if !stop_sent {
                    info!(?mode, "stopping scheduler");
                    if let Err(e) = client.stop(mode) {
                        error!(error = %e, "failed to stop scheduler");
                    }
                    stop_sent = true;
                }
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        let mode = match scheduler_jh.join() {
            Ok(Ok(mode)) => mode,
            Ok(Err(e)) => {
                error!(error = %e, "scheduler exited with error");
                RestartMode::Shutdown
            }
            Err(e) => {
                error!("scheduler thread panicked: {:?}", e);
                RestartMode::Shutdown
            }
        };
        match mode {
            RestartMode::Reload | RestartMode::Reset => {
                info!(?mode, "server restarting");
                fire_server_hooks(
                    state_source.as_ref(),
                    &typeclasses,
                    daemon_session.as_ref(),
                    false,
                )?;
                // The portal stays up; ask it to replay its session view.
                if let Err(e) = daemon_session.publish_event(&MsgServer2Portal::SSync) {
                    warn!(error = %e, "failed to request portal resync");
                }
            }
            RestartMode::Shutdown => break,
        }
    }

    info!("Shutting down.");
    fire_server_hooks(
        state_source.as_ref(),
        &typeclasses,
        daemon_session.as_ref(),
        true,
    )?;
    if let Err(e) = daemon_session.publish_event(&MsgServer2Portal::SDisconnAll {
        reason: "Server shutting down.".to_string(),
    }) {
        warn!(error = %e, "failed to broadcast shutdown disconnect");
    }
    if let Err(e) = state_source.checkpoint() {
        error!(error = %e, "final checkpoint failed");
    }
    if let Err(e) = rpc_loop_thread.join() {
        error!("RPC thread panicked: {:?}", e);
    }
    info!("Done.");
    Ok(())
}
