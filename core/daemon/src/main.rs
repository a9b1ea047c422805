//! TapTo daemon entrypoint.
//!
//! Watches an NFC reader, launches whatever a scanned token names, and
//! optionally exits the running title once its card is taken off the
//! reader. The same binary doubles as a small client for the daemon's
//! socket API (`tapto-daemon launch`, `status`, `stop`, ...).

use clap::{Parser, Subcommand};
use fs_err as fs;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

use tapto_core::config::data_dir;
use tapto_core::{
    load_config, load_mappings, CommandPlatform, FileReader, LaunchQueue, Platform, Reader,
    ReaderConnector, ReaderFactory, ScanEventProcessor, SessionMachine, SharedState, TaptoConfig,
};

mod api;
mod client;
mod launcher;
mod logging;

const SOCKET_NAME: &str = "daemon.sock";
const SOCKET_ENV: &str = "TAPTO_DAEMON_SOCKET";

#[derive(Parser)]
#[command(name = "tapto-daemon")]
#[command(about = "Launch games from NFC tokens")]
#[command(version)]
struct Cli {
    /// Path to tapto.toml (defaults to ~/.tapto/tapto.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground (default)
    Run,

    /// Execute text as if it had been read from a token
    Launch {
        #[arg(value_name = "TEXT")]
        text: String,

        /// Token uid to report alongside the text
        #[arg(long)]
        uid: Option<String>,
    },

    /// Print the daemon's current state
    Status,

    /// Ask the running daemon to shut down
    Stop,

    /// Stop launching scanned tokens
    DisableLauncher,

    /// Resume launching scanned tokens
    EnableLauncher,
}

fn main() {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Run);
    let exit_code = match command {
        Commands::Run => run_daemon(cli.config.as_deref()),
        Commands::Launch { text, uid } => client::launch(&text, uid.as_deref()),
        Commands::Status => client::status(),
        Commands::Stop => client::stop(),
        Commands::DisableLauncher => client::set_launcher_enabled(false),
        Commands::EnableLauncher => client::set_launcher_enabled(true),
    };
    std::process::exit(exit_code);
}

fn run_daemon(config_path: Option<&Path>) -> i32 {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading config: {}", err);
            return 1;
        }
    };

    let _log_guard = logging::init(config.tapto.debug, data_dir().ok().as_deref());
    log_config(&config, config_path);

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            return 1;
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        return 1;
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        return 1;
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            return 1;
        }
    };

    let disable_launch_file = match config.disable_launch_file() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve disable launch file");
            return 1;
        }
    };
    let state = Arc::new(SharedState::new(disable_launch_file));
    load_database(&config, &state);

    let revision = Arc::new(AtomicU64::new(0));
    let hook_revision = Arc::clone(&revision);
    state.set_update_hook(Box::new(move |st| {
        let revision = hook_revision.fetch_add(1, Ordering::SeqCst) + 1;
        let (connected, reader_type) = st.reader_status();
        tracing::debug!(
            revision,
            reader_connected = connected,
            reader_type = %reader_type,
            active_uid = %st.active_card().uid,
            launcher_disabled = st.is_launcher_disabled(),
            "State updated"
        );
    }));

    let config = Arc::new(config);
    let platform: Arc<dyn Platform> = Arc::new(CommandPlatform::new(config.platform.clone()));
    let (queue, launch_receiver) = LaunchQueue::new();
    let (loaded_sender, loaded_receiver) = crossbeam_channel::unbounded();

    if let Err(err) = launcher::spawn_worker(
        launch_receiver,
        Arc::clone(&state),
        Arc::clone(&platform),
        loaded_sender,
    ) {
        error!(error = %err, "Failed to start launch worker");
        return 1;
    }

    let reader_config = config.reader.clone();
    let factory: ReaderFactory = Box::new(move || -> Arc<dyn Reader> {
        Arc::new(FileReader::new(
            reader_config.detect_paths.clone(),
            reader_config.poll_interval(),
        ))
    });
    let connector = ReaderConnector::new(
        factory,
        config.connection_string().map(str::to_string),
        config.tapto.probe_device,
    );
    let machine = SessionMachine::new(
        Arc::clone(&config),
        Arc::clone(&state),
        Arc::clone(&platform),
        queue.clone(),
    );
    let processor = ScanEventProcessor::new(machine, connector, loaded_receiver);
    let session = match thread::Builder::new()
        .name("tapto-session".to_string())
        .spawn(move || processor.run())
    {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "Failed to start reader session");
            return 1;
        }
    };

    let signal_state = Arc::clone(&state);
    if let Err(err) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        signal_state.request_stop();
    }) {
        warn!(error = %err, "Failed to install signal handler");
    }

    let context = api::ApiContext {
        state: Arc::clone(&state),
        queue,
        config: Arc::clone(&config),
        revision,
    };
    if let Err(err) = thread::Builder::new()
        .name("tapto-api".to_string())
        .spawn(move || api::serve(listener, Arc::new(context)))
    {
        error!(error = %err, "Failed to start API listener");
        state.request_stop();
    }

    info!(path = %socket_path.display(), "TapTo daemon started");

    if session.join().is_err() {
        error!("Reader session thread panicked");
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        warn!(error = %err, "Failed to remove daemon socket");
    }
    info!("TapTo daemon stopped");
    0
}

fn log_config(config: &TaptoConfig, config_path: Option<&Path>) {
    let path = match config_path {
        Some(path) => path.display().to_string(),
        None => tapto_core::config::default_config_path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| "<unresolved>".to_string()),
    };
    info!(version = env!("CARGO_PKG_VERSION"), "TapTo daemon");
    info!(
        config_path = %path,
        connection_string = %config.tapto.connection_string,
        probe_device = config.tapto.probe_device,
        exit_game = config.tapto.exit_game,
        exit_game_delay = config.tapto.exit_game_delay,
        exit_game_blocklist = ?config.tapto.exit_game_blocklist,
        disable_sounds = config.tapto.disable_sounds,
        disable_launcher = config.tapto.disable_launcher,
        debug = config.tapto.debug,
        "Config loaded"
    );
}

fn load_database(config: &TaptoConfig, state: &SharedState) {
    let Some(path) = &config.tapto.mappings_file else {
        return;
    };
    match load_mappings(path) {
        Ok(mappings) => {
            info!(
                uids = mappings.uids.len(),
                texts = mappings.texts.len(),
                "Mappings loaded"
            );
            state.set_database(mappings.uids, mappings.texts);
        }
        Err(err) => {
            warn!(error = %err, "Failed to load mappings; continuing without them");
        }
    }
}

pub(crate) fn daemon_socket_path() -> Result<PathBuf, String> {
    if let Ok(value) = std::env::var(SOCKET_ENV) {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    let dir = data_dir().map_err(|err| err.to_string())?;
    Ok(dir.join(SOCKET_NAME))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}
