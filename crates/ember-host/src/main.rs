//! # Ember
//!
//! Control daemon for a wood-pellet smoker. A single cooperative control
//! thread drives the grill hardware; the web layer and notification
//! transports live in separate processes and talk to the controller through
//! the shared-state store.

// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ember_hal::{Clock, MonotonicClock};
use ember_host::config::BootConfig;
use ember_host::state::Mode;
use ember_host::store::StateStore;
use ember_host::{devices, notify, orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Pellet-grill controller daemon.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control loop.
    Run(RunArgs),
    /// Print the current shared-state snapshots and exit.
    Status(StatusArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the boot configuration file (pins, polarity, modules).
    #[arg(short, long, default_value = "ember.cfg")]
    config: PathBuf,

    /// Directory holding the shared state documents.
    #[arg(short, long, default_value = "state")]
    state_dir: PathBuf,

    /// Force the prototype (simulated) devices regardless of the boot config.
    #[arg(long)]
    prototype: bool,
}

#[derive(Parser, Debug)]
struct StatusArgs {
    /// Directory holding the shared state documents.
    #[arg(short, long, default_value = "state")]
    state_dir: PathBuf,
}

fn main() -> Result<()> {
    // Initialize the logging subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_server(args),
        Commands::Status(args) => print_status(args),
    }
}

fn run_server(args: RunArgs) -> Result<()> {
    info!("Starting Ember controller...");

    let mut boot = if args.config.exists() {
        BootConfig::load(&args.config)?
    } else {
        info!("boot config {:?} not found, using defaults", args.config);
        BootConfig::default()
    };
    if args.prototype {
        boot.modules = Default::default();
    }

    let store = StateStore::new(&args.state_dir).context("state directory unusable")?;

    // Materialise the settings document so collaborators can edit it, and
    // boot into Stop: a process restart never resumes a fire on its own.
    let settings = store.read_settings().unwrap_or_default();
    store.write_settings(&settings)?;
    store.update_control(|c| {
        c.mode = Mode::Stop;
        c.updated = false;
    })?;

    let (emitter, events) = notify::channel();
    let _notifier = notify::spawn_logger(events);

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock);
    let mut device_set = devices::build(&boot, &settings, clock.clone())?;
    let mut devices = device_set.as_devices();

    orchestrator::run(&mut devices, &store, &*clock, &emitter)
}

fn print_status(args: StatusArgs) -> Result<()> {
    let store = StateStore::new(&args.state_dir)?;
    let control = store.read_control()?;
    let settings = store.read_settings()?;
    let pelletdb = store.read_pelletdb()?;

    println!("control: {}", serde_json::to_string_pretty(&control)?);
    println!("settings: {}", serde_json::to_string_pretty(&settings)?);
    println!("pellets: {}", serde_json::to_string_pretty(&pelletdb)?);
    Ok(())
}
