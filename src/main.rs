#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level as TraceLevel, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use lightstack::config::EngineSettings;
use lightstack::constants::timing;
use lightstack::context::EngineContext;
use lightstack::ipc::{self, ControlClient, ControlHandler, ControlServer, EngineRequest, EngineResponse};
use lightstack::lifecycle::LifecycleCoordinator;
use lightstack::persistence::VariantStore;
use lightstack::platform::Platform;
use lightstack::registry::ProfileRegistry;
use lightstack::scheduler::UpdateScheduler;
use lightstack::state::GameStatePayload;

/// RGB lighting engine driven by the foreground game
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Control socket path (defaults to $XDG_RUNTIME_DIR/lightstack/control.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine daemon
    Run(RunArgs),

    /// Check that the daemon is alive
    Ping,

    /// Force a profile by id or process name, omit to clear
    Preview { key: Option<String> },

    /// Deliver a legacy JSON game-state payload
    State { origin: String, json: String },

    /// Reset the game state of the profile owning a process
    Reset { process: String },

    /// Report a connected wrapper process, omit when it disconnects
    Wrapper { process: Option<String> },

    /// Ask the daemon to shut down
    Shutdown,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Settings file (defaults to the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the tick interval in milliseconds
    #[arg(long)]
    interval: Option<u64>,

    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,

    /// Propagate tick failures instead of logging them
    #[arg(long)]
    strict: bool,
}

fn parse_level(level: &str) -> TraceLevel {
    match level.to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    }
}

fn init_logging(level: TraceLevel) -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

fn socket_path(cli_socket: Option<PathBuf>) -> Result<PathBuf> {
    match cli_socket {
        Some(path) => Ok(path),
        None => ipc::default_socket_path(),
    }
}

/// Forward SIGINT/SIGTERM to the cancellation token
fn spawn_signal_listener(cancel: CancellationToken) -> Result<signal_hook::iterator::Handle> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
    let handle = signals.handle();
    std::thread::Builder::new()
        .name("lightstack-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "Received signal, shutting down");
                cancel.cancel();
            }
        })
        .context("Failed to spawn signal thread")?;
    Ok(handle)
}

fn run_daemon(args: RunArgs, socket: PathBuf) -> Result<()> {
    let config_path = args.config.unwrap_or_else(EngineSettings::default_path);
    let mut settings = EngineSettings::load(&config_path)?;
    if let Some(interval) = args.interval {
        settings.update_interval_ms = interval;
        settings.validate_and_clamp();
    }

    let level = args
        .log_level
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| settings.log_level.clone());
    init_logging(parse_level(&level))?;
    info!(config = %config_path.display(), interval_ms = settings.update_interval_ms, "Starting lightstack");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("lightstack-worker")
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    let store = Arc::new(VariantStore::new(VariantStore::default_root()));
    let registry = ProfileRegistry::with_builtins(Some(store.clone())).context("Failed to register built-in profiles")?;
    let ctx = Arc::new(EngineContext::new(settings, registry).with_platform(Platform::detect()));
    let lifecycle = Arc::new(LifecycleCoordinator::new(ctx.clone(), store).with_settings_path(config_path));
    let cancel = lifecycle.cancellation_token();

    {
        let _guard = runtime.enter();
        lifecycle.start();
    }

    let signals = spawn_signal_listener(cancel.clone())?;

    let control = match ControlServer::bind_to(socket) {
        Ok(server) => Some(ipc::spawn_control_listener(server, ControlHandler::new(ctx.clone(), cancel.clone()))?),
        Err(e) => {
            warn!(error = ?e, "Control socket unavailable, continuing without it");
            None
        }
    };

    let scheduler = UpdateScheduler::new(ctx).strict(args.strict).spawn(cancel.clone())?;
    let outcome = match scheduler.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("Scheduler thread panicked")),
    };
    if let Err(e) = &outcome {
        error!(error = ?e, "Update loop failed");
    }

    // Whatever stopped the loop, stop everything else too
    cancel.cancel();
    runtime.block_on(lifecycle.shutdown(Duration::from_millis(timing::SHUTDOWN_WAIT_MS)));

    if let Some(control) = control
        && control.join().is_err()
    {
        warn!("Control listener thread panicked");
    }
    signals.close();
    info!("lightstack stopped");
    outcome
}

fn send(socket: PathBuf, request: EngineRequest) -> Result<()> {
    let mut client = ControlClient::connect_to(&socket)?;
    match client.request(request)? {
        EngineResponse::Error(message) => bail!("Engine rejected request: {message}"),
        response => {
            println!("{response:?}");
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = socket_path(cli.socket)?;

    match cli.command {
        Command::Run(args) => run_daemon(args, socket),
        Command::Ping => send(socket, EngineRequest::Ping),
        Command::Preview { key } => send(socket, EngineRequest::SetPreview(key)),
        Command::State { origin, json } => {
            let value = serde_json::from_str(&json).context("Game state is not valid JSON")?;
            send(socket, EngineRequest::GameState {
                origin,
                payload: GameStatePayload::legacy(value),
            })
        }
        Command::Reset { process } => send(socket, EngineRequest::ResetGameState(process)),
        Command::Wrapper { process } => send(socket, EngineRequest::WrapperConnected(process)),
        Command::Shutdown => send(socket, EngineRequest::Shutdown),
    }
}
