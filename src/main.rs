//! Synheart Focus Agent CLI
//!
//! Pairs the wearable with the collector, runs focus sessions and reports
//! what was collected.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use synheart_focus_agent::{
    collector::{NoopSource, SensorSource, SimulatedSource},
    config::Config,
    core::SensorAggregator,
    gateway::{CollectorApi, GatewayClient},
    session::{JsonFileStore, SessionController, SessionState, SessionStore},
    transparency::{create_shared_log, create_shared_log_with_persistence, TelemetryLog},
    upload::{NetworkStatus, UploadOutcome, UploadPipeline},
    PRIVACY_DECLARATION, VERSION,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "synheart-focus")]
#[command(author = "Synheart")]
#[command(version = VERSION)]
#[command(about = "Wearable focus-session telemetry agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a focus session (pairing first when a code is given)
    Start {
        /// Pairing code shown by the companion app
        #[arg(long)]
        code: Option<String>,

        /// Generate synthetic sensor readings instead of using device sensors
        #[arg(long)]
        simulate: bool,
    },

    /// Pause the running session
    Pause,

    /// Resume the running session
    Resume,

    /// Show pairing, session and telemetry status
    Status,

    /// Forget this device's credentials
    Disconnect,

    /// Display privacy declaration
    Privacy,

    /// Show configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { code, simulate } => cmd_start(code, simulate),
        Commands::Pause => cmd_set_paused(true),
        Commands::Resume => cmd_set_paused(false),
        Commands::Status => cmd_status(),
        Commands::Disconnect => cmd_disconnect(),
        Commands::Privacy => {
            println!("{PRIVACY_DECLARATION}");
            Ok(())
        }
        Commands::Config => cmd_config(),
    }
}

fn cmd_start(code: Option<String>, simulate: bool) -> anyhow::Result<()> {
    println!("Synheart Focus Agent v{VERSION}");
    println!();

    let config = Config::load().context("loading configuration")?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(run_agent(config, code, simulate))
}

async fn run_agent(config: Config, code: Option<String>, simulate: bool) -> anyhow::Result<()> {
    let log = create_shared_log_with_persistence(config.telemetry_log_path());
    let store = Arc::new(open_store(&config)?);

    let source: Arc<dyn SensorSource> = if simulate {
        println!("  Sensors: simulated");
        Arc::new(SimulatedSource::default())
    } else {
        eprintln!("Warning: no sensor source on this host; heart rate and motion fields will be absent.");
        eprintln!("Use --simulate to generate synthetic readings.");
        Arc::new(NoopSource::new())
    };

    let client = Arc::new(GatewayClient::new(config.backend.clone())?);
    let api: Arc<dyn CollectorApi> = client.clone();
    let network = NetworkStatus::new(true);

    println!("  Collector: {}", config.backend.base_url);
    println!("  Device ID: {}", config.device_id);
    println!("  Window duration: {}ms", config.window_duration.as_millis());
    println!("  Pause policy: {:?}", config.pause_policy);
    match client.test_connection().await {
        Ok(true) => println!("  Collector connection: OK"),
        Ok(false) => {
            eprintln!("Warning: Collector health check failed");
            network.set_online(false);
        }
        Err(e) => {
            eprintln!("Warning: Could not reach collector: {e}");
            network.set_online(false);
        }
    }

    let aggregator = Arc::new(SensorAggregator::new(
        config.aggregator_config(),
        source,
        log.clone(),
    ));
    let pipeline = UploadPipeline::new(api.clone(), &config.upload, network.clone(), log.clone());
    pipeline.start();
    let outcome_printer = tokio::spawn(print_outcomes(pipeline.clone()));

    let controller = SessionController::new(
        api,
        store.clone(),
        aggregator,
        pipeline.clone(),
        config.controller_settings(),
    );

    let started = match code {
        Some(code) => controller.submit_pairing_code(&code).await,
        None if store.is_authenticated() => controller.start_session().await,
        None => bail!("This device is not paired. Run `synheart-focus start --code <CODE>`."),
    };
    let session = match started {
        Ok(session) => session,
        Err(e) => {
            pipeline.shutdown().await;
            outcome_printer.abort();
            return Err(e.into());
        }
    };

    println!();
    println!("Session {} active since {}", session.session_id, session.started_at.to_rfc3339());
    println!("Press Ctrl+C to stop");
    println!();

    let probe = tokio::spawn(probe_health(
        client,
        network,
        config.upload.health_probe_interval,
    ));

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    // Support pause/resume from another process by polling the config file.
    let mut paused = false;
    let mut last_config_check: Option<Instant> = None;

    while running.load(Ordering::SeqCst) {
        if last_config_check.map_or(true, |t| t.elapsed() >= Duration::from_secs(1)) {
            if let Ok(cfg) = Config::load() {
                if cfg.paused != paused {
                    let result = if cfg.paused {
                        println!("Pausing session...");
                        controller.pause()
                    } else {
                        println!("Resuming session...");
                        controller.resume()
                    };
                    match result {
                        Ok(()) => paused = cfg.paused,
                        Err(e) => eprintln!("Warning: {e}"),
                    }
                }
            }
            last_config_check = Some(Instant::now());
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!();
    println!("Stopping session...");
    if matches!(
        controller.state(),
        SessionState::Active | SessionState::Paused
    ) {
        controller.stop()?;
    }
    probe.abort();
    pipeline.shutdown().await;
    outcome_printer.abort();

    // Save telemetry counters
    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save telemetry log: {e}");
    }

    println!();
    println!("{}", log.summary());
    Ok(())
}

async fn print_outcomes(pipeline: UploadPipeline) {
    let mut outcomes = pipeline.subscribe();
    loop {
        match outcomes.recv().await {
            Ok(UploadOutcome::Delivered { timestamp, .. }) => {
                println!("[{timestamp}] Sample delivered");
            }
            Ok(UploadOutcome::Retrying {
                timestamp,
                attempt,
                delay,
                ..
            }) => {
                println!(
                    "[{timestamp}] Upload failed, retry {attempt} in {}s",
                    delay.as_secs()
                );
            }
            Ok(UploadOutcome::Exhausted {
                timestamp,
                attempts,
                ..
            }) => {
                eprintln!("[{timestamp}] Sample dropped after {attempts} attempts");
            }
            Ok(UploadOutcome::Rejected {
                timestamp, reason, ..
            }) => {
                eprintln!("[{timestamp}] Sample rejected: {reason}");
            }
            Ok(UploadOutcome::Cancelled { count, .. }) => {
                println!("Cancelled {count} pending upload(s)");
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "outcome printer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Drive the network-availability signal from the collector health probe.
async fn probe_health(client: Arc<GatewayClient>, network: NetworkStatus, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    loop {
        ticker.tick().await;
        let online = matches!(client.test_connection().await, Ok(true));
        network.set_online(online);
    }
}

fn open_store(config: &Config) -> anyhow::Result<SessionStore> {
    let backend = JsonFileStore::open(config.session_store_path())
        .with_context(|| format!("opening {:?}", config.session_store_path()))?;
    Ok(SessionStore::open(Box::new(backend)))
}

fn cmd_set_paused(paused: bool) -> anyhow::Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    config.paused = paused;
    config.save().context("saving configuration")?;
    if paused {
        println!("Session paused. Use 'synheart-focus resume' to continue.");
    } else {
        println!("Session resumed.");
    }
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    let store = open_store(&config)?;
    let session = store.snapshot();

    println!("Synheart Focus Agent Status");
    println!("===========================");
    println!();
    println!("Device ID: {}", config.device_id);
    println!("Collector: {}", config.backend.base_url);
    println!(
        "Paired: {}",
        if store.is_authenticated() {
            "yes ✓"
        } else {
            "no ✗"
        }
    );
    if let Some(user_id) = session.user_id.as_deref().filter(|u| !u.is_empty()) {
        println!("  User: {user_id}");
    }
    match store.session_id() {
        Some(session_id) if store.has_active_session() => {
            println!("Session: {session_id} (connected)")
        }
        Some(session_id) => println!("Session: {session_id}"),
        None => println!("Session: none"),
    }
    println!("Paused: {}", config.paused);
    println!();

    let stats_path = config.telemetry_log_path();
    if stats_path.exists() {
        println!("{}", TelemetryLog::with_persistence(stats_path).summary());
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_disconnect() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    let store = Arc::new(open_store(&config)?);
    if !store.is_authenticated() {
        println!("This device is not paired.");
        return Ok(());
    }

    let log = create_shared_log();
    let api: Arc<dyn CollectorApi> = Arc::new(GatewayClient::new(config.backend.clone())?);
    let aggregator = Arc::new(SensorAggregator::new(
        config.aggregator_config(),
        Arc::new(NoopSource::new()),
        log.clone(),
    ));
    let pipeline = UploadPipeline::new(api.clone(), &config.upload, NetworkStatus::new(false), log);
    let controller =
        SessionController::new(api, store, aggregator, pipeline, config.controller_settings());

    controller.disconnect()?;
    println!("Device disconnected. Pair again with 'synheart-focus start --code <CODE>'.");
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
