//! Sense Platform CLI
//!
//! Background sensor polling daemon with persisted channel state.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sense_platform::{
    channel::ChannelKind,
    config::{Config, SensorConfig},
    coordinator::{Coordinator, LocalSession, ServiceSnapshot, SessionBackend},
    rate::RateTier,
    store::{JsonPrefs, StateStore},
    transmit::{nudge_channel, BufferFlusher, ReadingBuffer, SpoolFlusher, TransmitScheduler},
    transparency::{create_shared_log_with_persistence, SharedTransparencyLog},
    SimulatedFactory, VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "gateway")]
use sense_platform::gateway::{BlockingGatewayClient, GatewayConfig, GatewayFlusher, GatewaySession};

#[derive(Parser)]
#[command(name = "sense-platform")]
#[command(version = VERSION)]
#[command(about = "Multi-channel sensor polling daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in the foreground
    Start {
        /// Upload to the gateway instead of spooling to disk (requires gateway feature)
        #[arg(long)]
        gateway: bool,

        /// Gateway port (read from the runtime dir if not specified)
        #[arg(long)]
        gateway_port: Option<u16>,

        /// Gateway token (read from the runtime dir if not specified)
        #[arg(long)]
        gateway_token: Option<String>,
    },

    /// Start the daemon if autostart is on and the service was left switched on
    Resume {
        /// Upload to the gateway instead of spooling to disk (requires gateway feature)
        #[arg(long)]
        gateway: bool,
    },

    /// Ask a running daemon to stop
    Stop,

    /// Switch resuming with the host on or off
    Autostart {
        /// on or off
        #[arg(value_parser = parse_switch)]
        state: bool,
    },

    /// Switch a sensor channel on or off
    Toggle {
        /// Channel name (phonestate, location, motion, ambience, devprox, external, popquiz)
        channel: ChannelKind,

        /// on or off
        #[arg(value_parser = parse_switch)]
        state: bool,
    },

    /// Set the sampling rate tier (realtime, often, normal, rarely or -2..1)
    Rate {
        #[arg(allow_hyphen_values = true)]
        tier: RateTier,
    },

    /// Set the transmission rate tier (realtime, often, normal, rarely or -2..1)
    SyncRate {
        #[arg(allow_hyphen_values = true)]
        tier: RateTier,
    },

    /// Select optional sub-sensors (microphone, light, bioharness, hxm or all)
    Sensors { sensors: String },

    /// Show daemon status and collection statistics
    Status,

    /// Show configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            gateway,
            gateway_port,
            gateway_token,
        } => cmd_start(gateway, gateway_port, gateway_token),
        Commands::Resume { gateway } => cmd_resume(gateway),
        Commands::Stop => cmd_stop(),
        Commands::Autostart { state } => cmd_autostart(state),
        Commands::Toggle { channel, state } => cmd_toggle(channel, state),
        Commands::Rate { tier } => cmd_rate(tier),
        Commands::SyncRate { tier } => cmd_sync_rate(tier),
        Commands::Sensors { sensors } => cmd_sensors(&sensors),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    }
}

fn parse_switch(s: &str) -> Result<bool, String> {
    match s.trim().to_lowercase().as_str() {
        "on" | "true" | "1" | "enable" => Ok(true),
        "off" | "false" | "0" | "disable" => Ok(false),
        other => Err(format!("expected on or off, got '{other}'")),
    }
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        warn!("Could not load config, using defaults: {e}");
        Config::default()
    })
}

fn open_store(config: &Config) -> anyhow::Result<(Arc<JsonPrefs>, StateStore)> {
    config
        .ensure_directories()
        .context("creating data directories")?;
    let path = config.status_store_path();
    let prefs = Arc::new(
        JsonPrefs::open(&path).with_context(|| format!("opening status store {path:?}"))?,
    );
    let store = StateStore::new(prefs.clone());
    Ok((prefs, store))
}

/// Coordinator without supervisors, used to persist changes for a daemon
/// that may not be running in this process.
fn offline_coordinator(config: &Config) -> anyhow::Result<Coordinator> {
    let (_, store) = open_store(config)?;
    Coordinator::builder(store)
        .prefs(config.sensing_prefs())
        .sync_rate(config.sync_rate)
        .spawn()
        .context("spawning coordinator")
}

fn cmd_start(
    enable_gateway: bool,
    gateway_port: Option<u16>,
    gateway_token: Option<String>,
) -> anyhow::Result<()> {
    println!("Sense Platform v{VERSION}");
    println!();

    let mut config = load_config();
    let (prefs, store) = open_store(&config)?;
    if let Err(e) = store.set_main_enabled(true) {
        warn!("Failed to persist service status: {e}");
    }

    let transparency = create_shared_log_with_persistence(config.transparency_path());

    let (nudger, nudges) = nudge_channel();
    let buffer = Arc::new(
        ReadingBuffer::new(config.buffer_capacity)
            .with_nudger(nudger)
            .with_transparency(transparency.clone()),
    );

    let (flusher, session) = build_backend(
        &config,
        enable_gateway,
        gateway_port,
        gateway_token,
        buffer.clone(),
        transparency.clone(),
    );

    println!("Configuration:");
    println!("  Sample rate: {}", describe_tier(config.sample_rate));
    println!("  Sync rate: {}", describe_tier(config.sync_rate));
    println!("  Override mode: {}", config.override_mode);
    println!("  Spool: {:?}", config.export_path);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let coordinator = Coordinator::builder(store.clone())
        .prefs(config.sensing_prefs())
        .sync_rate(config.sync_rate)
        .threaded_supervisors(Arc::new(SimulatedFactory::new(config.sensors)), buffer)
        .transmit(TransmitScheduler::new(flusher.clone(), nudges))
        .session(session)
        .transparency(transparency.clone())
        .spawn()
        .context("spawning coordinator")?;

    if !coordinator.start() {
        warn!("Some channels failed to start");
    }

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) {
        thread::sleep(config.reconcile_interval);

        if !reconcile(&coordinator, &prefs, &store) {
            info!("Service switched off");
            break;
        }
        if let Ok(new_config) = Config::load() {
            apply_config(&coordinator, &config, &new_config);
            config = new_config;
        }
        write_snapshot(&config, coordinator.snapshot());
    }

    coordinator.stop();
    write_snapshot(&config, coordinator.snapshot());
    drop(coordinator);

    // Transmit whatever the stopped workers left behind.
    if let Err(e) = flusher.flush() {
        warn!("Final transmission failed: {e}");
    }
    if let Err(e) = transparency.save() {
        warn!("Could not save transparency log: {e}");
    }

    println!();
    println!("{}", transparency.summary());
    Ok(())
}

/// Apply persisted status edits made by other processes.
///
/// Returns false when the main switch was turned off.
fn reconcile(coordinator: &Coordinator, prefs: &JsonPrefs, store: &StateStore) -> bool {
    if let Err(e) = prefs.reload() {
        warn!("Could not reload status store: {e}");
        return true;
    }
    let persisted = store.snapshot();
    if !persisted.main {
        return false;
    }

    let Some(live) = coordinator.snapshot() else {
        return true;
    };
    for kind in ChannelKind::ALL {
        let wanted = persisted.is_enabled(kind);
        let current = live.channel(kind).map(|c| c.enabled).unwrap_or(false);
        if wanted != current && !coordinator.toggle(kind, wanted) {
            warn!("Could not switch {kind} sensor {}", if wanted { "on" } else { "off" });
        }
    }
    true
}

fn apply_config(coordinator: &Coordinator, old: &Config, new: &Config) {
    if new.sensing_prefs() != old.sensing_prefs() {
        coordinator.update_prefs(new.sensing_prefs());
    }
    if new.sync_rate != old.sync_rate {
        coordinator.on_raw_sync_rate_change(new.sync_rate);
    }
    if new.sensors != old.sensors {
        warn!("Sub-sensor selection changed; restart the daemon to apply it");
    }
}

fn write_snapshot(config: &Config, snapshot: Option<ServiceSnapshot>) {
    let Some(snapshot) = snapshot else {
        return;
    };
    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => {
            if let Err(e) = std::fs::write(config.snapshot_path(), json) {
                warn!("Could not write status file: {e}");
            }
        }
        Err(e) => warn!("Could not serialize status: {e}"),
    }
}

#[allow(unused_variables)]
fn build_backend(
    config: &Config,
    enable_gateway: bool,
    gateway_port: Option<u16>,
    gateway_token: Option<String>,
    buffer: Arc<ReadingBuffer>,
    transparency: SharedTransparencyLog,
) -> (Arc<dyn BufferFlusher>, Arc<dyn SessionBackend>) {
    #[cfg(feature = "gateway")]
    if enable_gateway && config.use_backend {
        match create_gateway_client(config, gateway_port, gateway_token) {
            Ok(client) => {
                let client = Arc::new(client);
                println!("  Gateway sync: enabled");
                let flusher = GatewayFlusher::new(
                    buffer.clone(),
                    client.clone(),
                    sense_platform::transmit::device_id(),
                )
                .with_transparency(transparency.clone());
                return (Arc::new(flusher), Arc::new(GatewaySession::new(client)));
            }
            Err(e) => {
                eprintln!("Warning: Could not connect to gateway: {e}");
                eprintln!("Falling back to the local spool.");
            }
        }
    }

    #[cfg(not(feature = "gateway"))]
    if enable_gateway {
        eprintln!("Warning: --gateway flag ignored (gateway feature not enabled at compile time)");
    }

    let flusher =
        SpoolFlusher::new(buffer, config.export_path.clone()).with_transparency(transparency);
    (
        Arc::new(flusher),
        Arc::new(LocalSession::new(config.use_backend)),
    )
}

#[cfg(feature = "gateway")]
fn create_gateway_client(
    config: &Config,
    port: Option<u16>,
    token: Option<String>,
) -> Result<BlockingGatewayClient, sense_platform::gateway::GatewayError> {
    if let (Some(p), Some(t)) = (port, token) {
        return BlockingGatewayClient::new(GatewayConfig::new("127.0.0.1", p, t));
    }
    BlockingGatewayClient::new(GatewayConfig::from_runtime_dir(&config.data_path)?)
}

fn cmd_resume(gateway: bool) -> anyhow::Result<()> {
    let config = load_config();
    let (_, store) = open_store(&config)?;
    if !store.is_autostart() {
        println!("Autostart is off, not starting.");
        return Ok(());
    }
    if !store.is_main_enabled() {
        println!("Service was switched off, not starting.");
        return Ok(());
    }
    cmd_start(gateway, None, None)
}

fn cmd_autostart(active: bool) -> anyhow::Result<()> {
    let config = load_config();
    let (_, store) = open_store(&config)?;
    store
        .set_autostart(active)
        .context("saving autostart switch")?;
    println!("Autostart {}", if active { "enabled" } else { "disabled" });
    Ok(())
}

fn cmd_stop() -> anyhow::Result<()> {
    let config = load_config();
    let coordinator = offline_coordinator(&config)?;
    coordinator.set_main(false);
    println!(
        "Service switched off. A running daemon stops within {}s.",
        config.reconcile_interval.as_secs()
    );
    Ok(())
}

fn cmd_toggle(kind: ChannelKind, active: bool) -> anyhow::Result<()> {
    let config = load_config();
    let coordinator = offline_coordinator(&config)?;
    coordinator.toggle(kind, active);
    println!("{kind} sensor {}", if active { "enabled" } else { "disabled" });
    Ok(())
}

fn cmd_rate(tier: RateTier) -> anyhow::Result<()> {
    let mut config = load_config();
    config.sample_rate = tier.into();
    config.save().context("saving config")?;
    println!("Sample rate set to {tier}");
    Ok(())
}

fn cmd_sync_rate(tier: RateTier) -> anyhow::Result<()> {
    let mut config = load_config();
    config.sync_rate = tier.into();
    config.save().context("saving config")?;
    println!("Sync rate set to {tier}");
    Ok(())
}

fn cmd_sensors(sensors: &str) -> anyhow::Result<()> {
    let mut config = load_config();
    config.sensors = SensorConfig::from_csv(sensors);
    config.save().context("saving config")?;
    println!(
        "Sub-sensors: microphone={} light={} bioharness={} hxm={}",
        config.sensors.microphone,
        config.sensors.light,
        config.sensors.bioharness,
        config.sensors.hxm
    );
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = load_config();

    println!("Sense Platform Status");
    println!("=====================");
    println!();

    let (_, store) = open_store(&config)?;
    let persisted = store.snapshot();
    println!("Service switched on: {}", persisted.main);
    println!("Autostart: {}", store.is_autostart());
    println!("Enabled channels:");
    for kind in ChannelKind::ALL {
        let mark = if persisted.is_enabled(kind) { "on" } else { "off" };
        println!("  {:<18} {mark}", kind.to_string());
    }
    println!();

    let snapshot_path = config.snapshot_path();
    match std::fs::read_to_string(&snapshot_path)
        .ok()
        .and_then(|content| serde_json::from_str::<ServiceSnapshot>(&content).ok())
    {
        Some(snapshot) => {
            println!("Last daemon report ({}):", snapshot.taken_at);
            println!("  Running: {}", snapshot.running);
            println!("  Logged in: {}", snapshot.logged_in);
            println!("  Status bits: {:#05x}", snapshot.status);
            for channel in snapshot.channels.iter().filter(|c| c.enabled) {
                println!(
                    "  {:<18} {}",
                    channel.kind.to_string(),
                    if channel.active { "active" } else { "idle" }
                );
            }
        }
        None => println!("No daemon report found."),
    }
    println!();

    let stats_path = config.transparency_path();
    if stats_path.exists() {
        let log = create_shared_log_with_persistence(stats_path);
        let stats = log.stats();
        println!("Cumulative Statistics:");
        println!("  Readings collected: {}", stats.total_readings());
        println!("  Readings dropped: {}", stats.dropped_readings);
        println!("  Batches transmitted: {}", stats.batches_transmitted);
        println!("  Channel toggles: {}", stats.toggles_applied);
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("serializing config")?
    );
    Ok(())
}

fn describe_tier(raw: i32) -> String {
    match RateTier::try_from(raw) {
        Ok(tier) => tier.to_string(),
        Err(_) => format!("invalid ({raw})"),
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
