//! Command-line interface for meshbridge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use meshbridge_core::config::env_vars;
use meshbridge_core::BridgeSettings;
use meshbridge_devices::{
    generic_light, Cluster, DeviceInfo, EndpointInfo, SimulatedRadio, StaticCatalog,
};

/// Model id of the lights the simulated network is seeded with.
const SIMULATED_MODEL: &str = "meshbridge.light";

/// meshbridge - Zigbee to MQTT device operation orchestrator.
#[derive(Parser, Debug)]
#[command(name = "meshbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "meshbridge.toml")]
    config: PathBuf,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge against a simulated radio network built from the
    /// configured devices.
    Run,
    /// Validate the configuration and print the effective settings.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Run => run(&args.config).await,
        Command::Check => check(&args.config),
    }
}

fn init_logging(verbose: bool) {
    // JSON logs for container environments
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_filter = if verbose { "meshbridge=debug" } else { "meshbridge=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

fn load_settings(path: &Path) -> Result<BridgeSettings> {
    BridgeSettings::load_or_default(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn check(path: &Path) -> Result<()> {
    let settings = load_settings(path)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    println!(
        "\nConfiguration OK: {} device(s), {} group(s)",
        settings.devices.len(),
        settings.groups.len()
    );
    Ok(())
}

/// Every configured device becomes a colour light on endpoint 1.
fn simulated_network(settings: &BridgeSettings) -> SimulatedRadio {
    let radio = SimulatedRadio::new();
    for device in &settings.devices {
        radio.add_device(
            DeviceInfo::new(device.ieee.as_str(), SIMULATED_MODEL).with_endpoint(
                EndpointInfo::new(1)
                    .with_inputs([
                        Cluster::Basic,
                        Cluster::Groups,
                        Cluster::Scenes,
                        Cluster::OnOff,
                        Cluster::LevelCtrl,
                        Cluster::ColorCtrl,
                    ])
                    .with_color_capabilities(
                        meshbridge_devices::reporting::COLOR_CAP_XY
                            | meshbridge_devices::reporting::COLOR_CAP_TEMPERATURE,
                    ),
            ),
        );
    }
    radio
}

#[cfg(feature = "mqtt")]
async fn run(path: &Path) -> Result<()> {
    use meshbridge_devices::{Bridge, MqttBus, Topics};
    use tokio::sync::mpsc;

    let settings = load_settings(path)?;
    let topics = Topics::new(settings.mqtt.base_topic.clone());
    let (bus, bus_rx) = MqttBus::connect(&settings.mqtt, &topics.bridge_state());
    let bus = Arc::new(bus);

    let radio = Arc::new(simulated_network(&settings));
    let catalog =
        Arc::new(StaticCatalog::new().with_model(generic_light(SIMULATED_MODEL, "meshbridge")));
    tracing::info!(
        devices = settings.devices.len(),
        broker = %format!("{}:{}", settings.mqtt.server, settings.mqtt.port),
        "Starting meshbridge with a simulated radio network"
    );

    let bridge = Bridge::new(settings, radio, bus.clone(), catalog)?;
    // The simulated network never emits events; keep the sender so the
    // channel stays open.
    let (_radio_tx, radio_rx) = mpsc::channel(256);

    bridge.start().await?;
    bridge.run(radio_rx, bus_rx, shutdown_signal()).await?;
    bridge.stop().await?;

    if let Err(e) = bus.disconnect().await {
        tracing::warn!("MQTT disconnect failed: {}", e);
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(not(feature = "mqtt"))]
async fn run(_path: &Path) -> Result<()> {
    anyhow::bail!("meshbridge was built without the `mqtt` feature; only `check` is available")
}

/// Wait for Ctrl+C or SIGTERM.
#[cfg(feature = "mqtt")]
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
