//! Command-line interface for StreamWatch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use streamwatch_client::{StreamHubClient, StreamHubClientConfig};
use streamwatch_core::{Config, CONFIG_PATH_ENV};
use streamwatch_poller::{HealthAggregator, Poller, PollerSettings};
use streamwatch_storage::SessionStore;

/// StreamWatch - supervision for bonded video transmitters.
#[derive(Parser, Debug)]
#[command(name = "streamwatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the configured devices until interrupted.
    Run,
    /// Validate the configuration file and list the devices it declares.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(args.config.as_deref())?;
    match args.command {
        Command::Run => run(config).await,
        Command::Check => check(config),
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose {
        "streamwatch=debug"
    } else {
        "streamwatch=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    // JSON format for container environments, compact otherwise.
    let json_logging = std::env::var("STREAMWATCH_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);
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

/// Resolve the config path: flag, then environment, then ./streamwatch.json.
fn load_config(flag: Option<&std::path::Path>) -> Result<Config> {
    let path: PathBuf = match flag {
        Some(path) => path.to_path_buf(),
        None => std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("streamwatch.json")),
    };
    Config::from_file(&path).with_context(|| format!("loading config from {}", path.display()))
}

async fn run(config: Config) -> Result<()> {
    let devices: Vec<_> = config.enabled_devices().cloned().collect();
    if devices.is_empty() {
        anyhow::bail!("no enabled devices in configuration");
    }

    let settings = PollerSettings::from_config(&config.poller);
    let client = StreamHubClient::new(StreamHubClientConfig {
        timeout: settings.fetch_timeout,
        ..StreamHubClientConfig::default()
    });

    let store = Arc::new(SessionStore::new());
    let poller = Arc::new(Poller::new(settings, Arc::new(client), Arc::clone(&store)));
    let health = HealthAggregator::new(Arc::clone(&poller), Arc::clone(&store));

    tracing::info!(devices = devices.len(), "starting poller");
    poller.start(devices);

    // Periodic health line until Ctrl-C.
    let mut report = tokio::time::interval(Duration::from_secs(30));
    report.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                let snapshot = health.snapshot();
                tracing::info!(
                    open_sessions = snapshot.open_sessions,
                    devices = snapshot.devices.len(),
                    "health"
                );
            }
        }
    }

    tracing::info!("shutting down");
    poller.stop().await;

    let snapshot = health.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn check(config: Config) -> Result<()> {
    println!("configuration OK");
    println!(
        "poll interval: {}s, fetch timeout: {}s, silence threshold: {}",
        config.poller.poll_interval_secs,
        config.poller.fetch_timeout_secs,
        config.poller.silence_threshold
    );
    for device in &config.devices {
        let state = if device.enabled { "enabled" } else { "disabled" };
        println!("  {} ({}) {} [{}]", device.id, device.name, device.base_url, state);
    }
    Ok(())
}
