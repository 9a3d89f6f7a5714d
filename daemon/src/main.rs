use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod config;
mod telemetry;
mod watcher;

use config::DaemonConfig;
use replica_sync::ReplicationDriver;
use watcher::NotifyChangeSource;

#[derive(Parser, Debug)]
#[command(name = "folder-replica")]
#[command(about = "Keep a replica folder in step with a source folder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Folder to replicate
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Replica folder, created if missing
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Event window length in seconds
    #[arg(short, long)]
    period: Option<u64>,

    /// Log file path
    #[arg(short, long)]
    log_file_path: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Buffer size for content comparison, in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Files checked in parallel during the initial pass
    #[arg(long)]
    scan_concurrency: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigActions {
    /// Show the effective configuration
    Show,
    /// Generate default configuration
    Generate {
        /// Output path for configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Config { action }) => match action {
            ConfigActions::Show => show_config(&cli).await,
            ConfigActions::Generate { output } => generate_config(output.as_ref()).await,
        },
        None => {
            let config = load_config(&cli).await?;
            let _telemetry = telemetry::init(&config.logging)?;

            let result = run(config).await;
            if let Err(e) = &result {
                error!("{:#}", e);
            }
            result
        }
    }
}

async fn load_config(cli: &Cli) -> Result<DaemonConfig> {
    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load(path).await?,
        None => DaemonConfig::default(),
    };
    apply_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

/// Command-line flags win over the configuration file
fn apply_overrides(config: &mut DaemonConfig, cli: &Cli) {
    if let Some(source) = &cli.source {
        config.replica.source = source.clone();
    }
    if let Some(destination) = &cli.destination {
        config.replica.destination = destination.clone();
    }
    if let Some(period) = cli.period {
        config.replica.sync_period = Duration::from_secs(period);
    }
    if let Some(log_file_path) = &cli.log_file_path {
        config.logging.file_path = Some(log_file_path.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(buffer_size) = cli.buffer_size {
        config.replica.buffer_size = buffer_size;
    }
    if let Some(scan_concurrency) = cli.scan_concurrency {
        config.replica.scan_concurrency = scan_concurrency;
    }
}

async fn run(config: DaemonConfig) -> Result<()> {
    config.prepare_destination().await?;

    info!(
        source = %config.replica.source.display(),
        destination = %config.replica.destination.display(),
        period = ?config.replica.sync_period,
        "Starting folder replica"
    );

    let (change_source, raw_events) =
        NotifyChangeSource::start(&config.replica.source, config.replica.channel_capacity)
            .context("Failed to start file watcher")?;

    let shutdown = CancellationToken::new();
    let driver = ReplicationDriver::new(config.replica);
    let mut replication = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { driver.run(raw_events, shutdown).await }
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Received SIGINT, shutting down.");
            shutdown.cancel();
        }
        finished = &mut replication => {
            // Only ends early if the watcher went away
            let snapshot = finished.context("Replication task panicked")??;
            info!("Replication stopped: {}", snapshot.summary());
            return Ok(());
        }
    }

    replication.await.context("Replication task panicked")??;
    drop(change_source);
    info!("Shutdown complete");
    Ok(())
}

async fn show_config(cli: &Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load(path).await?,
        None => DaemonConfig::default(),
    };
    apply_overrides(&mut config, cli);
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn generate_config(output_path: Option<&PathBuf>) -> Result<()> {
    let config = DaemonConfig::default();

    if let Some(path) = output_path {
        config.save(path).await?;
        println!("Configuration generated at {}", path.display());
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "folder-replica",
            "--source",
            "/data/in",
            "-d",
            "/data/out",
            "--period",
            "12",
            "-l",
            "/tmp/replica.log",
            "--buffer-size",
            "1024",
        ])
        .unwrap();

        let mut config = DaemonConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.replica.source, PathBuf::from("/data/in"));
        assert_eq!(config.replica.destination, PathBuf::from("/data/out"));
        assert_eq!(config.replica.sync_period, Duration::from_secs(12));
        assert_eq!(config.logging.file_path, Some(PathBuf::from("/tmp/replica.log")));
        assert_eq!(config.replica.buffer_size, 1024);
        assert_eq!(config.replica.scan_concurrency, 8);
    }

    #[test]
    fn test_config_subcommand() {
        let cli = Cli::try_parse_from(["folder-replica", "config", "generate", "--output", "out.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigActions::Generate { output: Some(_) }
            })
        ));
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
