//! nightframe-watchdog - keeps a node binary running and applies staged updates.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use nightframe_watchdog::{UpdateSupervisor, WatchdogConfig, digest};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "nightframe-watchdog")]
#[command(about = "Supervise a NIGHTFRAME binary and hot-swap verified updates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise a binary until interrupted
    Run {
        /// Path to config file
        #[arg(short, long, conflicts_with = "binary")]
        config: Option<PathBuf>,

        /// Binary to supervise (instead of a config file)
        #[arg(short, long, required_unless_present = "config")]
        binary: Option<PathBuf>,

        /// Poll interval in milliseconds
        #[arg(long)]
        poll_ms: Option<u64>,

        /// Drain grace period in milliseconds
        #[arg(long)]
        drain_ms: Option<u64>,

        /// Arguments passed to the binary
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Print the SHA-256 of a file, as expected in an update signal
    Hash {
        /// File to hash
        file: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "watchdog.json")]
        output: PathBuf,

        /// Binary the config supervises
        #[arg(long, default_value = "/opt/nightframe/node")]
        binary: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("nightframe_watchdog=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            binary,
            poll_ms,
            drain_ms,
            args,
        } => {
            let mut config = match (config, binary) {
                (Some(path), _) => WatchdogConfig::load(&path)?,
                (None, Some(binary)) => WatchdogConfig::new(binary).with_args(args),
                (None, None) => anyhow::bail!("either --config or --binary is required"),
            };
            if let Some(ms) = poll_ms {
                config = config.with_poll_interval(Duration::from_millis(ms));
            }
            if let Some(ms) = drain_ms {
                config = config.with_drain_grace(Duration::from_millis(ms));
            }
            run(config).await?;
        }

        Commands::Hash { file } => {
            println!("{}", digest::file_digest_hex(&file)?);
        }

        Commands::InitConfig { output, binary } => {
            let config = WatchdogConfig::new(binary);
            config.validate()?;
            config.save(&output)?;
            println!("Config written to {}", output.display());
            println!("Stage updates at {}", config.candidate_path().display());
            println!("Signal them with {}", config.signal_path().display());
        }
    }

    Ok(())
}

async fn run(config: WatchdogConfig) -> anyhow::Result<()> {
    let supervisor = UpdateSupervisor::new(config)?;
    let cancel = CancellationToken::new();

    let signals = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("shutdown requested");
        signals.cancel();
    });

    supervisor.run(cancel).await?;

    let status = supervisor.status();
    info!(
        restarts = status.restarts,
        updates_applied = status.updates_applied,
        updates_rejected = status.updates_rejected,
        "watchdog stopped"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
