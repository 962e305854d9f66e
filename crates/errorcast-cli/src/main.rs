mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::AppConfig;
use errorcast_channels::TelegramChannel;
use errorcast_listener::RedisBroker;
use errorcast_relay::{snapshot_path_in, RelayCoordinator};
use errorcast_session::SnapshotFile;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Inbound events buffered between the Telegram poller and the relay.
const INBOUND_BUFFER: usize = 256;

#[derive(Parser)]
#[command(
    name = "errorcast",
    version,
    about = "errorcast: relay server error events from Redis pub/sub to Telegram chats"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "errorcast.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until SIGINT/SIGTERM
    Serve,
    /// Print the persisted sessions
    Sessions {
        /// Print the raw snapshot JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config, |key| std::env::var(key).ok())?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Sessions { json } => print_sessions(&config, json).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let token = config.telegram_token()?;
    let relay_config = config.relay_config()?;

    let mut telegram = TelegramChannel::new(token, INBOUND_BUFFER)
        .with_api_base(config.telegram.api_base.as_str())
        .with_polling(config.telegram.poll_timeout_secs, Duration::from_secs(1));
    let inbound = telegram
        .take_event_receiver()
        .context("Telegram event receiver already taken")?;
    let telegram = Arc::new(telegram);

    let broker = Arc::new(RedisBroker::new(&config.redis.url)?);
    let coordinator = Arc::new(RelayCoordinator::new(relay_config, telegram.clone(), broker));
    let restored = coordinator.restore().await;
    info!(sessions = restored, "Starting errorcast relay");

    let (poll_stop, poll_stop_rx) = watch::channel(false);
    let poller = {
        let telegram = telegram.clone();
        tokio::spawn(async move { telegram.poll_updates(poll_stop_rx).await })
    };

    let handle = coordinator.start(inbound);

    tokio::select! {
        result = shutdown_signal() => {
            result?;
            info!("Shutdown signal received");
        }
        _ = handle.wait_inbound_closed() => warn!("Telegram updates stopped, shutting down"),
    }

    poll_stop.send_replace(true);
    let stats = handle.stop().await;
    match poller.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Telegram poller failed"),
        Err(e) => warn!(error = %e, "Telegram poller task failed"),
    }

    info!(
        received = stats.received,
        dropped = stats.dropped,
        deliveries = stats.deliveries,
        failures = stats.failures,
        reconnects = stats.reconnects,
        "errorcast stopped"
    );
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

async fn print_sessions(config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let path = snapshot_path_in(&config.data_dir);
    let Some(snapshot) = SnapshotFile::new(&path).read().await? else {
        println!("No session snapshot at {}", path.display());
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!(
        "Snapshot saved at {} ({} sessions)",
        snapshot.saved_at.to_rfc3339(),
        snapshot.sessions.len()
    );
    for session in &snapshot.sessions {
        let tiers: Vec<&str> = session.subscriptions().iter().map(|t| t.as_str()).collect();
        println!(
            "  {:>14}  {:<16} {:<28} updated {}",
            session.id.to_string(),
            session.state().as_str(),
            tiers.join(","),
            session.updated_at.to_rfc3339()
        );
    }
    Ok(())
}
