//! Backbeat player - Main entry point
//!
//! Wires the library database, the relay pipeline and the player FSM
//! together, starts the credit renewal task and runs until a shutdown
//! signal or a fatal player error.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backbeat_common::EventBus;
use backbeat_player::config::Config;
use backbeat_player::credit::CreditRenewer;
use backbeat_player::db::{init_database, SqliteLibrary};
use backbeat_player::player::{FfmpegLauncher, Player, PlayerDeps};
use backbeat_player::relay::{
    frame_buffer, NullVoiceSink, Relay, RelayCore, RingDirectSink, Volume,
};
use backbeat_player::sources::{InMemoryRoster, LogAnnouncer, PassthroughResolver};

/// Command-line arguments for backbeat-player
#[derive(Parser, Debug)]
#[command(name = "backbeat-player")]
#[command(about = "Shared listening session media controller")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "BACKBEAT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the library database path
    #[arg(short, long, env = "BACKBEAT_DATABASE")]
    database: Option<PathBuf>,

    /// Override the initial player state ("stopped" or "djmode")
    #[arg(long, env = "BACKBEAT_INITIAL_STATE")]
    initial_state: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(initial_state) = args.initial_state {
        config.initial_state = initial_state;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Backbeat player");
    info!("Library database: {}", config.database_path.display());

    let pool = init_database(&config.database_path)
        .await
        .context("Failed to initialize the library database")?;
    let library = Arc::new(SqliteLibrary::new(pool, &config.credit));

    // decoder -> relay frame plumbing
    let (producer, consumer) = frame_buffer(config.audio.buffer_capacity);
    let volume = Volume::new(config.audio.default_volume as f32 / 100.0);
    let (exhausted_tx, exhausted_rx) = tokio::sync::mpsc::unbounded_channel();

    let (direct_sink, direct_tap) = RingDirectSink::new(config.audio.buffer_capacity);
    let relay_core = RelayCore::new(
        consumer.clone(),
        Box::new(direct_sink),
        Box::new(NullVoiceSink),
        volume.clone(),
        exhausted_tx,
        config.audio.frame_len(),
        config.audio.ticks_per_second(),
    );
    let relay = Relay::start(relay_core, config.audio.frame_period())
        .context("Failed to start the relay thread")?;
    // no direct-stream server is wired in yet; the tap stays disconnected
    // and the relay drops direct frames on the floor
    drop(direct_tap);

    let events = EventBus::new(256);
    let player = Player::new(
        &config,
        PlayerDeps {
            playlist: library.clone(),
            roster: Arc::new(InMemoryRoster::new()),
            announcer: Arc::new(LogAnnouncer),
            resolver: Arc::new(PassthroughResolver),
            decoder: Arc::new(FfmpegLauncher::new(&config.decoder, &config.audio)),
        },
        events.clone(),
        producer,
        consumer,
        volume,
    );
    let exhaustion_listener = player.spawn_exhaustion_listener(exhausted_rx);

    let renewer = CreditRenewer::new(library, config.credit.renew_hours);
    let renewal_task = tokio::spawn(renewer.run());

    let outcome = tokio::select! {
        result = Arc::clone(&player).run() => match result {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("player stopped with a fatal error: {}", e);
                Err(e.into())
            }
        },
        _ = shutdown_signal() => Ok(()),
    };

    renewal_task.abort();
    exhaustion_listener.abort();
    relay.stop();
    info!("Shutdown complete");
    outcome
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
