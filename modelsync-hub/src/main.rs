//! ModelSync Hub - Main entry point
//!
//! Wires the service together: configuration, database, cache,
//! reconciler, scheduler, realtime broadcaster, and the HTTP server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modelsync_common::config::{resolve_database_path, TomlConfig};
use modelsync_common::events::EventBus;
use modelsync_common::time;

use modelsync_hub::api::{self, AppContext};
use modelsync_hub::cache::TieredCache;
use modelsync_hub::config::{load_sanity_rules, RuntimeSettings};
use modelsync_hub::db;
use modelsync_hub::realtime::{spawn_event_bridge, Broadcaster};
use modelsync_hub::reconcile::Reconciler;
use modelsync_hub::scheduler::Scheduler;
use modelsync_hub::sync::{seed_from_snapshot_if_empty, SyncContext};
use modelsync_hub::upstream::UpstreamClient;

/// Command-line arguments for modelsync-hub
#[derive(Parser, Debug)]
#[command(name = "modelsync-hub")]
#[command(about = "Model record synchronization and distribution hub")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the TOML value)
    #[arg(short, long, env = "MODELSYNC_PORT")]
    port: Option<u16>,

    /// Path to the TOML configuration file
    #[arg(short, long, env = "MODELSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the SQLite database file
    #[arg(short, long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing; RUST_LOG overrides the TOML level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "modelsync_hub={0},modelsync_common={0}",
                    config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting modelsync-hub {} ({}, {} build)",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
    );

    // Environment beats the TOML value for the upstream credential
    if let Ok(key) = std::env::var("MODELSYNC_API_KEY") {
        config.upstream.api_key = Some(key);
    }

    let port = args.port.unwrap_or(config.port);
    let db_path = resolve_database_path(args.database.as_deref(), &config);
    info!("Database: {}", db_path.display());

    let pool = db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let settings = RuntimeSettings::load(&pool)
        .await
        .context("Failed to load runtime settings")?;
    let sanity_rules = load_sanity_rules(&pool, &config.sanity)
        .await
        .context("Failed to load sanity rules")?;

    let events = EventBus::new(100); // 100 event capacity
    let cache = Arc::new(TieredCache::new());
    let reconciler = Arc::new(Reconciler::new(sanity_rules));
    let upstream = Arc::new(
        UpstreamClient::new(&config.upstream).context("Failed to build upstream client")?,
    );
    let broadcaster = Arc::new(Broadcaster::new(
        settings.ws_backfill_size,
        settings.ws_outbound_queue_size,
    ));
    let settings = Arc::new(RwLock::new(settings));

    let sync_ctx = SyncContext {
        pool: pool.clone(),
        cache: cache.clone(),
        events: events.clone(),
        reconciler: reconciler.clone(),
        upstream,
        settings: settings.clone(),
    };

    // Baseline data before the first upstream pass
    let seeded = seed_from_snapshot_if_empty(&sync_ctx)
        .await
        .context("Failed to seed baseline records")?;
    if seeded > 0 {
        info!("Seeded {} baseline records from the bundled snapshot", seeded);
    }

    let shutdown = CancellationToken::new();
    spawn_event_bridge(&events, broadcaster.clone(), shutdown.clone());

    let scheduler = Scheduler::new(sync_ctx, shutdown.clone());
    scheduler.start();

    // First sync runs now rather than one interval from now
    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run_now("model-sync").await {
                warn!("Initial sync failed: {}", e);
            }
        });
    }

    let ctx = AppContext {
        pool,
        cache,
        events,
        reconciler,
        settings,
        scheduler,
        broadcaster,
        started_at: time::now(),
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    api::run(ctx, port, shutdown).await.context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
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
