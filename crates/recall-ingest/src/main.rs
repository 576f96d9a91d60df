//! Recall Ingest - device recall ingestion service

use anyhow::{Context, Result};
use clap::Parser;
use recall_common::logging::{init_logging, LogConfig, LogLevel};
use recall_ingest::{
    api,
    backfill::backfill_catalog_numbers,
    config::Config,
    normalize::CatalogExtractor,
    service::IngestionService,
    store::{InMemoryRecallStore, PgRecallStore, RecallStore},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "recall-ingest")]
#[command(author, version, about = "openFDA device recall ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run one ingestion and print its summary
    Run {
        /// Fetch and normalize into an in-memory store; nothing is persisted
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply database migrations
    Migrate,

    /// Serve the HTTP API, optionally with the interval scheduler
    Serve,

    /// Re-extract catalog numbers for every stored recall
    Reextract {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the CLI defaults
    let log_config = LogConfig::for_binary("recall-ingest")
        .with_level(log_level)
        .with_directives("tower_http=info,sqlx=warn")
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let config = Config::load()?;

    match cli.command {
        Command::Run { dry_run } => run_once(&config, dry_run).await,
        Command::Migrate => {
            let store = PgRecallStore::connect(&config.database).await?;
            store.migrate().await?;
            Ok(())
        }
        Command::Serve => serve(config).await,
        Command::Reextract { dry_run } => {
            let store = PgRecallStore::connect(&config.database).await?;
            let extractor = CatalogExtractor::new().context("Invalid catalog pattern")?;
            let report = backfill_catalog_numbers(&store, &extractor, dry_run).await?;
            println!("{report}");
            Ok(())
        }
    }
}

async fn run_once(config: &Config, dry_run: bool) -> Result<()> {
    let store: Arc<dyn RecallStore> = if dry_run {
        info!("Dry run: using an in-memory store");
        Arc::new(InMemoryRecallStore::new())
    } else {
        Arc::new(PgRecallStore::connect(&config.database).await?)
    };

    let service = IngestionService::from_config(config, store)?;
    let summary = service.run_now().await;
    println!("{summary}");

    if summary.is_success() {
        Ok(())
    } else {
        anyhow::bail!("Recall ingestion finished with status {}", summary.status)
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting recall ingestion server");

    let store = PgRecallStore::connect(&config.database).await?;
    store.migrate().await?;

    let service = Arc::new(IngestionService::from_config(&config, Arc::new(store))?);

    let scheduler = if config.schedule.enabled {
        Some(service.spawn_scheduler(&config.schedule))
    } else {
        info!("Scheduled ingestion is disabled (INGEST_SCHEDULE_ENABLED=false)");
        None
    };

    let app = api::router(Arc::clone(&service), &config.server.cors_allowed_origins);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    let drain_secs = config.server.shutdown_timeout_secs;
    let shutdown = {
        let service = Arc::clone(&service);
        async move {
            service.shutdown_on(shutdown_signal()).await;
            info!("Waiting up to {} seconds for connections to close", drain_secs);
            tokio::time::sleep(Duration::from_secs(drain_secs.min(5))).await;
        }
    };

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    // No-op after a signal; stops the scheduler when serving failed
    service.shutdown();
    if let Some(handle) = scheduler {
        handle.await.context("Scheduler task panicked")?;
    }
    served?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
