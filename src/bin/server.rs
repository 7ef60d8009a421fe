//! Leara HTTP server
//!
//! Run with: leara-server

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leara::api::{router, AppState};
use leara::storage::Store;
use leara::summary::{Summarizer, SummaryEngine, TemplateSummarizer};
use leara::types::*;

#[derive(Parser, Debug)]
#[command(name = "leara-server")]
#[command(about = "Leara assistant memory server")]
#[command(version)]
struct Args {
    /// Database path (":memory:" for a throwaway store)
    #[arg(
        long,
        env = "LEARA_DB_PATH",
        default_value = "~/.local/share/leara/leara.db"
    )]
    db_path: String,

    /// Journal mode (wal, or delete for network/cloud-synced folders)
    #[arg(long, env = "LEARA_JOURNAL_MODE", default_value = "wal")]
    journal_mode: String,

    /// Maximum pooled database connections
    #[arg(long, env = "LEARA_POOL_SIZE", default_value = "8")]
    pool_size: usize,

    /// Milliseconds to wait for a pooled connection before failing
    #[arg(long, env = "LEARA_ACQUIRE_TIMEOUT_MS", default_value = "5000")]
    acquire_timeout_ms: u64,

    /// Listen address
    #[arg(long, env = "LEARA_BIND", default_value = "127.0.0.1:3000")]
    bind: String,

    /// Expired-memory reaping interval in seconds (0 = disabled)
    #[arg(long, env = "LEARA_REAP_INTERVAL", default_value = "3600")]
    reap_interval_seconds: u64,

    /// Days an expired memory is kept before it is physically deleted
    #[arg(long, env = "LEARA_REAP_RETENTION_DAYS", default_value = "30")]
    reap_retention_days: i64,

    /// Summary generator (template, ollama)
    #[arg(long, env = "LEARA_SUMMARIZER", default_value = "template")]
    summarizer: String,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_URL")]
    ollama_url: Option<String>,

    /// Ollama model used for summaries
    #[arg(long, env = "OLLAMA_MODEL")]
    ollama_model: Option<String>,
}

fn create_summarizer(args: &Args) -> anyhow::Result<Arc<dyn Summarizer>> {
    match args.summarizer.as_str() {
        "template" => Ok(Arc::new(TemplateSummarizer)),
        #[cfg(feature = "ollama")]
        "ollama" => Ok(Arc::new(leara::summary::OllamaSummarizer::new(
            args.ollama_url.clone(),
            args.ollama_model.clone(),
        ))),
        #[cfg(not(feature = "ollama"))]
        "ollama" => anyhow::bail!("built without the `ollama` feature"),
        other => anyhow::bail!("unknown summarizer: {}", other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Expand ~ in path
    let db_path = shellexpand::tilde(&args.db_path).to_string();

    let config = StorageConfig {
        db_path,
        journal_mode: args.journal_mode.parse()?,
        pool_size: args.pool_size,
        acquire_timeout_ms: args.acquire_timeout_ms,
        ..StorageConfig::new("")
    };

    let store = Store::open(config)
        .await
        .context("failed to open database")?;

    let summarizer = create_summarizer(&args)?;
    tracing::info!(summarizer = summarizer.name(), "Summary generator ready");
    let summary = SummaryEngine::new(store.clone(), summarizer, SummaryConfig::default());

    // Start background reaper if enabled
    if args.reap_interval_seconds > 0 {
        let reap_store = store.clone();
        let interval = Duration::from_secs(args.reap_interval_seconds);
        let retention = retention_days(args.reap_retention_days)?;
        retention_cutoff("reap retention", chrono::Utc::now(), retention)?;

        tokio::spawn(async move {
            tracing::info!(
                "Memory reaper started (interval: {}s, retention: {}d)",
                interval.as_secs(),
                retention.num_days()
            );

            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = reap_store.reap_expired_memories(retention).await {
                    tracing::error!("Error reaping expired memories: {}", e);
                }
            }
        });
    }

    let app = router(AppState::new(store.clone(), summary));
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    tracing::info!("Leara server listening on {}", args.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    store.checkpoint().await?;
    store.close();
    Ok(())
}
