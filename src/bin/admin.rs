//! threadstore admin
//!
//! Operational commands against a history store. Settings come from the
//! `THREADSTORE_*` environment; flags override the most common ones.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use threadstore::config::HistoryConfig;
use threadstore::history::HistoryManager;
use threadstore::storage::StoreClient;

#[derive(Parser)]
#[command(name = "threadstore-admin")]
#[command(about = "Chat history store administration")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(long, env = "THREADSTORE_DB_PATH")]
    db_path: Option<String>,

    /// Tenant to operate on
    #[arg(long, env = "THREADSTORE_TENANT_ID")]
    tenant: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the store and both containers
    Health,
    /// Container document counts and tenant statistics
    Stats,
    /// Delete expired documents
    PurgeExpired,
    /// Recompute a conversation's metrics from its messages
    Reconcile {
        /// Conversation id
        #[arg(long)]
        conversation: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = HistoryConfig::from_env().context("reading THREADSTORE_* settings")?;
    if let Some(db_path) = cli.db_path {
        config.store.db_path = db_path;
    }
    if let Some(tenant) = cli.tenant {
        config.history.tenant_id = tenant;
    }
    config.validate().context("invalid configuration")?;

    let client = StoreClient::new(config.store.clone());

    match cli.command {
        Commands::Health => {
            // Report initialization failures instead of exiting on them
            if let Err(e) = client.initialize().await {
                tracing::error!("Store initialization failed: {}", e);
            }
            let health = client.health_check().await;
            print_json(&health)?;
            if !health.values().all(|status| status.healthy) {
                std::process::exit(1);
            }
        }
        Commands::Stats => {
            client.initialize().await.context("opening store")?;
            let manager = HistoryManager::new(&client, config.history.clone())?;
            let containers = client.container_stats().await?;
            let tenant = manager.get_tenant_stats().await?;
            print_json(&serde_json::json!({
                "containers": containers,
                "tenant": tenant,
            }))?;
        }
        Commands::PurgeExpired => {
            client.initialize().await.context("opening store")?;
            let purged = client.purge_expired().await?;
            info!(?purged, "Purge complete");
            print_json(&purged)?;
        }
        Commands::Reconcile { conversation } => {
            client.initialize().await.context("opening store")?;
            let manager = HistoryManager::new(&client, config.history.clone())?;
            match manager.reconcile_conversation_metrics(&conversation).await? {
                Some(updated) => print_json(&updated)?,
                None => anyhow::bail!("conversation {} not found", conversation),
            }
        }
    }

    Ok(())
}
