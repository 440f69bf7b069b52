//! `poller`: administrative CLI and long-running scheduler process (§6).

mod commands;
mod prompt;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use poller_common::FieldCipher;
use poller_core::Repositories;
use poller_domain::Config;
use poller_infra::database::{
    DbManager, SqliteConnectionRepository, SqliteRetryQueueRepository, SqliteSentOrderRepository,
    SqliteSyncLogRepository,
};
use poller_infra::http::{JsonRpcErpClientFactory, ReqwestWebhookSender};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "poller", about = "Multi-tenant ERP order polling engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler for all enabled connections; runs until ctrl-c.
    Run,
    /// Add a new connection interactively.
    Add,
    /// List configured connections.
    List,
    /// Edit an existing connection interactively.
    Edit { id: i64 },
    /// Delete a connection.
    Delete { id: i64 },
    /// Authenticate against a connection's ERP without running a cycle.
    Test { id: i64 },
    /// Show recent sync logs for a connection.
    Logs {
        #[arg(short, long)]
        connection: Option<i64>,
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
    /// Show retry queue rows for a connection.
    Retries {
        #[arg(short, long)]
        connection: Option<i64>,
    },
    /// Force a retry item to be attempted on the next sweep.
    Retry { id: i64 },
    /// Mark a retry item as discarded.
    Discard { id: i64 },
    /// Reset a connection's circuit breaker to closed.
    ResetCircuit { id: i64 },
    /// Manually redeliver the last N sent orders for a connection.
    Send {
        #[arg(short, long)]
        connection: i64,
        #[arg(long, default_value_t = 1)]
        last: i64,
    },
}

/// Shared handles every subcommand needs: the repositories, the ERP client
/// factory, and the webhook transport.
pub struct App {
    pub repos: Repositories,
    pub erp_factory: Arc<dyn poller_core::ErpClientFactory>,
    pub webhook: Arc<dyn poller_core::WebhookSender>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db = DbManager::new(&config.db_path)?;
    db.run_migrations()?;

    let cipher = Arc::new(FieldCipher::new(config.encryption_key));
    let pool = db.pool().clone();

    let repos = Repositories {
        connections: Arc::new(SqliteConnectionRepository::new(pool.clone(), cipher)),
        sync_logs: Arc::new(SqliteSyncLogRepository::new(pool.clone())),
        retry_queue: Arc::new(SqliteRetryQueueRepository::new(pool.clone())),
        sent_orders: Arc::new(SqliteSentOrderRepository::new(pool)),
    };

    let app = App {
        repos,
        erp_factory: Arc::new(JsonRpcErpClientFactory),
        webhook: Arc::new(ReqwestWebhookSender::new()?),
    };

    let cli = Cli::parse();
    match cli.command {
        Commands::Run => commands::run(&app).await,
        Commands::Add => commands::add(&app).await,
        Commands::List => commands::list(&app).await,
        Commands::Edit { id } => commands::edit(&app, id).await,
        Commands::Delete { id } => commands::delete(&app, id).await,
        Commands::Test { id } => commands::test(&app, id).await,
        Commands::Logs { connection, limit } => commands::logs(&app, connection, limit).await,
        Commands::Retries { connection } => commands::retries(&app, connection).await,
        Commands::Retry { id } => commands::retry(&app, id).await,
        Commands::Discard { id } => commands::discard(&app, id).await,
        Commands::ResetCircuit { id } => commands::reset_circuit(&app, id).await,
        Commands::Send { connection, last } => commands::send(&app, connection, last).await,
    }
}
