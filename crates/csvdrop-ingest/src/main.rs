//! csvdrop - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use csvdrop_common::logging::{init_logging, LogConfig, LogLevel};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use csvdrop_ingest::{
    config::IngestConfig,
    db,
    loader::{BulkLoader, PgBulkLoader},
    service::IngestService,
};

#[derive(Parser, Debug)]
#[command(name = "csvdrop")]
#[command(author, version, about = "Load CSV files dropped into a folder into PostgreSQL", long_about = None)]
struct Cli {
    /// Subcommand to execute (defaults to `run`)
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Drop folder to watch
    #[arg(long, env = "CSVDROP_WATCH_DIR", global = true)]
    watch_dir: Option<PathBuf>,

    /// Folder loaded files are moved to
    #[arg(long, env = "CSVDROP_ARCHIVE_DIR", global = true)]
    archive_dir: Option<PathBuf>,

    /// Target table, optionally schema-qualified
    #[arg(long, env = "CSVDROP_TABLE", global = true)]
    table: Option<String>,

    /// Number of pipeline workers
    #[arg(long, env = "CSVDROP_WORKERS", global = true)]
    workers: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load existing files, then watch the folder until interrupted
    Run,

    /// Load the files currently in the folder and exit
    Scan,

    /// Print rows of the target table as JSON lines, then the total count
    Records {
        /// Maximum number of rows to print
        #[arg(short, long, default_value_t = 100)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("csvdrop")
        .filter_directives("sqlx=warn,notify=info")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let mut config = IngestConfig::load()?;
    apply_overrides(&cli, &mut config);
    config.validate()?;

    info!(
        watch_dir = %config.watch.watch_dir.display(),
        archive_dir = %config.watch.archive_dir.display(),
        table = %config.table.name,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    db::health_check(&pool).await?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let loader = PgBulkLoader::new(pool);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let service = IngestService::bootstrap(config, Arc::new(loader))?;
            service.run(shutdown_signal()).await?;
        }
        Commands::Scan => {
            let service = IngestService::bootstrap(config, Arc::new(loader))?;
            let summary = service.scan_once().await?;
            service.report_row_count().await;
            if summary.failed > 0 {
                anyhow::bail!("{} of {} files failed to load", summary.failed, summary.discovered);
            }
        }
        Commands::Records { limit } => {
            let table = config.table.target();
            for row in loader.fetch_rows(&table, limit).await? {
                println!("{}", row);
            }
            let total = loader.row_count(&table).await?;
            println!("{} rows in {}", total, table.name());
        }
    }

    Ok(())
}

fn apply_overrides(cli: &Cli, config: &mut IngestConfig) {
    if let Some(dir) = &cli.watch_dir {
        config.watch.watch_dir = dir.clone();
    }
    if let Some(dir) = &cli.archive_dir {
        config.watch.archive_dir = dir.clone();
    }
    if let Some(table) = &cli.table {
        config.table.name = table.clone();
    }
    if let Some(workers) = cli.workers {
        config.worker.workers = workers;
    }
}

/// Resolves on Ctrl+C or SIGTERM
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
