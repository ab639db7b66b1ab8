use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use wafwatch::config::{Config, DatabaseBackend};
use wafwatch::models::{LogRecord, SampleFilter};
use wafwatch::storage::{PostgresStorage, SqliteStorage, Storage, StorageError, PREVENTION_MODE_KEY};

#[derive(Parser)]
#[command(name = "wafwatch-admin")]
#[command(about = "wafwatch store management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or change the stored prevention mode
    Prevention {
        #[command(subcommand)]
        action: PreventionAction,
    },
    /// Append log records from a JSON-lines file
    Import {
        /// File with one log record per line
        file: PathBuf,
    },
    /// Print request and attack counts
    Stats,
}

#[derive(Subcommand)]
enum PreventionAction {
    /// Show the stored flag
    Get,
    /// Store a new flag (the WAF is not notified; use the API for that)
    Set {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    // Ensure database is initialized
    storage.init().await?;

    let result = run(cli.command, storage.as_ref()).await;
    storage.close().await;
    result
}

async fn run(command: Commands, storage: &dyn Storage) -> Result<()> {
    match command {
        Commands::Prevention {
            action: PreventionAction::Get,
        } => {
            let enabled = storage.get_flag(PREVENTION_MODE_KEY).await?.unwrap_or(false);
            println!("Prevention mode: {}", if enabled { "enabled" } else { "disabled" });
        }
        Commands::Prevention {
            action: PreventionAction::Set { enabled },
        } => {
            storage.put_flag(PREVENTION_MODE_KEY, enabled).await?;
            println!(
                "✓ Prevention mode stored as {} (the WAF picks this up on its next sync or via the API)",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        Commands::Import { file } => {
            let handle = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("failed to open {}", file.display()))?;
            let mut lines = BufReader::new(handle).lines();

            let (mut imported, mut skipped, mut line_no) = (0usize, 0usize, 0usize);
            while let Some(line) = lines.next_line().await? {
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }

                let record: LogRecord = match serde_json::from_str(&line) {
                    Ok(record) => record,
                    Err(e) => {
                        eprintln!("⚠ line {line_no}: not a log record: {e}");
                        skipped += 1;
                        continue;
                    }
                };

                match storage.append_log(&record).await {
                    Ok(()) => imported += 1,
                    Err(StorageError::InvalidRecord(reason)) => {
                        eprintln!("⚠ line {line_no}: {reason}");
                        skipped += 1;
                    }
                    Err(e) => return Err(e).context(format!("failed to store line {line_no}")),
                }
            }

            println!("✓ Imported {imported} records ({skipped} skipped)");
        }
        Commands::Stats => {
            let flagged = SampleFilter {
                flagged_only: true,
                ..SampleFilter::all()
            };
            let total = storage.count_logs(&SampleFilter::all()).await?;
            let attacks = storage.count_logs(&flagged).await?;
            let enabled = storage.get_flag(PREVENTION_MODE_KEY).await?.unwrap_or(false);

            println!("{:<20} {}", "Total requests", total);
            println!("{:<20} {}", "Attacks detected", attacks);
            println!("{:<20} {}", "Prevention mode", enabled);
        }
    }

    Ok(())
}
