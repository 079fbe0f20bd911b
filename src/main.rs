// ABOUTME: Entry point for the starhold binary.
// ABOUTME: Loads .env and STARHOLD_* settings, applies CLI overrides, initializes tracing, and runs until ctrl-c.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use starhold_server::StarholdConfig;

/// In-memory entity store with write-back SQLite persistence.
///
/// Every flag falls back to its STARHOLD_* environment variable.
#[derive(Parser, Debug)]
#[command(name = "starhold", version, about)]
struct Args {
    /// SQLite database path (STARHOLD_DB).
    #[arg(long)]
    db: Option<PathBuf>,

    /// YAML schema registry replacing the built-in game schemas (STARHOLD_SCHEMA).
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Seconds between sync passes (STARHOLD_SYNC_INTERVAL_SECS).
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    sync_interval: Option<u64>,

    /// Rows per backing-store call (STARHOLD_SYNC_BATCH).
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    sync_batch: Option<u64>,

    /// Print the effective entity schemas as JSON and exit.
    #[arg(long)]
    print_schemas: bool,
}

impl Args {
    fn apply(&self, config: &mut StarholdConfig) {
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Some(schema) = &self.schema {
            config.schema_path = Some(schema.clone());
        }
        if let Some(secs) = self.sync_interval {
            config.sync_interval = Duration::from_secs(secs);
        }
        if let Some(batch) = self.sync_batch {
            config.sync_batch = batch as usize;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "starhold=info".into()),
        )
        .init();

    let mut config = StarholdConfig::from_env()?;
    args.apply(&mut config);

    if args.print_schemas {
        let registry = starhold_server::load_registry(config.schema_path.as_deref())?;
        println!("{}", serde_json::to_string_pretty(&registry)?);
        return Ok(());
    }

    tracing::info!("starhold starting up (home {})", config.home.display());
    starhold_server::run(config).await
}
