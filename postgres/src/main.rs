//! Shelf command line tool.
//!
//! `shelf migrate` applies the schema; `shelf dump <kind>` writes every
//! entity of a kind to stdout as JSON lines.

use futures::TryStreamExt;
use shelf_core::QueryOptions;
use shelf_postgres::{ensure_initialized, Config};
use std::io::Write;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: shelf <migrate | dump KIND>";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelf_postgres=info,shelf_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let mut args = std::env::args().skip(1);
    match (args.next().as_deref(), args.next()) {
        (Some("migrate"), None) => {
            let remote = ensure_initialized(&config).await?;
            tracing::info!("Running database migrations...");
            remote.migrate().await?;
            tracing::info!("Migrations applied");
        }
        (Some("dump"), Some(kind)) => {
            let remote = ensure_initialized(&config).await?;
            let store = config.record_store(&kind, remote);
            let mut records = store.fetch(QueryOptions::new())?;

            let mut out = std::io::stdout().lock();
            let mut count = 0usize;
            while let Some(record) = records.try_next().await? {
                let line = serde_json::json!({ "key": record.key(), "data": record });
                writeln!(out, "{}", line)?;
                count += 1;
            }
            tracing::info!(kind = %kind, count, "Dump complete");
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}
