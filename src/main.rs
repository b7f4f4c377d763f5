//! Entry point. Wires config -> Robinhood -> order history, prints JSON records.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use options_history::config::AppConfig;
use options_history::robinhood_client::RobinhoodClient;
use options_history::{Credentials, OrderHistory};

#[derive(Debug, Parser)]
#[command(name = "options-history", about = "Cached Robinhood option-order history")]
struct Cli {
    #[arg(long, default_value = "config.yaml", value_name = "FILE")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print orders with activity dates in [start, end] as JSON.
    Fetch {
        #[arg(long, value_name = "YYYY-MM-DD")]
        start: NaiveDate,
        #[arg(long, value_name = "YYYY-MM-DD")]
        end: NaiveDate,
        /// Table cache key; defaults to cache.default_table.
        #[arg(long, value_name = "NAME")]
        file: Option<String>,
    },
    /// Delete a persisted table (and optionally the raw snapshot).
    Invalidate {
        #[arg(long, value_name = "NAME")]
        file: Option<String>,
        #[arg(long)]
        snapshot: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::load_or_default(&cli.config)?;
    let store = cfg.cache.store();
    info!("Cache dir: {}", store.dir().display());

    match cli.command {
        Command::Fetch { start, end, file } => {
            let client = RobinhoodClient::new(&cfg.robinhood)?;
            let history = OrderHistory::new(client, store);
            let key = file.unwrap_or_else(|| cfg.cache.default_table.clone());
            let credentials = credentials_from_env()?;

            let fetched = history
                .fetch_range(&credentials, start, end, &key)
                .await
                .map_err(|e| anyhow::anyhow!("{}: {}", e.kind().as_str(), e))?;
            for e in &fetched.cache_errors {
                warn!("{}: {}", e.kind().as_str(), e);
            }
            info!(
                "Served {} records from {:?} for {}..={}",
                fetched.records.len(),
                fetched.source,
                start,
                end
            );
            println!("{}", serde_json::to_string_pretty(&fetched.records)?);
        }
        Command::Invalidate { file, snapshot } => {
            let key = file.unwrap_or_else(|| cfg.cache.default_table.clone());
            store
                .invalidate(&key)
                .with_context(|| format!("invalidate {key}"))?;
            if snapshot {
                store.invalidate_snapshot().context("invalidate snapshot")?;
            }
        }
    }
    Ok(())
}

fn credentials_from_env() -> Result<Credentials> {
    let username = std::env::var("ROBINHOOD_USERNAME").context("ROBINHOOD_USERNAME not set")?;
    let password = std::env::var("ROBINHOOD_PASSWORD").context("ROBINHOOD_PASSWORD not set")?;
    let mut credentials = Credentials::new(username, password);
    credentials.mfa_code = std::env::var("ROBINHOOD_MFA_CODE").ok();
    Ok(credentials)
}
