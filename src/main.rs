//! flickrpd-rs: mirror a Flickr account's albums to local storage.
//!
//! Builds a full index of albums and their members, stores each item once
//! under its primary album, paces every API call through one global rate
//! limiter, and records completed downloads in a durable ledger so
//! interrupted runs resume where they stopped.

#![warn(clippy::all)]

mod catalog;
mod cli;
mod config;
mod download;
mod filter;
mod index;
mod ledger;
mod limiter;
mod policy;
mod resolve;
pub mod retry;
mod shutdown;
mod sync;
mod types;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use catalog::flickr::FlickrCatalog;
use catalog::CatalogClient;
use cli::Command;
use ledger::{Ledger, LedgerStore, RunLock, SqliteLedger};
use limiter::RateLimiter;
use policy::HighestQuality;

const LEDGER_FILE: &str = "ledger.db";

/// Run the status command.
async fn run_status(args: cli::StatusArgs) -> anyhow::Result<ExitCode> {
    let directory = config::expand_tilde(&args.directory);
    let ledger_dir =
        config::resolve_ledger_directory(&directory, args.ledger_directory.as_deref());
    let db_path = ledger_dir.join(LEDGER_FILE);

    if !db_path.exists() {
        println!("No ledger found at {}", db_path.display());
        println!("Run a sync first to create it.");
        return Ok(ExitCode::SUCCESS);
    }

    let db = SqliteLedger::open(&db_path).await?;
    let summary = db.summary().await?;

    println!("Ledger: {}", db.path().display());
    println!();
    println!("Downloaded:");
    println!("  Files:       {}", summary.entries);
    println!("  Bytes:       {}", summary.total_bytes);
    println!("  Collections: {}", summary.collections);

    if let Some(run) = &summary.last_run {
        println!();
        if let Some(started) = &run.started_at {
            println!("Last run started:   {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        match &run.completed_at {
            Some(completed) => println!(
                "Last run completed: {}",
                completed.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => println!("Last run did not complete"),
        }
        println!(
            "  {} downloaded, {} failed{}",
            run.downloaded,
            run.failed,
            if run.interrupted { ", interrupted" } else { "" }
        );
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<ExitCode> {
    let config = config::Config::from_cli(args)?;
    tracing::debug!(?config, "Loaded configuration");
    tracing::info!(workers = config.workers, "Starting flickrpd-rs");

    tokio::fs::create_dir_all(&config.ledger_directory).await?;
    let _lock = RunLock::acquire(&config.ledger_directory).await?;

    let store = Arc::new(SqliteLedger::open(&config.ledger_directory.join(LEDGER_FILE)).await?);
    let ledger = Ledger::open(store).await?;
    tracing::info!(entries = ledger.len(), "Resume ledger loaded");

    let api = Arc::new(FlickrCatalog::new(&config.api_key, &config.user_id)?);
    let limiter = Arc::new(RateLimiter::new(config.throttle()));
    let client = CatalogClient::new(api, limiter);
    let policy = HighestQuality::new(config.max_size.max_edge());

    let shutdown_token = shutdown::install_signal_handler()?;
    let sync_config = config.sync_config();
    let summary = sync::SyncEngine::new(&client, &ledger, &policy, &sync_config)
        .run(&shutdown_token)
        .await;
    summary.log(config.dry_run);

    Ok(summary.exit_code())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = cli::Cli::parse();

    let filter = cli.log_level().as_filter();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match cli.effective_command() {
        Command::Status(args) => run_status(args).await,
        Command::Sync(args) => run_sync(args).await,
    }
}
