// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Bridge CLI
//!
//! Reads bus events as `<topic> <payload>` lines and stores assembled
//! records in SQLite.
//!
//! # Usage
//!
//! ```bash
//! # Bridge events from stdin
//! mosquitto_sub -v -t '+' | sensor-bridge --db readings.db
//!
//! # Replay a recorded capture with a config file
//! sensor-bridge --config bridge.toml --input capture.txt
//!
//! # Import the device's offline logs
//! sensor-bridge import-csv 240315.csv 240316.csv
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensor_bridge::{
    forward_lines, import_csv, BridgeConfig, BridgeService, Persister, RecordStore, SqliteStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sensor-bridge")]
#[command(about = "Sensor Bridge - assemble bus readings into SQLite records", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (SQLite file)
    #[arg(short, long, default_value = "sensor_readings.db")]
    db: String,

    /// Read bus events from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bridge bus events into the database (default)
    Run,
    /// Show record count
    Stats,
    /// List the most recent records
    List {
        /// Number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Print as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Delete all stored records
    Clear {
        /// Confirm deletion
        #[arg(long)]
        confirm: bool,
    },
    /// Import offline device logs (YYMMDD.csv)
    ImportCsv {
        /// Log files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print a configuration file with default values
    GenConfig {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let store = open_store(&args.db, &config)?;
            cmd_run(&config, store, args.input, &args.db).await
        }
        Commands::Stats => {
            let store = open_store(&args.db, &config)?;
            println!("Total records stored: {}", store.count()?);
            Ok(())
        }
        Commands::List { limit, json } => {
            let store = open_store(&args.db, &config)?;
            cmd_list(&store, limit, json)
        }
        Commands::Clear { confirm } => {
            if confirm {
                open_store(&args.db, &config)?.clear()?;
                println!("All records cleared.");
            } else {
                println!("Use --confirm to actually delete records.");
            }
            Ok(())
        }
        Commands::ImportCsv { files } => {
            let store = open_store(&args.db, &config)?;
            cmd_import(&config, store, files).await
        }
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

fn open_store(db: &str, config: &BridgeConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::new(db)?.with_dedup_window(config.dedup_window());
    Ok(Arc::new(store))
}

async fn cmd_run(
    config: &BridgeConfig,
    store: Arc<SqliteStore>,
    input: Option<PathBuf>,
    db: &str,
) -> Result<()> {
    tracing::info!("Sensor Bridge v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Database: {}", db);
    tracing::info!("  Key strategy: {:?}", config.key_strategy);
    tracing::info!("  Staleness window: {} ms", config.staleness_window_ms);

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            tracing::info!("  Input: {}", path.display());
            Box::new(BufReader::new(file))
        }
        None => {
            tracing::info!("  Input: stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    };

    let (service, tx) = BridgeService::new(config, store).context("Invalid configuration")?;

    let feeder = tokio::spawn(forward_lines(reader, tx));
    let abort = feeder.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, draining queued events");
            abort.abort();
        }
    });

    let stats = service.run().await;

    match feeder.await {
        Ok(result) => {
            result.context("Failed to read bus input")?;
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => return Err(e).context("Input task failed"),
    }

    println!("Final statistics:");
    println!("  Received:         {}", stats.received);
    println!("  Rejected:         {}", stats.rejected);
    println!("  Persisted:        {}", stats.persisted);
    println!("  Persist failures: {}", stats.persist_failures);
    println!("  Evicted:          {}", stats.evicted);
    Ok(())
}

fn cmd_list(store: &SqliteStore, limit: usize, json: bool) -> Result<()> {
    let records = store.recent(limit)?;

    if json {
        for record in &records {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    println!(
        "{:>6}  {:<22} {:>9} {:>9} {:>11} {:>9}",
        "id", "created_at", "frequency", "humidity", "temperature", "voltage"
    );
    for r in &records {
        println!(
            "{:>6}  {:<22} {:>9.2} {:>9.2} {:>11.2} {:>9.2}",
            r.id, r.created_at, r.frequency, r.humidity, r.temperature, r.voltage
        );
    }
    Ok(())
}

async fn cmd_import(
    config: &BridgeConfig,
    store: Arc<SqliteStore>,
    files: Vec<PathBuf>,
) -> Result<()> {
    let persister = Persister::new(store, config.retry_policy());

    for path in &files {
        let report = import_csv(path, &persister)
            .await
            .with_context(|| format!("Failed to import {}", path.display()))?;
        println!(
            "{}: {} imported, {} skipped",
            path.display(),
            report.imported,
            report.skipped
        );
    }
    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let text = BridgeConfig::default().to_toml()?;

    match output {
        Some(path) => {
            std::fs::write(&path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default config: {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}
