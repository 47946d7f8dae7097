use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use klinevault_collector::config::{self, Config};
use klinevault_collector::obs;
use klinevault_collector::schedule::Scheduler;
use klinevault_collector::sync::SymbolSyncEngine;
use klinevault_domain::sync::SystemClock;
use klinevault_infrastructure::persistence::postgres_klines::PostgresKlineStore;
use klinevault_infrastructure::source::binance::BinanceKlineClient;

#[derive(Parser)]
#[command(name = "klinevault")]
#[command(about = "Binance kline collection into PostgreSQL.", version)]
struct Cli {
    #[arg(long, default_value = "info")]
    log_level: String,
    #[arg(long, default_value = "plain")]
    log_format: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the per-symbol kline tables for the configured symbol set.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        db_url: String,
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Run the collector loop forever.
    Run {
        #[arg(long, env = "DATABASE_URL")]
        db_url: String,
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
        #[arg(long, env = "BINANCE_API_KEY")]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let cli = Cli::parse();
    obs::init_tracing(&cli.log_level, &cli.log_format)?;
    match cli.command {
        Commands::Migrate { db_url, config } => migrate(&db_url, &config).await,
        Commands::Run {
            db_url,
            config,
            api_key,
        } => collect(&db_url, &config, api_key).await,
    }
}

async fn migrate(db_url: &str, config_path: &Path) -> Result<(), String> {
    let config = load(config_path)?;
    let store = PostgresKlineStore::connect(db_url).await?;
    for symbol in &config.run.symbols {
        store.ensure_table(symbol).await?;
    }
    tracing::info!(tables = config.run.symbols.len(), "migrate complete");
    Ok(())
}

async fn collect(db_url: &str, config_path: &Path, api_key: Option<String>) -> Result<(), String> {
    let config = load(config_path)?;
    let policy = config.sync.to_policy()?;

    let store = PostgresKlineStore::connect(db_url).await?;
    for symbol in &config.run.symbols {
        store.ensure_table(symbol).await?;
    }
    let source = BinanceKlineClient::new(
        &config.source.base_url,
        api_key,
        policy.interval_ms,
        Duration::from_secs(config.source.timeout_secs),
    )?;

    let engine = SymbolSyncEngine::new(&store, &source, policy);
    let scheduler = Scheduler::new(engine, config.run.symbols.clone());
    tracing::info!(symbols = config.run.symbols.len(), "collector started");
    scheduler.run(&SystemClock).await;
    Ok(())
}

fn load(config_path: &Path) -> Result<Config, String> {
    let config = config::load_config(config_path)?;
    config.validate()?;
    Ok(config)
}
