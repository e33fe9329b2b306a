mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use cli::{Cli, Commands};
use ohlcv_plus::config::{load_config, EngineConfig};
use ohlcv_plus::records::{write_candles, Store};
use ohlcv_plus::utils::format_timestamp;
use ohlcv_plus::{BinanceSource, LoadRequest, Session};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = engine_config(&cli)?;

    match cli.command {
        Commands::Load {
            ref market,
            ref timeframe,
            ref since,
            ref limit,
            update,
            workers,
            ref output,
        } => {
            let mut request = LoadRequest::parse(market, timeframe, since, limit)?.with_update(update);
            if let Some(workers) = workers {
                request = request.with_workers(workers);
            }
            let source = Arc::new(BinanceSource::new()?);
            let session = Session::new(source, config);

            let outcome = session
                .load(request)
                .await
                .with_context(|| format!("Failed to load {market} {timeframe}"))?;

            match (outcome.candles.first(), outcome.candles.last()) {
                (Some(first), Some(last)) => println!(
                    "{} candles from {} to {} ({} pages fetched, {} missing)",
                    outcome.candles.len(),
                    format_timestamp(first.timestamp),
                    format_timestamp(last.timestamp),
                    outcome.fetched_pages,
                    outcome.missing
                ),
                _ => println!("no candles in the requested window"),
            }

            if let Some(path) = output {
                write_candles(path, &outcome.candles)
                    .with_context(|| format!("Failed to export to {}", path.display()))?;
                info!("series written to {}", path.display());
            }
        }
        Commands::List => {
            let store = open_store(&config)?;
            let datasets = store.list()?;
            if datasets.is_empty() {
                println!("no datasets in {}", store.root().display());
            }
            for dataset in datasets {
                let last = dataset
                    .last_timestamp
                    .map(format_timestamp)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:<10} {:<10} {:<6} {} .. {}",
                    dataset.signature,
                    dataset.exchange_id,
                    dataset.market,
                    dataset.timeframe,
                    format_timestamp(dataset.since),
                    last
                );
            }
        }
        Commands::Delete { ref signature } => {
            open_store(&config)?.delete(signature)?;
            println!("dataset {signature} deleted");
        }
    }

    Ok(())
}

fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = &cli.store_dir {
        config.store_dir = Some(dir.clone());
    }
    if cli.no_store {
        config.store_dir = None;
    }
    Ok(config)
}

fn open_store(config: &EngineConfig) -> Result<Store> {
    let dir = config
        .store_dir
        .clone()
        .context("persistence is disabled, no dataset directory configured")?;
    Ok(Store::new(dir))
}
