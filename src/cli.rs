use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ohlcv-plus")]
#[command(about = "Download, persist and update historical OHLCV candle series")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Engine configuration JSON; defaults apply when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Dataset directory, overrides the configuration
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Do not read or write the dataset directory
    #[arg(long, global = true)]
    pub no_store: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a candle series, downloading whatever is not stored yet
    Load {
        /// Market symbol (e.g. BTC/USDT)
        #[arg(short, long)]
        market: String,

        /// Candle timeframe (e.g. 1m, 1h, 1d)
        #[arg(short, long, default_value = "1m")]
        timeframe: String,

        /// Start, "YYYY-MM-DD HH:MM:SS" or "YYYY-MM-DD" in UTC, or epoch milliseconds
        #[arg(short, long)]
        since: String,

        /// Candle count, end date, or -1 for everything up to now
        #[arg(short, long, default_value = "1000", allow_hyphen_values = true)]
        limit: String,

        /// Fetch candles newer than the stored ones first
        #[arg(short, long)]
        update: bool,

        #[arg(short, long)]
        workers: Option<usize>,

        /// Write the loaded series to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List stored datasets
    List,

    /// Delete a stored dataset
    Delete {
        signature: String,
    },
}
