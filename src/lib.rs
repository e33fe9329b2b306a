pub mod config;
pub mod download;
pub mod error;
pub mod fetch;
pub mod records;
pub mod session;
pub mod utils;

pub use config::{EngineConfig, RetryPolicy};
pub use download::Target;
pub use error::{AppError, Result};
pub use fetch::{BinanceSource, Candle, CandleSource, SourceError};
pub use records::Store;
pub use session::{LoadOutcome, LoadRequest, Session};
