//! Error types for the backtest and optimization engine.

use chrono::NaiveDate;
use thiserror::Error;

/// Main error type for weightlab.
///
/// Mathematically undefined metrics (zero volatility, zero drawdown, ...) are
/// never reported through this type; see [`crate::analytics::MetricValue`].
#[derive(Error, Debug)]
pub enum WeightlabError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Ticker not found: {ticker}")]
    TickerNotFound { ticker: String },

    #[error("No prices for {ticker} between {start} and {end}")]
    DateRangeEmpty {
        ticker: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("Insufficient data for {context}: need {required} observations, have {available}")]
    InsufficientData {
        context: String,
        required: usize,
        available: usize,
    },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl WeightlabError {
    /// True for errors caused by the caller's input (portfolio, weights, range).
    pub fn is_input_error(&self) -> bool {
        matches!(self, WeightlabError::InvalidInput(_))
    }

    /// True for errors caused by missing or too-short price history.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            WeightlabError::TickerNotFound { .. }
                | WeightlabError::DateRangeEmpty { .. }
                | WeightlabError::InsufficientData { .. }
                | WeightlabError::DataError(_)
        )
    }
}

/// Result type alias for weightlab operations.
pub type Result<T> = std::result::Result<T, WeightlabError>;
