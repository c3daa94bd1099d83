//! Price data sources.
//!
//! The engine never fetches data itself; it asks a [`PriceProvider`] for one
//! ticker's closes over a date range. Two providers ship with the crate:
//!
//! - [`InMemoryPriceProvider`]: series handed in by the caller (tests, embedding)
//! - [`CsvPriceProvider`]: a directory holding one `<TICKER>.csv` per ticker
//!
//! CSV files need a date column and a close column. When an `Adj Close`
//! column is present it is preferred over `Close`.

use crate::error::{Result, WeightlabError};
use crate::types::{DateRange, PricePoint, PriceSeries};
use chrono::{NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Source of historical daily closes.
///
/// Implementations must return only points inside `range`, fail with
/// `TickerNotFound` for unknown tickers and `DateRangeEmpty` when the ticker
/// exists but has no closes in the range.
pub trait PriceProvider: Send + Sync {
    fn get_prices(&self, ticker: &str, range: &DateRange) -> Result<PriceSeries>;
}

/// Provider backed by series held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceProvider {
    series: HashMap<String, PriceSeries>,
}

impl InMemoryPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a ticker's series.
    pub fn insert(&mut self, series: PriceSeries) {
        self.series.insert(series.ticker().to_string(), series);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_series(mut self, series: PriceSeries) -> Self {
        self.insert(series);
        self
    }

    /// Tickers currently available.
    pub fn tickers(&self) -> Vec<&str> {
        let mut tickers: Vec<&str> = self.series.keys().map(|s| s.as_str()).collect();
        tickers.sort_unstable();
        tickers
    }
}

impl PriceProvider for InMemoryPriceProvider {
    fn get_prices(&self, ticker: &str, range: &DateRange) -> Result<PriceSeries> {
        let series = self
            .series
            .get(ticker)
            .ok_or_else(|| WeightlabError::TickerNotFound {
                ticker: ticker.to_string(),
            })?;
        non_empty_slice(series, range)
    }
}

/// Configuration for CSV price files.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Date format string (e.g. "%Y-%m-%d"). Common formats are tried when None.
    pub date_format: Option<String>,
    /// CSV delimiter.
    pub delimiter: u8,
    /// Skip unparsable rows instead of failing.
    pub skip_invalid: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            delimiter: b',',
            skip_invalid: true,
        }
    }
}

/// Provider reading `<dir>/<TICKER>.csv` files.
///
/// Files are read on each request; caching is left to callers.
#[derive(Debug, Clone)]
pub struct CsvPriceProvider {
    dir: PathBuf,
    config: DataConfig,
}

impl CsvPriceProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            config: DataConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DataConfig) -> Self {
        self.config = config;
        self
    }

    /// Path of the file holding `ticker`.
    pub fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", ticker))
    }
}

impl PriceProvider for CsvPriceProvider {
    fn get_prices(&self, ticker: &str, range: &DateRange) -> Result<PriceSeries> {
        let path = self.path_for(ticker);
        if !path.is_file() {
            return Err(WeightlabError::TickerNotFound {
                ticker: ticker.to_string(),
            });
        }
        let series = load_csv(ticker, &path, &self.config)?;
        non_empty_slice(&series, range)
    }
}

fn non_empty_slice(series: &PriceSeries, range: &DateRange) -> Result<PriceSeries> {
    let sliced = series.slice(range);
    if sliced.is_empty() {
        return Err(WeightlabError::DateRangeEmpty {
            ticker: series.ticker().to_string(),
            start: range.start,
            end: range.end,
        });
    }
    Ok(sliced)
}

/// Raw CSV row with flexible column names.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "Datetime",
        alias = "datetime"
    )]
    date: String,
    #[serde(default, alias = "Close", alias = "CLOSE", alias = "c")]
    close: Option<f64>,
    #[serde(default, rename = "Adj Close", alias = "adj_close", alias = "adjclose")]
    adj_close: Option<f64>,
}

/// Load a single ticker's closes from a CSV file.
pub fn load_csv(ticker: &str, path: impl AsRef<Path>, config: &DataConfig) -> Result<PriceSeries> {
    let path = path.as_ref();
    info!("Loading {} prices from: {}", ticker, path.display());

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(config.delimiter)
        .flexible(true)
        .from_path(path)?;

    let mut points = Vec::new();
    let mut skipped = 0;

    for (row_num, result) in reader.deserialize::<CsvRow>().enumerate() {
        let parsed = result
            .map_err(WeightlabError::from)
            .and_then(|row| row_to_point(&row, config.date_format.as_deref()));

        match parsed {
            Ok(point) => points.push(point),
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {} of {}: {}", row_num + 1, path.display(), e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows in {}", skipped, path.display());
    }

    PriceSeries::from_unsorted(ticker, points)
}

fn row_to_point(row: &CsvRow, date_format: Option<&str>) -> Result<PricePoint> {
    let date = parse_date(row.date.trim(), date_format)?;
    let close = row.adj_close.or(row.close).ok_or_else(|| {
        WeightlabError::DataError(format!("row dated {} has no close", row.date))
    })?;
    if !close.is_finite() || close <= 0.0 {
        return Err(WeightlabError::DataError(format!(
            "row dated {} has invalid close {}",
            row.date, close
        )));
    }
    Ok(PricePoint::new(date, close))
}

/// Parse a calendar date, trying an explicit format first and then common
/// date and datetime layouts. Times are discarded.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%Y", "%d-%b-%Y"];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    // Last resort: report the canonical format's error.
    Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) {
        let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_in_memory_provider() {
        let series = PriceSeries::new(
            "SPY",
            vec![
                PricePoint::new(d(2024, 1, 2), 100.0),
                PricePoint::new(d(2024, 1, 3), 101.0),
                PricePoint::new(d(2024, 2, 1), 105.0),
            ],
        )
        .unwrap();
        let provider = InMemoryPriceProvider::new().with_series(series);
        let jan = DateRange::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();

        let got = provider.get_prices("SPY", &jan).unwrap();
        assert_eq!(got.len(), 2);

        let missing = provider.get_prices("spy", &jan).unwrap_err();
        assert!(matches!(missing, WeightlabError::TickerNotFound { .. }));

        let march = DateRange::new(d(2024, 3, 1), d(2024, 3, 31)).unwrap();
        let empty = provider.get_prices("SPY", &march).unwrap_err();
        assert!(matches!(empty, WeightlabError::DateRangeEmpty { .. }));
    }

    #[test]
    fn test_csv_provider_prefers_adjusted_close() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir,
            "AGG.csv",
            "Date,Open,High,Low,Close,Adj Close,Volume\n\
             2024-01-03,99,101,98,100,95,1000\n\
             2024-01-02,99,101,98,100,94,1000\n",
        );
        let provider = CsvPriceProvider::new(dir.path());
        let range = DateRange::new(d(2024, 1, 1), d(2024, 12, 31)).unwrap();
        let series = provider.get_prices("AGG", &range).unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[0].date, d(2024, 1, 2));
        assert!((series.points()[0].close - 94.0).abs() < 1e-12);
    }

    #[test]
    fn test_csv_provider_missing_file() {
        let dir = TempDir::new().unwrap();
        let provider = CsvPriceProvider::new(dir.path());
        let range = DateRange::new(d(2024, 1, 1), d(2024, 12, 31)).unwrap();
        let err = provider.get_prices("NOPE", &range).unwrap_err();
        assert!(matches!(err, WeightlabError::TickerNotFound { .. }));
    }

    #[test]
    fn test_load_csv_skips_bad_rows() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir,
            "X.csv",
            "date,close\n2024-01-02,10\nnot-a-date,11\n2024-01-04,-3\n2024-01-05,12\n",
        );
        let series = load_csv("X", dir.path().join("X.csv"), &DataConfig::default()).unwrap();
        assert_eq!(series.len(), 2);

        let strict = DataConfig {
            skip_invalid: false,
            ..Default::default()
        };
        assert!(load_csv("X", dir.path().join("X.csv"), &strict).is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-01-15", None).unwrap(), d(2024, 1, 15));
        assert_eq!(parse_date("2024/01/15", None).unwrap(), d(2024, 1, 15));
        assert_eq!(parse_date("2024-01-15 16:00:00", None).unwrap(), d(2024, 1, 15));
        assert_eq!(parse_date("15.01.2024", Some("%d.%m.%Y")).unwrap(), d(2024, 1, 15));
        assert!(parse_date("garbage", None).is_err());
    }
}
