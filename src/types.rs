//! Core data types: portfolios, price series, return series and date ranges.

use crate::error::{Result, WeightlabError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Tolerance used when checking that portfolio weights sum to one.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(WeightlabError::InvalidInput(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse a range from two `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")?;
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")?;
        Self::new(start, end)
    }

    /// Whether a date falls inside the range (bounds included).
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Calendar days spanned by the range.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// A single target allocation inside a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub weight: f64,
}

/// A named basket of tickers with target weights summing to one.
///
/// Portfolios are validated on construction and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPortfolio", into = "RawPortfolio")]
pub struct Portfolio {
    name: String,
    holdings: Vec<Holding>,
}

impl Portfolio {
    /// Create a portfolio from `(ticker, weight)` pairs.
    ///
    /// Fails with `InvalidInput` when the name or holdings are empty, a ticker
    /// repeats, a weight is negative or non-finite, or the weights do not sum
    /// to one within [`WEIGHT_TOLERANCE`].
    pub fn new<I, S>(name: impl Into<String>, weights: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let name = name.into();
        let holdings: Vec<Holding> = weights
            .into_iter()
            .map(|(ticker, weight)| Holding {
                ticker: ticker.into(),
                weight,
            })
            .collect();

        Self::validate(&name, &holdings)?;

        let total: f64 = holdings.iter().map(|h| h.weight).sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(WeightlabError::InvalidInput(format!(
                "weights of portfolio '{}' sum to {:.8}, expected 1",
                name, total
            )));
        }

        Ok(Self { name, holdings })
    }

    /// Create a portfolio from raw non-negative weights (e.g. percentages),
    /// rescaling them so they sum to one.
    pub fn normalized<I, S>(name: impl Into<String>, weights: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let name = name.into();
        let holdings: Vec<Holding> = weights
            .into_iter()
            .map(|(ticker, weight)| Holding {
                ticker: ticker.into(),
                weight,
            })
            .collect();

        Self::validate(&name, &holdings)?;

        let total: f64 = holdings.iter().map(|h| h.weight).sum();
        if total <= 0.0 {
            return Err(WeightlabError::InvalidInput(format!(
                "weights of portfolio '{}' sum to zero",
                name
            )));
        }

        let holdings = holdings
            .into_iter()
            .map(|h| Holding {
                weight: h.weight / total,
                ..h
            })
            .collect();

        Ok(Self { name, holdings })
    }

    fn validate(name: &str, holdings: &[Holding]) -> Result<()> {
        if name.trim().is_empty() {
            return Err(WeightlabError::InvalidInput(
                "portfolio name must not be empty".to_string(),
            ));
        }
        if holdings.is_empty() {
            return Err(WeightlabError::InvalidInput(format!(
                "portfolio '{}' has no holdings",
                name
            )));
        }

        let mut seen = HashSet::new();
        for h in holdings {
            if h.ticker.is_empty() {
                return Err(WeightlabError::InvalidInput(format!(
                    "portfolio '{}' contains an empty ticker",
                    name
                )));
            }
            if !seen.insert(h.ticker.as_str()) {
                return Err(WeightlabError::InvalidInput(format!(
                    "portfolio '{}' lists {} more than once",
                    name, h.ticker
                )));
            }
            if !h.weight.is_finite() || h.weight < 0.0 {
                return Err(WeightlabError::InvalidInput(format!(
                    "portfolio '{}' has invalid weight {} for {}",
                    name, h.weight, h.ticker
                )));
            }
        }
        Ok(())
    }

    /// The balanced 60/40 and S&P 500 presets.
    pub fn presets() -> Vec<Portfolio> {
        vec![
            Portfolio {
                name: "Balanced 60/40".to_string(),
                holdings: vec![
                    Holding {
                        ticker: "SPY".to_string(),
                        weight: 0.6,
                    },
                    Holding {
                        ticker: "AGG".to_string(),
                        weight: 0.4,
                    },
                ],
            },
            Portfolio {
                name: "S&P500".to_string(),
                holdings: vec![Holding {
                    ticker: "VOO".to_string(),
                    weight: 1.0,
                }],
            },
        ]
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    /// Tickers in declaration order.
    pub fn tickers(&self) -> Vec<&str> {
        self.holdings.iter().map(|h| h.ticker.as_str()).collect()
    }

    /// Weights in declaration order.
    pub fn weights(&self) -> Vec<f64> {
        self.holdings.iter().map(|h| h.weight).collect()
    }

    /// Weight for a ticker, zero if absent.
    pub fn weight(&self, ticker: &str) -> f64 {
        self.holdings
            .iter()
            .find(|h| h.ticker == ticker)
            .map(|h| h.weight)
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }
}

impl fmt::Display for Portfolio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .holdings
            .iter()
            .map(|h| format!("{} ({:.1}%)", h.ticker, h.weight * 100.0))
            .collect();
        write!(f, "{}: {}", self.name, parts.join(", "))
    }
}

/// Serialized shape of a portfolio; validated on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPortfolio {
    name: String,
    holdings: Vec<Holding>,
}

impl TryFrom<RawPortfolio> for Portfolio {
    type Error = WeightlabError;

    fn try_from(raw: RawPortfolio) -> Result<Self> {
        Portfolio::new(
            raw.name,
            raw.holdings.into_iter().map(|h| (h.ticker, h.weight)),
        )
    }
}

impl From<Portfolio> for RawPortfolio {
    fn from(p: Portfolio) -> Self {
        Self {
            name: p.name,
            holdings: p.holdings,
        }
    }
}

/// A dated closing price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self { date, close }
    }
}

/// Daily closing prices for one ticker, strictly increasing in date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    ticker: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Build a series, rejecting unordered or duplicate dates and
    /// non-positive or non-finite closes.
    pub fn new(ticker: impl Into<String>, points: Vec<PricePoint>) -> Result<Self> {
        let ticker = ticker.into();
        for w in points.windows(2) {
            if w[1].date <= w[0].date {
                return Err(WeightlabError::DataError(format!(
                    "prices for {} are not strictly increasing at {}",
                    ticker, w[1].date
                )));
            }
        }
        if let Some(p) = points.iter().find(|p| !p.close.is_finite() || p.close <= 0.0) {
            return Err(WeightlabError::DataError(format!(
                "invalid close {} for {} on {}",
                p.close, ticker, p.date
            )));
        }
        Ok(Self { ticker, points })
    }

    /// Build a series from unsorted points, sorting by date and keeping the
    /// first observation of a repeated date.
    pub fn from_unsorted(ticker: impl Into<String>, mut points: Vec<PricePoint>) -> Result<Self> {
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        Self::new(ticker, points)
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Restrict to the points inside `range`.
    pub fn slice(&self, range: &DateRange) -> PriceSeries {
        PriceSeries {
            ticker: self.ticker.clone(),
            points: self
                .points
                .iter()
                .filter(|p| range.contains(p.date))
                .copied()
                .collect(),
        }
    }
}

/// Dated periodic returns (as decimals, 0.01 = 1%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    /// Ticker or portfolio name the returns belong to.
    pub label: String,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl ReturnSeries {
    /// Build a series from parallel date and value vectors.
    pub fn new(label: impl Into<String>, dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self> {
        let label = label.into();
        if dates.len() != values.len() {
            return Err(WeightlabError::DataError(format!(
                "return series {} has {} dates but {} values",
                label,
                dates.len(),
                values.len()
            )));
        }
        Ok(Self {
            label,
            dates,
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(date, return)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates.iter().copied().zip(self.values.iter().copied())
    }
}
