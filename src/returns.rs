//! Return construction: date alignment, periodic returns and weighted
//! portfolio returns.
//!
//! # Rebalancing
//!
//! [`weighted_portfolio_return`] computes `Σ wᵢ·rᵢ,ₜ` on every aligned date.
//! That is a portfolio rebalanced back to its target weights at every close.
//! It is the default everywhere and the only mode the optimizer uses, so
//! metrics are reproducible from weights alone. [`buy_and_hold_return`] is the
//! drifting alternative: the initial investment buys shares at the first
//! aligned close and never trades again.

use crate::error::{Result, WeightlabError};
use crate::types::{DateRange, PriceSeries, ReturnSeries};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// How constituent returns are combined into a portfolio return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceMode {
    /// Rebalance to target weights every period.
    #[default]
    Daily,
    /// Buy once at the first aligned close and hold.
    BuyAndHold,
}

/// Closing prices of several tickers on their common dates.
///
/// Only [`align`] builds one, so there are always at least two dates and
/// every column has one close per date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedPrices {
    tickers: Vec<String>,
    dates: Vec<NaiveDate>,
    closes: Vec<Vec<f64>>,
}

impl AlignedPrices {
    /// Periodic returns of every column. The first date is dropped.
    pub fn returns(&self) -> AlignedReturns {
        AlignedReturns {
            tickers: self.tickers.clone(),
            base_date: self.first_date(),
            dates: self.dates[1..].to_vec(),
            columns: self.closes.iter().map(|c| simple_returns(c)).collect(),
        }
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// One column per ticker, each `dates().len()` long.
    pub fn closes(&self) -> &[Vec<f64>] {
        &self.closes
    }

    pub fn first_date(&self) -> NaiveDate {
        self.dates[0]
    }

    pub fn last_date(&self) -> NaiveDate {
        self.dates[self.dates.len() - 1]
    }

    /// First through last aligned date.
    pub fn period(&self) -> Result<DateRange> {
        DateRange::new(self.first_date(), self.last_date())
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Periodic returns of several tickers on shared dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedReturns {
    pub tickers: Vec<String>,
    /// Date of the price the first return is measured from.
    pub base_date: NaiveDate,
    pub dates: Vec<NaiveDate>,
    /// One column per ticker, each `dates.len()` long.
    pub columns: Vec<Vec<f64>>,
}

impl AlignedReturns {
    /// Returns of one ticker.
    pub fn column(&self, ticker: &str) -> Option<&[f64]> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|i| self.columns[i].as_slice())
    }

    /// One ticker's returns as a dated series.
    pub fn series(&self, ticker: &str) -> Option<ReturnSeries> {
        self.column(ticker).map(|c| ReturnSeries {
            label: ticker.to_string(),
            dates: self.dates.clone(),
            values: c.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Align price series on the dates every series has inside `range`.
///
/// Columns keep the input order. Fails with `InvalidInput` for an empty list
/// or a repeated ticker and with `DataError` when fewer than two common dates
/// remain.
pub fn align(series: &[PriceSeries], range: &DateRange) -> Result<AlignedPrices> {
    if series.is_empty() {
        return Err(WeightlabError::InvalidInput(
            "nothing to align: no price series given".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for s in series {
        if !seen.insert(s.ticker()) {
            return Err(WeightlabError::InvalidInput(format!(
                "ticker {} supplied more than once",
                s.ticker()
            )));
        }
    }

    let lookups: Vec<HashMap<NaiveDate, f64>> = series
        .iter()
        .map(|s| {
            s.points()
                .iter()
                .filter(|p| range.contains(p.date))
                .map(|p| (p.date, p.close))
                .collect()
        })
        .collect();

    // Series dates are strictly increasing, so walking the first one keeps order.
    let dates: Vec<NaiveDate> = series[0]
        .points()
        .iter()
        .map(|p| p.date)
        .filter(|d| range.contains(*d))
        .filter(|d| lookups.iter().all(|m| m.contains_key(d)))
        .collect();

    let tickers: Vec<String> = series.iter().map(|s| s.ticker().to_string()).collect();

    if dates.len() < 2 {
        return Err(WeightlabError::DataError(format!(
            "only {} common dates for [{}] in {}; at least 2 are required",
            dates.len(),
            tickers.join(", "),
            range
        )));
    }

    let closes = lookups
        .iter()
        .map(|m| dates.iter().map(|d| m[d]).collect())
        .collect();

    debug!(
        "Aligned {} series on {} dates ({}..={})",
        tickers.len(),
        dates.len(),
        dates[0],
        dates[dates.len() - 1]
    );

    Ok(AlignedPrices {
        tickers,
        dates,
        closes,
    })
}

/// `p[t] / p[t-1] - 1` for consecutive prices.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    if prices.len() < 2 {
        return vec![];
    }
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Periodic returns of one price series; the first date is dropped.
pub fn periodic_return(series: &PriceSeries) -> ReturnSeries {
    let points = series.points();
    let values = simple_returns(&points.iter().map(|p| p.close).collect::<Vec<_>>());
    let dates = points.iter().skip(1).map(|p| p.date).collect();
    ReturnSeries {
        label: series.ticker().to_string(),
        dates,
        values,
    }
}

/// Write `Σ wᵢ·columnsᵢ[t]` into `out` for every `t`.
///
/// Assets are summed in column order starting from zero, so the result is
/// bit-identical wherever it is called from.
pub fn weighted_returns_into(columns: &[Vec<f64>], weights: &[f64], out: &mut Vec<f64>) {
    out.clear();
    let len = columns.first().map_or(0, |c| c.len());
    out.extend((0..len).map(|t| {
        columns
            .iter()
            .zip(weights)
            .fold(0.0, |acc, (col, w)| acc + w * col[t])
    }));
}

fn check_weights(tickers: &[String], weights: &[f64]) -> Result<()> {
    if tickers.len() != weights.len() {
        return Err(WeightlabError::InvalidInput(format!(
            "{} weights given for {} tickers",
            weights.len(),
            tickers.len()
        )));
    }
    Ok(())
}

/// Daily-rebalanced portfolio returns.
pub fn weighted_portfolio_return(
    returns: &AlignedReturns,
    weights: &[f64],
    label: impl Into<String>,
) -> Result<ReturnSeries> {
    check_weights(&returns.tickers, weights)?;
    let mut values = Vec::with_capacity(returns.len());
    weighted_returns_into(&returns.columns, weights, &mut values);
    ReturnSeries::new(label, returns.dates.clone(), values)
}

/// Buy-and-hold portfolio returns: shares bought once at the first aligned
/// close in proportion to `weights`, never rebalanced.
pub fn buy_and_hold_return(
    prices: &AlignedPrices,
    weights: &[f64],
    label: impl Into<String>,
) -> Result<ReturnSeries> {
    check_weights(&prices.tickers, weights)?;

    let shares: Vec<f64> = prices
        .closes
        .iter()
        .zip(weights)
        .map(|(col, w)| w / col[0])
        .collect();

    let value: Vec<f64> = (0..prices.len())
        .map(|t| {
            prices
                .closes
                .iter()
                .zip(&shares)
                .fold(0.0, |acc, (col, s)| acc + s * col[t])
        })
        .collect();

    ReturnSeries::new(label, prices.dates[1..].to_vec(), simple_returns(&value))
}

/// Portfolio returns under the chosen rebalancing mode.
pub fn portfolio_returns(
    prices: &AlignedPrices,
    weights: &[f64],
    mode: RebalanceMode,
    label: impl Into<String>,
) -> Result<ReturnSeries> {
    match mode {
        RebalanceMode::Daily => weighted_portfolio_return(&prices.returns(), weights, label),
        RebalanceMode::BuyAndHold => buy_and_hold_return(prices, weights, label),
    }
}
