//! Multi-portfolio backtester.
//!
//! Runs one or more portfolios over a shared date range and assembles a
//! [`BacktestReport`]: a metrics row per portfolio, growth and value curves,
//! a correlation matrix over every fetched asset and normalized performance
//! scores. A portfolio whose data is missing or too short fails on its own
//! row; the others still complete.

use crate::analytics::{
    diversification_score, normalize_scores, CorrelationMatrix, MetricSummary, MetricValue,
    MetricsConfig, MetricsResult, UndefinedReason,
};
use crate::data::PriceProvider;
use crate::error::{Result, WeightlabError};
use crate::returns::{align, periodic_return, portfolio_returns, RebalanceMode};
use crate::types::{DateRange, Portfolio, PriceSeries, ReturnSeries};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Fetched series by ticker; failures keep their message.
type FetchedPrices = HashMap<String, std::result::Result<PriceSeries, String>>;

/// Backtest settings shared by every portfolio in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub range: DateRange,
    pub rebalance: RebalanceMode,
    /// Benchmark ticker used for beta.
    pub benchmark: Option<String>,
    pub metrics: MetricsConfig,
}

impl BacktestConfig {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            rebalance: RebalanceMode::default(),
            benchmark: None,
            metrics: MetricsConfig::default(),
        }
    }

    pub fn with_rebalance(mut self, mode: RebalanceMode) -> Self {
        self.rebalance = mode;
        self
    }

    pub fn with_benchmark(mut self, ticker: impl Into<String>) -> Self {
        self.benchmark = Some(ticker.into());
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Result for one successfully backtested portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioReport {
    pub portfolio: Portfolio,
    /// First and last aligned price dates.
    pub period: DateRange,
    pub metrics: MetricsResult,
    /// Normalized 0..=100 score relative to the other portfolios in the run.
    pub performance_score: MetricValue,
}

impl PortfolioReport {
    pub fn name(&self) -> &str {
        self.portfolio.name()
    }

    pub fn summary(&self) -> &MetricSummary {
        &self.metrics.summary
    }
}

/// Outcome of one portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PortfolioOutcome {
    Completed(Box<PortfolioReport>),
    Failed { name: String, reason: String },
}

impl PortfolioOutcome {
    pub fn name(&self) -> &str {
        match self {
            PortfolioOutcome::Completed(report) => report.name(),
            PortfolioOutcome::Failed { name, .. } => name,
        }
    }

    pub fn report(&self) -> Option<&PortfolioReport> {
        match self {
            PortfolioOutcome::Completed(report) => Some(report),
            PortfolioOutcome::Failed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PortfolioOutcome::Completed(_))
    }
}

/// Growth curves of several portfolios on the dates they all share, each
/// rebased to 1.0 on the first shared date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedGrowth {
    pub dates: Vec<NaiveDate>,
    pub curves: Vec<(String, Vec<f64>)>,
}

/// Everything a backtest run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub config: BacktestConfig,
    /// One entry per input portfolio, in input order.
    pub outcomes: Vec<PortfolioOutcome>,
    /// Correlations of every asset that could be fetched.
    pub correlation: CorrelationMatrix,
    /// Whether the benchmark was loaded.
    pub benchmark_loaded: bool,
}

impl BacktestReport {
    pub fn completed(&self) -> impl Iterator<Item = &PortfolioReport> {
        self.outcomes.iter().filter_map(|o| o.report())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match o {
            PortfolioOutcome::Failed { name, reason } => Some((name.as_str(), reason.as_str())),
            PortfolioOutcome::Completed(_) => None,
        })
    }

    /// Report of the first portfolio called `name`.
    pub fn get(&self, name: &str) -> Option<&PortfolioReport> {
        self.completed().find(|r| r.name() == name)
    }

    /// Completed portfolio with the highest performance score.
    pub fn best(&self) -> Option<&PortfolioReport> {
        let mut best: Option<&PortfolioReport> = None;
        for report in self.completed() {
            match best {
                Some(b) if report.performance_score.rank_cmp(&b.performance_score, true).is_ge() => {}
                _ => best = Some(report),
            }
        }
        best
    }

    /// Growth curves re-indexed onto the dates every completed portfolio has.
    pub fn aligned_growth(&self) -> AlignedGrowth {
        let reports: Vec<&PortfolioReport> = self.completed().collect();
        let Some(first) = reports.first() else {
            return AlignedGrowth {
                dates: vec![],
                curves: vec![],
            };
        };

        let lookups: Vec<HashMap<NaiveDate, f64>> = reports
            .iter()
            .map(|r| r.metrics.growth.iter().map(|p| (p.date, p.value)).collect())
            .collect();

        let dates: Vec<NaiveDate> = first
            .metrics
            .growth
            .iter()
            .map(|p| p.date)
            .filter(|d| lookups.iter().all(|m| m.contains_key(d)))
            .collect();

        let curves = reports
            .iter()
            .zip(&lookups)
            .map(|(r, m)| {
                let values: Vec<f64> = dates.iter().map(|d| m[d]).collect();
                let base = values.first().copied().unwrap_or(1.0);
                let rebased = values.iter().map(|v| v / base).collect();
                (r.name().to_string(), rebased)
            })
            .collect();

        AlignedGrowth { dates, curves }
    }
}

/// Backtests portfolios against prices from a [`PriceProvider`].
pub struct Backtester<'a> {
    provider: &'a dyn PriceProvider,
    config: BacktestConfig,
}

impl<'a> Backtester<'a> {
    pub fn new(provider: &'a dyn PriceProvider, config: BacktestConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Backtest every portfolio.
    ///
    /// Fails outright only when no portfolio is given; data problems are
    /// reported per portfolio in [`BacktestReport::outcomes`].
    pub fn run(&self, portfolios: &[Portfolio]) -> Result<BacktestReport> {
        if portfolios.is_empty() {
            return Err(WeightlabError::InvalidInput(
                "no portfolios to backtest".to_string(),
            ));
        }
        let range = &self.config.range;
        info!(
            "Backtesting {} portfolios over {} ({:?} rebalancing)",
            portfolios.len(),
            range,
            self.config.rebalance
        );

        // Fetch each ticker once.
        let mut order: Vec<&str> = Vec::new();
        let mut seen = HashSet::new();
        for p in portfolios {
            for t in p.tickers() {
                if seen.insert(t) {
                    order.push(t);
                }
            }
        }

        let mut prices = FetchedPrices::new();
        for ticker in &order {
            let fetched = self.provider.get_prices(ticker, range).map_err(|e| {
                warn!("Could not load {}: {}", ticker, e);
                e.to_string()
            });
            prices.insert(ticker.to_string(), fetched);
        }

        let benchmark = self.load_benchmark(&prices);

        let fetched: Vec<ReturnSeries> = order
            .iter()
            .filter_map(|t| prices.get(*t).and_then(|r| r.as_ref().ok()))
            .map(periodic_return)
            .collect();
        let correlation = CorrelationMatrix::from_series(&fetched);

        let results: Vec<Result<PortfolioReport>> = portfolios
            .par_iter()
            .map(|p| self.run_portfolio(p, &prices, benchmark.as_ref()))
            .collect();

        let raw: Vec<MetricValue> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|r| r.metrics.summary.raw_performance_score())
            .collect();
        let mut scores = normalize_scores(&raw).into_iter();

        let outcomes: Vec<PortfolioOutcome> = results
            .into_iter()
            .zip(portfolios)
            .map(|(result, portfolio)| match result {
                Ok(mut report) => {
                    if let Some(score) = scores.next() {
                        report.performance_score = score;
                    }
                    PortfolioOutcome::Completed(Box::new(report))
                }
                Err(e) => {
                    warn!("Portfolio '{}' failed: {}", portfolio.name(), e);
                    PortfolioOutcome::Failed {
                        name: portfolio.name().to_string(),
                        reason: e.to_string(),
                    }
                }
            })
            .collect();

        let completed = outcomes.iter().filter(|o| o.is_completed()).count();
        info!(
            "Backtest finished: {} completed, {} failed",
            completed,
            outcomes.len() - completed
        );

        Ok(BacktestReport {
            config: self.config.clone(),
            outcomes,
            correlation,
            benchmark_loaded: benchmark.is_some(),
        })
    }

    fn load_benchmark(
        &self,
        prices: &FetchedPrices,
    ) -> Option<ReturnSeries> {
        let ticker = self.config.benchmark.as_deref()?;
        let series = match prices.get(ticker) {
            Some(Ok(series)) => Ok(series.clone()),
            Some(Err(reason)) => Err(reason.clone()),
            None => self
                .provider
                .get_prices(ticker, &self.config.range)
                .map_err(|e| e.to_string()),
        };
        match series {
            Ok(s) => Some(periodic_return(&s)),
            Err(reason) => {
                warn!("Benchmark {} unavailable, beta left undefined: {}", ticker, reason);
                None
            }
        }
    }

    fn run_portfolio(
        &self,
        portfolio: &Portfolio,
        prices: &FetchedPrices,
        benchmark: Option<&ReturnSeries>,
    ) -> Result<PortfolioReport> {
        let series: Vec<PriceSeries> = portfolio
            .tickers()
            .into_iter()
            .map(|t| match prices.get(t) {
                Some(Ok(s)) => Ok(s.clone()),
                Some(Err(reason)) => Err(WeightlabError::DataError(reason.clone())),
                None => Err(WeightlabError::TickerNotFound {
                    ticker: t.to_string(),
                }),
            })
            .collect::<Result<_>>()?;

        let aligned = align(&series, &self.config.range)?;
        let weights = portfolio.weights();
        let returns = portfolio_returns(&aligned, &weights, self.config.rebalance, portfolio.name())?;

        let correlations =
            CorrelationMatrix::from_columns(aligned.tickers().to_vec(), &aligned.returns().columns);
        let diversification = diversification_score(&weights, &correlations.values);

        let metrics = MetricsResult::from_series(
            &returns,
            aligned.first_date(),
            benchmark,
            diversification,
            &self.config.metrics,
        )?;

        Ok(PortfolioReport {
            portfolio: portfolio.clone(),
            period: aligned.period()?,
            performance_score: MetricValue::Undefined(UndefinedReason::DependsOnUndefined),
            metrics,
        })
    }
}
