//! Risk and performance metrics.
//!
//! All ratio metrics return a [`MetricValue`]: either a finite number or an
//! explicit `Undefined` marker carrying the reason (zero volatility, no
//! downside observations, ...). Undefined values are never folded into zero
//! and always rank last, so comparison tables cannot be reordered by them.

use crate::error::{Result, WeightlabError};
use crate::types::ReturnSeries;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Trading periods per year for daily data.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Why a metric has no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedReason {
    /// Too few observations.
    InsufficientData,
    /// Return standard deviation is zero.
    ZeroVolatility,
    /// Fewer than two returns below the downside target, or no dispersion among them.
    NoDownside,
    /// The growth curve never fell below a previous peak.
    ZeroDrawdown,
    /// No benchmark was supplied or it could not be loaded.
    NoBenchmark,
    /// The benchmark's returns have zero variance.
    ZeroBenchmarkVariance,
    /// A series has zero variance, so correlation is undefined.
    ZeroVariance,
    /// Cumulative growth reached zero or below; compounding is undefined.
    TotalLoss,
    /// An input needed for the metric is itself undefined.
    DependsOnUndefined,
}

impl UndefinedReason {
    pub fn label(&self) -> &'static str {
        match self {
            UndefinedReason::InsufficientData => "insufficient data",
            UndefinedReason::ZeroVolatility => "zero volatility",
            UndefinedReason::NoDownside => "no downside",
            UndefinedReason::ZeroDrawdown => "zero drawdown",
            UndefinedReason::NoBenchmark => "no benchmark",
            UndefinedReason::ZeroBenchmarkVariance => "flat benchmark",
            UndefinedReason::ZeroVariance => "zero variance",
            UndefinedReason::TotalLoss => "total loss",
            UndefinedReason::DependsOnUndefined => "undefined input",
        }
    }
}

impl fmt::Display for UndefinedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A metric that is either a finite number or explicitly undefined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Defined(f64),
    Undefined(UndefinedReason),
}

impl MetricValue {
    /// Wrap `value`, mapping a non-finite number to `Undefined(reason)`.
    pub fn checked(value: f64, reason: UndefinedReason) -> Self {
        if value.is_finite() {
            MetricValue::Defined(value)
        } else {
            MetricValue::Undefined(reason)
        }
    }

    /// `numerator / denominator`, undefined with `reason` when the
    /// denominator is zero.
    pub fn ratio(numerator: f64, denominator: f64, reason: UndefinedReason) -> Self {
        if denominator == 0.0 {
            MetricValue::Undefined(reason)
        } else {
            Self::checked(numerator / denominator, reason)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Defined(v) => Some(*v),
            MetricValue::Undefined(_) => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, MetricValue::Defined(_))
    }

    /// Apply `f` to a defined value.
    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Self {
        match self {
            MetricValue::Defined(v) => Self::checked(f(v), UndefinedReason::DependsOnUndefined),
            undefined => undefined,
        }
    }

    /// Ordering for ranking: better values first, undefined values last.
    pub fn rank_cmp(&self, other: &Self, higher_is_better: bool) -> Ordering {
        match (self.value(), other.value()) {
            (Some(a), Some(b)) => {
                if higher_is_better {
                    b.total_cmp(&a)
                } else {
                    a.total_cmp(&b)
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Defined(v) => match f.precision() {
                Some(p) => write!(f, "{:.*}", p, v),
                None => write!(f, "{}", v),
            },
            MetricValue::Undefined(reason) => write!(f, "n/a ({})", reason),
        }
    }
}

/// Inputs shared by every metric computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Annual risk-free rate as a decimal.
    pub risk_free_rate: f64,
    /// Periods per year used for annualization.
    pub periods_per_year: f64,
    /// Returns strictly below this count as downside.
    pub downside_target: f64,
    /// Fewest returns a portfolio needs before metrics are computed.
    pub min_periods: usize,
    /// Starting value for value curves.
    pub initial_investment: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
            periods_per_year: TRADING_DAYS_PER_YEAR,
            downside_target: 0.0,
            min_periods: 2,
            initial_investment: 10_000.0,
        }
    }
}

impl MetricsConfig {
    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn with_min_periods(mut self, periods: usize) -> Self {
        self.min_periods = periods;
        self
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Relative size below which a standard deviation is rounding noise.
const ZERO_SPREAD_TOLERANCE: f64 = 1e-12;

/// Mean and sample standard deviation (ddof = 1), with the deviation snapped
/// to exactly zero when the values are constant up to rounding.
fn mean_and_spread(values: &[f64]) -> (f64, f64) {
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    let sd = (ss / (values.len() - 1) as f64).sqrt();
    let constant = values.iter().all(|v| *v == values[0]);
    if constant || sd <= ZERO_SPREAD_TOLERANCE * m.abs().max(1.0) {
        (m, 0.0)
    } else {
        (m, sd)
    }
}

/// Sample standard deviation (ddof = 1); None for fewer than two values.
///
/// Constant inputs give exactly `0.0` even when the mean carries rounding
/// error.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    Some(mean_and_spread(values).1)
}

/// `∏(1 + rₜ) − 1`.
pub fn total_return(returns: &[f64]) -> f64 {
    returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

/// `(1 + total)^(periods_per_year / N) − 1`.
pub fn annualized_return(returns: &[f64], periods_per_year: f64) -> MetricValue {
    if returns.is_empty() {
        return MetricValue::Undefined(UndefinedReason::InsufficientData);
    }
    let growth = 1.0 + total_return(returns);
    if growth <= 0.0 {
        return MetricValue::Undefined(UndefinedReason::TotalLoss);
    }
    MetricValue::checked(
        growth.powf(periods_per_year / returns.len() as f64) - 1.0,
        UndefinedReason::TotalLoss,
    )
}

/// Annualized sample standard deviation of returns.
pub fn volatility(returns: &[f64], periods_per_year: f64) -> MetricValue {
    match sample_std(returns) {
        Some(sd) => MetricValue::Defined(sd * periods_per_year.sqrt()),
        None => MetricValue::Undefined(UndefinedReason::InsufficientData),
    }
}

/// `(annualized − rf) / volatility`.
pub fn sharpe_ratio(annualized: MetricValue, volatility: MetricValue, risk_free_rate: f64) -> MetricValue {
    match (annualized, volatility) {
        (MetricValue::Defined(ret), MetricValue::Defined(vol)) => {
            MetricValue::ratio(ret - risk_free_rate, vol, UndefinedReason::ZeroVolatility)
        }
        (MetricValue::Undefined(r), _) | (_, MetricValue::Undefined(r)) => MetricValue::Undefined(r),
    }
}

/// Annualized sample standard deviation of the returns below `target`.
pub fn downside_deviation(returns: &[f64], target: f64, periods_per_year: f64) -> MetricValue {
    let below: Vec<f64> = returns.iter().copied().filter(|r| *r < target).collect();
    match sample_std(&below) {
        Some(sd) if sd > 0.0 => MetricValue::Defined(sd * periods_per_year.sqrt()),
        _ => MetricValue::Undefined(UndefinedReason::NoDownside),
    }
}

/// `(annualized − rf) / downside deviation`.
pub fn sortino_ratio(annualized: MetricValue, downside: MetricValue, risk_free_rate: f64) -> MetricValue {
    match (annualized, downside) {
        (MetricValue::Defined(ret), MetricValue::Defined(dd)) => {
            MetricValue::ratio(ret - risk_free_rate, dd, UndefinedReason::NoDownside)
        }
        (MetricValue::Undefined(r), _) | (_, MetricValue::Undefined(r)) => MetricValue::Undefined(r),
    }
}

/// Cumulative growth of one unit, starting at 1.0 (length `N + 1`).
pub fn growth_curve(returns: &[f64]) -> Vec<f64> {
    let mut curve = Vec::with_capacity(returns.len() + 1);
    let mut value = 1.0;
    curve.push(value);
    for r in returns {
        value *= 1.0 + r;
        curve.push(value);
    }
    curve
}

/// `(running peak − value) / running peak` at every point of a growth curve.
pub fn drawdown_curve(growth: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    growth
        .iter()
        .map(|&v| {
            peak = peak.max(v);
            if peak > 0.0 {
                (peak - v) / peak
            } else {
                0.0
            }
        })
        .collect()
}

/// Largest peak-to-trough decline of a growth curve, as a positive fraction.
pub fn max_drawdown(growth: &[f64]) -> f64 {
    drawdown_curve(growth).into_iter().fold(0.0, f64::max)
}

/// [`max_drawdown`] of the growth curve of `returns`, without allocating it.
pub fn max_drawdown_from_returns(returns: &[f64]) -> f64 {
    let mut value = 1.0_f64;
    let mut peak = 1.0_f64;
    let mut worst = 0.0_f64;
    for r in returns {
        value *= 1.0 + r;
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst
}

/// `annualized / |max drawdown|`.
pub fn calmar_ratio(annualized: MetricValue, max_drawdown: f64) -> MetricValue {
    match annualized {
        MetricValue::Defined(ret) => {
            MetricValue::ratio(ret, max_drawdown.abs(), UndefinedReason::ZeroDrawdown)
        }
        undefined => undefined,
    }
}

/// `cov(portfolio, benchmark) / var(benchmark)` over aligned slices.
pub fn beta(portfolio: &[f64], benchmark: &[f64]) -> MetricValue {
    let n = portfolio.len().min(benchmark.len());
    if n < 2 {
        return MetricValue::Undefined(UndefinedReason::InsufficientData);
    }
    let (portfolio, benchmark) = (&portfolio[..n], &benchmark[..n]);
    let pm = mean(portfolio);
    let (bm, bsd) = mean_and_spread(benchmark);
    if bsd == 0.0 {
        return MetricValue::Undefined(UndefinedReason::ZeroBenchmarkVariance);
    }

    let cov: f64 = portfolio
        .iter()
        .zip(benchmark)
        .map(|(p, b)| (p - pm) * (b - bm))
        .sum::<f64>()
        / (n - 1) as f64;

    MetricValue::ratio(cov, bsd * bsd, UndefinedReason::ZeroBenchmarkVariance)
}

/// Beta over the dates the two series share.
pub fn beta_against(portfolio: &ReturnSeries, benchmark: Option<&ReturnSeries>) -> MetricValue {
    let Some(benchmark) = benchmark else {
        return MetricValue::Undefined(UndefinedReason::NoBenchmark);
    };
    let (p, b) = join_on_dates(portfolio, benchmark);
    beta(&p, &b)
}

/// Values of two series on their common dates, in date order.
pub fn join_on_dates(left: &ReturnSeries, right: &ReturnSeries) -> (Vec<f64>, Vec<f64>) {
    let lookup: HashMap<NaiveDate, f64> = right.iter().collect();
    left.iter()
        .filter_map(|(date, l)| lookup.get(&date).map(|r| (l, *r)))
        .unzip()
}

/// Pearson correlation of two aligned slices.
pub fn correlation(a: &[f64], b: &[f64]) -> MetricValue {
    let n = a.len().min(b.len());
    if n < 2 {
        return MetricValue::Undefined(UndefinedReason::InsufficientData);
    }
    let (a, b) = (&a[..n], &b[..n]);
    let (am, asd) = mean_and_spread(a);
    let (bm, bsd) = mean_and_spread(b);
    if asd == 0.0 || bsd == 0.0 {
        return MetricValue::Undefined(UndefinedReason::ZeroVariance);
    }

    let cov = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - am) * (y - bm))
        .sum::<f64>()
        / (n - 1) as f64;

    MetricValue::checked(
        (cov / (asd * bsd)).clamp(-1.0, 1.0),
        UndefinedReason::ZeroVariance,
    )
}

/// Symmetric correlation matrix with labelled rows and columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub tickers: Vec<String>,
    pub values: Vec<Vec<MetricValue>>,
}

impl CorrelationMatrix {
    /// Matrix of equally long, aligned return columns.
    pub fn from_columns(tickers: Vec<String>, columns: &[Vec<f64>]) -> Self {
        let n = columns.len();
        let mut values = vec![vec![MetricValue::Defined(1.0); n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let c = correlation(&columns[i], &columns[j]);
                values[i][j] = c;
                values[j][i] = c;
            }
        }
        Self { tickers, values }
    }

    /// Matrix of dated series, each pair joined on the dates both share.
    pub fn from_series(series: &[ReturnSeries]) -> Self {
        let n = series.len();
        let mut values = vec![vec![MetricValue::Defined(1.0); n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = join_on_dates(&series[i], &series[j]);
                let c = correlation(&a, &b);
                values[i][j] = c;
                values[j][i] = c;
            }
        }
        Self {
            tickers: series.iter().map(|s| s.label.clone()).collect(),
            values,
        }
    }

    /// Correlation between two tickers.
    pub fn get(&self, a: &str, b: &str) -> Option<MetricValue> {
        let i = self.tickers.iter().position(|t| t == a)?;
        let j = self.tickers.iter().position(|t| t == b)?;
        Some(self.values[i][j])
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}

/// `1 − Σᵢ≠ⱼ wᵢwⱼ|ρᵢⱼ| / Σᵢ≠ⱼ wᵢwⱼ`: one minus the weighted mean absolute
/// off-diagonal correlation.
///
/// A single-asset portfolio, or one whose whole weight sits in one asset,
/// scores 0.0. Pairs with undefined correlation are skipped; when every pair
/// is undefined the score is undefined.
pub fn diversification_score(weights: &[f64], correlations: &[Vec<MetricValue>]) -> MetricValue {
    let n = weights.len();
    if n < 2 {
        return MetricValue::Defined(0.0);
    }

    let mut weighted_corr = 0.0;
    let mut weight_mass = 0.0;
    let mut any_defined = false;
    for i in 0..n {
        for j in (i + 1)..n {
            if let MetricValue::Defined(rho) = correlations[i][j] {
                any_defined = true;
                let w = weights[i] * weights[j];
                weighted_corr += w * rho.abs();
                weight_mass += w;
            }
        }
    }

    if !any_defined {
        return MetricValue::Undefined(UndefinedReason::ZeroVariance);
    }
    if weight_mass == 0.0 {
        return MetricValue::Defined(0.0);
    }
    MetricValue::checked(1.0 - weighted_corr / weight_mass, UndefinedReason::ZeroVariance)
}

/// Raw comparison score: `annualized × (sharpe + sortino) / 2`.
pub fn raw_performance_score(
    annualized: MetricValue,
    sharpe: MetricValue,
    sortino: MetricValue,
) -> MetricValue {
    match (annualized, sharpe, sortino) {
        (MetricValue::Defined(a), MetricValue::Defined(s), MetricValue::Defined(so)) => {
            MetricValue::checked(a * (s + so) / 2.0, UndefinedReason::DependsOnUndefined)
        }
        _ => MetricValue::Undefined(UndefinedReason::DependsOnUndefined),
    }
}

/// Min-max normalize raw scores to 0..=100. Every defined score becomes 100
/// when they are all equal; undefined raw scores stay undefined.
pub fn normalize_scores(raw: &[MetricValue]) -> Vec<MetricValue> {
    let defined: Vec<f64> = raw.iter().filter_map(|v| v.value()).collect();
    let min = defined.iter().copied().fold(f64::INFINITY, f64::min);
    let max = defined.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    raw.iter()
        .map(|v| match v {
            MetricValue::Defined(x) if max > min => {
                MetricValue::Defined((x - min) / (max - min) * 100.0)
            }
            MetricValue::Defined(_) => MetricValue::Defined(100.0),
            undefined => *undefined,
        })
        .collect()
}

/// Scalar metrics of one return series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub periods: usize,
    pub total_return: f64,
    pub annualized_return: MetricValue,
    pub volatility: MetricValue,
    pub downside_deviation: MetricValue,
    pub sharpe_ratio: MetricValue,
    pub sortino_ratio: MetricValue,
    pub max_drawdown: f64,
    pub calmar_ratio: MetricValue,
    pub beta: MetricValue,
    pub diversification: MetricValue,
}

impl MetricSummary {
    /// Compute every scalar metric from returns.
    ///
    /// `benchmark` must be aligned with `returns` (same dates); pass `None`
    /// when no benchmark is available. `diversification` depends on
    /// constituent correlations, so the caller supplies it.
    pub fn compute(
        returns: &[f64],
        benchmark: Option<&[f64]>,
        diversification: MetricValue,
        config: &MetricsConfig,
    ) -> Self {
        let beta = match benchmark {
            Some(b) => beta(returns, b),
            None => MetricValue::Undefined(UndefinedReason::NoBenchmark),
        };
        Self::with_beta(returns, beta, diversification, config)
    }

    /// Compute every scalar metric with a beta the caller already measured,
    /// e.g. over a narrower window than `returns`.
    pub fn with_beta(
        returns: &[f64],
        beta: MetricValue,
        diversification: MetricValue,
        config: &MetricsConfig,
    ) -> Self {
        let ppy = config.periods_per_year;
        let annualized = annualized_return(returns, ppy);
        let vol = volatility(returns, ppy);
        let downside = downside_deviation(returns, config.downside_target, ppy);
        let mdd = max_drawdown_from_returns(returns);

        Self {
            periods: returns.len(),
            total_return: total_return(returns),
            annualized_return: annualized,
            volatility: vol,
            downside_deviation: downside,
            sharpe_ratio: sharpe_ratio(annualized, vol, config.risk_free_rate),
            sortino_ratio: sortino_ratio(annualized, downside, config.risk_free_rate),
            max_drawdown: mdd,
            calmar_ratio: calmar_ratio(annualized, mdd),
            beta,
            diversification,
        }
    }

    /// The comparison score before normalization.
    pub fn raw_performance_score(&self) -> MetricValue {
        raw_performance_score(self.annualized_return, self.sharpe_ratio, self.sortino_ratio)
    }
}

/// A dated value on a curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Scalar metrics plus growth, value and drawdown curves for one portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub label: String,
    pub summary: MetricSummary,
    /// Growth of one unit; the first point sits on the base date at 1.0.
    pub growth: Vec<CurvePoint>,
    /// Growth scaled by the configured initial investment.
    pub value: Vec<CurvePoint>,
    /// Drawdown from the running peak at each point.
    pub drawdown: Vec<CurvePoint>,
}

impl MetricsResult {
    /// Compute metrics and curves for a dated return series.
    ///
    /// `base_date` is the date of the price the first return is measured
    /// from. Beta is computed over the dates shared with `benchmark`.
    pub fn from_series(
        series: &ReturnSeries,
        base_date: NaiveDate,
        benchmark: Option<&ReturnSeries>,
        diversification: MetricValue,
        config: &MetricsConfig,
    ) -> Result<Self> {
        if series.len() < config.min_periods.max(1) {
            return Err(WeightlabError::InsufficientData {
                context: format!("metrics of {}", series.label),
                required: config.min_periods.max(1),
                available: series.len(),
            });
        }

        let beta = beta_against(series, benchmark);
        let summary = MetricSummary::with_beta(&series.values, beta, diversification, config);

        let dates: Vec<NaiveDate> = std::iter::once(base_date)
            .chain(series.dates.iter().copied())
            .collect();
        let growth_values = growth_curve(&series.values);
        let drawdown_values = drawdown_curve(&growth_values);

        let to_curve = |values: &[f64], scale: f64| -> Vec<CurvePoint> {
            dates
                .iter()
                .zip(values)
                .map(|(&date, &v)| CurvePoint {
                    date,
                    value: v * scale,
                })
                .collect()
        };

        Ok(Self {
            label: series.label.clone(),
            summary,
            growth: to_curve(&growth_values, 1.0),
            value: to_curve(&growth_values, config.initial_investment),
            drawdown: to_curve(&drawdown_values, 1.0),
        })
    }

    /// Last value of the value curve.
    pub fn final_value(&self) -> f64 {
        self.value.last().map(|p| p.value).unwrap_or(0.0)
    }
}
