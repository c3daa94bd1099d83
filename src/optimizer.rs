//! Random-simplex weight optimizer.
//!
//! Draws weight vectors uniformly from the simplex (normalized Exp(1) draws,
//! i.e. a symmetric Dirichlet(1)), evaluates every draw against the same
//! aligned return matrix, and keeps the best sample for the chosen objective
//! together with the whole population.
//!
//! Weights are generated sequentially from one seeded [`StdRng`] before a batch
//! is evaluated, and evaluation order never feeds back into the result, so a
//! given seed gives the same population whether batches run on the rayon pool
//! or on the calling thread.

use crate::analytics::{
    beta, diversification_score, CorrelationMatrix, MetricSummary, MetricValue, MetricsConfig,
    UndefinedReason,
};
use crate::data::PriceProvider;
use crate::error::{Result, WeightlabError};
use crate::returns::{align, periodic_return, weighted_returns_into};
use crate::types::{DateRange, Portfolio, PriceSeries, ReturnSeries};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Exp1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MAX_PREALLOCATED: usize = 1 << 16;

/// What the optimizer ranks samples by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Sharpe,
    Sortino,
    Calmar,
    MinVolatility,
    AnnualizedReturn,
    /// Minimize `|beta - target|` against the configured benchmark.
    BetaToTarget,
    Diversification,
}

impl Objective {
    pub const ALL: [Objective; 7] = [
        Objective::Sharpe,
        Objective::Sortino,
        Objective::Calmar,
        Objective::MinVolatility,
        Objective::AnnualizedReturn,
        Objective::BetaToTarget,
        Objective::Diversification,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Objective::Sharpe => "sharpe",
            Objective::Sortino => "sortino",
            Objective::Calmar => "calmar",
            Objective::MinVolatility => "min_volatility",
            Objective::AnnualizedReturn => "annualized_return",
            Objective::BetaToTarget => "beta_to_target",
            Objective::Diversification => "diversification",
        }
    }

    /// False for the objectives that are minimized.
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, Objective::MinVolatility | Objective::BetaToTarget)
    }

    /// Objective value of a metric summary.
    pub fn evaluate(&self, metrics: &MetricSummary, target_beta: f64) -> MetricValue {
        match self {
            Objective::Sharpe => metrics.sharpe_ratio,
            Objective::Sortino => metrics.sortino_ratio,
            Objective::Calmar => metrics.calmar_ratio,
            Objective::MinVolatility => metrics.volatility,
            Objective::AnnualizedReturn => metrics.annualized_return,
            Objective::BetaToTarget => metrics.beta.map(|b| (b - target_beta).abs()),
            Objective::Diversification => metrics.diversification,
        }
    }

    /// Whether `candidate` strictly beats `incumbent`.
    fn improves(&self, candidate: f64, incumbent: f64) -> bool {
        if self.higher_is_better() {
            candidate > incumbent
        } else {
            candidate < incumbent
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Objective {
    type Err = WeightlabError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        match key.as_str() {
            "sharpe" => Ok(Objective::Sharpe),
            "sortino" => Ok(Objective::Sortino),
            "calmar" => Ok(Objective::Calmar),
            "min_volatility" | "minvol" | "volatility" => Ok(Objective::MinVolatility),
            "annualized_return" | "return" => Ok(Objective::AnnualizedReturn),
            "beta_to_target" | "beta" => Ok(Objective::BetaToTarget),
            "diversification" => Ok(Objective::Diversification),
            _ => Err(WeightlabError::InvalidInput(format!(
                "unknown objective '{}'",
                s
            ))),
        }
    }
}

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub objective: Objective,
    /// Number of weight vectors to draw.
    pub samples: usize,
    /// RNG seed; drawn from entropy and recorded in the result when None.
    pub seed: Option<u64>,
    /// Samples evaluated between cancellation checks.
    pub batch_size: usize,
    /// Target for [`Objective::BetaToTarget`].
    pub target_beta: f64,
    /// Benchmark ticker used for beta.
    pub benchmark: Option<String>,
    /// Wall-clock budget, checked between batches.
    pub timeout: Option<Duration>,
    /// Evaluate batches on the rayon pool.
    pub parallel: bool,
    /// Show a progress bar.
    pub show_progress: bool,
    pub metrics: MetricsConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            objective: Objective::Sharpe,
            samples: 10_000,
            seed: None,
            batch_size: 1024,
            target_beta: 1.0,
            benchmark: None,
            timeout: None,
            parallel: true,
            show_progress: false,
            metrics: MetricsConfig::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn new(objective: Objective, samples: usize) -> Self {
        Self {
            objective,
            samples,
            ..Default::default()
        }
    }

    /// Set random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_benchmark(mut self, ticker: impl Into<String>) -> Self {
        self.benchmark = Some(ticker.into());
        self
    }

    pub fn with_target_beta(mut self, target: f64) -> Self {
        self.target_beta = target;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Evaluate on the calling thread only.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.samples == 0 {
            return Err(WeightlabError::InvalidInput(
                "sample count must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(WeightlabError::InvalidInput(
                "batch size must be at least 1".to_string(),
            ));
        }
        if !self.target_beta.is_finite() {
            return Err(WeightlabError::InvalidInput(format!(
                "target beta {} is not finite",
                self.target_beta
            )));
        }
        if self.objective == Objective::BetaToTarget && self.benchmark.is_none() {
            return Err(WeightlabError::OptimizationError(
                "the beta_to_target objective needs a benchmark".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cooperative stop signal shared between a running optimization and its
/// caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Draw `k` weights uniformly from the simplex.
pub fn sample_simplex<R: Rng + ?Sized>(rng: &mut R, k: usize) -> Vec<f64> {
    let draws: Vec<f64> = (0..k).map(|_| rng.sample::<f64, _>(Exp1)).collect();
    let total: f64 = draws.iter().sum();
    if total > 0.0 && total.is_finite() {
        draws.into_iter().map(|x| x / total).collect()
    } else {
        vec![1.0 / k as f64; k]
    }
}

/// One evaluated weight vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSample {
    /// Position in the draw sequence.
    pub index: usize,
    pub weights: Vec<f64>,
    pub objective_value: MetricValue,
    pub metrics: MetricSummary,
}

/// How an optimization run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    Completed,
    Cancelled,
    TimedOut,
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptimizationStatus::Completed => "completed",
            OptimizationStatus::Cancelled => "cancelled",
            OptimizationStatus::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Best sample and the full evaluated population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub objective: Objective,
    pub tickers: Vec<String>,
    pub benchmark: Option<String>,
    pub seed: u64,
    pub status: OptimizationStatus,
    /// Samples asked for.
    pub requested: usize,
    /// First and last aligned price dates.
    pub period: DateRange,
    pub best: OptimizationSample,
    /// Evaluated samples in draw order.
    pub samples: Vec<OptimizationSample>,
}

impl OptimizationResult {
    pub fn evaluated(&self) -> usize {
        self.samples.len()
    }

    pub fn is_complete(&self) -> bool {
        self.status == OptimizationStatus::Completed
    }

    /// The best weights as a portfolio.
    pub fn best_portfolio(&self, name: impl Into<String>) -> Result<Portfolio> {
        Portfolio::new(
            name,
            self.tickers
                .iter()
                .cloned()
                .zip(self.best.weights.iter().copied()),
        )
    }

    /// The `n` best samples, undefined objectives last.
    pub fn top(&self, n: usize) -> Vec<&OptimizationSample> {
        let higher = self.objective.higher_is_better();
        let mut ranked: Vec<&OptimizationSample> = self.samples.iter().collect();
        ranked.sort_by(|a, b| {
            a.objective_value
                .rank_cmp(&b.objective_value, higher)
                .then(a.index.cmp(&b.index))
        });
        ranked.truncate(n);
        ranked
    }
}

/// Benchmark returns joined onto the asset return dates.
struct BenchmarkReturns {
    /// Positions of the shared dates in the asset returns; None when the
    /// benchmark covers every asset date.
    positions: Option<Vec<usize>>,
    values: Vec<f64>,
}

impl BenchmarkReturns {
    fn join(asset_dates: &[NaiveDate], benchmark: &ReturnSeries) -> Self {
        let lookup: HashMap<NaiveDate, f64> = benchmark.iter().collect();
        let (positions, values): (Vec<usize>, Vec<f64>) = asset_dates
            .iter()
            .enumerate()
            .filter_map(|(i, d)| lookup.get(d).map(|v| (i, *v)))
            .unzip();
        if positions.len() < asset_dates.len() {
            debug!(
                "Benchmark {} shares {} of {} return dates",
                benchmark.label,
                positions.len(),
                asset_dates.len()
            );
            Self {
                positions: Some(positions),
                values,
            }
        } else {
            Self {
                positions: None,
                values,
            }
        }
    }

    /// Beta of `returns` over the shared dates only.
    fn beta_of(&self, returns: &[f64]) -> MetricValue {
        match &self.positions {
            None => beta(returns, &self.values),
            Some(positions) => {
                let shared: Vec<f64> = positions.iter().map(|&i| returns[i]).collect();
                beta(&shared, &self.values)
            }
        }
    }
}

/// Precomputed inputs shared by every sample evaluation.
struct EvaluationContext<'a> {
    columns: &'a [Vec<f64>],
    benchmark: Option<&'a BenchmarkReturns>,
    correlations: &'a [Vec<MetricValue>],
    objective: Objective,
    target_beta: f64,
    metrics: &'a MetricsConfig,
}

impl EvaluationContext<'_> {
    fn evaluate(&self, index: usize, weights: Vec<f64>, buf: &mut Vec<f64>) -> OptimizationSample {
        weighted_returns_into(self.columns, &weights, buf);
        let diversification = diversification_score(&weights, self.correlations);
        let beta = match self.benchmark {
            Some(b) => b.beta_of(buf),
            None => MetricValue::Undefined(UndefinedReason::NoBenchmark),
        };
        let metrics = MetricSummary::with_beta(buf, beta, diversification, self.metrics);
        OptimizationSample {
            index,
            objective_value: self.objective.evaluate(&metrics, self.target_beta),
            weights,
            metrics,
        }
    }
}

/// Random-simplex optimizer over a price provider.
pub struct Optimizer<'a> {
    provider: &'a dyn PriceProvider,
    config: OptimizerConfig,
    cancellation: CancellationToken,
}

impl<'a> Optimizer<'a> {
    pub fn new(provider: &'a dyn PriceProvider, config: OptimizerConfig) -> Self {
        Self {
            provider,
            config,
            cancellation: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Handle for cancelling this optimizer from another thread.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Sample weights for `tickers` over `range` and return the best one.
    pub fn run<S: AsRef<str>>(&self, tickers: &[S], range: &DateRange) -> Result<OptimizationResult> {
        let tickers: Vec<String> = tickers.iter().map(|t| t.as_ref().to_string()).collect();
        self.validate_universe(&tickers)?;
        self.config.validate()?;

        let config = &self.config;
        let seed = config.seed.unwrap_or_else(rand::random);
        info!(
            "Optimizing {} over {} assets ({} samples, seed {})",
            config.objective,
            tickers.len(),
            config.samples,
            seed
        );

        // Fetch
        let series: Vec<PriceSeries> = tickers
            .iter()
            .map(|t| self.provider.get_prices(t, range))
            .collect::<Result<_>>()?;

        // Align the assets only; the benchmark must not narrow their window.
        let aligned = align(&series, range)?;
        let returns = aligned.returns();
        if returns.len() < config.metrics.min_periods {
            return Err(WeightlabError::InsufficientData {
                context: format!("optimizing [{}]", tickers.join(", ")),
                required: config.metrics.min_periods,
                available: returns.len(),
            });
        }
        let period = aligned.period()?;

        let benchmark = match &config.benchmark {
            Some(b) => match tickers.iter().position(|t| t == b) {
                Some(i) => Some(periodic_return(&series[i])),
                None => match self.provider.get_prices(b, range) {
                    Ok(s) => Some(periodic_return(&s)),
                    Err(e) if config.objective == Objective::BetaToTarget => return Err(e),
                    Err(e) => {
                        warn!("Benchmark {} unavailable, beta left undefined: {}", b, e);
                        None
                    }
                },
            },
            None => None,
        };
        let benchmark = benchmark.map(|b| BenchmarkReturns::join(&returns.dates, &b));

        let k = tickers.len();
        let columns = &returns.columns;
        let correlations = CorrelationMatrix::from_columns(tickers.clone(), columns);

        let ctx = EvaluationContext {
            columns,
            benchmark: benchmark.as_ref(),
            correlations: &correlations.values,
            objective: config.objective,
            target_beta: config.target_beta,
            metrics: &config.metrics,
        };

        let progress = if config.show_progress {
            let pb = ProgressBar::new(config.samples as u64);
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .map(|s| s.progress_chars("#>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            Some(pb)
        } else {
            None
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut population: Vec<OptimizationSample> =
            Vec::with_capacity(config.samples.min(MAX_PREALLOCATED));
        let mut status = OptimizationStatus::Completed;
        let started = Instant::now();

        while population.len() < config.samples {
            if !population.is_empty() {
                if self.cancellation.is_cancelled() {
                    status = OptimizationStatus::Cancelled;
                    break;
                }
                if config.timeout.is_some_and(|t| started.elapsed() >= t) {
                    status = OptimizationStatus::TimedOut;
                    break;
                }
            }

            let first = population.len();
            let count = config.batch_size.min(config.samples - first);
            let draws: Vec<(usize, Vec<f64>)> = (first..first + count)
                .map(|i| (i, sample_simplex(&mut rng, k)))
                .collect();

            let batch: Vec<OptimizationSample> = if config.parallel {
                draws
                    .into_par_iter()
                    .map_init(Vec::new, |buf, (i, w)| ctx.evaluate(i, w, buf))
                    .collect()
            } else {
                let mut buf = Vec::with_capacity(returns.len());
                draws
                    .into_iter()
                    .map(|(i, w)| ctx.evaluate(i, w, &mut buf))
                    .collect()
            };
            population.extend(batch);

            debug!("Evaluated {}/{} samples", population.len(), config.samples);
            if let Some(pb) = &progress {
                pb.inc(count as u64);
            }
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        if status != OptimizationStatus::Completed {
            warn!(
                "Optimization {} after {} of {} samples",
                status,
                population.len(),
                config.samples
            );
        }

        let best = select_best(config.objective, &population)
            .cloned()
            .ok_or_else(|| {
                WeightlabError::OptimizationError(format!(
                    "no sample has a defined {} among {} evaluated",
                    config.objective,
                    population.len()
                ))
            })?;

        info!(
            "Best {} = {:.4} at sample {} ({} evaluated in {:.2?})",
            config.objective,
            best.objective_value,
            best.index,
            population.len(),
            started.elapsed()
        );

        Ok(OptimizationResult {
            objective: config.objective,
            tickers,
            benchmark: config.benchmark.clone(),
            seed,
            status,
            requested: config.samples,
            period,
            best,
            samples: population,
        })
    }

    fn validate_universe(&self, tickers: &[String]) -> Result<()> {
        if tickers.is_empty() {
            return Err(WeightlabError::InvalidInput(
                "the asset universe is empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for t in tickers {
            if t.trim().is_empty() {
                return Err(WeightlabError::InvalidInput("empty ticker".to_string()));
            }
            if !seen.insert(t.as_str()) {
                return Err(WeightlabError::InvalidInput(format!(
                    "ticker {} appears more than once",
                    t
                )));
            }
        }
        Ok(())
    }
}

/// Best sample by objective value; the lowest index wins ties and undefined
/// values never win.
fn select_best(objective: Objective, samples: &[OptimizationSample]) -> Option<&OptimizationSample> {
    let mut best: Option<(&OptimizationSample, f64)> = None;
    for sample in samples {
        let Some(value) = sample.objective_value.value() else {
            continue;
        };
        match best {
            Some((_, incumbent)) if !objective.improves(value, incumbent) => {}
            _ => best = Some((sample, value)),
        }
    }
    best.map(|(s, _)| s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::beta_against;
    use crate::data::InMemoryPriceProvider;
    use crate::returns::weighted_portfolio_return;
    use crate::types::{PricePoint, WEIGHT_TOLERANCE};
    use chrono::NaiveDate;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
    }

    fn range() -> DateRange {
        DateRange::new(start(), NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()).unwrap()
    }

    /// Deterministic wavy price path.
    fn wavy(ticker: &str, days: i64, drift: f64, amp: f64, freq: f64, phase: f64) -> PriceSeries {
        let mut price = 100.0;
        let points = (0..days)
            .map(|i| {
                if i > 0 {
                    price *= 1.0 + drift + amp * ((i as f64) * freq + phase).sin();
                }
                PricePoint::new(start() + chrono::Duration::days(i), price)
            })
            .collect();
        PriceSeries::new(ticker, points).unwrap()
    }

    fn provider() -> InMemoryPriceProvider {
        InMemoryPriceProvider::new()
            .with_series(wavy("AAA", 120, 0.0008, 0.012, 0.7, 0.0))
            .with_series(wavy("BBB", 120, 0.0003, 0.006, 1.3, 1.0))
            .with_series(wavy("CCC", 120, 0.0010, 0.020, 0.4, 2.0))
            .with_series(wavy("IDX", 120, 0.0005, 0.010, 0.7, 0.3))
    }

    fn run(config: OptimizerConfig) -> Result<OptimizationResult> {
        let p = provider();
        Optimizer::new(&p, config).run(&["AAA", "BBB", "CCC"], &range())
    }

    #[test]
    fn test_sample_simplex_is_on_simplex() {
        let mut rng = StdRng::seed_from_u64(7);
        for k in 1..6 {
            let w = sample_simplex(&mut rng, k);
            assert_eq!(w.len(), k);
            assert!(w.iter().all(|x| *x >= 0.0));
            assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_every_sample_is_a_valid_weight_vector() {
        let result = run(OptimizerConfig::new(Objective::Sharpe, 300).with_seed(1)).unwrap();
        assert_eq!(result.evaluated(), 300);
        for (i, s) in result.samples.iter().enumerate() {
            assert_eq!(s.index, i);
            assert_eq!(s.weights.len(), 3);
            assert!(s.weights.iter().all(|w| *w >= 0.0));
            assert!((s.weights.iter().sum::<f64>() - 1.0).abs() < WEIGHT_TOLERANCE);
        }
    }

    #[test]
    fn test_same_seed_same_result() {
        let a = run(OptimizerConfig::new(Objective::Sortino, 200).with_seed(42)).unwrap();
        let b = run(OptimizerConfig::new(Objective::Sortino, 200).with_seed(42)).unwrap();
        assert_eq!(a, b);

        let c = run(OptimizerConfig::new(Objective::Sortino, 200).with_seed(43)).unwrap();
        assert_ne!(a.samples[0].weights, c.samples[0].weights);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let config = OptimizerConfig::new(Objective::Sharpe, 500)
            .with_seed(9)
            .with_batch_size(64);
        let parallel = run(config.clone()).unwrap();
        let sequential = run(config.sequential()).unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_batch_size_does_not_change_population() {
        let small = run(OptimizerConfig::new(Objective::Calmar, 150).with_seed(5).with_batch_size(7)).unwrap();
        let large = run(OptimizerConfig::new(Objective::Calmar, 150).with_seed(5).with_batch_size(1000)).unwrap();
        assert_eq!(small.samples, large.samples);
        assert_eq!(small.best, large.best);
    }

    #[test]
    fn test_best_is_optimal_in_population() {
        for objective in [Objective::Sharpe, Objective::MinVolatility, Objective::Diversification] {
            let result = run(OptimizerConfig::new(objective, 250).with_seed(3)).unwrap();
            let best = result.best.objective_value.value().unwrap();
            for s in &result.samples {
                if let Some(v) = s.objective_value.value() {
                    if objective.higher_is_better() {
                        assert!(v <= best);
                    } else {
                        assert!(v >= best);
                    }
                }
            }
            assert_eq!(result.top(1)[0].index, result.best.index);
        }
    }

    #[test]
    fn test_single_asset_gets_full_weight() {
        let p = provider();
        let result = Optimizer::new(&p, OptimizerConfig::new(Objective::Sharpe, 10).with_seed(1))
            .run(&["AAA"], &range())
            .unwrap();
        assert!(result.samples.iter().all(|s| s.weights == vec![1.0]));
        assert_eq!(result.best.index, 0);
        assert_eq!(result.best.metrics.diversification, MetricValue::Defined(0.0));
    }

    #[test]
    fn test_beta_to_target() {
        let config = OptimizerConfig::new(Objective::BetaToTarget, 200)
            .with_seed(11)
            .with_benchmark("IDX")
            .with_target_beta(0.5);
        let result = run(config).unwrap();
        assert!(result.best.metrics.beta.is_defined());
        let distance = result.best.objective_value.value().unwrap();
        let beta = result.best.metrics.beta.value().unwrap();
        assert!((distance - (beta - 0.5).abs()).abs() < 1e-12);
    }

    #[test]
    fn test_short_benchmark_only_narrows_beta() {
        let late_full = wavy("LATE", 120, 0.0005, 0.010, 0.7, 0.3);
        let late = PriceSeries::new("LATE", late_full.points()[100..].to_vec()).unwrap();
        let p = provider().with_series(late);

        let config = OptimizerConfig::new(Objective::Sharpe, 100).with_seed(4);
        let plain = Optimizer::new(&p, config.clone())
            .run(&["AAA", "BBB"], &range())
            .unwrap();
        let benchmarked = Optimizer::new(&p, config.with_benchmark("LATE"))
            .run(&["AAA", "BBB"], &range())
            .unwrap();

        assert_eq!(benchmarked.period, plain.period);
        assert_eq!(benchmarked.best.index, plain.best.index);
        for (a, b) in plain.samples.iter().zip(&benchmarked.samples) {
            assert_eq!(b.metrics.periods, 119);
            assert_eq!(a.metrics.sharpe_ratio, b.metrics.sharpe_ratio);
            assert_eq!(a.metrics.max_drawdown, b.metrics.max_drawdown);
            assert_eq!(a.objective_value, b.objective_value);
            assert!(b.metrics.beta.is_defined());
        }

        // Beta is measured over the 19 return dates the benchmark shares.
        let assets = [
            p.get_prices("AAA", &range()).unwrap(),
            p.get_prices("BBB", &range()).unwrap(),
        ];
        let aligned = align(&assets, &range()).unwrap();
        let best =
            weighted_portfolio_return(&aligned.returns(), &benchmarked.best.weights, "best").unwrap();
        let bench = periodic_return(&p.get_prices("LATE", &range()).unwrap());
        assert_eq!(bench.len(), 19);
        let expected = beta_against(&best, Some(&bench)).value().unwrap();
        assert!((benchmarked.best.metrics.beta.value().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_benchmark_inside_universe_reuses_its_returns() {
        let result = run(
            OptimizerConfig::new(Objective::Sharpe, 20)
                .with_seed(6)
                .with_benchmark("AAA"),
        )
        .unwrap();
        assert!(result.samples.iter().all(|s| s.metrics.beta.is_defined()));
        assert_eq!(result.best.metrics.periods, 119);
    }

    #[test]
    fn test_beta_to_target_without_benchmark_fails_before_fetch() {
        let empty = InMemoryPriceProvider::new();
        let err = Optimizer::new(&empty, OptimizerConfig::new(Objective::BetaToTarget, 10))
            .run(&["AAA", "BBB"], &range())
            .unwrap_err();
        assert!(matches!(err, WeightlabError::OptimizationError(_)));
    }

    #[test]
    fn test_invalid_universe() {
        let p = provider();
        let config = OptimizerConfig::new(Objective::Sharpe, 10);
        let empty: [&str; 0] = [];
        assert!(Optimizer::new(&p, config.clone()).run(&empty, &range()).unwrap_err().is_input_error());
        assert!(Optimizer::new(&p, config.clone())
            .run(&["AAA", "AAA"], &range())
            .unwrap_err()
            .is_input_error());
        assert!(Optimizer::new(&p, OptimizerConfig::new(Objective::Sharpe, 0))
            .run(&["AAA"], &range())
            .unwrap_err()
            .is_input_error());
    }

    #[test]
    fn test_missing_ticker_is_data_error() {
        let p = provider();
        let err = Optimizer::new(&p, OptimizerConfig::new(Objective::Sharpe, 10))
            .run(&["AAA", "ZZZ"], &range())
            .unwrap_err();
        assert!(err.is_data_error());
    }

    #[test]
    fn test_no_defined_objective_is_an_error() {
        // Strictly rising prices never produce downside returns.
        let rising = |t: &str, g: f64| {
            let points = (0..30)
                .map(|i| {
                    let x = i as f64;
                    PricePoint::new(start() + chrono::Duration::days(i), 100.0 + 100.0 * g * x + g * x * x)
                })
                .collect();
            PriceSeries::new(t, points).unwrap()
        };
        let p = InMemoryPriceProvider::new()
            .with_series(rising("UP1", 0.001))
            .with_series(rising("UP2", 0.002));
        let err = Optimizer::new(&p, OptimizerConfig::new(Objective::Sortino, 20).with_seed(1))
            .run(&["UP1", "UP2"], &range())
            .unwrap_err();
        assert!(matches!(err, WeightlabError::OptimizationError(_)));
    }

    #[test]
    fn test_cancelled_run_returns_first_batch() {
        let p = provider();
        let token = CancellationToken::new();
        token.cancel();
        let result = Optimizer::new(
            &p,
            OptimizerConfig::new(Objective::Sharpe, 1000)
                .with_seed(2)
                .with_batch_size(50),
        )
        .with_cancellation(token)
        .run(&["AAA", "BBB"], &range())
        .unwrap();

        assert_eq!(result.status, OptimizationStatus::Cancelled);
        assert_eq!(result.evaluated(), 50);
        assert_eq!(result.requested, 1000);
        assert!(result.best.index < 50);
    }

    #[test]
    fn test_timeout_stops_between_batches() {
        let result = run(
            OptimizerConfig::new(Objective::Sharpe, 1000)
                .with_seed(2)
                .with_batch_size(100)
                .with_timeout(Duration::ZERO),
        )
        .unwrap();
        assert_eq!(result.status, OptimizationStatus::TimedOut);
        assert_eq!(result.evaluated(), 100);
    }

    #[test]
    fn test_entropy_seed_is_recorded_and_replayable() {
        let first = run(OptimizerConfig::new(Objective::Sharpe, 50)).unwrap();
        let replay = run(OptimizerConfig::new(Objective::Sharpe, 50).with_seed(first.seed)).unwrap();
        assert_eq!(first.samples, replay.samples);
    }

    #[test]
    fn test_best_portfolio() {
        let result = run(OptimizerConfig::new(Objective::Sharpe, 50).with_seed(8)).unwrap();
        let portfolio = result.best_portfolio("Optimized").unwrap();
        assert_eq!(portfolio.tickers(), vec!["AAA", "BBB", "CCC"]);
        assert_eq!(portfolio.weights(), result.best.weights);
    }

    #[test]
    fn test_select_best_ties_go_to_lowest_index() {
        let metrics = MetricSummary::compute(&[0.01, -0.01, 0.02], None, MetricValue::Defined(0.0), &MetricsConfig::default());
        let sample = |index, value| OptimizationSample {
            index,
            weights: vec![1.0],
            objective_value: value,
            metrics,
        };
        let samples = vec![
            sample(0, MetricValue::Undefined(UndefinedReason::ZeroVolatility)),
            sample(1, MetricValue::Defined(2.0)),
            sample(2, MetricValue::Defined(2.0)),
            sample(3, MetricValue::Defined(1.0)),
        ];
        assert_eq!(select_best(Objective::Sharpe, &samples).unwrap().index, 1);
        assert_eq!(select_best(Objective::MinVolatility, &samples).unwrap().index, 3);
        assert!(select_best(Objective::Sharpe, &samples[..1]).is_none());
    }

    #[test]
    fn test_objective_parse() {
        assert_eq!("sharpe".parse::<Objective>().unwrap(), Objective::Sharpe);
        assert_eq!("min-volatility".parse::<Objective>().unwrap(), Objective::MinVolatility);
        assert_eq!("Beta_To_Target".parse::<Objective>().unwrap(), Objective::BetaToTarget);
        assert!("alpha".parse::<Objective>().is_err());
        for o in Objective::ALL {
            assert_eq!(o.name().parse::<Objective>().unwrap(), o);
        }
    }
}
