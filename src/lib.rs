//! Weightlab - portfolio backtesting, risk metrics and random-weight optimization.
//!
//! # Overview
//!
//! Weightlab evaluates weighted baskets of tickers over historical daily
//! closes and searches the weight simplex for allocations that optimize a
//! chosen objective:
//!
//! - **Backtesting**: several portfolios over a shared date range, with
//!   per-portfolio failure isolation
//! - **Risk metrics**: total and annualized return, volatility, Sharpe,
//!   Sortino, max drawdown, Calmar, beta, diversification
//! - **Explicit undefined values**: ratios with a zero denominator are
//!   reported as [`MetricValue::Undefined`] with a reason, never as NaN or 0
//! - **Optimizer**: seeded Dirichlet(1) sampling evaluated in parallel
//!   batches, cancellable, identical results for a given seed
//! - **Configuration files**: TOML-based configuration for reproducible runs
//!
//! # Quick Start
//!
//! ```no_run
//! use weightlab::{BacktestConfig, Backtester, CsvPriceProvider, DateRange, Portfolio};
//!
//! let provider = CsvPriceProvider::new("data");
//! let range = DateRange::parse("2020-01-01", "2024-12-31")?;
//!
//! let report = Backtester::new(&provider, BacktestConfig::new(range))
//!     .run(&Portfolio::presets())?;
//!
//! for r in report.completed() {
//!     println!("{}: Sharpe {:.2}", r.name(), r.summary().sharpe_ratio);
//! }
//! # Ok::<(), weightlab::WeightlabError>(())
//! ```
//!
//! # Optimizing
//!
//! ```no_run
//! use weightlab::{CsvPriceProvider, DateRange, Objective, Optimizer, OptimizerConfig};
//!
//! let provider = CsvPriceProvider::new("data");
//! let range = DateRange::parse("2020-01-01", "2024-12-31")?;
//! let config = OptimizerConfig::new(Objective::Sortino, 20_000).with_seed(42);
//!
//! let result = Optimizer::new(&provider, config).run(&["SPY", "AGG", "GLD"], &range)?;
//! println!("best weights: {:?}", result.best.weights);
//! # Ok::<(), weightlab::WeightlabError>(())
//! ```
//!
//! # Modules
//!
//! - [`types`]: Portfolios, price and return series, date ranges
//! - [`data`]: The [`PriceProvider`] seam plus in-memory and CSV providers
//! - [`returns`]: Date alignment, periodic and weighted portfolio returns
//! - [`analytics`]: Risk metrics, correlation, performance scores
//! - [`optimizer`]: Random-simplex weight search
//! - [`backtest`]: Multi-portfolio backtests
//! - [`config`]: TOML configuration file support
//! - [`export`]: JSON and CSV export
//! - [`viz`]: Sparklines and terminal tables

pub mod analytics;
pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod optimizer;
pub mod returns;
pub mod types;
pub mod viz;

// Re-exports for convenience
pub use analytics::{
    CorrelationMatrix, MetricSummary, MetricValue, MetricsConfig, MetricsResult, UndefinedReason,
};
pub use backtest::{BacktestConfig, BacktestReport, Backtester, PortfolioOutcome, PortfolioReport};
pub use config::WeightlabConfig;
pub use data::{CsvPriceProvider, InMemoryPriceProvider, PriceProvider};
pub use error::{Result, WeightlabError};
pub use optimizer::{
    CancellationToken, Objective, OptimizationResult, OptimizationSample, OptimizationStatus,
    Optimizer, OptimizerConfig,
};
pub use returns::RebalanceMode;
pub use types::{DateRange, Holding, Portfolio, PricePoint, PriceSeries, ReturnSeries};

// Visualization utilities
pub use viz::{sparkline, sparkline_with_config, ResultFormatter, SparklineConfig};
