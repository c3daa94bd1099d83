//! Configuration file support.
//!
//! Backtest and optimizer runs can be described in a TOML file so they are
//! reproducible. Command line flags override file values.

use crate::analytics::{MetricsConfig, TRADING_DAYS_PER_YEAR};
use crate::backtest::BacktestConfig;
use crate::data::DataConfig;
use crate::error::{Result, WeightlabError};
use crate::optimizer::{Objective, OptimizerConfig};
use crate::returns::RebalanceMode;
use crate::types::{DateRange, Holding, Portfolio};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Complete configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeightlabConfig {
    /// Date range and metric settings.
    #[serde(default)]
    pub analysis: AnalysisSettings,
    /// Price data settings.
    #[serde(default)]
    pub data: DataSettings,
    /// Optimizer settings.
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    /// Portfolios to backtest.
    #[serde(default)]
    pub portfolios: Vec<PortfolioSettings>,
}

/// Date range and metric settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Start date (YYYY-MM-DD format).
    #[serde(default)]
    pub start_date: Option<String>,
    /// End date (YYYY-MM-DD format).
    #[serde(default)]
    pub end_date: Option<String>,
    /// Annual risk-free rate in percent.
    #[serde(default)]
    pub risk_free_rate_pct: f64,
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
    #[serde(default = "default_min_periods")]
    pub min_periods: usize,
    #[serde(default = "default_initial_investment")]
    pub initial_investment: f64,
    #[serde(default)]
    pub rebalance: RebalanceMode,
    /// Benchmark ticker for beta.
    #[serde(default)]
    pub benchmark: Option<String>,
}

fn default_periods_per_year() -> f64 { TRADING_DAYS_PER_YEAR }
fn default_min_periods() -> usize { 2 }
fn default_initial_investment() -> f64 { 10_000.0 }

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            risk_free_rate_pct: 0.0,
            periods_per_year: TRADING_DAYS_PER_YEAR,
            min_periods: 2,
            initial_investment: 10_000.0,
            rebalance: RebalanceMode::Daily,
            benchmark: None,
        }
    }
}

/// Price data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Directory holding one `<TICKER>.csv` per ticker.
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
    /// Date format in CSV.
    pub date_format: Option<String>,
    /// CSV delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Skip unparsable rows instead of failing.
    #[serde(default = "default_true")]
    pub skip_invalid: bool,
}

fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_delimiter() -> char { ',' }
fn default_true() -> bool { true }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            date_format: None,
            delimiter: ',',
            skip_invalid: true,
        }
    }
}

/// Optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Asset universe.
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default = "default_objective")]
    pub objective: Objective,
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_target_beta")]
    pub target_beta: f64,
    /// Wall-clock budget in seconds.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(default = "default_true")]
    pub parallel: bool,
}

fn default_objective() -> Objective { Objective::Sharpe }
fn default_samples() -> usize { 10_000 }
fn default_batch_size() -> usize { 1024 }
fn default_target_beta() -> f64 { 1.0 }

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            objective: Objective::Sharpe,
            samples: 10_000,
            seed: None,
            batch_size: 1024,
            target_beta: 1.0,
            timeout_secs: None,
            parallel: true,
        }
    }
}

/// A portfolio entry.
///
/// With `normalize = true` the weights may be any non-negative numbers
/// (percentages, share counts) and are rescaled to sum to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSettings {
    pub name: String,
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub normalize: bool,
}

impl PortfolioSettings {
    pub fn to_portfolio(&self) -> Result<Portfolio> {
        let pairs = self.holdings.iter().map(|h| (h.ticker.clone(), h.weight));
        if self.normalize {
            Portfolio::normalized(self.name.clone(), pairs)
        } else {
            Portfolio::new(self.name.clone(), pairs)
        }
    }
}

impl From<&Portfolio> for PortfolioSettings {
    fn from(p: &Portfolio) -> Self {
        Self {
            name: p.name().to_string(),
            holdings: p.holdings().to_vec(),
            normalize: false,
        }
    }
}

impl WeightlabConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: WeightlabConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| WeightlabError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Date range from `[analysis]`; both dates are required.
    pub fn date_range(&self) -> Result<DateRange> {
        match (&self.analysis.start_date, &self.analysis.end_date) {
            (Some(start), Some(end)) => DateRange::parse(start, end),
            _ => Err(WeightlabError::ConfigError(
                "analysis.start_date and analysis.end_date must both be set".to_string(),
            )),
        }
    }

    pub fn metrics_config(&self) -> Result<MetricsConfig> {
        let a = &self.analysis;
        if !a.periods_per_year.is_finite() || a.periods_per_year <= 0.0 {
            return Err(WeightlabError::ConfigError(format!(
                "periods_per_year must be positive, got {}",
                a.periods_per_year
            )));
        }
        if !a.initial_investment.is_finite() || a.initial_investment <= 0.0 {
            return Err(WeightlabError::ConfigError(format!(
                "initial_investment must be positive, got {}",
                a.initial_investment
            )));
        }
        Ok(MetricsConfig {
            risk_free_rate: a.risk_free_rate_pct / 100.0,
            periods_per_year: a.periods_per_year,
            min_periods: a.min_periods,
            initial_investment: a.initial_investment,
            ..Default::default()
        })
    }

    pub fn data_config(&self) -> Result<DataConfig> {
        if !self.data.delimiter.is_ascii() {
            return Err(WeightlabError::ConfigError(format!(
                "delimiter {:?} is not a single ASCII character",
                self.data.delimiter
            )));
        }
        Ok(DataConfig {
            date_format: self.data.date_format.clone(),
            delimiter: self.data.delimiter as u8,
            skip_invalid: self.data.skip_invalid,
        })
    }

    /// Convert to a [`BacktestConfig`].
    pub fn to_backtest_config(&self) -> Result<BacktestConfig> {
        Ok(BacktestConfig {
            range: self.date_range()?,
            rebalance: self.analysis.rebalance,
            benchmark: self.analysis.benchmark.clone(),
            metrics: self.metrics_config()?,
        })
    }

    /// Convert to an [`OptimizerConfig`].
    pub fn to_optimizer_config(&self) -> Result<OptimizerConfig> {
        let o = &self.optimizer;
        let timeout = o
            .timeout_secs
            .map(|secs| {
                Duration::try_from_secs_f64(secs).map_err(|e| {
                    WeightlabError::ConfigError(format!("invalid timeout_secs {}: {}", secs, e))
                })
            })
            .transpose()?;
        Ok(OptimizerConfig {
            objective: o.objective,
            samples: o.samples,
            seed: o.seed,
            batch_size: o.batch_size,
            target_beta: o.target_beta,
            benchmark: self.analysis.benchmark.clone(),
            timeout,
            parallel: o.parallel,
            show_progress: false,
            metrics: self.metrics_config()?,
        })
    }

    /// Configured portfolios, or the presets when none are listed.
    pub fn portfolios(&self) -> Result<Vec<Portfolio>> {
        if self.portfolios.is_empty() {
            return Ok(Portfolio::presets());
        }
        self.portfolios.iter().map(|p| p.to_portfolio()).collect()
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Weightlab configuration file

[analysis]
start_date = "2020-01-01"
end_date = "2024-12-31"
risk_free_rate_pct = 2.0   # annual, in percent
periods_per_year = 252
min_periods = 2
initial_investment = 10000.0
rebalance = "daily"        # or "buy_and_hold"
benchmark = "SPY"

[data]
dir = "data"               # one <TICKER>.csv per ticker
# date_format = "%Y-%m-%d"
delimiter = ","
skip_invalid = true

[optimizer]
tickers = ["SPY", "AGG", "GLD", "VNQ"]
objective = "sharpe"       # sortino, calmar, min_volatility, annualized_return,
                           # beta_to_target, diversification
samples = 10000
# seed = 42
batch_size = 1024
target_beta = 1.0
# timeout_secs = 30.0

[[portfolios]]
name = "Balanced 60/40"
holdings = [
    { ticker = "SPY", weight = 0.6 },
    { ticker = "AGG", weight = 0.4 },
]

[[portfolios]]
name = "All Weather"
normalize = true
holdings = [
    { ticker = "VTI", weight = 30 },
    { ticker = "TLT", weight = 40 },
    { ticker = "IEF", weight = 15 },
    { ticker = "GLD", weight = 7.5 },
    { ticker = "DBC", weight = 7.5 },
]
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = WeightlabConfig::default();
        assert_eq!(config.analysis.initial_investment, 10_000.0);
        assert_eq!(config.optimizer.objective, Objective::Sharpe);
        assert!(config.date_range().is_err());
        assert_eq!(config.portfolios().unwrap(), Portfolio::presets());
    }

    #[test]
    fn test_load_config() {
        let toml_content = r#"
[analysis]
start_date = "2021-01-01"
end_date = "2021-12-31"
risk_free_rate_pct = 3.0
rebalance = "buy_and_hold"

[data]
dir = "prices"
delimiter = ";"

[optimizer]
tickers = ["A", "B"]
objective = "min_volatility"
samples = 500
seed = 7
timeout_secs = 1.5

[[portfolios]]
name = "Half"
holdings = [{ ticker = "A", weight = 0.5 }, { ticker = "B", weight = 0.5 }]
"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", toml_content).unwrap();

        let config = WeightlabConfig::load(file.path()).unwrap();
        assert_eq!(config.data.dir, PathBuf::from("prices"));
        assert_eq!(config.data_config().unwrap().delimiter, b';');

        let backtest = config.to_backtest_config().unwrap();
        assert_eq!(backtest.rebalance, RebalanceMode::BuyAndHold);
        assert!((backtest.metrics.risk_free_rate - 0.03).abs() < 1e-12);
        assert_eq!(backtest.range, DateRange::parse("2021-01-01", "2021-12-31").unwrap());

        let optimizer = config.to_optimizer_config().unwrap();
        assert_eq!(optimizer.objective, Objective::MinVolatility);
        assert_eq!(optimizer.samples, 500);
        assert_eq!(optimizer.seed, Some(7));
        assert_eq!(optimizer.timeout, Some(Duration::from_millis(1500)));

        let portfolios = config.portfolios().unwrap();
        assert_eq!(portfolios.len(), 1);
        assert_eq!(portfolios[0].tickers(), vec!["A", "B"]);
    }

    #[test]
    fn test_normalized_portfolio_entry() {
        let entry = PortfolioSettings {
            name: "Pct".to_string(),
            holdings: vec![
                Holding { ticker: "X".to_string(), weight: 75.0 },
                Holding { ticker: "Y".to_string(), weight: 25.0 },
            ],
            normalize: true,
        };
        let p = entry.to_portfolio().unwrap();
        assert!((p.weight("X") - 0.75).abs() < 1e-12);

        let strict = PortfolioSettings { normalize: false, ..entry };
        assert!(strict.to_portfolio().unwrap_err().is_input_error());
    }

    #[test]
    fn test_reversed_dates_rejected() {
        let mut config = WeightlabConfig::default();
        config.analysis.start_date = Some("2024-06-01".to_string());
        config.analysis.end_date = Some("2024-01-01".to_string());
        assert!(config.to_backtest_config().unwrap_err().is_input_error());
    }

    #[test]
    fn test_invalid_settings() {
        let mut config = WeightlabConfig::default();
        config.analysis.periods_per_year = 0.0;
        assert!(matches!(config.metrics_config(), Err(WeightlabError::ConfigError(_))));

        let mut config = WeightlabConfig::default();
        config.optimizer.timeout_secs = Some(-1.0);
        assert!(matches!(config.to_optimizer_config(), Err(WeightlabError::ConfigError(_))));
    }

    #[test]
    fn test_out_of_range_timeouts_are_config_errors() {
        for secs in [1e20, f64::MAX, f64::INFINITY, f64::NAN] {
            let mut config = WeightlabConfig::default();
            config.optimizer.timeout_secs = Some(secs);
            assert!(matches!(config.to_optimizer_config(), Err(WeightlabError::ConfigError(_))));
        }

        let mut config = WeightlabConfig::default();
        config.optimizer.timeout_secs = Some(0.0);
        assert_eq!(config.to_optimizer_config().unwrap().timeout, Some(Duration::ZERO));
    }

    #[test]
    fn test_save_config() {
        let mut config = WeightlabConfig::default();
        config.portfolios = Portfolio::presets().iter().map(PortfolioSettings::from).collect();
        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();

        let loaded = WeightlabConfig::load(file.path()).unwrap();
        assert_eq!(loaded.portfolios().unwrap(), Portfolio::presets());
        assert_eq!(loaded.optimizer.samples, config.optimizer.samples);
    }

    #[test]
    fn test_example_config() {
        let example = WeightlabConfig::example();
        let parsed: WeightlabConfig = toml::from_str(&example).unwrap();
        assert_eq!(parsed.portfolios().unwrap().len(), 2);
        assert_eq!(parsed.analysis.benchmark.as_deref(), Some("SPY"));
        assert!(parsed.to_optimizer_config().is_ok());
    }
}
