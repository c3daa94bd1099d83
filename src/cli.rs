//! Command-line interface for the backtester and optimizer.

use weightlab::backtest::Backtester;
use weightlab::config::{PortfolioSettings, WeightlabConfig};
use weightlab::data::CsvPriceProvider;
use weightlab::error::{Result, WeightlabError};
use weightlab::export::{
    export_comparison_csv, export_growth_csv, export_samples_csv, to_json, write_comparison_csv,
    write_samples_csv,
};
use weightlab::optimizer::{Objective, Optimizer};
use weightlab::returns::RebalanceMode;
use weightlab::types::Portfolio;
use weightlab::viz::ResultFormatter;

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Weightlab - portfolio backtesting and random-weight optimization.
#[derive(Parser)]
#[command(name = "weightlab")]
#[command(version)]
#[command(about = "Backtest weighted portfolios and search for better weights")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// TOML configuration file; flags override its values
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Backtest one or more portfolios over a date range
    Backtest {
        /// Directory holding one <TICKER>.csv per ticker
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Portfolio as NAME=TICKER:WEIGHT,TICKER:WEIGHT (repeatable; weights are rescaled)
        #[arg(short, long = "portfolio")]
        portfolios: Vec<String>,

        /// Benchmark ticker for beta
        #[arg(short, long)]
        benchmark: Option<String>,

        /// Rebalancing mode
        #[arg(long, value_enum)]
        rebalance: Option<RebalanceArg>,

        /// Annual risk-free rate in percent
        #[arg(long)]
        risk_free: Option<f64>,

        /// Starting value of each portfolio
        #[arg(long)]
        initial_investment: Option<f64>,

        /// Write the comparison table to a CSV file
        #[arg(long)]
        export_csv: Option<PathBuf>,

        /// Write aligned growth curves to a CSV file
        #[arg(long)]
        export_growth: Option<PathBuf>,

        /// Sparkline width
        #[arg(long, default_value = "40")]
        width: usize,
    },

    /// Sample random weights for a set of tickers and report the best
    Optimize {
        /// Directory holding one <TICKER>.csv per ticker
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Comma-separated asset universe
        #[arg(short, long, value_delimiter = ',')]
        tickers: Vec<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Objective to optimize
        #[arg(short = 'O', long, value_enum)]
        objective: Option<ObjectiveArg>,

        /// Number of weight vectors to sample
        #[arg(short = 'n', long)]
        samples: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Samples per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Benchmark ticker for beta
        #[arg(short, long)]
        benchmark: Option<String>,

        /// Target beta for the beta-to-target objective
        #[arg(long)]
        target_beta: Option<f64>,

        /// Stop after this many seconds and report the best so far
        #[arg(long)]
        timeout: Option<f64>,

        /// Annual risk-free rate in percent
        #[arg(long)]
        risk_free: Option<f64>,

        /// Evaluate on a single thread
        #[arg(long)]
        sequential: bool,

        /// Number of top samples to show
        #[arg(long, default_value = "10")]
        top: usize,

        /// Write every evaluated sample to a CSV file
        #[arg(long)]
        export_samples: Option<PathBuf>,
    },

    /// Generate an example configuration file
    InitConfig {
        /// Output path for config file
        #[arg(default_value = "weightlab.toml")]
        path: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum RebalanceArg {
    Daily,
    BuyAndHold,
}

impl From<RebalanceArg> for RebalanceMode {
    fn from(arg: RebalanceArg) -> Self {
        match arg {
            RebalanceArg::Daily => RebalanceMode::Daily,
            RebalanceArg::BuyAndHold => RebalanceMode::BuyAndHold,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ObjectiveArg {
    Sharpe,
    Sortino,
    Calmar,
    MinVolatility,
    AnnualizedReturn,
    BetaToTarget,
    Diversification,
}

impl From<ObjectiveArg> for Objective {
    fn from(arg: ObjectiveArg) -> Self {
        match arg {
            ObjectiveArg::Sharpe => Objective::Sharpe,
            ObjectiveArg::Sortino => Objective::Sortino,
            ObjectiveArg::Calmar => Objective::Calmar,
            ObjectiveArg::MinVolatility => Objective::MinVolatility,
            ObjectiveArg::AnnualizedReturn => Objective::AnnualizedReturn,
            ObjectiveArg::BetaToTarget => Objective::BetaToTarget,
            ObjectiveArg::Diversification => Objective::Diversification,
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) -> Result<()> {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| WeightlabError::ConfigError(format!("failed to set up logging: {}", e)))
    }

    fn load_config(&self) -> Result<WeightlabConfig> {
        match &self.config {
            Some(path) => WeightlabConfig::load(path),
            None => Ok(WeightlabConfig::default()),
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging()?;

    match &cli.command {
        Commands::Backtest {
            data,
            start,
            end,
            portfolios,
            benchmark,
            rebalance,
            risk_free,
            initial_investment,
            export_csv,
            export_growth,
            width,
        } => {
            let mut config = cli.load_config()?;
            override_common(&mut config, data, start, end, benchmark, *risk_free);
            if let Some(mode) = rebalance {
                config.analysis.rebalance = (*mode).into();
            }
            if let Some(amount) = initial_investment {
                config.analysis.initial_investment = *amount;
            }
            if !portfolios.is_empty() {
                config.portfolios = portfolios
                    .iter()
                    .map(|s| parse_portfolio(s).map(|p| PortfolioSettings::from(&p)))
                    .collect::<Result<_>>()?;
            }
            run_backtest(
                &config,
                cli.output,
                export_csv.as_deref(),
                export_growth.as_deref(),
                *width,
            )
        }

        Commands::Optimize {
            data,
            tickers,
            start,
            end,
            objective,
            samples,
            seed,
            batch_size,
            benchmark,
            target_beta,
            timeout,
            risk_free,
            sequential,
            top,
            export_samples,
        } => {
            let mut config = cli.load_config()?;
            override_common(&mut config, data, start, end, benchmark, *risk_free);
            let o = &mut config.optimizer;
            if !tickers.is_empty() {
                o.tickers = tickers.iter().map(|t| t.trim().to_string()).collect();
            }
            if let Some(objective) = objective {
                o.objective = (*objective).into();
            }
            if let Some(n) = samples {
                o.samples = *n;
            }
            if seed.is_some() {
                o.seed = *seed;
            }
            if let Some(size) = batch_size {
                o.batch_size = *size;
            }
            if let Some(target) = target_beta {
                o.target_beta = *target;
            }
            if timeout.is_some() {
                o.timeout_secs = *timeout;
            }
            if *sequential {
                o.parallel = false;
            }
            run_optimization(&config, cli.output, *top, export_samples.as_deref())
        }

        Commands::InitConfig { path } => init_config(path),
    }
}

fn override_common(
    config: &mut WeightlabConfig,
    data: &Option<PathBuf>,
    start: &Option<String>,
    end: &Option<String>,
    benchmark: &Option<String>,
    risk_free: Option<f64>,
) {
    if let Some(dir) = data {
        config.data.dir = dir.clone();
    }
    if start.is_some() {
        config.analysis.start_date = start.clone();
    }
    if end.is_some() {
        config.analysis.end_date = end.clone();
    }
    if benchmark.is_some() {
        config.analysis.benchmark = benchmark.clone();
    }
    if let Some(rate) = risk_free {
        config.analysis.risk_free_rate_pct = rate;
    }
}

/// Parse `NAME=TICKER:WEIGHT,TICKER:WEIGHT`. Weights are rescaled to sum to one.
fn parse_portfolio(arg: &str) -> Result<Portfolio> {
    let (name, holdings) = arg.split_once('=').ok_or_else(|| {
        WeightlabError::InvalidInput(format!(
            "portfolio '{}' must look like NAME=TICKER:WEIGHT,...",
            arg
        ))
    })?;

    let pairs = holdings
        .split(',')
        .map(|h| {
            let (ticker, weight) = h.split_once(':').ok_or_else(|| {
                WeightlabError::InvalidInput(format!("holding '{}' must look like TICKER:WEIGHT", h))
            })?;
            let weight: f64 = weight.trim().parse().map_err(|_| {
                WeightlabError::InvalidInput(format!("invalid weight '{}' for {}", weight, ticker))
            })?;
            Ok((ticker.trim().to_string(), weight))
        })
        .collect::<Result<Vec<_>>>()?;

    Portfolio::normalized(name.trim(), pairs)
}

fn provider_for(config: &WeightlabConfig) -> Result<CsvPriceProvider> {
    info!("Reading prices from: {}", config.data.dir.display());
    Ok(CsvPriceProvider::new(config.data.dir.clone()).with_config(config.data_config()?))
}

fn run_backtest(
    config: &WeightlabConfig,
    output: OutputFormat,
    export_csv: Option<&Path>,
    export_growth: Option<&Path>,
    width: usize,
) -> Result<()> {
    let provider = provider_for(config)?;
    let portfolios = config.portfolios()?;
    let backtest_config = config.to_backtest_config()?;

    let report = Backtester::new(&provider, backtest_config).run(&portfolios)?;

    match output {
        OutputFormat::Text => ResultFormatter::print_backtest(&report, width),
        OutputFormat::Json => println!("{}", to_json(&report)?),
        OutputFormat::Csv => write_comparison_csv(&report, std::io::stdout().lock())?,
    }

    if let Some(path) = export_csv {
        export_comparison_csv(&report, path)?;
    }
    if let Some(path) = export_growth {
        export_growth_csv(&report, path)?;
    }

    if report.completed().next().is_none() {
        return Err(WeightlabError::DataError(
            "every portfolio failed; see the report for reasons".to_string(),
        ));
    }
    Ok(())
}

fn run_optimization(
    config: &WeightlabConfig,
    output: OutputFormat,
    top: usize,
    export_samples: Option<&Path>,
) -> Result<()> {
    if config.optimizer.tickers.is_empty() {
        return Err(WeightlabError::InvalidInput(
            "no tickers to optimize; pass --tickers or set optimizer.tickers".to_string(),
        ));
    }
    let provider = provider_for(config)?;
    let range = config.date_range()?;
    let optimizer_config = config
        .to_optimizer_config()?
        .with_progress(output == OutputFormat::Text);

    let result = Optimizer::new(&provider, optimizer_config).run(&config.optimizer.tickers, &range)?;

    match output {
        OutputFormat::Text => ResultFormatter::print_optimization(&result, top),
        OutputFormat::Json => println!("{}", to_json(&result)?),
        OutputFormat::Csv => write_samples_csv(&result, std::io::stdout().lock())?,
    }

    if let Some(path) = export_samples {
        export_samples_csv(&result, path)?;
    }
    Ok(())
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(WeightlabError::InvalidInput(format!(
            "{} already exists",
            path.display()
        )));
    }
    fs::write(path, WeightlabConfig::example())?;
    println!("Created example configuration file: {}", path.display());
    println!("\nEdit this file, then run:");
    println!("  weightlab -c {} backtest", path.display());
    println!("  weightlab -c {} optimize", path.display());
    Ok(())
}
