//! Terminal output: sparklines, comparison tables and colored reports.
//!
//! # Example
//!
//! ```ignore
//! use weightlab::viz::{sparkline, ResultFormatter};
//!
//! let spark = sparkline(&[1.0, 1.02, 0.99, 1.05], 40);
//! println!("Growth: {}", spark);
//! println!("{}", ResultFormatter::comparison_table(&report));
//! ```

use crate::analytics::{CorrelationMatrix, MetricValue, MetricsResult};
use crate::backtest::{BacktestReport, PortfolioOutcome};
use crate::optimizer::OptimizationResult;
use colored::Colorize;
use tabled::{builder::Builder, settings::Style};

/// Characters used for sparkline rendering, ordered from low to high.
const SPARKLINE_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Configuration for sparkline generation.
#[derive(Debug, Clone)]
pub struct SparklineConfig {
    /// Maximum width in characters.
    pub width: usize,
    /// Custom minimum value (if not taken from data).
    pub min_value: Option<f64>,
    /// Custom maximum value (if not taken from data).
    pub max_value: Option<f64>,
}

impl Default for SparklineConfig {
    fn default() -> Self {
        Self {
            width: 40,
            min_value: None,
            max_value: None,
        }
    }
}

/// ASCII sparkline of `values`, downsampled to at most `width` characters.
pub fn sparkline(values: &[f64], width: usize) -> String {
    sparkline_with_config(
        values,
        &SparklineConfig {
            width,
            ..Default::default()
        },
    )
}

/// Sparkline with custom configuration.
pub fn sparkline_with_config(values: &[f64], config: &SparklineConfig) -> String {
    if values.is_empty() || config.width == 0 {
        return String::new();
    }

    let sampled = downsample(values, config.width);

    let min_val = config
        .min_value
        .unwrap_or_else(|| sampled.iter().copied().fold(f64::INFINITY, f64::min));
    let max_val = config
        .max_value
        .unwrap_or_else(|| sampled.iter().copied().fold(f64::NEG_INFINITY, f64::max));
    let range = max_val - min_val;

    sampled
        .iter()
        .map(|&val| {
            let normalized = if range > 0.0 {
                ((val - min_val) / range).clamp(0.0, 1.0)
            } else {
                0.5
            };
            SPARKLINE_CHARS[((normalized * 7.0).round() as usize).min(7)]
        })
        .collect()
}

/// Downsample to `target_len` points by averaging buckets.
fn downsample(values: &[f64], target_len: usize) -> Vec<f64> {
    if values.len() <= target_len {
        return values.to_vec();
    }

    let chunk_size = values.len() as f64 / target_len as f64;
    (0..target_len)
        .filter_map(|i| {
            let start = (i as f64 * chunk_size).floor() as usize;
            let end = (((i + 1) as f64 * chunk_size).ceil() as usize).min(values.len());
            (start < end).then(|| values[start..end].iter().sum::<f64>() / (end - start) as f64)
        })
        .collect()
}

/// Sparkline of a portfolio's growth curve.
pub fn growth_sparkline(metrics: &MetricsResult, width: usize) -> String {
    let values: Vec<f64> = metrics.growth.iter().map(|p| p.value).collect();
    sparkline(&values, width)
}

fn pct(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

fn metric_pct(value: &MetricValue) -> String {
    match value.value() {
        Some(v) => pct(v),
        None => "n/a".to_string(),
    }
}

fn metric_num(value: &MetricValue) -> String {
    match value.value() {
        Some(v) => format!("{:.2}", v),
        None => "n/a".to_string(),
    }
}

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Comparison table with one row per portfolio, in input order.
    pub fn comparison_table(report: &BacktestReport) -> String {
        let mut builder = Builder::new();
        builder.push_record([
            "Portfolio",
            "Return",
            "Annual",
            "Volatility",
            "Sharpe",
            "Sortino",
            "Max DD",
            "Calmar",
            "Beta",
            "Divers.",
            "Score",
            "Final Value",
        ]);

        for outcome in &report.outcomes {
            match outcome {
                PortfolioOutcome::Completed(r) => {
                    let s = r.summary();
                    builder.push_record([
                        r.name().to_string(),
                        pct(s.total_return),
                        metric_pct(&s.annualized_return),
                        metric_pct(&s.volatility),
                        metric_num(&s.sharpe_ratio),
                        metric_num(&s.sortino_ratio),
                        pct(-s.max_drawdown),
                        metric_num(&s.calmar_ratio),
                        metric_num(&s.beta),
                        metric_num(&s.diversification),
                        metric_num(&r.performance_score),
                        format!("{:.2}", r.metrics.final_value()),
                    ]);
                }
                PortfolioOutcome::Failed { name, .. } => {
                    let mut record = vec![name.clone(), "failed".to_string()];
                    record.extend(std::iter::repeat("-".to_string()).take(10));
                    builder.push_record(record);
                }
            }
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Correlation matrix as a table.
    pub fn correlation_table(matrix: &CorrelationMatrix) -> String {
        let mut builder = Builder::new();
        let mut header = vec![String::new()];
        header.extend(matrix.tickers.iter().cloned());
        builder.push_record(header);

        for (ticker, row) in matrix.tickers.iter().zip(&matrix.values) {
            let mut record = vec![ticker.clone()];
            record.extend(row.iter().map(metric_num));
            builder.push_record(record);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// The `top` best optimizer samples as a table.
    pub fn samples_table(result: &OptimizationResult, top: usize) -> String {
        let mut builder = Builder::new();
        let mut header = vec!["#".to_string(), result.objective.to_string()];
        header.extend(result.tickers.iter().cloned());
        header.extend(["Annual", "Volatility", "Sharpe", "Max DD"].map(String::from));
        builder.push_record(header);

        for s in result.top(top) {
            let mut record = vec![s.index.to_string(), metric_num(&s.objective_value)];
            record.extend(s.weights.iter().map(|w| pct(*w)));
            record.extend([
                metric_pct(&s.metrics.annualized_return),
                metric_pct(&s.metrics.volatility),
                metric_num(&s.metrics.sharpe_ratio),
                pct(-s.metrics.max_drawdown),
            ]);
            builder.push_record(record);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Print a backtest report to stdout.
    pub fn print_backtest(report: &BacktestReport, sparkline_width: usize) {
        let cfg = &report.config;
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " BACKTEST RESULTS ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!("  Period:          {} to {}", cfg.range.start, cfg.range.end);
        println!("  Rebalancing:     {:?}", cfg.rebalance);
        println!(
            "  Benchmark:       {}",
            match (&cfg.benchmark, report.benchmark_loaded) {
                (Some(b), true) => b.clone(),
                (Some(b), false) => format!("{} (unavailable)", b).yellow().to_string(),
                (None, _) => "none".to_string(),
            }
        );
        println!(
            "  Initial Value:   ${:.2}",
            cfg.metrics.initial_investment
        );
        println!();

        println!("{}", Self::comparison_table(report));
        println!();

        println!("{}", "Growth".bold().underline());
        for r in report.completed() {
            println!(
                "  {:20} {}  {}",
                r.name(),
                growth_sparkline(&r.metrics, sparkline_width),
                Self::format_pct_change(r.summary().total_return)
            );
        }
        println!();

        for (name, reason) in report.failures() {
            println!("  {} {}: {}", "✗".red(), name, reason);
        }

        if let Some(best) = report.best() {
            println!("  Best performer: {}", best.name().green().bold());
        }

        if report.correlation.len() > 1 {
            println!();
            println!("{}", "Asset Correlation".bold().underline());
            println!("{}", Self::correlation_table(&report.correlation));
        }
        println!("{}", "═".repeat(60).blue());
    }

    /// Print an optimization result to stdout.
    pub fn print_optimization(result: &OptimizationResult, top: usize) {
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " OPTIMIZATION RESULTS ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!("  Objective:       {}", result.objective);
        println!("  Universe:        {}", result.tickers.join(", "));
        println!("  Period:          {} to {}", result.period.start, result.period.end);
        println!("  Seed:            {}", result.seed);
        let status = if result.is_complete() {
            result.status.to_string().green()
        } else {
            result.status.to_string().yellow()
        };
        println!(
            "  Samples:         {} of {} ({})",
            result.evaluated(),
            result.requested,
            status
        );
        println!();

        println!("{}", "Best Allocation".bold().underline());
        for (ticker, weight) in result.tickers.iter().zip(&result.best.weights) {
            println!("  {:10} {:>8}", ticker, pct(*weight));
        }
        let m = &result.best.metrics;
        println!();
        println!("  {:16} {:>10}", "Objective:", metric_num(&result.best.objective_value));
        println!("  {:16} {:>10}", "Annual Return:", metric_pct(&m.annualized_return));
        println!("  {:16} {:>10}", "Volatility:", metric_pct(&m.volatility));
        println!("  {:16} {:>10}", "Sharpe Ratio:", metric_num(&m.sharpe_ratio));
        println!("  {:16} {:>10}", "Sortino Ratio:", metric_num(&m.sortino_ratio));
        println!("  {:16} {:>10}", "Max Drawdown:", pct(-m.max_drawdown));
        println!("  {:16} {:>10}", "Beta:", metric_num(&m.beta));
        println!();

        if top > 1 {
            println!("{}", format!("Top {} Samples", top).bold().underline());
            println!("{}", Self::samples_table(result, top));
        }
        println!("{}", "═".repeat(60).blue());
    }

    /// Format percentage change with color.
    fn format_pct_change(fraction: f64) -> String {
        if fraction >= 0.0 {
            format!("(+{:.2}%)", fraction * 100.0).green().to_string()
        } else {
            format!("({:.2}%)", fraction * 100.0).red().to_string()
        }
    }
}
