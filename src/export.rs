//! Export of backtest reports and optimizer populations.
//!
//! | Format | Content |
//! |--------|---------|
//! | JSON | Full reports and results, undefined metrics tagged with their reason |
//! | CSV | Comparison rows, aligned growth curves, optimizer samples |
//!
//! Undefined metrics are written as empty CSV cells.

use crate::analytics::MetricValue;
use crate::backtest::{AlignedGrowth, BacktestReport, PortfolioOutcome};
use crate::error::Result;
use crate::optimizer::OptimizationResult;
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

const PRECISION: usize = 6;

fn cell(value: f64) -> String {
    format!("{:.prec$}", value, prec = PRECISION)
}

fn metric_cell(value: &MetricValue) -> String {
    value.value().map(cell).unwrap_or_default()
}

/// Pretty-printed JSON of any report type.
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Write pretty-printed JSON to a file.
pub fn export_json<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    info!("Wrote JSON to {}", path.display());
    Ok(())
}

/// One row per portfolio; failed portfolios carry their reason.
pub fn write_comparison_csv<W: Write>(report: &BacktestReport, writer: W) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record([
        "name",
        "status",
        "start",
        "end",
        "total_return",
        "annualized_return",
        "volatility",
        "sharpe_ratio",
        "sortino_ratio",
        "max_drawdown",
        "calmar_ratio",
        "beta",
        "diversification",
        "performance_score",
        "final_value",
        "error",
    ])?;

    for outcome in &report.outcomes {
        match outcome {
            PortfolioOutcome::Completed(r) => {
                let s = r.summary();
                wtr.write_record([
                    r.name().to_string(),
                    "completed".to_string(),
                    r.period.start.to_string(),
                    r.period.end.to_string(),
                    cell(s.total_return),
                    metric_cell(&s.annualized_return),
                    metric_cell(&s.volatility),
                    metric_cell(&s.sharpe_ratio),
                    metric_cell(&s.sortino_ratio),
                    cell(s.max_drawdown),
                    metric_cell(&s.calmar_ratio),
                    metric_cell(&s.beta),
                    metric_cell(&s.diversification),
                    metric_cell(&r.performance_score),
                    cell(r.metrics.final_value()),
                    String::new(),
                ])?;
            }
            PortfolioOutcome::Failed { name, reason } => {
                let mut record = vec![name.clone(), "failed".to_string()];
                record.extend(std::iter::repeat(String::new()).take(13));
                record.push(reason.clone());
                wtr.write_record(&record)?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Date column followed by one rebased growth column per portfolio.
pub fn write_growth_csv<W: Write>(growth: &AlignedGrowth, writer: W) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    let mut header = vec!["date".to_string()];
    header.extend(growth.curves.iter().map(|(name, _)| name.clone()));
    wtr.write_record(&header)?;

    for (i, date) in growth.dates.iter().enumerate() {
        let mut record = vec![date.to_string()];
        record.extend(growth.curves.iter().map(|(_, values)| cell(values[i])));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Every evaluated optimizer sample: weights, objective and key metrics.
pub fn write_samples_csv<W: Write>(result: &OptimizationResult, writer: W) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    let mut header = vec!["index".to_string()];
    header.extend(result.tickers.iter().map(|t| format!("w_{}", t)));
    header.extend(
        [
            "objective",
            "annualized_return",
            "volatility",
            "sharpe_ratio",
            "sortino_ratio",
            "max_drawdown",
            "calmar_ratio",
            "beta",
            "diversification",
        ]
        .map(String::from),
    );
    wtr.write_record(&header)?;

    for s in &result.samples {
        let m = &s.metrics;
        let mut record = vec![s.index.to_string()];
        record.extend(s.weights.iter().map(|w| cell(*w)));
        record.extend([
            metric_cell(&s.objective_value),
            metric_cell(&m.annualized_return),
            metric_cell(&m.volatility),
            metric_cell(&m.sharpe_ratio),
            metric_cell(&m.sortino_ratio),
            cell(m.max_drawdown),
            metric_cell(&m.calmar_ratio),
            metric_cell(&m.beta),
            metric_cell(&m.diversification),
        ]);
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Export the comparison table to a CSV file.
pub fn export_comparison_csv(report: &BacktestReport, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    write_comparison_csv(report, BufWriter::new(File::create(path)?))?;
    info!("Wrote comparison to {}", path.display());
    Ok(())
}

/// Export aligned growth curves to a CSV file.
pub fn export_growth_csv(report: &BacktestReport, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    write_growth_csv(&report.aligned_growth(), BufWriter::new(File::create(path)?))?;
    info!("Wrote growth curves to {}", path.display());
    Ok(())
}

/// Export the optimizer population to a CSV file.
pub fn export_samples_csv(result: &OptimizationResult, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    write_samples_csv(result, BufWriter::new(File::create(path)?))?;
    info!("Wrote {} samples to {}", result.samples.len(), path.display());
    Ok(())
}
