//! Performance benchmarks for the metrics kernel and the optimizer.
//!
//! Run with: cargo bench

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use weightlab::analytics::{MetricSummary, MetricsConfig};
use weightlab::returns::weighted_returns_into;
use weightlab::{
    BacktestConfig, Backtester, DateRange, InMemoryPriceProvider, Objective, Optimizer,
    OptimizerConfig, Portfolio, PricePoint, PriceSeries,
};

const TICKERS: [&str; 5] = ["SPY", "AGG", "GLD", "VNQ", "EFA"];

/// Generate a synthetic daily close series.
fn generate_series(ticker: &str, count: usize, phase: f64) -> PriceSeries {
    let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
    let mut price = 100.0;
    let points = (0..count)
        .map(|i| {
            let noise = ((i as f64 * 0.7 + phase).sin() * 2.0 + (i as f64 * 1.3 + phase).cos()) * 0.004;
            price *= 1.0 + 0.0003 + noise;
            PricePoint::new(start + chrono::Duration::days(i as i64), price)
        })
        .collect();
    PriceSeries::new(ticker, points).unwrap()
}

fn provider(days: usize) -> InMemoryPriceProvider {
    TICKERS
        .iter()
        .enumerate()
        .fold(InMemoryPriceProvider::new(), |p, (i, t)| {
            p.with_series(generate_series(t, days, i as f64 * 1.7))
        })
}

fn range() -> DateRange {
    DateRange::parse("2015-01-01", "2030-12-31").unwrap()
}

fn return_columns(days: usize) -> Vec<Vec<f64>> {
    (0..TICKERS.len())
        .map(|i| {
            (0..days)
                .map(|t| ((t as f64 * 0.9 + i as f64).sin()) * 0.01)
                .collect()
        })
        .collect()
}

/// Benchmark the per-sample kernel: weighted returns plus all metrics.
fn bench_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics");
    let config = MetricsConfig::default();
    let weights = [0.3, 0.2, 0.2, 0.2, 0.1];

    for days in [252, 1260, 2520].iter() {
        let columns = return_columns(*days);
        let mut buf = Vec::with_capacity(*days);

        group.bench_with_input(BenchmarkId::new("weighted_returns", days), days, |b, _| {
            b.iter(|| weighted_returns_into(black_box(&columns), black_box(&weights), &mut buf))
        });

        weighted_returns_into(&columns, &weights, &mut buf);
        let benchmark = columns[0].clone();
        group.bench_with_input(BenchmarkId::new("summary", days), days, |b, _| {
            b.iter(|| {
                MetricSummary::compute(
                    black_box(&buf),
                    Some(&benchmark),
                    weightlab::MetricValue::Defined(0.5),
                    &config,
                )
            })
        });
    }

    group.finish();
}

/// Benchmark optimizer runs over different sample counts.
fn bench_optimizer(c: &mut Criterion) {
    let p = provider(1260);
    let mut group = c.benchmark_group("optimizer");
    group.sample_size(10);

    for samples in [1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("parallel", samples), samples, |b, &n| {
            let config = OptimizerConfig::new(Objective::Sharpe, n)
                .with_seed(42)
                .with_benchmark("SPY");
            b.iter(|| Optimizer::new(&p, config.clone()).run(&TICKERS, &range()).unwrap())
        });

        group.bench_with_input(BenchmarkId::new("sequential", samples), samples, |b, &n| {
            let config = OptimizerConfig::new(Objective::Sharpe, n)
                .with_seed(42)
                .with_benchmark("SPY")
                .sequential();
            b.iter(|| Optimizer::new(&p, config.clone()).run(&TICKERS, &range()).unwrap())
        });
    }

    group.finish();
}

/// Benchmark a multi-portfolio backtest.
fn bench_backtest(c: &mut Criterion) {
    let p = provider(2520);
    let portfolios = vec![
        Portfolio::new("Stocks", [("SPY", 1.0)]).unwrap(),
        Portfolio::new("60/40", [("SPY", 0.6), ("AGG", 0.4)]).unwrap(),
        Portfolio::new("Spread", TICKERS.iter().map(|t| (*t, 0.2))).unwrap(),
    ];
    let config = BacktestConfig::new(range()).with_benchmark("SPY");

    c.bench_function("backtest_three_portfolios", |b| {
        b.iter(|| {
            Backtester::new(&p, config.clone())
                .run(black_box(&portfolios))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_metrics, bench_optimizer, bench_backtest);
criterion_main!(benches);
