//! Property-based tests using proptest for invariant testing.
//!
//! These tests verify that:
//! 1. Accepted portfolios always carry weights summing to one
//! 2. Sampled weight vectors lie on the simplex
//! 3. Risk metrics stay inside their mathematical bounds
//! 4. The optimizer is reproducible for a fixed seed

use chrono::NaiveDate;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use weightlab::analytics::{
    beta, correlation, diversification_score, growth_curve, max_drawdown,
    max_drawdown_from_returns, normalize_scores, total_return, volatility, CorrelationMatrix,
};
use weightlab::optimizer::sample_simplex;
use weightlab::types::WEIGHT_TOLERANCE;
use weightlab::{
    DateRange, InMemoryPriceProvider, MetricValue, Objective, Optimizer, OptimizerConfig,
    Portfolio, PricePoint, PriceSeries,
};

// ============================================================================
// Strategies
// ============================================================================

/// Daily returns between -20% and +20%.
fn returns_strategy(min_len: usize, max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-0.2..0.2f64, min_len..max_len)
}

/// Raw positive weights for 1 to 8 holdings.
fn raw_weights_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.01..100.0f64, 1..8)
}

/// A small price series built from random returns.
fn prices_from_returns(ticker: &str, returns: &[f64]) -> PriceSeries {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let mut price = 100.0;
    let mut points = vec![PricePoint::new(start, price)];
    for (i, r) in returns.iter().enumerate() {
        price *= 1.0 + r;
        points.push(PricePoint::new(
            start + chrono::Duration::days(i as i64 + 1),
            price,
        ));
    }
    PriceSeries::new(ticker, points).unwrap()
}

proptest! {
    // ========================================================================
    // Portfolio Weights
    // ========================================================================

    #[test]
    fn normalized_portfolio_weights_sum_to_one(raw in raw_weights_strategy()) {
        let holdings: Vec<(String, f64)> = raw
            .iter()
            .enumerate()
            .map(|(i, w)| (format!("T{}", i), *w))
            .collect();
        let portfolio = Portfolio::normalized("P", holdings).unwrap();

        let sum: f64 = portfolio.weights().iter().sum();
        prop_assert!((sum - 1.0).abs() <= WEIGHT_TOLERANCE);
        prop_assert!(portfolio.weights().iter().all(|w| *w >= 0.0));
    }

    #[test]
    fn unnormalized_weights_are_rejected(raw in raw_weights_strategy(), scale in 1.1..10.0f64) {
        let total: f64 = raw.iter().sum();
        let holdings: Vec<(String, f64)> = raw
            .iter()
            .enumerate()
            .map(|(i, w)| (format!("T{}", i), w / total * scale))
            .collect();
        prop_assert!(Portfolio::new("P", holdings).is_err());
    }

    #[test]
    fn sampled_weights_lie_on_simplex(seed in any::<u64>(), k in 1usize..12) {
        let mut rng = StdRng::seed_from_u64(seed);
        let w = sample_simplex(&mut rng, k);

        prop_assert_eq!(w.len(), k);
        prop_assert!(w.iter().all(|x| *x >= 0.0));
        prop_assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    // ========================================================================
    // Metric Bounds
    // ========================================================================

    #[test]
    fn max_drawdown_is_a_fraction(returns in returns_strategy(0, 200)) {
        let dd = max_drawdown(&growth_curve(&returns));
        prop_assert!((0.0..=1.0).contains(&dd));
        prop_assert!((dd - max_drawdown_from_returns(&returns)).abs() < 1e-12);
    }

    #[test]
    fn growth_curve_ends_at_total_return(returns in returns_strategy(1, 200)) {
        let curve = growth_curve(&returns);
        prop_assert_eq!(curve.len(), returns.len() + 1);
        let last = curve[curve.len() - 1];
        prop_assert!((last - 1.0 - total_return(&returns)).abs() < 1e-9);
    }

    #[test]
    fn constant_returns_have_zero_volatility(r in -0.2..0.2f64, n in 2usize..300) {
        let returns = vec![r; n];
        prop_assert_eq!(volatility(&returns, 252.0), MetricValue::Defined(0.0));
    }

    #[test]
    fn beta_against_itself_is_one(returns in returns_strategy(3, 100)) {
        if let MetricValue::Defined(b) = beta(&returns, &returns) {
            prop_assert!((b - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn correlation_is_bounded(a in returns_strategy(30, 31), b in returns_strategy(30, 31)) {
        if let MetricValue::Defined(c) = correlation(&a, &b) {
            prop_assert!((-1.0..=1.0).contains(&c));
        }
    }

    #[test]
    fn diversification_is_bounded(
        columns in prop::collection::vec(returns_strategy(40, 41), 2..6),
        seed in any::<u64>(),
    ) {
        let tickers = (0..columns.len()).map(|i| format!("T{}", i)).collect();
        let matrix = CorrelationMatrix::from_columns(tickers, &columns);
        let weights = sample_simplex(&mut StdRng::seed_from_u64(seed), columns.len());

        if let MetricValue::Defined(d) = diversification_score(&weights, &matrix.values) {
            prop_assert!((0.0..=1.0).contains(&d));
        }
    }

    #[test]
    fn normalized_scores_span_zero_to_hundred(raw in prop::collection::vec(-5.0..5.0f64, 1..10)) {
        let values: Vec<MetricValue> = raw.iter().copied().map(MetricValue::Defined).collect();
        let scores = normalize_scores(&values);

        prop_assert_eq!(scores.len(), raw.len());
        for s in &scores {
            let v = s.value().unwrap();
            prop_assert!((0.0..=100.0).contains(&v));
        }
    }

    // ========================================================================
    // Optimizer Reproducibility
    // ========================================================================

    #[test]
    fn optimizer_is_deterministic_for_seed(
        a in returns_strategy(30, 31),
        b in returns_strategy(30, 31),
        seed in any::<u64>(),
    ) {
        let provider = InMemoryPriceProvider::new()
            .with_series(prices_from_returns("A", &a))
            .with_series(prices_from_returns("B", &b));
        let range = DateRange::parse("2023-01-01", "2023-12-31").unwrap();
        let config = OptimizerConfig::new(Objective::AnnualizedReturn, 64)
            .with_seed(seed)
            .with_batch_size(16);

        let first = Optimizer::new(&provider, config.clone()).run(&["A", "B"], &range).unwrap();
        let second = Optimizer::new(&provider, config.sequential()).run(&["A", "B"], &range).unwrap();

        prop_assert_eq!(first.best.index, second.best.index);
        prop_assert_eq!(&first.best.weights, &second.best.weights);
        prop_assert_eq!(first.samples.len(), 64);

        if let Some(best) = first.best.objective_value.value() {
            for s in &first.samples {
                if let Some(v) = s.objective_value.value() {
                    prop_assert!(v <= best);
                }
            }
        }
    }
}
