//! Property tests for detector and ensemble invariants.
//!
//! Uses proptest to verify:
//! 1. Score range: every detector scores in [1, 100] with a non-empty explanation
//! 2. Short input: below a detector's minimum the baseline score comes back
//! 3. Idempotence: evaluating twice gives identical results
//! 4. Consensus: the aggregate is the rounded weighted mean of the member scores

use chrono::{Duration, TimeZone, Utc};
use confluence::prelude::*;
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

/// (close-to-close change, upper wick, lower wick, volume) per bar
fn arb_step() -> impl Strategy<Value = (f64, f64, f64, f64)> {
    (-0.06..0.06_f64, 0.0..0.03_f64, 0.0..0.03_f64, 100.0..50_000.0_f64)
}

fn arb_series(max_len: usize) -> impl Strategy<Value = PriceSeries> {
    prop::collection::vec(arb_step(), 0..max_len).prop_map(|steps| {
        let start = Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap();
        let mut price = 100.0;
        let bars = steps
            .into_iter()
            .enumerate()
            .map(|(i, (change, up, down, volume))| {
                let open = price;
                let close = (price * (1.0 + change)).max(0.01);
                let high = open.max(close) * (1.0 + up);
                let low = open.min(close) * (1.0 - down);
                price = close;
                Bar::new(start + Duration::days(i as i64), open, high, low, close, volume)
            })
            .collect();
        PriceSeries::new(bars).unwrap()
    })
}

fn core_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(SupportResistanceDetector::with_defaults()),
        Box::new(BreakoutRetestDetector::with_defaults()),
        Box::new(VolumeTensionDetector::with_defaults()),
    ]
}

// ── 1-2. Score range and short input ─────────────────────────────────

proptest! {
    /// Valid bars always produce a bounded score and some explanation.
    #[test]
    fn detector_scores_are_bounded(series in arb_series(150)) {
        for detector in core_detectors() {
            let result = detector.evaluate("PROP", &series).unwrap();
            prop_assert!((1.0..=100.0).contains(&result.score), "{} -> {}", detector.name(), result.score);
            prop_assert!(!result.explanation.is_empty());

            if series.len() < detector.min_bars() {
                prop_assert_eq!(result.score, 10.0);
            }
        }
    }
}

// ── 3-4. Idempotence and consensus ───────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The ensemble keeps no state between calls.
    #[test]
    fn ensemble_is_idempotent(series in arb_series(120)) {
        let ensemble = EnsembleBuilder::new().with_all_defaults().build().unwrap();
        let first = ensemble.evaluate("PROP", &series);
        let second = ensemble.evaluate("PROP", &series);
        prop_assert_eq!(first, second);
    }

    /// Aggregate equals the weighted mean of member scores to two decimals.
    #[test]
    fn consensus_is_weighted_mean(
        series in arb_series(120),
        w_zone in 1u32..10,
        w_breakout in 1u32..10,
        w_volume in 1u32..10,
    ) {
        let weights = WeightTable::empty()
            .with("support_resistance", w_zone)
            .with("breakout_retest", w_breakout)
            .with("volume_tension", w_volume);
        let ensemble = EnsembleBuilder::new().weights(weights.clone()).build().unwrap();
        let result = ensemble.evaluate("PROP", &series);

        let weighted: f64 = weights
            .iter()
            .map(|(name, w)| result.scores[name] * f64::from(w))
            .sum();
        let expected = weighted / weights.total() as f64;
        prop_assert!((result.score - expected).abs() <= 0.005 + 1e-9);
        prop_assert!((1.0..=100.0).contains(&result.score));
        prop_assert_eq!(result.recommendation, Recommendation::from_score(result.score));
    }
}
