//! Integration tests for the core detectors.
//!
//! Each scenario builds a small hand-shaped price series and checks the
//! structured analysis as well as the scored result.

use chrono::{DateTime, Duration, TimeZone, Utc};
use confluence::prelude::*;

fn day(i: usize) -> DateTime<Utc> {
    // 2024-01-01 is a Monday
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i as i64)
}

fn series(bars: Vec<Bar>) -> PriceSeries {
    PriceSeries::new(bars).unwrap()
}

/// Flat bars: close 100, high 101, low 99, constant volume
fn flat(n: usize) -> Vec<Bar> {
    (0..n).map(|i| Bar::new(day(i), 100.0, 101.0, 99.0, 100.0, 1000.0)).collect()
}

/// Steady uptrend with two isolated dips to the same low
fn double_dip() -> Vec<Bar> {
    (0..50)
        .map(|i| {
            let base = 100.0 + i as f64;
            let low = if i == 15 || i == 35 { 90.0 } else { base - 0.5 };
            Bar::new(day(i), base, base + 0.5, low, base + 0.2, 1000.0)
        })
        .collect()
}

/// Flat base, then a gap above the base high on double volume
fn gap_breakout() -> Vec<Bar> {
    let mut bars = flat(59);
    bars.push(Bar::new(day(59), 100.5, 105.0, 100.3, 104.0, 2000.0));
    bars
}

/// Breakout at bar 50 followed by a retest and a steady climb
fn breakout_with_retest() -> Vec<Bar> {
    let mut bars = flat(50);
    bars.push(Bar::new(day(50), 100.5, 105.0, 100.3, 104.0, 2000.0));
    bars.push(Bar::new(day(51), 104.5, 106.5, 103.8, 106.0, 1200.0));
    for k in 1..=8 {
        let c = 106.0 + k as f64 * 0.5;
        bars.push(Bar::new(day(51 + k), c - 0.3, c + 0.5, c - 1.0, c, 1000.0));
    }
    bars
}

/// Three triangular volume waves, each smaller than the last
fn vcp_waves() -> Vec<Bar> {
    let shape = [0.2, 0.4, 0.6, 0.8, 1.0, 0.8, 0.6, 0.4, 0.2, 0.1];
    [1000.0, 800.0, 600.0]
        .iter()
        .flat_map(|peak| shape.iter().map(move |f| f * peak))
        .enumerate()
        .map(|(i, v)| Bar::new(day(i), 100.0, 101.0, 99.0, 100.0, v))
        .collect()
}

/// Six full weeks: 22 bars of swinging price and volume, then 20 quiet bars
fn quiet_tail() -> Vec<Bar> {
    (0..42)
        .map(|i| {
            if i < 22 {
                let volume = if i % 2 == 0 { 500.0 } else { 1500.0 };
                let (open, close) = if i % 2 == 0 { (104.0, 100.0) } else { (100.0, 104.0) };
                Bar::new(day(i), open, 105.0, 99.0, close, volume)
            } else {
                Bar::new(day(i), 100.0, 100.5, 99.5, 100.0, 1000.0)
            }
        })
        .collect()
}

/// Eight full weeks: four with alternating weekly volume, then four equal weeks
fn weekly_calm() -> Vec<Bar> {
    (0..56)
        .map(|i| {
            let week = i / 7;
            let volume = match week {
                0..=3 if week % 2 == 0 => 500.0,
                0..=3 => 1500.0,
                _ => 1000.0,
            };
            Bar::new(day(i), 100.0, 101.0, 99.0, 100.0, volume)
        })
        .collect()
}

// ============================================================
// SUPPORT / RESISTANCE
// ============================================================

#[test]
fn test_equal_lows_form_one_support_zone() {
    let detector = SupportResistanceDetector::with_defaults();
    let analysis = detector.find_zones(&series(double_dip())).unwrap();

    assert_eq!(analysis.supports.len(), 1);
    let zone = &analysis.supports[0];
    assert_eq!(zone.touches, 2);
    assert_eq!(zone.side, Side::Support);
    assert!((zone.level - 90.0).abs() < 1e-9);
    assert_eq!(zone.last_touch, 35);
    assert!(zone.double_pattern);
    assert!(analysis.double_bottom);
    assert!(analysis.resistances.is_empty());
}

#[test]
fn test_zone_detector_scores_strongest_zone() {
    let detector = SupportResistanceDetector::with_defaults();
    let data = series(double_dip());
    let analysis = detector.find_zones(&data).unwrap();
    let result = detector.evaluate("DIP", &data).unwrap();

    assert_eq!(result.score, analysis.supports[0].score);
    assert!(result.explanation.contains("support at 90.00"));
    assert_eq!(result.details["support_count"], serde_json::json!(1));
    assert_eq!(result.details["double_bottom"], serde_json::json!(true));
}

#[test]
fn test_heavy_touch_volume_flags_spike() {
    let mut bars = double_dip();
    bars[15].volume = 2000.0;
    bars[35].volume = 2000.0;
    let detector = SupportResistanceDetector::with_defaults();
    let data = series(bars);

    let zone = &detector.find_zones(&data).unwrap().supports[0];
    assert!(zone.volume_spike);
    assert_eq!(zone.touch_volume, 2000.0);

    // Same zone as the plain double dip (35) plus the volume points
    let result = detector.evaluate("DIP", &data).unwrap();
    assert_eq!(result.score, 55.0);
    assert!(result.explanation.contains("volume spike"));
}

#[test]
fn test_zone_detector_needs_full_window() {
    let detector = SupportResistanceDetector::with_defaults();
    assert_eq!(detector.min_bars(), 50);

    let result = detector.evaluate("DIP", &series(double_dip()[..25].to_vec())).unwrap();
    assert_eq!(result.score, 10.0);
    assert_eq!(result.details["insufficient_data"], serde_json::json!(true));

    let result = detector.evaluate("DIP", &series(double_dip())).unwrap();
    assert!(result.details.get("insufficient_data").is_none());
}

#[test]
fn test_zone_detector_without_zones_is_neutral() {
    // Strictly rising lows and highs leave no local extrema
    let bars: Vec<Bar> = (0..40)
        .map(|i| {
            let p = 100.0 + i as f64;
            Bar::new(day(i), p, p + 1.0, p - 1.0, p + 0.5, 1000.0)
        })
        .collect();
    let result = SupportResistanceDetector::with_defaults()
        .evaluate("UP", &series(bars))
        .unwrap();
    assert_eq!(result.score, 10.0);
    assert_eq!(result.explanation, "no qualifying support/resistance zones");
}

#[test]
fn test_zone_detector_rejects_malformed_bar() {
    let mut bars = double_dip();
    bars[40].high = 10.0;
    match SupportResistanceDetector::with_defaults().evaluate("BAD", &series(bars)) {
        Err(PatternError::InvalidOHLCV { index, .. }) => assert_eq!(index, 40),
        other => panic!("expected InvalidOHLCV, got {other:?}"),
    }
}

// ============================================================
// BREAKOUT / RETEST
// ============================================================

#[test]
fn test_gap_breakout_on_high_volume() {
    let detector = BreakoutRetestDetector::with_defaults();
    let analysis = detector.analyze(&series(gap_breakout())).unwrap();

    assert_eq!(analysis.references, vec![101.0]);
    assert_eq!(analysis.candidates.len(), 1);
    let c = &analysis.candidates[0];
    assert_eq!(c.event.index, 59);
    assert!(c.event.gap);
    assert!(c.event.high_volume);
    assert_eq!(c.pre_pattern, Some(PrePattern::Consolidation));
    assert!(!c.retest.found);
    // Nothing has traded back below the reference yet
    assert!(c.genuine);
    assert!(c.momentum_return.is_none());
    assert!(analysis.weekly_confirmed);
    assert!(analysis.momentum.is_none());

    // Gap, volume, pre-pattern and genuine plus the weekly bonus
    let result = detector.evaluate("GAP", &series(gap_breakout())).unwrap();
    assert_eq!(result.score, 80.0);
    assert!(result.explanation.contains("breakout above 101.00"));
}

#[test]
fn test_breakout_invalidated_by_later_low() {
    let mut bars = gap_breakout();
    bars.push(Bar::new(day(60), 104.0, 104.5, 100.0, 103.0, 1000.0));
    let detector = BreakoutRetestDetector::with_defaults();
    let analysis = detector.analyze(&series(bars)).unwrap();

    let c = analysis
        .candidates
        .iter()
        .find(|c| c.event.index == 59)
        .expect("breakout at bar 59");
    assert!(!c.genuine);
    assert!(!c.retest.found);
    assert!(!c.successful);
    assert!(c.weekly_confirmed);
    assert_eq!(c.score, 65.0);
}

#[test]
fn test_weekly_confirmation_uses_lookback_window() {
    // Week two closes above week one's high; week three is flat
    let mut bars = flat(21);
    bars[13].high = 104.0;
    bars[13].close = 103.0;
    let data = series(bars);

    let detector = |lookback| BreakoutRetestDetector {
        lookback: Period::new(lookback).unwrap(),
        min_bars: Period::new(10).unwrap(),
        ..Default::default()
    };
    assert!(detector(21).analyze(&data).unwrap().weekly_confirmed);
    // Week one falls outside a 14-bar lookback
    assert!(!detector(14).analyze(&data).unwrap().weekly_confirmed);
}

#[test]
fn test_breakout_needs_full_lookback() {
    let detector = BreakoutRetestDetector::with_defaults();
    assert_eq!(detector.min_bars(), 60);
    let result = detector.evaluate("GAP", &series(gap_breakout()[1..].to_vec())).unwrap();
    assert_eq!(result.score, 10.0);
    assert_eq!(result.details["insufficient_data"], serde_json::json!(true));
}

#[test]
fn test_retest_genuine_and_successful() {
    let detector = BreakoutRetestDetector::with_defaults();
    let analysis = detector.analyze(&series(breakout_with_retest())).unwrap();

    let c = analysis
        .candidates
        .iter()
        .find(|c| c.event.index == 50)
        .expect("breakout at bar 50");
    assert!(c.retest.found);
    assert!(c.retest.held);
    assert_eq!(c.retest.index, Some(51));
    assert!(c.genuine);
    assert!(c.successful);
    assert!(c.momentum_return.unwrap() > 0.05);
    assert_eq!(analysis.best_candidate().map(|c| c.event.index), Some(50));
}

#[test]
fn test_flat_series_has_no_breakout() {
    let result = BreakoutRetestDetector::with_defaults()
        .evaluate("FLAT", &series(flat(60)))
        .unwrap();
    assert_eq!(result.score, 10.0);
    assert_eq!(result.explanation, "no significant breakout detected");
}

// ============================================================
// VOLUME TENSION
// ============================================================

#[test]
fn test_three_contracting_waves_count_as_vcp() {
    let detector = VolumeTensionDetector::with_defaults();
    let data = series(vcp_waves());
    let reading = detector.read(&data);

    assert_eq!(reading.vcp_count, 3);
    assert!(reading.vcp);
    assert!(reading.signals >= 1);

    let result = detector.evaluate("VCP", &data).unwrap();
    assert!(result.score >= 40.0);
    assert!(result.explanation.contains("VCP"));
}

#[test]
fn test_volume_spike_fires() {
    let mut bars = flat(40);
    for (i, bar) in bars.iter_mut().enumerate() {
        bar.volume = 1000.0 + (i % 3) as f64 * 50.0;
    }
    bars[39].volume = 5000.0;
    let reading = VolumeTensionDetector::with_defaults().read(&series(bars));
    assert!(reading.spike);
    assert!(reading.spike_z > 2.5);
}

#[test]
fn test_quiet_tail_squeezes_and_tightens() {
    let detector = VolumeTensionDetector::with_defaults();
    let data = series(quiet_tail());
    let reading = detector.read(&data);

    assert!(reading.squeeze);
    assert_eq!(reading.band_width, Some(0.0));
    assert!(reading.tight_range);
    assert!(reading.range_ratio.unwrap() < 0.5);
    assert_eq!(reading.volatility_ratio, Some(0.0));
    assert!(!reading.weekly_squeeze);
    assert_eq!(reading.vcp_count, 1);
    assert!(!reading.spike);
    assert_eq!(reading.signals, 2);
    assert_eq!(reading.score, 65.0);

    let result = detector.evaluate("QUIET", &data).unwrap();
    assert_eq!(result.score, 65.0);
    assert_eq!(result.explanation, "volume tension: daily squeeze, tight range");
}

#[test]
fn test_equal_weeks_after_swings_squeeze_weekly() {
    let detector = VolumeTensionDetector::with_defaults();
    let data = series(weekly_calm());
    let reading = detector.read(&data);

    assert!(reading.weekly_squeeze);
    assert!(reading.squeeze);
    assert!(!reading.tight_range);
    assert!(!reading.vcp);
    assert!(!reading.spike);
    assert_eq!(reading.signals, 2);

    let result = detector.evaluate("CALM", &data).unwrap();
    assert_eq!(result.score, 65.0);
    assert!(result.explanation.contains("weekly squeeze"));
}

#[test]
fn test_constant_volume_has_no_tension() {
    let result = VolumeTensionDetector::with_defaults()
        .evaluate("FLAT", &series(flat(40)))
        .unwrap();
    assert_eq!(result.score, 10.0);
    assert_eq!(result.explanation, "no volume tension");
}

// ============================================================
// SHARED BEHAVIOUR
// ============================================================

#[test]
fn test_short_series_is_neutral_for_every_detector() {
    let data = series(flat(10));
    let detectors: Vec<Box<dyn Detector>> = vec![
        Box::new(SupportResistanceDetector::with_defaults()),
        Box::new(BreakoutRetestDetector::with_defaults()),
        Box::new(VolumeTensionDetector::with_defaults()),
    ];
    for detector in &detectors {
        let result = detector.evaluate("SHORT", &data).unwrap();
        assert_eq!(result.score, 10.0, "{}", detector.name());
        assert_eq!(result.details["insufficient_data"], serde_json::json!(true));
    }
}

#[test]
fn test_param_overrides_apply() {
    let mut params = DetectorParams::new();
    params.insert("min_bars".to_string(), 5.0);
    let detector = BreakoutRetestDetector::with_params(&params).unwrap();
    assert_eq!(detector.min_bars(), 5);

    for meta in VolumeTensionDetector::param_meta() {
        assert!(meta.validate(meta.default).is_ok(), "{}", meta.name);
    }
    for meta in SupportResistanceDetector::param_meta() {
        assert!(meta.validate(meta.default).is_ok(), "{}", meta.name);
    }
    for meta in BreakoutRetestDetector::param_meta() {
        assert!(meta.validate(meta.default).is_ok(), "{}", meta.name);
    }
}
