//! Benchmarks for ensemble evaluation.

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use confluence::prelude::*;

/// Generate realistic daily bars
fn generate_series(n: usize) -> PriceSeries {
  let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
  let mut bars = Vec::with_capacity(n);
  let mut price = 100.0;

  for i in 0..n {
    let change = ((i * 7 + 13) % 100) as f64 / 50.0 - 1.0; // Deterministic "random"
    let volatility = 2.0 + ((i * 3) % 10) as f64 / 5.0;
    let volume = 1_000.0 + ((i * 11) % 17) as f64 * 150.0;

    let o = price;
    let c = (price + change).max(1.0);
    let h = o.max(c) + volatility * 0.5;
    let l = (o.min(c) - volatility * 0.5).max(0.5);

    bars.push(Bar::new(start + Duration::days(i as i64), o, h, l, c, volume));
    price = c;
  }

  PriceSeries::new(bars).unwrap()
}

fn bench_single_detector(c: &mut Criterion) {
  let series = generate_series(250);
  let zones = SupportResistanceDetector::with_defaults();
  let breakout = BreakoutRetestDetector::with_defaults();
  let volume = VolumeTensionDetector::with_defaults();

  c.bench_function("support_resistance_250_bars", |b| {
    b.iter(|| {
      let _ = black_box(zones.evaluate("BENCH", black_box(&series)));
    })
  });
  c.bench_function("breakout_retest_250_bars", |b| {
    b.iter(|| {
      let _ = black_box(breakout.evaluate("BENCH", black_box(&series)));
    })
  });
  c.bench_function("volume_tension_250_bars", |b| {
    b.iter(|| {
      let _ = black_box(volume.evaluate("BENCH", black_box(&series)));
    })
  });
}

fn bench_ensemble(c: &mut Criterion) {
  let series = generate_series(250);

  let ensemble = EnsembleBuilder::new().with_all_defaults().build().unwrap();

  c.bench_function("ensemble_250_bars", |b| {
    b.iter(|| {
      let _ = black_box(ensemble.evaluate("BENCH", black_box(&series)));
    })
  });
}

fn bench_scaling(c: &mut Criterion) {
  let ensemble = EnsembleBuilder::new().with_all_defaults().build().unwrap();

  let mut group = c.benchmark_group("scaling");

  for size in [60, 250, 1000, 5000].iter() {
    let series = generate_series(*size);

    group.bench_with_input(BenchmarkId::new("evaluate", size), size, |b, _| {
      b.iter(|| {
        let _ = black_box(ensemble.evaluate("BENCH", black_box(&series)));
      })
    });
  }

  group.finish();
}

fn bench_parallel_evaluate(c: &mut Criterion) {
  let series: Vec<PriceSeries> = (0..4).map(|_| generate_series(250)).collect();

  let ensemble = EnsembleBuilder::new().with_all_defaults().build().unwrap();

  let instruments: Vec<(&str, &PriceSeries)> =
    vec![("SYM1", &series[0]), ("SYM2", &series[1]), ("SYM3", &series[2]), ("SYM4", &series[3])];

  c.bench_function("parallel_evaluate_4_instruments", |b| {
    b.iter(|| {
      let _ = black_box(evaluate_parallel(black_box(&ensemble), black_box(instruments.clone())));
    })
  });
}

criterion_group!(
  benches,
  bench_single_detector,
  bench_ensemble,
  bench_scaling,
  bench_parallel_evaluate,
);

criterion_main!(benches);
