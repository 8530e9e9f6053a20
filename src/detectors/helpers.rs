//! Common helpers shared by the core detectors
//!
//! Small statistics, a price-binned volume histogram and weekly resampling.

use chrono::Datelike;
use serde::Serialize;

use crate::{Bar, OHLCV};

// ============================================================
// STATISTICS
// ============================================================

/// Arithmetic mean, None for an empty slice
#[inline]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation, None for an empty slice
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Least-squares slope of `values` against their index. None below two points.
pub fn slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values)?;
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });
    (den > 0.0).then(|| num / den)
}

/// Fractional change `to / from - 1`. None when `from` is ~0.
#[inline]
pub fn pct_change(from: f64, to: f64) -> Option<f64> {
    (from.abs() > f64::EPSILON).then(|| to / from - 1.0)
}

/// Volumes of a bar slice
pub fn volumes<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    bars.iter().map(|b| b.volume()).collect()
}

/// Serialize into a detail value; unrepresentable data becomes null
pub fn to_detail<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

// ============================================================
// PRICE BINS / VOLUME PROFILE
// ============================================================

/// Equal-width partition of a price range
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBins {
    start: f64,
    end: f64,
    n_bins: usize,
}

impl PriceBins {
    /// `bin_width_ratio` is the width of one bin as a fraction of the whole range.
    /// A degenerate range collapses into a single bin.
    pub fn new(start: f64, end: f64, bin_width_ratio: f64) -> Self {
        let n_bins = if end - start <= f64::EPSILON || bin_width_ratio <= 0.0 {
            1
        } else {
            ((1.0 / bin_width_ratio) - 1e-9).ceil().max(1.0) as usize
        };
        Self { start, end, n_bins }
    }

    #[inline]
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    pub fn bin_size(&self) -> f64 {
        (self.end - self.start) / self.n_bins as f64
    }

    /// Index of the bin holding `price`, clamped to the partition
    pub fn bin_index(&self, price: f64) -> usize {
        let size = self.bin_size();
        if size <= 0.0 {
            return 0;
        }
        // Negative offsets saturate to 0 on the cast
        let index = ((price - self.start) / size) as usize;
        index.min(self.n_bins - 1)
    }

    /// Inclusive bin span for `[low, high]`, None when it misses the partition
    pub fn span(&self, mut low: f64, mut high: f64) -> Option<(usize, usize)> {
        if high < low {
            (low, high) = (high, low);
        }
        if high < self.start || low > self.end {
            return None;
        }
        Some((self.bin_index(low), self.bin_index(high)))
    }
}

/// Histogram of traded volume per price bin over a window of bars
#[derive(Debug, Clone)]
pub struct VolumeProfile {
    bins: PriceBins,
    volumes: Vec<f64>,
}

impl VolumeProfile {
    /// Spread each bar's volume evenly across the bins its low-high range touches
    pub fn build<T: OHLCV>(bars: &[T], bin_width_ratio: f64) -> Option<Self> {
        let low = bars.iter().map(|b| b.low()).fold(f64::INFINITY, f64::min);
        let high = bars.iter().map(|b| b.high()).fold(f64::NEG_INFINITY, f64::max);
        if !low.is_finite() || !high.is_finite() {
            return None;
        }

        let bins = PriceBins::new(low, high, bin_width_ratio);
        let mut volumes = vec![0.0; bins.n_bins()];
        for bar in bars {
            if let Some((first, last)) = bins.span(bar.low(), bar.high()) {
                let share = bar.volume() / (last - first + 1) as f64;
                volumes[first..=last].iter_mut().for_each(|v| *v += share);
            }
        }
        Some(Self { bins, volumes })
    }

    pub fn bins(&self) -> &PriceBins {
        &self.bins
    }

    pub fn total(&self) -> f64 {
        self.volumes.iter().sum()
    }

    pub fn mean_bin_volume(&self) -> f64 {
        self.total() / self.volumes.len() as f64
    }

    /// Histogram mass inside `[low, high]`
    pub fn mass_between(&self, low: f64, high: f64) -> f64 {
        self.bins
            .span(low, high)
            .map(|(first, last)| self.volumes[first..=last].iter().sum())
            .unwrap_or(0.0)
    }

    /// Number of bins `[low, high]` overlaps
    pub fn bins_spanned(&self, low: f64, high: f64) -> usize {
        self.bins
            .span(low, high)
            .map(|(first, last)| last - first + 1)
            .unwrap_or(0)
    }
}

// ============================================================
// WEEKLY RESAMPLING
// ============================================================

/// One ISO week folded from daily bars
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeeklyBar {
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Group consecutive bars by ISO week (year + week number)
pub fn resample_weekly(bars: &[Bar]) -> Vec<WeeklyBar> {
    let mut weeks: Vec<WeeklyBar> = Vec::new();
    let mut current_key = None;

    for bar in bars {
        let iso = bar.timestamp.iso_week();
        let key = (iso.year(), iso.week());
        match weeks.last_mut() {
            Some(week) if current_key == Some(key) => {
                week.high = week.high.max(bar.high);
                week.low = week.low.min(bar.low);
                week.close = bar.close;
                week.volume += bar.volume;
            },
            _ => {
                weeks.push(WeeklyBar {
                    high: bar.high,
                    low: bar.low,
                    close: bar.close,
                    volume: bar.volume,
                });
                current_key = Some(key);
            },
        }
    }

    weeks
}

// ============================================================
// TESTS
// ============================================================
