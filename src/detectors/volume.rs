//! Volume tension: squeezes, volatility contraction and spikes
//!
//! Five independent signals are counted and the count is mapped onto a
//! fixed step score:
//! - daily volume squeeze (Bollinger-style band width of volume)
//! - weekly volume squeeze on ISO-week sums
//! - volatility contraction pattern (VCP) across volume cycles
//! - volume spike (z-score of the latest bar)
//! - tight price range (true range and absolute moves contracting)

use serde::Serialize;

use super::helpers::{mean, pct_change, resample_weekly, std_dev, to_detail, volumes};
use crate::params::{
    check_params, get_factor, get_period, get_ratio, DetectorParams, ParamMeta,
    ParameterizedDetector,
};
use crate::{Bar, Detector, DetectorResult, Period, PriceSeries, Ratio, Result};

/// Registry name
pub const VOLUME_TENSION: &str = "volume_tension";

/// Band width is two standard deviations either side of the mean
const BAND_STD_DEVS: f64 = 2.0;

// ============================================================
// TYPES
// ============================================================

/// All volume-tension measurements for one series
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TensionReading {
    pub band_width: Option<f64>,
    pub band_width_mean: Option<f64>,
    pub squeeze: bool,
    pub weekly_squeeze: bool,
    pub vcp_count: usize,
    pub vcp: bool,
    pub spike_z: f64,
    pub spike: bool,
    /// Recent / historical mean true range
    pub range_ratio: Option<f64>,
    /// Recent / historical mean absolute close-to-close move
    pub volatility_ratio: Option<f64>,
    pub tight_range: bool,
    pub signals: usize,
    pub score: f64,
}

impl TensionReading {
    /// Names of the signals that fired
    pub fn fired(&self) -> Vec<&'static str> {
        [
            (self.squeeze, "daily squeeze"),
            (self.weekly_squeeze, "weekly squeeze"),
            (self.vcp, "VCP"),
            (self.spike, "volume spike"),
            (self.tight_range, "tight range"),
        ]
        .into_iter()
        .filter_map(|(hit, name)| hit.then_some(name))
        .collect()
    }
}

// ============================================================
// DETECTOR
// ============================================================

/// Volume squeeze / VCP detector
#[derive(Debug, Clone)]
pub struct VolumeTensionDetector {
    pub band_window: Period,
    /// Squeeze when the latest width is below this fraction of the recent mean
    pub squeeze_threshold: Ratio,
    pub vcp_window: Period,
    pub vcp_cycles: Period,
    /// A cycle contracts when its minimum is below `max * drop_factor`
    pub drop_factor: Ratio,
    pub spike_window: Period,
    pub spike_z: f64,
    pub tight_recent: Period,
    pub tight_history: Period,
    pub tight_ratio: Ratio,
    pub weekly_band_window: Period,
}

impl Default for VolumeTensionDetector {
    fn default() -> Self {
        Self {
            band_window: Period::new_const(20),
            squeeze_threshold: Ratio::new_const(0.25),
            vcp_window: Period::new_const(30),
            vcp_cycles: Period::new_const(3),
            drop_factor: Ratio::new_const(0.7),
            spike_window: Period::new_const(20),
            spike_z: 2.5,
            tight_recent: Period::new_const(5),
            tight_history: Period::new_const(20),
            tight_ratio: Ratio::new_const(0.8),
            weekly_band_window: Period::new_const(4),
        }
    }
}

impl_with_defaults!(VolumeTensionDetector);

static PARAMS: [ParamMeta; 11] = [
    ParamMeta::period("band_window", 20.0, (2.0, 200.0, 1.0), "Volume band window"),
    ParamMeta::ratio("squeeze_threshold", 0.25, (0.05, 1.0, 0.05), "Squeeze width fraction"),
    ParamMeta::period("vcp_window", 30.0, (3.0, 300.0, 3.0), "Bars split into VCP cycles"),
    ParamMeta::period("vcp_cycles", 3.0, (1.0, 10.0, 1.0), "VCP cycle count"),
    ParamMeta::ratio("drop_factor", 0.7, (0.1, 1.0, 0.05), "Cycle contraction factor"),
    ParamMeta::period("spike_window", 20.0, (2.0, 200.0, 1.0), "Bars behind the spike z-score"),
    ParamMeta::factor("spike_z", 2.5, (0.5, 10.0, 0.5), "Spike z-score threshold"),
    ParamMeta::period("tight_recent", 5.0, (1.0, 50.0, 1.0), "Recent bars for tightness"),
    ParamMeta::period("tight_history", 20.0, (2.0, 200.0, 1.0), "Historical bars for tightness"),
    ParamMeta::ratio("tight_ratio", 0.8, (0.1, 1.0, 0.05), "Tightness ratio"),
    ParamMeta::period("weekly_band_window", 4.0, (2.0, 52.0, 1.0), "Weekly band window"),
];

impl ParameterizedDetector for VolumeTensionDetector {
    fn param_meta() -> &'static [ParamMeta] {
        &PARAMS
    }

    fn with_params(params: &DetectorParams) -> Result<Self> {
        check_params(&PARAMS, params)?;
        let d = Self::default();
        Ok(Self {
            band_window: get_period(params, "band_window", d.band_window.get())?,
            squeeze_threshold: get_ratio(params, "squeeze_threshold", d.squeeze_threshold.get())?,
            vcp_window: get_period(params, "vcp_window", d.vcp_window.get())?,
            vcp_cycles: get_period(params, "vcp_cycles", d.vcp_cycles.get())?,
            drop_factor: get_ratio(params, "drop_factor", d.drop_factor.get())?,
            spike_window: get_period(params, "spike_window", d.spike_window.get())?,
            spike_z: get_factor(params, "spike_z", d.spike_z)?,
            tight_recent: get_period(params, "tight_recent", d.tight_recent.get())?,
            tight_history: get_period(params, "tight_history", d.tight_history.get())?,
            tight_ratio: get_ratio(params, "tight_ratio", d.tight_ratio.get())?,
            weekly_band_window: get_period(params, "weekly_band_window", d.weekly_band_window.get())?,
        })
    }

    fn detector_name() -> &'static str {
        VOLUME_TENSION
    }
}

impl VolumeTensionDetector {
    /// Measure every signal. Short or degenerate input yields signals that simply do not fire.
    pub fn read(&self, series: &PriceSeries) -> TensionReading {
        let bars = series.bars();
        let vols = volumes(bars);

        let window = self.band_window.get();
        let (squeeze, band_width, band_width_mean) =
            self.squeeze(&band_width_series(&vols, window), window);

        let weekly: Vec<f64> = resample_weekly(bars).iter().map(|w| w.volume).collect();
        let weekly_window = self.weekly_band_window.get();
        let (weekly_squeeze, _, _) =
            self.squeeze(&band_width_series(&weekly, weekly_window), weekly_window);

        let vcp_count = vcp_count(
            &vols,
            self.vcp_window.get(),
            self.vcp_cycles.get(),
            self.drop_factor.get(),
        );
        let vcp = vcp_count >= self.vcp_cycles.get();

        let spike_z = volume_z_score(&vols, self.spike_window.get());
        let spike = spike_z > self.spike_z;

        let (range_ratio, volatility_ratio) = self.tightness(bars);
        let tight = self.tight_ratio.get();
        let tight_range = matches!(
            (range_ratio, volatility_ratio),
            (Some(r), Some(v)) if r < tight && v < tight
        );

        let mut reading = TensionReading {
            band_width,
            band_width_mean,
            squeeze,
            weekly_squeeze,
            vcp_count,
            vcp,
            spike_z,
            spike,
            range_ratio,
            volatility_ratio,
            tight_range,
            signals: 0,
            score: 0.0,
        };
        reading.signals = reading.fired().len();
        reading.score = composite_score(reading.signals);
        reading
    }

    /// (squeezed, latest width, mean of the trailing `window` widths)
    fn squeeze(&self, widths: &[f64], window: usize) -> (bool, Option<f64>, Option<f64>) {
        let latest = widths.last().copied();
        if widths.len() < 2 {
            return (false, latest, None);
        }
        let avg = mean(&widths[widths.len().saturating_sub(window)..]);
        let squeezed = match (latest, avg) {
            (Some(l), Some(a)) => a > 0.0 && l < a * self.squeeze_threshold.get(),
            _ => false,
        };
        (squeezed, latest, avg)
    }

    fn tightness(&self, bars: &[Bar]) -> (Option<f64>, Option<f64>) {
        let true_ranges: Vec<f64> = bars
            .windows(2)
            .map(|w| {
                let (prev, bar) = (&w[0], &w[1]);
                (bar.high - bar.low)
                    .max((bar.high - prev.close).abs())
                    .max((bar.low - prev.close).abs())
            })
            .collect();
        let moves: Vec<f64> = bars
            .windows(2)
            .filter_map(|w| pct_change(w[0].close, w[1].close).map(f64::abs))
            .collect();

        let (recent, history) = (self.tight_recent.get(), self.tight_history.get());
        (
            recent_ratio(&true_ranges, recent, history),
            recent_ratio(&moves, recent, history),
        )
    }
}

impl Detector for VolumeTensionDetector {
    fn name(&self) -> &str {
        VOLUME_TENSION
    }

    fn min_bars(&self) -> usize {
        self.band_window.get() + 1
    }

    fn evaluate(&self, symbol: &str, series: &PriceSeries) -> Result<DetectorResult> {
        if series.len() < self.min_bars() {
            let mut result = DetectorResult::insufficient_data(self.min_bars(), series.len());
            result.explanation = format!(
                "insufficient volume history: need {} bars, got {}",
                self.min_bars(),
                series.len()
            );
            return Ok(result);
        }

        let reading = self.read(series);
        log::debug!(
            "[{symbol}] {VOLUME_TENSION}: {} signals (vcp {}/{})",
            reading.signals,
            reading.vcp_count,
            self.vcp_cycles.get()
        );

        let explanation = if reading.signals == 0 {
            "no volume tension".to_string()
        } else {
            format!("volume tension: {}", reading.fired().join(", "))
        };

        Ok(DetectorResult::new(reading.score, explanation)
            .with_detail("signals", reading.signals)
            .with_detail("reading", to_detail(&reading)))
    }
}

// ============================================================
// ALGORITHM PIECES
// ============================================================

/// Rolling `(upper - lower) / mean` over `window` values, skipping windows whose mean is ~0
pub fn band_width_series(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    values
        .windows(window)
        .filter_map(|w| {
            let m = mean(w)?;
            let sd = std_dev(w)?;
            (m.abs() > f64::EPSILON).then(|| 2.0 * BAND_STD_DEVS * sd / m)
        })
        .collect()
}

/// Contracting cycles among the last `window` values split into `cycles` equal parts
pub fn vcp_count(values: &[f64], window: usize, cycles: usize, drop_factor: f64) -> usize {
    if cycles == 0 || values.len() < window {
        return 0;
    }
    let cycle_len = window / cycles;
    if cycle_len == 0 {
        return 0;
    }
    values[values.len() - cycle_len * cycles..]
        .chunks(cycle_len)
        .filter(|cycle| {
            let max = cycle.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min = cycle.iter().copied().fold(f64::INFINITY, f64::min);
            max > 0.0 && min < max * drop_factor
        })
        .count()
}

/// Z-score of the last value against up to `window` values before it; 0 when flat
pub fn volume_z_score(values: &[f64], window: usize) -> f64 {
    let Some((&latest, before)) = values.split_last() else {
        return 0.0;
    };
    let prior = &before[before.len().saturating_sub(window)..];
    match (mean(prior), std_dev(prior)) {
        (Some(m), Some(sd)) if sd > f64::EPSILON => (latest - m) / sd,
        _ => 0.0,
    }
}

/// Step mapping from fired signals to score
pub fn composite_score(signals: usize) -> f64 {
    match signals {
        0 => 10.0,
        1 => 40.0,
        2 => 65.0,
        3 => 85.0,
        _ => 100.0,
    }
}

fn recent_ratio(values: &[f64], recent: usize, history: usize) -> Option<f64> {
    if values.len() < recent + history {
        return None;
    }
    let split = values.len() - recent;
    let r = mean(&values[split..])?;
    let h = mean(&values[split - history..split])?;
    (h > f64::EPSILON).then(|| r / h)
}

// ============================================================
// TESTS
// ============================================================
