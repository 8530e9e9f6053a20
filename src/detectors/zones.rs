//! Support/resistance zone detection with volume profiling
//!
//! Local extrema of the trailing window are clustered into price bands. Each
//! band is then enriched with touch count, traded volume (per bar and from a
//! price-binned histogram), post-touch rebound, false breaks, the reversal
//! candle at the last touch and double bottom/top confirmation.

use serde::Serialize;

use super::candles::{classify_reversal, CandlePattern};
use super::helpers::{mean, to_detail, volumes, VolumeProfile};
use crate::params::{
    check_params, get_factor, get_period, get_ratio, DetectorParams, ParamMeta,
    ParameterizedDetector,
};
use crate::{
    validate_window, Bar, Detector, DetectorResult, Period, PriceSeries, Ratio, Result, MAX_SCORE,
    OHLCV,
};

/// Registry name
pub const SUPPORT_RESISTANCE: &str = "support_resistance";

// Zone score components
const BASE_MULTI_TOUCH: f64 = 25.0;
const BASE_MIN_TOUCH: f64 = 10.0;
const VOLUME_SPIKE_POINTS: f64 = 20.0;
const REBOUND_POINTS: f64 = 15.0;
const CANDLE_POINTS: f64 = 10.0;
const FALSE_BREAK_POINTS: f64 = 15.0;
const DOUBLE_PATTERN_POINTS: f64 = 10.0;

// ============================================================
// TYPES
// ============================================================

/// Which side of price a zone sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Support,
    Resistance,
}

impl Side {
    /// The bar price this side reacts to: lows for support, highs for resistance
    #[inline]
    pub fn price<T: OHLCV>(self, bar: &T) -> f64 {
        match self {
            Side::Support => bar.low(),
            Side::Resistance => bar.high(),
        }
    }

    /// True when `a` lies further out than `b` (lower for support, higher for resistance)
    #[inline]
    fn more_extreme(self, a: f64, b: f64) -> bool {
        match self {
            Side::Support => a < b,
            Side::Resistance => a > b,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Support => "support",
            Side::Resistance => "resistance",
        }
    }
}

/// A clustered price level and everything measured around it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zone {
    pub side: Side,
    pub level: f64,
    /// (lower, upper) edges of the tolerance band
    pub band: (f64, f64),
    pub touches: usize,
    /// Series index of the most recent touch
    pub last_touch: usize,
    pub touch_volume: f64,
    pub profile_volume: f64,
    pub volume_spike: bool,
    pub rebound: f64,
    pub false_break: bool,
    pub candle: Option<CandlePattern>,
    pub double_pattern: bool,
    pub score: f64,
}

impl Zone {
    #[inline]
    fn contains(&self, price: f64) -> bool {
        price >= self.band.0 && price <= self.band.1
    }
}

/// Zones found in one window, strongest first on each side
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoneAnalysis {
    pub supports: Vec<Zone>,
    pub resistances: Vec<Zone>,
    pub double_bottom: bool,
    pub double_top: bool,
}

impl ZoneAnalysis {
    /// Highest-scoring zone on either side
    pub fn strongest(&self) -> Option<&Zone> {
        self.supports
            .iter()
            .chain(&self.resistances)
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

// ============================================================
// DETECTOR
// ============================================================

/// Support/resistance zone detector
#[derive(Debug, Clone)]
pub struct SupportResistanceDetector {
    pub window: Period,
    pub min_bars: Period,
    /// Half-width of a zone band, relative to its level
    pub tolerance: Ratio,
    pub min_touches: Period,
    /// Histogram bin width as a fraction of the window's price range
    pub bin_width: Ratio,
    pub touch_volume_ratio: f64,
    pub profile_volume_ratio: f64,
    pub rebound_bars: Period,
    pub rebound_threshold: Ratio,
    pub false_break_bars: Period,
    pub double_tolerance: Ratio,
}

impl Default for SupportResistanceDetector {
    fn default() -> Self {
        Self {
            window: Period::new_const(50),
            min_bars: Period::new_const(50),
            tolerance: Ratio::new_const(0.012),
            min_touches: Period::new_const(2),
            bin_width: Ratio::new_const(0.005),
            touch_volume_ratio: 1.3,
            profile_volume_ratio: 1.5,
            rebound_bars: Period::new_const(3),
            rebound_threshold: Ratio::new_const(0.045),
            false_break_bars: Period::new_const(2),
            double_tolerance: Ratio::new_const(0.01),
        }
    }
}

impl_with_defaults!(SupportResistanceDetector);

static PARAMS: [ParamMeta; 11] = [
    ParamMeta::period("window", 50.0, (10.0, 500.0, 10.0), "Trailing bars scanned for zones"),
    ParamMeta::period("min_bars", 50.0, (3.0, 500.0, 1.0), "Bars required before scoring"),
    ParamMeta::ratio("tolerance", 0.012, (0.001, 0.1, 0.001), "Zone band half-width"),
    ParamMeta::period("min_touches", 2.0, (1.0, 20.0, 1.0), "Touches required to keep a zone"),
    ParamMeta::ratio("bin_width", 0.005, (0.001, 0.5, 0.001), "Histogram bin width / price range"),
    ParamMeta::factor("touch_volume_ratio", 1.3, (1.0, 5.0, 0.1), "Touch volume spike multiple"),
    ParamMeta::factor("profile_volume_ratio", 1.5, (1.0, 5.0, 0.1), "Profile volume spike multiple"),
    ParamMeta::period("rebound_bars", 3.0, (1.0, 20.0, 1.0), "Bars measured after the last touch"),
    ParamMeta::ratio("rebound_threshold", 0.045, (0.005, 0.5, 0.005), "Rebound worth scoring"),
    ParamMeta::period("false_break_bars", 2.0, (1.0, 10.0, 1.0), "Pierce-and-reclaim bars needed"),
    ParamMeta::ratio("double_tolerance", 0.01, (0.001, 0.1, 0.001), "Double bottom/top match"),
];

impl ParameterizedDetector for SupportResistanceDetector {
    fn param_meta() -> &'static [ParamMeta] {
        &PARAMS
    }

    fn with_params(params: &DetectorParams) -> Result<Self> {
        check_params(&PARAMS, params)?;
        let d = Self::default();
        Ok(Self {
            window: get_period(params, "window", d.window.get())?,
            min_bars: get_period(params, "min_bars", d.min_bars.get())?,
            tolerance: get_ratio(params, "tolerance", d.tolerance.get())?,
            min_touches: get_period(params, "min_touches", d.min_touches.get())?,
            bin_width: get_ratio(params, "bin_width", d.bin_width.get())?,
            touch_volume_ratio: get_factor(params, "touch_volume_ratio", d.touch_volume_ratio)?,
            profile_volume_ratio: get_factor(params, "profile_volume_ratio", d.profile_volume_ratio)?,
            rebound_bars: get_period(params, "rebound_bars", d.rebound_bars.get())?,
            rebound_threshold: get_ratio(params, "rebound_threshold", d.rebound_threshold.get())?,
            false_break_bars: get_period(params, "false_break_bars", d.false_break_bars.get())?,
            double_tolerance: get_ratio(params, "double_tolerance", d.double_tolerance.get())?,
        })
    }

    fn detector_name() -> &'static str {
        SUPPORT_RESISTANCE
    }
}

impl SupportResistanceDetector {
    /// Find and score every support and resistance zone in the trailing window
    pub fn find_zones(&self, series: &PriceSeries) -> Result<ZoneAnalysis> {
        let bars = series.tail(self.window.get());
        let offset = series.len() - bars.len();
        validate_window(bars, offset)?;

        if bars.len() < 3 {
            return Ok(ZoneAnalysis::default());
        }

        let profile = VolumeProfile::build(bars, self.bin_width.get());
        let avg_volume = mean(&volumes(bars)).unwrap_or(0.0);

        let (supports, double_bottom) =
            self.side_zones(Side::Support, bars, offset, profile.as_ref(), avg_volume);
        let (resistances, double_top) =
            self.side_zones(Side::Resistance, bars, offset, profile.as_ref(), avg_volume);

        Ok(ZoneAnalysis {
            supports,
            resistances,
            double_bottom,
            double_top,
        })
    }

    fn side_zones(
        &self,
        side: Side,
        bars: &[Bar],
        offset: usize,
        profile: Option<&VolumeProfile>,
        avg_volume: f64,
    ) -> (Vec<Zone>, bool) {
        let candidates = local_extrema(bars, side);
        let double = double_extreme(&candidates, side, self.double_tolerance.get());
        let prices = candidates.iter().map(|&(_, p)| p).collect();

        let mut zones: Vec<Zone> = cluster_levels(prices, self.tolerance.get())
            .into_iter()
            .filter_map(|level| {
                let mut zone = self.measure_zone(side, level, bars, profile, avg_volume)?;
                zone.double_pattern = double.is_some_and(|p| zone.contains(p));
                zone.last_touch += offset;
                zone.score = score_zone(&zone, self.rebound_threshold.get());
                Some(zone)
            })
            .collect();

        zones.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| match side {
                Side::Support => b.level.total_cmp(&a.level),
                Side::Resistance => a.level.total_cmp(&b.level),
            })
        });

        (zones, double.is_some())
    }

    /// Touches, volume, rebound, false breaks and candle for one level.
    /// None when the band is touched fewer than `min_touches` times.
    fn measure_zone(
        &self,
        side: Side,
        level: f64,
        bars: &[Bar],
        profile: Option<&VolumeProfile>,
        avg_volume: f64,
    ) -> Option<Zone> {
        let tol = self.tolerance.get();
        let band = (level * (1.0 - tol), level * (1.0 + tol));

        let touches: Vec<usize> = bars
            .iter()
            .enumerate()
            .filter(|(_, bar)| {
                let p = side.price(*bar);
                p >= band.0 && p <= band.1
            })
            .map(|(i, _)| i)
            .collect();
        if touches.len() < self.min_touches.get() {
            return None;
        }
        let last_touch = *touches.last()?;

        let touch_volume =
            mean(&touches.iter().map(|&i| bars[i].volume).collect::<Vec<_>>()).unwrap_or(0.0);
        let (profile_volume, profile_avg) = profile
            .map(|p| {
                (
                    p.mass_between(band.0, band.1),
                    p.mean_bin_volume() * p.bins_spanned(band.0, band.1) as f64,
                )
            })
            .unwrap_or((0.0, 0.0));
        let volume_spike = (avg_volume > 0.0
            && touch_volume > avg_volume * self.touch_volume_ratio)
            || (profile_avg > 0.0 && profile_volume > profile_avg * self.profile_volume_ratio);

        Some(Zone {
            side,
            level,
            band,
            touches: touches.len(),
            last_touch,
            touch_volume,
            profile_volume,
            volume_spike,
            rebound: self.rebound(side, bars, last_touch),
            false_break: self.false_break(side, bars, level, band),
            candle: classify_reversal(bars, last_touch, side),
            double_pattern: false,
            score: 0.0,
        })
    }

    /// Close excursion over the bars after `touch`, relative to the touch price
    fn rebound(&self, side: Side, bars: &[Bar], touch: usize) -> f64 {
        let touch_price = side.price(&bars[touch]);
        let end = (touch + 1 + self.rebound_bars.get()).min(bars.len());
        let after = &bars[touch + 1..end];
        if after.is_empty() || touch_price <= 0.0 {
            return 0.0;
        }

        match side {
            Side::Support => {
                let best = after.iter().map(|b| b.close).fold(f64::NEG_INFINITY, f64::max);
                (best - touch_price) / touch_price
            },
            Side::Resistance => {
                let best = after.iter().map(|b| b.close).fold(f64::INFINITY, f64::min);
                (touch_price - best) / touch_price
            },
        }
    }

    /// Enough bars pierced twice the band yet closed back on the zone's side
    fn false_break(&self, side: Side, bars: &[Bar], level: f64, band: (f64, f64)) -> bool {
        let tol = self.tolerance.get();
        let pierced = bars
            .iter()
            .filter(|b| match side {
                Side::Support => b.low < level * (1.0 - 2.0 * tol) && b.close >= band.0,
                Side::Resistance => b.high > level * (1.0 + 2.0 * tol) && b.close <= band.1,
            })
            .count();
        pierced >= self.false_break_bars.get()
    }
}

impl Detector for SupportResistanceDetector {
    fn name(&self) -> &str {
        SUPPORT_RESISTANCE
    }

    fn min_bars(&self) -> usize {
        self.min_bars.get()
    }

    fn evaluate(&self, symbol: &str, series: &PriceSeries) -> Result<DetectorResult> {
        if series.len() < self.min_bars.get() {
            return Ok(DetectorResult::insufficient_data(self.min_bars.get(), series.len()));
        }

        let analysis = self.find_zones(series)?;
        log::debug!(
            "[{symbol}] {SUPPORT_RESISTANCE}: {} support / {} resistance zones",
            analysis.supports.len(),
            analysis.resistances.len()
        );

        let result = match analysis.strongest() {
            None => DetectorResult::neutral("no qualifying support/resistance zones"),
            Some(zone) => DetectorResult::new(
                zone.score,
                format!(
                    "strongest {} at {:.2} ({}); {} support / {} resistance zones",
                    zone.side.as_str(),
                    zone.level,
                    describe(zone),
                    analysis.supports.len(),
                    analysis.resistances.len()
                ),
            ),
        };

        Ok(result
            .with_detail("support_count", analysis.supports.len())
            .with_detail("resistance_count", analysis.resistances.len())
            .with_detail("double_bottom", analysis.double_bottom)
            .with_detail("double_top", analysis.double_top)
            .with_detail("supports", to_detail(&analysis.supports))
            .with_detail("resistances", to_detail(&analysis.resistances)))
    }
}

// ============================================================
// ALGORITHM PIECES
// ============================================================

/// Bars whose side price is strictly beyond both neighbours, as (index, price)
pub fn local_extrema<T: OHLCV>(bars: &[T], side: Side) -> Vec<(usize, f64)> {
    if bars.len() < 3 {
        return Vec::new();
    }
    (1..bars.len() - 1)
        .filter_map(|i| {
            let p = side.price(&bars[i]);
            let beyond_prev = side.more_extreme(p, side.price(&bars[i - 1]));
            let beyond_next = side.more_extreme(p, side.price(&bars[i + 1]));
            (beyond_prev && beyond_next).then_some((i, p))
        })
        .collect()
}

/// Group sorted prices: a price joins the running cluster while within
/// `tolerance` of the cluster mean. Returns each cluster's mean.
pub fn cluster_levels(mut prices: Vec<f64>, tolerance: f64) -> Vec<f64> {
    prices.retain(|p| p.is_finite());
    prices.sort_by(f64::total_cmp);

    let mut levels = Vec::new();
    let mut cluster: Vec<f64> = Vec::new();
    for p in prices {
        if let Some(m) = mean(&cluster) {
            if m <= 0.0 || (p - m).abs() / m > tolerance {
                levels.push(m);
                cluster.clear();
            }
        }
        cluster.push(p);
    }
    if let Some(m) = mean(&cluster) {
        levels.push(m);
    }
    levels
}

/// The most extreme candidate when the two most extreme lie within `tolerance`
fn double_extreme(candidates: &[(usize, f64)], side: Side, tolerance: f64) -> Option<f64> {
    let mut prices: Vec<f64> = candidates.iter().map(|&(_, p)| p).collect();
    prices.sort_by(|a, b| match side {
        Side::Support => a.total_cmp(b),
        Side::Resistance => b.total_cmp(a),
    });
    let (&first, &second) = (prices.first()?, prices.get(1)?);
    let scale = first.abs().max(second.abs());
    (scale > 0.0 && (first - second).abs() <= tolerance * scale).then_some(first)
}

/// Additive zone score, capped at 100
fn score_zone(zone: &Zone, rebound_threshold: f64) -> f64 {
    let mut score = if zone.touches > 2 {
        BASE_MULTI_TOUCH
    } else {
        BASE_MIN_TOUCH
    };
    if zone.volume_spike {
        score += VOLUME_SPIKE_POINTS;
    }
    if zone.rebound > rebound_threshold {
        score += REBOUND_POINTS;
    }
    if zone.candle.is_some() {
        score += CANDLE_POINTS;
    }
    if zone.false_break {
        score += FALSE_BREAK_POINTS;
    }
    if zone.double_pattern {
        score += DOUBLE_PATTERN_POINTS;
    }
    score.min(MAX_SCORE)
}

fn describe(zone: &Zone) -> String {
    let mut tags = vec![format!("{} touches", zone.touches)];
    if zone.volume_spike {
        tags.push("volume spike".to_string());
    }
    if zone.rebound > 0.0 {
        tags.push(format!("rebound {:.1}%", zone.rebound * 100.0));
    }
    if zone.false_break {
        tags.push("false break".to_string());
    }
    if let Some(candle) = zone.candle {
        tags.push(candle.as_str().replace('_', " "));
    }
    if zone.double_pattern {
        tags.push(match zone.side {
            Side::Support => "double bottom".to_string(),
            Side::Resistance => "double top".to_string(),
        });
    }
    tags.join(", ")
}

// ============================================================
// TESTS
// ============================================================
