//! Breakout-and-retest detection
//!
//! A breakout is a close (and high) above one of the major highs set before
//! the trailing breakout window. Each breakout is graded on the move itself
//! (gap, volume), the pattern it broke out of, and what happened next
//! (retest, follow-through). A weekly close above the prior week's high adds
//! a confirmation bonus, and a sharp multi-bar advance on rising volume is
//! scored separately as momentum.

use serde::Serialize;

use super::helpers::{mean, pct_change, resample_weekly, slope, to_detail, volumes};
use crate::params::{
    check_params, get_factor, get_period, get_ratio, DetectorParams, ParamMeta,
    ParameterizedDetector,
};
use crate::{
    validate_window, Bar, Detector, DetectorResult, Period, PriceSeries, Ratio, Result, MAX_SCORE,
    NEUTRAL_SCORE,
};

/// Registry name
pub const BREAKOUT_RETEST: &str = "breakout_retest";

/// Points per satisfied breakout criterion
const CRITERION_POINTS: f64 = 15.0;

/// Weekly bars checked for a close above the prior week's high
const RECENT_WEEKS: usize = 2;

// ============================================================
// TYPES
// ============================================================

/// The breakout bar itself
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BreakoutEvent {
    /// Index into the full series
    pub index: usize,
    /// Close of the breakout bar
    pub price: f64,
    /// Major high that was cleared
    pub reference: f64,
    pub gap: bool,
    pub high_volume: bool,
}

/// First pullback to the breakout price
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RetestOutcome {
    pub found: bool,
    pub held: bool,
    pub index: Option<usize>,
}

/// Shape of the bars leading into a breakout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrePattern {
    /// Falling highs against rising lows
    Triangle,
    /// Tight range relative to the mean close
    Consolidation,
}

/// A graded breakout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakoutCandidate {
    pub event: BreakoutEvent,
    pub pre_pattern: Option<PrePattern>,
    pub retest: RetestOutcome,
    /// No later low fell back below the reference (true while no bar has followed)
    pub genuine: bool,
    /// Return from the breakout close to the end of the follow-up window
    pub momentum_return: Option<f64>,
    pub successful: bool,
    pub weekly_confirmed: bool,
    pub score: f64,
}

/// Sharp advance on expanding volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MomentumSignal {
    pub return_pct: f64,
    pub volume_ratio: f64,
    pub score: f64,
}

/// Everything found in one lookback window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BreakoutAnalysis {
    pub references: Vec<f64>,
    pub candidates: Vec<BreakoutCandidate>,
    pub momentum: Option<MomentumSignal>,
    pub weekly_confirmed: bool,
}

impl BreakoutAnalysis {
    /// Highest-scoring breakout candidate
    pub fn best_candidate(&self) -> Option<&BreakoutCandidate> {
        self.candidates.iter().max_by(|a, b| a.score.total_cmp(&b.score))
    }

    /// Best of the candidate and momentum scores
    pub fn best_score(&self) -> Option<f64> {
        let candidate = self.best_candidate().map(|c| c.score);
        let momentum = self.momentum.map(|m| m.score);
        match (candidate, momentum) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

// ============================================================
// DETECTOR
// ============================================================

/// Breakout/retest detector
#[derive(Debug, Clone)]
pub struct BreakoutRetestDetector {
    pub lookback: Period,
    pub min_bars: Period,
    /// Trailing bars searched for breakouts; major highs come from before it
    pub breakout_window: Period,
    pub max_references: Period,
    pub gap_threshold: Ratio,
    pub volume_window: Period,
    pub volume_ratio: f64,
    pub pattern_window: Period,
    pub consolidation_range: Ratio,
    pub retest_window: Period,
    pub retest_tolerance: Ratio,
    pub hold_tolerance: Ratio,
    pub success_threshold: Ratio,
    pub weekly_bonus: f64,
    pub momentum_bars: Period,
    pub momentum_threshold: Ratio,
}

impl Default for BreakoutRetestDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(60),
            min_bars: Period::new_const(60),
            breakout_window: Period::new_const(10),
            max_references: Period::new_const(2),
            gap_threshold: Ratio::new_const(0.015),
            volume_window: Period::new_const(20),
            volume_ratio: 1.5,
            pattern_window: Period::new_const(15),
            consolidation_range: Ratio::new_const(0.07),
            retest_window: Period::new_const(10),
            retest_tolerance: Ratio::new_const(0.02),
            hold_tolerance: Ratio::new_const(0.01),
            success_threshold: Ratio::new_const(0.05),
            weekly_bonus: 10.0,
            momentum_bars: Period::new_const(7),
            momentum_threshold: Ratio::new_const(0.30),
        }
    }
}

impl_with_defaults!(BreakoutRetestDetector);

static PARAMS: [ParamMeta; 16] = [
    ParamMeta::period("lookback", 60.0, (20.0, 500.0, 10.0), "Bars analysed"),
    ParamMeta::period("min_bars", 60.0, (2.0, 500.0, 1.0), "Bars required before scoring"),
    ParamMeta::period("breakout_window", 10.0, (1.0, 100.0, 1.0), "Trailing bars searched"),
    ParamMeta::period("max_references", 2.0, (1.0, 10.0, 1.0), "Major highs tested"),
    ParamMeta::ratio("gap_threshold", 0.015, (0.001, 0.2, 0.005), "Close-to-close gap"),
    ParamMeta::period("volume_window", 20.0, (2.0, 200.0, 1.0), "Bars in the volume average"),
    ParamMeta::factor("volume_ratio", 1.5, (1.0, 10.0, 0.1), "High-volume multiple"),
    ParamMeta::period("pattern_window", 15.0, (3.0, 100.0, 1.0), "Bars checked for a pre-pattern"),
    ParamMeta::ratio("consolidation_range", 0.07, (0.01, 0.5, 0.01), "Max consolidation range"),
    ParamMeta::period("retest_window", 10.0, (1.0, 100.0, 1.0), "Bars searched for a retest"),
    ParamMeta::ratio("retest_tolerance", 0.02, (0.001, 0.2, 0.005), "Retest distance"),
    ParamMeta::ratio("hold_tolerance", 0.01, (0.0, 0.2, 0.005), "Allowed close below breakout"),
    ParamMeta::ratio("success_threshold", 0.05, (0.005, 1.0, 0.005), "Follow-through return"),
    ParamMeta::factor("weekly_bonus", 10.0, (0.1, 50.0, 1.0), "Weekly confirmation points"),
    ParamMeta::period("momentum_bars", 7.0, (2.0, 60.0, 1.0), "Bars in the momentum return"),
    ParamMeta::ratio("momentum_threshold", 0.30, (0.01, 1.0, 0.01), "Momentum return"),
];

impl ParameterizedDetector for BreakoutRetestDetector {
    fn param_meta() -> &'static [ParamMeta] {
        &PARAMS
    }

    fn with_params(params: &DetectorParams) -> Result<Self> {
        check_params(&PARAMS, params)?;
        let d = Self::default();
        Ok(Self {
            lookback: get_period(params, "lookback", d.lookback.get())?,
            min_bars: get_period(params, "min_bars", d.min_bars.get())?,
            breakout_window: get_period(params, "breakout_window", d.breakout_window.get())?,
            max_references: get_period(params, "max_references", d.max_references.get())?,
            gap_threshold: get_ratio(params, "gap_threshold", d.gap_threshold.get())?,
            volume_window: get_period(params, "volume_window", d.volume_window.get())?,
            volume_ratio: get_factor(params, "volume_ratio", d.volume_ratio)?,
            pattern_window: get_period(params, "pattern_window", d.pattern_window.get())?,
            consolidation_range: get_ratio(params, "consolidation_range", d.consolidation_range.get())?,
            retest_window: get_period(params, "retest_window", d.retest_window.get())?,
            retest_tolerance: get_ratio(params, "retest_tolerance", d.retest_tolerance.get())?,
            hold_tolerance: get_ratio(params, "hold_tolerance", d.hold_tolerance.get())?,
            success_threshold: get_ratio(params, "success_threshold", d.success_threshold.get())?,
            weekly_bonus: get_factor(params, "weekly_bonus", d.weekly_bonus)?,
            momentum_bars: get_period(params, "momentum_bars", d.momentum_bars.get())?,
            momentum_threshold: get_ratio(params, "momentum_threshold", d.momentum_threshold.get())?,
        })
    }

    fn detector_name() -> &'static str {
        BREAKOUT_RETEST
    }
}

impl BreakoutRetestDetector {
    /// Find and grade every breakout in the lookback window
    pub fn analyze(&self, series: &PriceSeries) -> Result<BreakoutAnalysis> {
        let bars = series.bars();
        let len = bars.len();
        let start = len.saturating_sub(self.lookback.get());
        validate_window(&bars[start..], start)?;

        let split = len.saturating_sub(self.breakout_window.get()).max(start);
        let references = major_highs(&bars[start..split], self.max_references.get());
        let weekly_confirmed = weekly_breakout(&bars[start..], RECENT_WEEKS);

        let mut candidates = Vec::new();
        for i in split.max(1)..len {
            let bar = &bars[i];
            // Highest reference first
            if let Some(&reference) = references.iter().find(|&&r| bar.close > r && bar.high > r) {
                candidates.push(self.grade(bars, i, reference, weekly_confirmed));
            }
        }

        Ok(BreakoutAnalysis {
            references,
            candidates,
            momentum: self.momentum(bars, weekly_confirmed),
            weekly_confirmed,
        })
    }

    fn grade(&self, bars: &[Bar], i: usize, reference: f64, weekly_confirmed: bool) -> BreakoutCandidate {
        let bar = &bars[i];
        let price = bar.close;

        let gap = pct_change(bars[i - 1].close, price).is_some_and(|r| r > self.gap_threshold.get());
        let prior = &bars[i.saturating_sub(self.volume_window.get())..i];
        let high_volume = mean(&volumes(prior))
            .is_some_and(|avg| avg > 0.0 && bar.volume > avg * self.volume_ratio);
        let pre_pattern = self.pre_pattern(&bars[i.saturating_sub(self.pattern_window.get())..i]);

        let following = &bars[i + 1..(i + 1 + self.retest_window.get()).min(bars.len())];
        let retest = self.retest(following, price, i + 1);
        let genuine = following.iter().all(|b| b.low >= reference);
        let momentum_return = following.last().and_then(|b| pct_change(price, b.close));
        let successful = momentum_return.is_some_and(|r| r > self.success_threshold.get());

        let mut candidate = BreakoutCandidate {
            event: BreakoutEvent {
                index: i,
                price,
                reference,
                gap,
                high_volume,
            },
            pre_pattern,
            retest,
            genuine,
            momentum_return,
            successful,
            weekly_confirmed,
            score: 0.0,
        };
        candidate.score = self.score_candidate(&candidate);
        candidate
    }

    /// Consolidation wins over triangle when both hold
    fn pre_pattern(&self, window: &[Bar]) -> Option<PrePattern> {
        if window.len() < 3 {
            return None;
        }
        let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let mean_close = mean(&window.iter().map(|b| b.close).collect::<Vec<_>>())?;
        if mean_close > 0.0 && (high - low) / mean_close < self.consolidation_range.get() {
            return Some(PrePattern::Consolidation);
        }

        let highs = slope(&window.iter().map(|b| b.high).collect::<Vec<_>>())?;
        let lows = slope(&window.iter().map(|b| b.low).collect::<Vec<_>>())?;
        (highs < 0.0 && lows > 0.0).then_some(PrePattern::Triangle)
    }

    /// First bar in `following` whose low comes back within tolerance of `price`
    fn retest(&self, following: &[Bar], price: f64, first_index: usize) -> RetestOutcome {
        if price <= 0.0 {
            return RetestOutcome::default();
        }
        following
            .iter()
            .position(|b| ((b.low - price) / price).abs() <= self.retest_tolerance.get())
            .map(|k| RetestOutcome {
                found: true,
                held: following[k].close >= price * (1.0 - self.hold_tolerance.get()),
                index: Some(first_index + k),
            })
            .unwrap_or_default()
    }

    fn score_candidate(&self, c: &BreakoutCandidate) -> f64 {
        let criteria = [
            c.event.gap,
            c.event.high_volume,
            c.pre_pattern.is_some(),
            c.retest.found && c.retest.held,
            c.genuine,
            c.successful,
        ];
        let met = criteria.iter().filter(|&&hit| hit).count() as f64;
        let mut score = NEUTRAL_SCORE + CRITERION_POINTS * met;
        if c.weekly_confirmed {
            score += self.weekly_bonus;
        }
        score.min(MAX_SCORE)
    }

    fn momentum(&self, bars: &[Bar], weekly_confirmed: bool) -> Option<MomentumSignal> {
        let n = self.momentum_bars.get();
        let len = bars.len();
        if len <= n {
            return None;
        }

        let return_pct = pct_change(bars[len - 1 - n].close, bars[len - 1].close)?;
        let split = len - n;
        let recent = mean(&volumes(&bars[split..]))?;
        let prior = mean(&volumes(&bars[split.saturating_sub(self.volume_window.get())..split]))?;
        if prior <= 0.0 {
            return None;
        }
        let volume_ratio = recent / prior;

        let threshold = self.momentum_threshold.get();
        if return_pct <= threshold || volume_ratio <= 1.0 {
            return None;
        }

        let mut score = NEUTRAL_SCORE + 2.0 * CRITERION_POINTS;
        if return_pct >= 2.0 * threshold {
            score += CRITERION_POINTS;
        }
        if weekly_confirmed {
            score += self.weekly_bonus;
        }
        Some(MomentumSignal {
            return_pct,
            volume_ratio,
            score: score.min(MAX_SCORE),
        })
    }
}

impl Detector for BreakoutRetestDetector {
    fn name(&self) -> &str {
        BREAKOUT_RETEST
    }

    fn min_bars(&self) -> usize {
        self.min_bars.get()
    }

    fn evaluate(&self, symbol: &str, series: &PriceSeries) -> Result<DetectorResult> {
        if series.len() < self.min_bars.get() {
            return Ok(DetectorResult::insufficient_data(self.min_bars.get(), series.len()));
        }

        let analysis = self.analyze(series)?;
        log::debug!(
            "[{symbol}] {BREAKOUT_RETEST}: {} candidates, momentum={}",
            analysis.candidates.len(),
            analysis.momentum.is_some()
        );

        let result = match analysis.best_score() {
            None => DetectorResult::neutral("no significant breakout detected"),
            Some(score) => DetectorResult::new(score, explain(&analysis, score)),
        };

        Ok(result
            .with_detail("references", to_detail(&analysis.references))
            .with_detail("candidates", to_detail(&analysis.candidates))
            .with_detail("momentum", to_detail(&analysis.momentum))
            .with_detail("weekly_confirmed", analysis.weekly_confirmed))
    }
}

// ============================================================
// ALGORITHM PIECES
// ============================================================

/// Up to `n` distinct highs of `bars`, highest first
pub fn major_highs(bars: &[Bar], n: usize) -> Vec<f64> {
    let mut highs: Vec<f64> = bars.iter().map(|b| b.high).filter(|h| h.is_finite()).collect();
    highs.sort_by(|a, b| b.total_cmp(a));
    highs.dedup();
    highs.truncate(n);
    highs
}

/// Any of the last `recent` weekly closes above the high of the week before it.
/// The newest week may still be in progress.
pub fn weekly_breakout(bars: &[Bar], recent: usize) -> bool {
    let weeks = resample_weekly(bars);
    let first = weeks.len().saturating_sub(recent + 1);
    weeks[first..].windows(2).any(|w| w[1].close > w[0].high)
}

fn explain(analysis: &BreakoutAnalysis, score: f64) -> String {
    let momentum_wins = analysis.momentum.is_some_and(|m| m.score >= score);
    let mut text = match (analysis.best_candidate(), analysis.momentum) {
        (Some(c), _) if !momentum_wins => {
            let mut tags = Vec::new();
            if c.event.gap {
                tags.push("gap");
            }
            if c.event.high_volume {
                tags.push("high volume");
            }
            match c.pre_pattern {
                Some(PrePattern::Triangle) => tags.push("out of triangle"),
                Some(PrePattern::Consolidation) => tags.push("out of consolidation"),
                None => {},
            }
            if c.retest.found && c.retest.held {
                tags.push("retest held");
            }
            if c.genuine {
                tags.push("genuine");
            }
            if c.successful {
                tags.push("follow-through");
            }
            let mut text = format!(
                "breakout above {:.2} at bar {}",
                c.event.reference, c.event.index
            );
            if !tags.is_empty() {
                text.push_str(&format!(" ({})", tags.join(", ")));
            }
            text
        },
        (_, Some(m)) => format!(
            "momentum {:.1}% on {:.2}x volume",
            m.return_pct * 100.0,
            m.volume_ratio
        ),
        (_, None) => "no significant breakout detected".to_string(),
    };
    if analysis.weekly_confirmed {
        text.push_str("; weekly close above prior week high");
    }
    text
}

// ============================================================
// TESTS
// ============================================================
