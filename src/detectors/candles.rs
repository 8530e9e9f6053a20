//! Reversal-candle classification at a zone touch
//!
//! Body and shadow sizes are judged against trailing averages of the preceding
//! bars, falling back to ratios of the bar's own range when no history exists.

use serde::Serialize;

use super::zones::Side;
use crate::{OHLCVExt, OHLCV};

// ============================================================
// THRESHOLDS
// ============================================================

/// Trailing bars used for average body / range
pub const CANDLE_AVG_PERIOD: usize = 10;
/// Body is doji-like: body <= avg_range * DOJI_FACTOR
pub const DOJI_FACTOR: f64 = 0.1;
/// Body is short: body < avg_body * BODY_SHORT_FACTOR
pub const BODY_SHORT_FACTOR: f64 = 1.0;
/// Body is long: body > avg_body * BODY_LONG_FACTOR
pub const BODY_LONG_FACTOR: f64 = 1.0;
/// Shadow is very long: shadow > body * SHADOW_VERYLONG_FACTOR
pub const SHADOW_VERYLONG_FACTOR: f64 = 2.0;
/// Shadow is very short: shadow < avg_range * SHADOW_VERYSHORT_FACTOR
pub const SHADOW_VERYSHORT_FACTOR: f64 = 0.1;
/// Star third-candle penetration into the first body
pub const STAR_PENETRATION: f64 = 0.3;

// Fallback ratio-based thresholds (when averages are not meaningful)
const DOJI_RATIO: f64 = 0.1;
const BODY_SHORT_RATIO: f64 = 0.3;
const BODY_LONG_RATIO: f64 = 0.7;
const SHADOW_SHORT_RATIO: f64 = 0.1;

#[inline]
fn is_doji(body: f64, avg_range: f64, range: f64) -> bool {
    if body <= 0.0 {
        return true;
    }
    if avg_range > 0.0 {
        body <= avg_range * DOJI_FACTOR
    } else {
        range > 0.0 && body / range <= DOJI_RATIO
    }
}

#[inline]
fn is_body_short(body: f64, avg_body: f64, range: f64) -> bool {
    if avg_body > 0.0 {
        body < avg_body * BODY_SHORT_FACTOR
    } else {
        range > 0.0 && body / range <= BODY_SHORT_RATIO
    }
}

#[inline]
fn is_body_long(body: f64, avg_body: f64, range: f64) -> bool {
    if avg_body > 0.0 {
        body > avg_body * BODY_LONG_FACTOR
    } else {
        range > 0.0 && body / range >= BODY_LONG_RATIO
    }
}

#[inline]
fn is_shadow_verylong(shadow: f64, body: f64) -> bool {
    shadow > 0.0 && shadow > body * SHADOW_VERYLONG_FACTOR
}

#[inline]
fn is_shadow_very_short(shadow: f64, avg_range: f64, range: f64) -> bool {
    if avg_range > 0.0 {
        shadow < avg_range * SHADOW_VERYSHORT_FACTOR
    } else {
        range > 0.0 && shadow / range <= SHADOW_SHORT_RATIO
    }
}

/// Average body of the bars before `at`; the bar itself when there are none
fn trailing_avg_body<T: OHLCV>(bars: &[T], at: usize) -> f64 {
    if at == 0 {
        return bars[0].body();
    }
    let slice = &bars[at.saturating_sub(CANDLE_AVG_PERIOD)..at];
    slice.iter().map(|b| b.body()).sum::<f64>() / slice.len() as f64
}

/// Average high-low range of the bars before `at`
fn trailing_avg_range<T: OHLCV>(bars: &[T], at: usize) -> f64 {
    if at == 0 {
        return bars[0].range();
    }
    let slice = &bars[at.saturating_sub(CANDLE_AVG_PERIOD)..at];
    slice.iter().map(|b| b.range()).sum::<f64>() / slice.len() as f64
}

// ============================================================
// PATTERNS
// ============================================================

/// Reversal candles recognised at the last touch of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandlePattern {
    Hammer,
    BullishEngulfing,
    MorningStar,
    ShootingStar,
    BearishEngulfing,
    EveningStar,
    Doji,
}

impl CandlePattern {
    pub fn as_str(self) -> &'static str {
        match self {
            CandlePattern::Hammer => "hammer",
            CandlePattern::BullishEngulfing => "bullish_engulfing",
            CandlePattern::MorningStar => "morning_star",
            CandlePattern::ShootingStar => "shooting_star",
            CandlePattern::BearishEngulfing => "bearish_engulfing",
            CandlePattern::EveningStar => "evening_star",
            CandlePattern::Doji => "doji",
        }
    }
}

/// Classify the candle ending at `index` for the given zone side.
///
/// Support looks for morning star, bullish engulfing, hammer, doji (in that order);
/// resistance for evening star, bearish engulfing, shooting star, doji.
pub fn classify_reversal<T: OHLCV>(bars: &[T], index: usize, side: Side) -> Option<CandlePattern> {
    if index >= bars.len() {
        return None;
    }
    match side {
        Side::Support => star(bars, index, side)
            .then_some(CandlePattern::MorningStar)
            .or_else(|| engulfing(bars, index, side).then_some(CandlePattern::BullishEngulfing))
            .or_else(|| hammer(bars, index).then_some(CandlePattern::Hammer))
            .or_else(|| doji(bars, index).then_some(CandlePattern::Doji)),
        Side::Resistance => star(bars, index, side)
            .then_some(CandlePattern::EveningStar)
            .or_else(|| engulfing(bars, index, side).then_some(CandlePattern::BearishEngulfing))
            .or_else(|| shooting_star(bars, index).then_some(CandlePattern::ShootingStar))
            .or_else(|| doji(bars, index).then_some(CandlePattern::Doji)),
    }
}

fn doji<T: OHLCV>(bars: &[T], index: usize) -> bool {
    let bar = &bars[index];
    is_doji(bar.body(), trailing_avg_range(bars, index), bar.range())
}

/// Small body at the top of the range with a lower shadow over twice the body
fn hammer<T: OHLCV>(bars: &[T], index: usize) -> bool {
    let bar = &bars[index];
    let body = bar.body();
    let range = bar.range();

    is_body_short(body, trailing_avg_body(bars, index), range)
        && is_shadow_verylong(bar.lower_shadow(), body)
        && is_shadow_very_short(bar.upper_shadow(), trailing_avg_range(bars, index), range)
}

/// Mirror of the hammer: long upper shadow, nothing below the body
fn shooting_star<T: OHLCV>(bars: &[T], index: usize) -> bool {
    let bar = &bars[index];
    let body = bar.body();
    let range = bar.range();

    is_body_short(body, trailing_avg_body(bars, index), range)
        && is_shadow_verylong(bar.upper_shadow(), body)
        && is_shadow_very_short(bar.lower_shadow(), trailing_avg_range(bars, index), range)
}

/// Current body engulfs the opposite-coloured previous body (one matching end allowed)
fn engulfing<T: OHLCV>(bars: &[T], index: usize, side: Side) -> bool {
    if index < 1 {
        return false;
    }
    let prev = &bars[index - 1];
    let curr = &bars[index];

    match side {
        Side::Support => {
            if curr.close() < curr.open() || prev.close() >= prev.open() {
                return false;
            }
            let case_a = curr.close() >= prev.open() && curr.open() < prev.close();
            let case_b = curr.close() > prev.open() && curr.open() <= prev.close();
            case_a || case_b
        },
        Side::Resistance => {
            if curr.close() >= curr.open() || prev.close() < prev.open() {
                return false;
            }
            let case_a = curr.open() >= prev.close() && curr.close() < prev.open();
            let case_b = curr.open() > prev.close() && curr.close() <= prev.open();
            case_a || case_b
        },
    }
}

/// Morning star (support) / evening star (resistance) ending at `index`
fn star<T: OHLCV>(bars: &[T], index: usize, side: Side) -> bool {
    if index < 2 {
        return false;
    }
    let first = &bars[index - 2];
    let second = &bars[index - 1];
    let third = &bars[index];

    // Colours: long first candle against the trend, third candle with it
    let colours_ok = match side {
        Side::Support => first.is_bearish() && third.close() >= third.open(),
        Side::Resistance => first.close() >= first.open() && third.is_bearish(),
    };
    if !colours_ok {
        return false;
    }

    let first_body = first.body();
    if !is_body_long(first_body, trailing_avg_body(bars, index - 2), first.range()) {
        return false;
    }
    if !is_body_short(second.body(), trailing_avg_body(bars, index - 1), second.range()) {
        return false;
    }

    // Star body gaps away from the first body
    let gapped = match side {
        Side::Support => second.open().max(second.close()) < first.open().min(first.close()),
        Side::Resistance => second.open().min(second.close()) > first.open().max(first.close()),
    };
    if !gapped {
        return false;
    }

    if third.body() <= trailing_avg_body(bars, index) {
        return false;
    }

    match side {
        Side::Support => third.close() > first.close() + first_body * STAR_PENETRATION,
        Side::Resistance => third.close() < first.close() - first_body * STAR_PENETRATION,
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Candle {
        o: f64,
        h: f64,
        l: f64,
        c: f64,
    }

    impl OHLCV for Candle {
        fn open(&self) -> f64 {
            self.o
        }

        fn high(&self) -> f64 {
            self.h
        }

        fn low(&self) -> f64 {
            self.l
        }

        fn close(&self) -> f64 {
            self.c
        }

        fn volume(&self) -> f64 {
            1000.0
        }
    }

    fn c(o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle { o, h, l, c }
    }

    fn downtrend(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 - i as f64 * 2.0;
                c(base + 1.0, base + 2.0, base - 1.0, base - 0.5)
            })
            .collect()
    }

    #[test]
    fn test_hammer() {
        let mut bars = downtrend(10);
        bars.push(c(80.0, 80.1, 75.0, 80.05));
        let idx = bars.len() - 1;
        assert_eq!(classify_reversal(&bars, idx, Side::Support), Some(CandlePattern::Hammer));
    }

    #[test]
    fn test_shooting_star() {
        let mut bars = downtrend(10);
        bars.push(c(80.0, 85.0, 79.95, 80.05));
        let idx = bars.len() - 1;
        assert_eq!(
            classify_reversal(&bars, idx, Side::Resistance),
            Some(CandlePattern::ShootingStar)
        );
    }

    #[test]
    fn test_bullish_engulfing() {
        let mut bars = downtrend(10);
        bars.push(c(80.0, 81.0, 79.0, 79.5));
        bars.push(c(79.0, 82.0, 78.0, 81.5));
        let idx = bars.len() - 1;
        assert_eq!(
            classify_reversal(&bars, idx, Side::Support),
            Some(CandlePattern::BullishEngulfing)
        );
        assert_eq!(classify_reversal(&bars, idx, Side::Resistance), None);
    }

    #[test]
    fn test_morning_star() {
        let mut bars = downtrend(10);
        bars.push(c(82.0, 82.5, 75.5, 76.0)); // long black
        bars.push(c(74.5, 75.0, 73.5, 74.3)); // small star gapped down
        bars.push(c(75.0, 81.5, 74.8, 81.0)); // long white into the first body
        let idx = bars.len() - 1;
        assert_eq!(
            classify_reversal(&bars, idx, Side::Support),
            Some(CandlePattern::MorningStar)
        );
    }

    #[test]
    fn test_doji_fallback() {
        let mut bars = downtrend(10);
        bars.push(c(80.0, 83.0, 77.0, 80.0));
        let idx = bars.len() - 1;
        assert_eq!(classify_reversal(&bars, idx, Side::Resistance), Some(CandlePattern::Doji));
    }

    #[test]
    fn test_out_of_range_index() {
        let bars = downtrend(3);
        assert_eq!(classify_reversal(&bars, 5, Side::Support), None);
    }
}
