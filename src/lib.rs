//! # Confluence - weighted-consensus setup scoring
//!
//! Ranks a tradable instrument by running independent technical-pattern
//! detectors over one price series and folding their scores into a single
//! weighted consensus.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use confluence::prelude::*;
//!
//! let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let bars: Vec<Bar> = (0..80)
//!     .map(|i| {
//!         let base = 100.0 + (i as f64 * 0.3).sin() * 5.0;
//!         Bar::new(start + Duration::days(i), base, base + 1.0, base - 1.0, base + 0.5, 1_000.0)
//!     })
//!     .collect();
//! let series = PriceSeries::new(bars).unwrap();
//!
//! // Engine with the default weight table
//! let ensemble = EnsembleBuilder::new().with_all_defaults().build().unwrap();
//!
//! let result = ensemble.evaluate("ACME", &series);
//! assert!((1.0..=100.0).contains(&result.score));
//! println!("{} -> {:.2} ({})", result.symbol, result.score, result.recommendation);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod detectors;
pub mod engine;
pub mod params;

pub use engine::{
    evaluate_parallel, invoke_isolated, AggregateResult, DetectorFactory, DetectorRegistry,
    Ensemble, EnsembleBuilder, NullDetector, Recommendation,
};

pub mod prelude {
    pub use crate::{
        // Detectors
        detectors::*,
        // Engine
        engine::{
            evaluate_parallel, invoke_isolated, AggregateResult, DetectorFactory,
            DetectorRegistry, Ensemble, EnsembleBuilder, NullDetector, Recommendation,
        },
        // Parameters
        params::{
            get_factor, get_period, get_ratio, DetectorParams, EnsembleConfig, ParamMeta,
            ParamType, ParameterizedDetector, WeightTable,
        },
        // Types
        Bar,
        // Core traits
        Detector,
        DetectorResult,
        Details,
        OHLCVExt,
        // Errors
        PatternError,
        Period,
        PriceSeries,
        Ratio,
        Result,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors raised while building or running detectors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Configuration fault - the only error that stops an ensemble from being built
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} bars, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Invalid price series at index {index}: {reason}")]
    InvalidSeries { index: usize, reason: &'static str },

    #[error("Detector panicked: {0}")]
    DetectorPanic(String),
}

// ============================================================
// SCORE BOUNDS
// ============================================================

/// Lowest score any detector may report
pub const MIN_SCORE: f64 = 1.0;
/// Highest score any detector may report
pub const MAX_SCORE: f64 = 100.0;
/// Baseline reported by the core detectors when nothing fires or input is short
pub const NEUTRAL_SCORE: f64 = 10.0;

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(PatternError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(PatternError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PatternError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn upper_shadow(&self) -> f64 {
        self.high() - self.open().max(self.close())
    }

    #[inline]
    fn lower_shadow(&self) -> f64 {
        self.open().min(self.close()) - self.low()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let fields = [self.open(), self.high(), self.low(), self.close(), self.volume()];
        if fields.iter().any(|v| v.is_nan()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if fields.iter().any(|v| v.is_infinite()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.high() < self.low() {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        if self.volume() < 0.0 {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "negative volume",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// BAR / PRICE SERIES
// ============================================================

/// One OHLCV sample, as handed over by the data-retrieval layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for Bar {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Ordered bars with strictly increasing timestamps.
///
/// Owned by a single evaluation; detectors only ever borrow it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceSeries {
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Wrap bars, rejecting any timestamp that does not move forward
    pub fn new(bars: Vec<Bar>) -> Result<Self> {
        if let Some(i) = bars
            .windows(2)
            .position(|pair| pair[1].timestamp <= pair[0].timestamp)
        {
            return Err(PatternError::InvalidSeries {
                index: i + 1,
                reason: "timestamps must be strictly increasing",
            });
        }
        Ok(Self { bars })
    }

    #[inline]
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// The trailing `n` bars (all of them when fewer exist)
    pub fn tail(&self, n: usize) -> &[Bar] {
        &self.bars[self.bars.len().saturating_sub(n)..]
    }

    /// Check every bar, reporting the index of the first malformed one
    pub fn validate_bars(&self) -> Result<()> {
        validate_window(&self.bars, 0)
    }
}

impl TryFrom<Vec<Bar>> for PriceSeries {
    type Error = PatternError;

    fn try_from(bars: Vec<Bar>) -> Result<Self> {
        Self::new(bars)
    }
}

/// Validate a slice of bars; `offset` is added to reported indices
pub(crate) fn validate_window<T: OHLCV>(bars: &[T], offset: usize) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            PatternError::InvalidOHLCV { reason, .. } => PatternError::InvalidOHLCV {
                index: offset + i,
                reason,
            },
            other => other,
        })?;
    }
    Ok(())
}

// ============================================================
// DETECTOR RESULT
// ============================================================

/// Open, serializable per-detector payload
pub type Details = serde_json::Map<String, serde_json::Value>;

/// What every detector hands back to the ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorResult {
    /// Score in 1.0..=100.0
    pub score: f64,
    pub explanation: String,
    #[serde(default)]
    pub details: Details,
}

impl DetectorResult {
    /// Build a result; finite scores are clamped into [`MIN_SCORE`, `MAX_SCORE`]
    pub fn new(score: f64, explanation: impl Into<String>) -> Self {
        Self {
            score: score.clamp(MIN_SCORE, MAX_SCORE),
            explanation: explanation.into(),
            details: Details::new(),
        }
    }

    /// Baseline result used when nothing noteworthy was found
    pub fn neutral(explanation: impl Into<String>) -> Self {
        Self::new(NEUTRAL_SCORE, explanation)
    }

    /// Neutral result for a series shorter than the detector's minimum
    pub fn insufficient_data(need: usize, got: usize) -> Self {
        Self::neutral(PatternError::InsufficientData { need, got }.to_string())
            .with_detail("insufficient_data", true)
            .with_detail("need", need)
            .with_detail("got", got)
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

// ============================================================
// DETECTOR TRAIT
// ============================================================

/// Object-safe capability shared by every ensemble member
pub trait Detector: Send + Sync {
    /// Registry key, also used in the aggregate mappings
    fn name(&self) -> &str;

    /// Bars needed before the detector says anything beyond "insufficient data"
    fn min_bars(&self) -> usize;

    /// Score one symbol. Errors are neutralized by [`invoke_isolated`].
    fn evaluate(&self, symbol: &str, series: &PriceSeries) -> Result<DetectorResult>;
}

// ============================================================
// TESTS
// ============================================================
