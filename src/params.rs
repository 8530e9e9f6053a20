//! Parameter metadata and ensemble configuration
//!
//! Every core detector describes its tunables with [`ParamMeta`], which enables:
//! - Validation of caller-supplied overrides
//! - Parameter documentation
//! - Grid search over thresholds
//!
//! Overrides are keyed by detector name inside [`EnsembleConfig`], next to the
//! [`WeightTable`] the aggregator uses.
//!
//! # Example
//!
//! ```rust
//! use confluence::prelude::*;
//!
//! for param in VolumeTensionDetector::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//!
//! let config = EnsembleConfig::from_json(
//!   r#"{ "weights": { "volume_tension": 2 }, "detectors": { "volume_tension": { "spike_z": 3.0 } } }"#,
//! ).unwrap();
//! assert_eq!(config.weights.get("volume_tension"), Some(2));
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{PatternError, Period, Ratio, Result};

/// Raw overrides for one detector, keyed by parameter name
pub type DetectorParams = HashMap<String, f64>;

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Fraction in 0.0..=1.0 (tolerances, drop factors)
  Ratio,
  /// Positive integer bar count
  Period,
  /// Positive multiplier or threshold that may exceed 1.0 (volume ratios, z-scores)
  Factor,
}

/// Metadata for a single detector parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "tolerance")
  pub name: &'static str,
  /// Parameter type
  pub param_type: ParamType,
  /// Default value
  pub default: f64,
  /// Accepted range, also used for optimization: (min, max, step)
  pub range: (f64, f64, f64),
  /// Human-readable description
  pub description: &'static str,
}

impl ParamMeta {
  /// Create a new ParamMeta for a Ratio parameter
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  /// Create a new ParamMeta for a Period parameter
  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  /// Create a new ParamMeta for a Factor parameter
  pub const fn factor(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Factor, default, range, description }
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    if !value.is_finite() {
      return Err(PatternError::InvalidValue("parameter must be finite"));
    }
    let (min, max, _) = self.range;
    if value < min || value > max {
      return Err(PatternError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ratio::new(value).map(|_| ()),
      ParamType::Period => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(PatternError::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
      },
      ParamType::Factor => {
        if value <= 0.0 {
          return Err(PatternError::InvalidValue("Factor must be positive"));
        }
        Ok(())
      },
    }
  }
}

// ============================================================
// PARAMETERIZED DETECTOR TRAIT
// ============================================================

/// Trait for detectors that can be built from keyed overrides
pub trait ParameterizedDetector: Sized {
  /// Returns metadata for all configurable parameters
  fn param_meta() -> &'static [ParamMeta];

  /// Creates a detector from overrides.
  ///
  /// Missing parameters use their default values; unknown keys are ignored.
  fn with_params(params: &DetectorParams) -> Result<Self>;

  /// Registry name of the detector
  fn detector_name() -> &'static str;
}

/// Validate every known key present in `params` against its metadata
pub fn check_params(meta: &[ParamMeta], params: &DetectorParams) -> Result<()> {
  for m in meta {
    if let Some(&value) = params.get(m.name) {
      m.validate(value)?;
    }
  }
  for key in params.keys() {
    if !meta.iter().any(|m| m.name == key.as_str()) {
      log::debug!("ignoring unknown parameter '{key}'");
    }
  }
  Ok(())
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Helper to get a Ratio from params with default fallback
pub fn get_ratio(params: &DetectorParams, key: &str, default: f64) -> Result<Ratio> {
  let value = params.get(key).copied().unwrap_or(default);
  Ratio::new(value)
}

/// Helper to get a Period from params with default fallback
pub fn get_period(params: &DetectorParams, key: &str, default: usize) -> Result<Period> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  if value < 1.0 || value.fract() != 0.0 {
    return Err(PatternError::InvalidValue("Period must be a positive integer"));
  }
  Period::new(value as usize)
}

/// Helper to get a positive finite factor from params with default fallback
pub fn get_factor(params: &DetectorParams, key: &str, default: f64) -> Result<f64> {
  let value = params.get(key).copied().unwrap_or(default);
  if !value.is_finite() || value <= 0.0 {
    return Err(PatternError::InvalidValue("Factor must be positive and finite"));
  }
  Ok(value)
}

// ============================================================
// WEIGHT TABLE
// ============================================================

/// Immutable detector-name -> integer weight mapping used by the aggregator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightTable(BTreeMap<String, u32>);

impl WeightTable {
  /// An empty table; an ensemble built from it alone is a configuration fault
  pub fn empty() -> Self {
    Self(BTreeMap::new())
  }

  /// Return a copy with `name` set to `weight`
  pub fn with(mut self, name: impl Into<String>, weight: u32) -> Self {
    self.0.insert(name.into(), weight);
    self
  }

  pub fn get(&self, name: &str) -> Option<u32> {
    self.0.get(name).copied()
  }

  pub fn total(&self) -> u64 {
    self.0.values().map(|&w| u64::from(w)).sum()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
    self.0.iter().map(|(name, &w)| (name.as_str(), w))
  }
}

impl Default for WeightTable {
  fn default() -> Self {
    Self::empty()
      .with("support_resistance", 3)
      .with("breakout_retest", 3)
      .with("volume_tension", 2)
  }
}

impl<S: Into<String>> FromIterator<(S, u32)> for WeightTable {
  fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(name, w)| (name.into(), w)).collect())
  }
}

// ============================================================
// ENSEMBLE CONFIG
// ============================================================

/// Everything needed to assemble an ensemble, loadable from JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
  pub weights: WeightTable,
  /// Per-detector overrides, keyed by detector name
  pub detectors: BTreeMap<String, DetectorParams>,
}

impl EnsembleConfig {
  pub fn from_json(text: &str) -> Result<Self> {
    serde_json::from_str(text).map_err(|e| PatternError::InvalidConfig(e.to_string()))
  }

  /// Overrides for one detector (empty when none were given)
  pub fn params_for(&self, name: &str) -> DetectorParams {
    self.detectors.get(name).cloned().unwrap_or_default()
  }
}

// ============================================================
// TESTS
// ============================================================
