//! Detector registry, fault-isolated invocation and weighted consensus
//!
//! Detectors are resolved by name through a [`DetectorRegistry`]. Names that
//! cannot be resolved become a [`NullDetector`], so a partially implemented
//! weight table still produces an ensemble. Every call into a detector goes
//! through [`invoke_isolated`], which turns errors, panics and non-finite
//! scores into a score of 1.

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;
use serde::Serialize;

use crate::detectors::{BreakoutRetestDetector, SupportResistanceDetector, VolumeTensionDetector};
use crate::params::{DetectorParams, EnsembleConfig, ParameterizedDetector, WeightTable};
use crate::{Detector, DetectorResult, Details, PatternError, PriceSeries, Result, MAX_SCORE, MIN_SCORE};

// ============================================================
// NULL DETECTOR
// ============================================================

/// Stand-in for a detector that could not be resolved or built
#[derive(Debug, Clone)]
pub struct NullDetector {
    name: String,
    reason: String,
}

impl NullDetector {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl Detector for NullDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_bars(&self) -> usize {
        0
    }

    fn evaluate(&self, _symbol: &str, _series: &PriceSeries) -> Result<DetectorResult> {
        Ok(DetectorResult::new(
            MIN_SCORE,
            format!("{} is not implemented ({})", self.name, self.reason),
        )
        .with_detail("unimplemented", true))
    }
}

// ============================================================
// REGISTRY
// ============================================================

/// Builds a detector from keyed overrides
pub type DetectorFactory = fn(&DetectorParams) -> Result<Box<dyn Detector>>;

fn build_parameterized<D>(params: &DetectorParams) -> Result<Box<dyn Detector>>
where
    D: ParameterizedDetector + Detector + 'static,
{
    Ok(Box::new(D::with_params(params)?))
}

/// Name -> factory lookup used when an ensemble is built
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    factories: BTreeMap<String, DetectorFactory>,
}

impl fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl DetectorRegistry {
    /// An empty registry; every name resolves to a [`NullDetector`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the three core detectors
    pub fn with_builtins() -> Self {
        Self::new()
            .with_parameterized::<SupportResistanceDetector>()
            .with_parameterized::<BreakoutRetestDetector>()
            .with_parameterized::<VolumeTensionDetector>()
    }

    /// Register a [`ParameterizedDetector`] under its own name
    pub fn with_parameterized<D>(mut self) -> Self
    where
        D: ParameterizedDetector + Detector + 'static,
    {
        self.register(D::detector_name(), build_parameterized::<D>);
        self
    }

    /// Add or replace a factory, returning the one it replaced
    pub fn register(&mut self, name: impl Into<String>, factory: DetectorFactory) -> Option<DetectorFactory> {
        self.factories.insert(name.into(), factory)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build the named detector, substituting a [`NullDetector`] when the
    /// name is unknown or its factory fails
    pub fn resolve(&self, name: &str, params: &DetectorParams) -> Box<dyn Detector> {
        let Some(factory) = self.factories.get(name) else {
            log::warn!("no detector registered as '{name}', using null detector");
            return Box::new(NullDetector::new(name, "no implementation registered"));
        };

        let built = catch_unwind(AssertUnwindSafe(|| factory(params)))
            .unwrap_or_else(|payload| Err(PatternError::DetectorPanic(panic_message(payload.as_ref()))));
        match built {
            Ok(detector) => detector,
            Err(e) => {
                log::warn!("failed to build detector '{name}': {e}; using null detector");
                Box::new(NullDetector::new(name, format!("construction failed: {e}")))
            },
        }
    }
}

// ============================================================
// FAULT ISOLATION
// ============================================================

/// Run one detector, converting any fault into a score-1 result.
///
/// Faults are `Err` returns, panics and non-finite scores. Finite scores are
/// clamped into [`MIN_SCORE`, `MAX_SCORE`].
pub fn invoke_isolated(detector: &dyn Detector, symbol: &str, series: &PriceSeries) -> DetectorResult {
    let outcome = catch_unwind(AssertUnwindSafe(|| detector.evaluate(symbol, series)))
        .unwrap_or_else(|payload| Err(PatternError::DetectorPanic(panic_message(payload.as_ref()))));

    match outcome {
        Ok(result) if result.score.is_finite() => DetectorResult {
            score: result.score.clamp(MIN_SCORE, MAX_SCORE),
            ..result
        },
        Ok(result) => fault(detector.name(), symbol, &format!("non-finite score {}", result.score)),
        Err(e) => fault(detector.name(), symbol, &e.to_string()),
    }
}

fn fault(name: &str, symbol: &str, description: &str) -> DetectorResult {
    log::error!("[{symbol}] detector '{name}' faulted: {description}");
    DetectorResult::new(MIN_SCORE, format!("detector fault: {description}")).with_detail("fault", true)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ============================================================
// AGGREGATE RESULT
// ============================================================

/// Recommendation bucket for a consensus score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Recommendation {
    #[serde(rename = "no signal")]
    NoSignal,
    #[serde(rename = "weak signal")]
    WeakSignal,
    #[serde(rename = "watchlist")]
    Watchlist,
    #[serde(rename = "strong setup")]
    StrongSetup,
    #[serde(rename = "high-conviction buy")]
    HighConvictionBuy,
}

impl Recommendation {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 85.0 => Recommendation::HighConvictionBuy,
            s if s >= 70.0 => Recommendation::StrongSetup,
            s if s >= 50.0 => Recommendation::Watchlist,
            s if s >= 30.0 => Recommendation::WeakSignal,
            _ => Recommendation::NoSignal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::HighConvictionBuy => "high-conviction buy",
            Recommendation::StrongSetup => "strong setup",
            Recommendation::Watchlist => "watchlist",
            Recommendation::WeakSignal => "weak signal",
            Recommendation::NoSignal => "no signal",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consensus for one symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub symbol: String,
    /// Weighted mean of detector scores, two decimals
    pub score: f64,
    pub scores: BTreeMap<String, f64>,
    pub explanations: BTreeMap<String, String>,
    pub details: BTreeMap<String, Details>,
    pub recommendation: Recommendation,
}

#[inline]
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================
// ENSEMBLE
// ============================================================

struct Member {
    name: String,
    weight: u32,
    detector: Box<dyn Detector>,
}

/// Weighted set of detectors. Holds no per-call state.
pub struct Ensemble {
    members: Vec<Member>,
}

impl fmt::Debug for Ensemble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.members.iter().map(|m| (&m.name, m.weight)))
            .finish()
    }
}

impl Ensemble {
    /// Run every detector in isolation and fold the scores into one consensus
    pub fn evaluate(&self, symbol: &str, series: &PriceSeries) -> AggregateResult {
        let mut scores = BTreeMap::new();
        let mut explanations = BTreeMap::new();
        let mut details = BTreeMap::new();
        let mut weighted = 0.0;
        let mut total = 0.0;

        for member in &self.members {
            let result = invoke_isolated(member.detector.as_ref(), symbol, series);
            log::debug!("[{symbol}] {} = {:.2} (weight {})", member.name, result.score, member.weight);

            weighted += result.score * f64::from(member.weight);
            total += f64::from(member.weight);
            scores.insert(member.name.clone(), result.score);
            explanations.insert(member.name.clone(), result.explanation);
            details.insert(member.name.clone(), result.details);
        }

        // Total weight is positive by construction
        let score = round2(weighted / total);
        let recommendation = Recommendation::from_score(score);
        log::info!("[{symbol}] consensus {score:.2} ({recommendation})");

        AggregateResult {
            symbol: symbol.to_string(),
            score,
            scores,
            explanations,
            details,
            recommendation,
        }
    }

    /// Longest minimum series length among the members
    pub fn min_bars(&self) -> usize {
        self.members.iter().map(|m| m.detector.min_bars()).max().unwrap_or(0)
    }

    pub fn total_weight(&self) -> u64 {
        self.members.iter().map(|m| u64::from(m.weight)).sum()
    }

    pub fn weight(&self, name: &str) -> Option<u32> {
        self.members.iter().find(|m| m.name == name).map(|m| m.weight)
    }

    pub fn detector_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating Ensemble instances
pub struct EnsembleBuilder {
    registry: DetectorRegistry,
    config: EnsembleConfig,
    custom: Vec<Member>,
}

impl Default for EnsembleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnsembleBuilder {
    /// Builtin registry, no weights yet
    pub fn new() -> Self {
        Self {
            registry: DetectorRegistry::with_builtins(),
            config: EnsembleConfig {
                weights: WeightTable::empty(),
                detectors: BTreeMap::new(),
            },
            custom: Vec::new(),
        }
    }

    /// Use the default weight table for the three core detectors
    pub fn with_all_defaults(self) -> Self {
        self.weights(WeightTable::default())
    }

    /// Replace the weight table
    pub fn weights(mut self, weights: WeightTable) -> Self {
        self.config.weights = weights;
        self
    }

    /// Take both the weight table and the per-detector overrides from a config
    pub fn config(mut self, config: EnsembleConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides for one detector
    pub fn params(mut self, name: impl Into<String>, params: DetectorParams) -> Self {
        self.config.detectors.insert(name.into(), params);
        self
    }

    /// Replace the registry used to resolve weight-table names
    pub fn registry(mut self, registry: DetectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Add a concrete detector alongside the weight table
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, name: impl Into<String>, weight: u32, detector: Box<dyn Detector>) -> Self {
        self.custom.push(Member {
            name: name.into(),
            weight,
            detector,
        });
        self
    }

    /// Build the ensemble.
    ///
    /// Fails with [`PatternError::InvalidConfig`] on a zero weight, a duplicate
    /// name or a zero total weight.
    pub fn build(self) -> Result<Ensemble> {
        let weights = &self.config.weights;
        let mut members = Vec::with_capacity(weights.len() + self.custom.len());
        for (name, weight) in weights.iter() {
            members.push(Member {
                name: name.to_string(),
                weight,
                detector: self.registry.resolve(name, &self.config.params_for(name)),
            });
        }
        members.extend(self.custom);

        let mut seen = HashSet::new();
        for member in &members {
            if member.weight == 0 {
                return Err(PatternError::InvalidConfig(format!(
                    "detector '{}' has zero weight",
                    member.name
                )));
            }
            if !seen.insert(member.name.as_str()) {
                return Err(PatternError::InvalidConfig(format!(
                    "detector '{}' registered twice",
                    member.name
                )));
            }
        }

        let ensemble = Ensemble { members };
        if ensemble.total_weight() == 0 {
            return Err(PatternError::InvalidConfig("total detector weight is zero".to_string()));
        }
        log::info!(
            "ensemble ready: {} detectors, total weight {}",
            ensemble.len(),
            ensemble.total_weight()
        );
        Ok(ensemble)
    }
}

// ============================================================
// PARALLEL EVALUATION
// ============================================================

/// Evaluate many symbols concurrently, one consensus per symbol
pub fn evaluate_parallel<'a, I>(ensemble: &Ensemble, instruments: I) -> Vec<AggregateResult>
where
    I: IntoParallelIterator<Item = (&'a str, &'a PriceSeries)>,
{
    instruments
        .into_par_iter()
        .map(|(symbol, series)| ensemble.evaluate(symbol, series))
        .collect()
}

// ============================================================
// TESTS
// ============================================================
