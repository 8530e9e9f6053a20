//! Core detectors of the ensemble
//!
//! # Detectors
//!
//! - **Support/resistance** ([`SupportResistanceDetector`]): clustered price
//!   zones scored on touches, volume, rebounds and reversal candles
//! - **Breakout/retest** ([`BreakoutRetestDetector`]): breakouts above major
//!   highs graded on the move, the pre-pattern and the follow-through
//! - **Volume tension** ([`VolumeTensionDetector`]): volume squeezes, VCP,
//!   spikes and tight price ranges
//!
//! Every detector is also [`ParameterizedDetector`](crate::params::ParameterizedDetector),
//! so the registry can build it from keyed overrides.

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod breakout;
pub mod candles;
pub mod volume;
pub mod zones;

// Re-export all detectors for convenience
pub use breakout::*;
pub use candles::*;
pub use helpers::*;
pub use volume::*;
pub use zones::*;
