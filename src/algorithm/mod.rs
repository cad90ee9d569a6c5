//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Per-axis guide algorithms: each turns a raw star-displacement sample
//! into a correction to send to the mount. All share a `minMove`
//! deadband below which no correction is issued, mirroring every
//! `guide_algorithm_*.cpp` in the original.
//!

pub mod gaussian_process;
pub mod hysteresis;
pub mod linear_regression;
pub mod low_pass;
pub mod low_pass2;
pub mod median_window;
pub mod resist_switch;
pub mod zfilter;

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use strum_macros::EnumIter;

pub use gaussian_process::GaussianProcessAlgorithm;
pub use hysteresis::HysteresisAlgorithm;
pub use linear_regression::LinearRegressionAlgorithm;
pub use low_pass::LowPassAlgorithm;
pub use low_pass2::LowPass2Algorithm;
pub use median_window::MedianWindowAlgorithm;
pub use resist_switch::ResistSwitchAlgorithm;
pub use zfilter::ZFilterAlgorithm;

/// Common behaviour of every per-axis guide algorithm.
#[enum_dispatch]
pub trait GuideAlgorithm {
    /// Processes one raw displacement sample (pixels) and returns the
    /// correction (pixels) to send to the mount this cycle.
    fn result(&mut self, input: f64) -> f64;

    /// Clears any accumulated history (called on calibration or guide
    /// restart).
    fn reset(&mut self);

    fn min_move(&self) -> f64;

    fn set_min_move(&mut self, min_move: f64) -> Result<(), String> {
        if min_move < 0.0 {
            return Err("minMove must be >= 0".into());
        }
        self.set_min_move_unchecked(min_move);
        Ok(())
    }

    fn set_min_move_unchecked(&mut self, min_move: f64);

    fn get_settings_summary(&self) -> String;
}

/// A guide algorithm selected at runtime, dispatched without a vtable
/// indirection via `enum_dispatch`.
#[enum_dispatch(GuideAlgorithm)]
pub enum Algorithm {
    Hysteresis(HysteresisAlgorithm),
    ResistSwitch(ResistSwitchAlgorithm),
    LowPass(LowPassAlgorithm),
    LowPass2(LowPass2Algorithm),
    LinearRegression(LinearRegressionAlgorithm),
    MedianWindow(MedianWindowAlgorithm),
    ZFilter(ZFilterAlgorithm),
    GaussianProcess(GaussianProcessAlgorithm),
}

/// Applies the shared minMove deadband: callers should route raw input
/// through this before algorithm-specific shaping when an algorithm's
/// `result()` doesn't already do so internally.
pub(crate) fn below_min_move(input: f64, min_move: f64) -> bool {
    input.abs() < min_move
}

/// The persisted, parameter-free selector for which [`Algorithm`] a
/// profile configures per axis. `EnumIter` lets callers (profile
/// validation, a future "list available algorithms" RPC) enumerate the
/// full set without hand-maintaining a parallel array, the same role
/// the teacher's `strum_macros::EnumIter` plays for its own `TargetAction`
/// enum.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, EnumIter)]
pub enum AlgorithmKind {
    Hysteresis,
    ResistSwitch,
    LowPass,
    LowPass2,
    LinearRegression,
    MedianWindow,
    ZFilter,
    GaussianProcess,
}

impl AlgorithmKind {
    /// The config/log string for this kind, mirroring the teacher's own
    /// hand-rolled `config_key()` on `TargetAction` rather than a
    /// derived `Display`.
    pub fn config_key(&self) -> &'static str {
        match self {
            AlgorithmKind::Hysteresis => "Hysteresis",
            AlgorithmKind::ResistSwitch => "ResistSwitch",
            AlgorithmKind::LowPass => "LowPass",
            AlgorithmKind::LowPass2 => "LowPass2",
            AlgorithmKind::LinearRegression => "LinearRegression",
            AlgorithmKind::MedianWindow => "MedianWindow",
            AlgorithmKind::ZFilter => "ZFilter",
            AlgorithmKind::GaussianProcess => "GaussianProcess",
        }
    }

    /// Builds a freshly reset algorithm instance of this kind with
    /// default parameters.
    pub fn build(&self) -> Algorithm {
        match self {
            AlgorithmKind::Hysteresis => Algorithm::Hysteresis(HysteresisAlgorithm::new()),
            AlgorithmKind::ResistSwitch => Algorithm::ResistSwitch(ResistSwitchAlgorithm::new()),
            AlgorithmKind::LowPass => Algorithm::LowPass(LowPassAlgorithm::new()),
            AlgorithmKind::LowPass2 => Algorithm::LowPass2(LowPass2Algorithm::new()),
            AlgorithmKind::LinearRegression => Algorithm::LinearRegression(LinearRegressionAlgorithm::new()),
            AlgorithmKind::MedianWindow => Algorithm::MedianWindow(MedianWindowAlgorithm::new()),
            AlgorithmKind::ZFilter => Algorithm::ZFilter(ZFilterAlgorithm::new()),
            AlgorithmKind::GaussianProcess => Algorithm::GaussianProcess(GaussianProcessAlgorithm::new()),
        }
    }
}

impl Default for AlgorithmKind {
    fn default() -> AlgorithmKind {
        AlgorithmKind::Hysteresis
    }
}

#[cfg(test)]
mod kind_tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_kind_builds_and_round_trips_its_config_key() {
        for kind in AlgorithmKind::iter() {
            let _ = kind.build();
            assert!(!kind.config_key().is_empty());
        }
    }
}
