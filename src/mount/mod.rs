//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Mount abstraction: the `Mount` trait, axis addressing, and the
//! calibration data/state-machine (see [`calibration`]).
//!

pub mod ao;
pub mod calibration;
#[cfg(feature = "mount_serial")]
pub mod serial;
pub mod simulator;

pub use calibration::{Calibration, CalibrationDetails, CalibrationEngine, CalibrationSample};

use crate::error::MountError;

/// Sidereal day length, used to derive the sidereal tracking rate.
pub const SECONDS_PER_DAY: f64 = 86164.09065;

/// Earth's sidereal angular rate, in radians/second.
pub const SIDEREAL_RATE: f64 = 2.0 * std::f64::consts::PI / SECONDS_PER_DAY;

/// Mount axis. Named `Primary`/`Secondary` rather than `Ra`/`Dec` since a
/// stand-alone AO unit has no celestial-coordinate meaning, but both
/// drivers share the same trait.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    Primary,
    Secondary,
}

impl Axis {
    pub fn other(self) -> Axis {
        match self {
            Axis::Primary => Axis::Secondary,
            Axis::Secondary => Axis::Primary,
        }
    }
}

/// Result of a single calibration or guide move request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MoveResult {
    Ok,
    Error,
    LimitReached,
}

/// Direction of a calibration/guide pulse along an axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Positive,
    Negative,
}

/// Static mount information reported to the controller/event-server.
#[derive(Clone, Debug)]
pub struct MountInfo {
    pub name: String,
    pub can_pulse_guide: bool,
    pub can_slew: bool,
}

/// The capability every guiding target (a real mount, or an AO unit used
/// as a primary guide output) must provide.
///
/// Concrete drivers (ASCOM, INDI, direct-serial) are external
/// collaborators; this crate ships a [`simulator::SimulatorMount`] plus
/// a [`serial::SerialPulseGuideMount`] that demonstrates the shape of a
/// real direct-serial driver.
pub trait Mount: Send {
    fn info(&self) -> MountInfo;

    /// Issues a calibration/guide pulse of `duration_ms` along `axis` in
    /// `direction`. Blocks until the pulse completes (or is interrupted).
    fn pulse_guide(&mut self, axis: Axis, direction: Direction, duration_ms: u32) -> Result<MoveResult, MountError>;

    /// Continuous-motion guiding (AO units report this as unsupported).
    fn set_motion(&mut self, axis: Axis, speed_rad_per_sec: f64) -> Result<(), MountError> {
        let _ = (axis, speed_rad_per_sec);
        Err(MountError::Driver("continuous motion not supported".into()))
    }

    fn stop_motion(&mut self, axis: Axis) -> Result<(), MountError> {
        let _ = axis;
        Ok(())
    }

    /// Current declination in radians, used by the calibration engine's
    /// rate-ratio sanity check. `None` if the mount cannot report it
    /// (e.g. an AO unit).
    fn declination(&self) -> Option<f64> {
        None
    }

    fn is_slewing(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidereal_rate_matches_known_value() {
        assert!((SIDEREAL_RATE - 7.292_115_855_3e-5).abs() < 1e-9);
    }

    #[test]
    fn axis_other_is_involution() {
        assert_eq!(Axis::Primary.other().other(), Axis::Primary);
    }
}
