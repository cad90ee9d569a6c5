//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! In-process mount and AO simulators, used by integration tests and by
//! anyone evaluating the engine without real hardware attached.
//!

use std::time::{Duration, Instant};

use crate::error::MountError;
use crate::mount::ao::{AoDevice, StepPosition, StepResult};
use crate::mount::{Axis, Direction, Mount, MountInfo, MoveResult, SIDEREAL_RATE};
use crate::sim_link::SharedStarField;

/// Simulated star-field drift rate per pulse-guide millisecond, in
/// pixels, used so calibration/guiding tests see realistic motion
/// without a real camera.
#[derive(Copy, Clone, Debug)]
pub struct SimulatorParams {
    pub guide_rate_px_per_sec: f64,
    pub declination: f64,
    pub backlash_ms: u32,
}

impl Default for SimulatorParams {
    fn default() -> SimulatorParams {
        SimulatorParams { guide_rate_px_per_sec: 5.0, declination: 0.0, backlash_ms: 0 }
    }
}

pub struct SimulatorMount {
    params: SimulatorParams,
    tracking_rate: f64,
    last_pulse: Option<Instant>,
    backlash_remaining: [u32; 2],
    star_field: Option<SharedStarField>,
}

impl SimulatorMount {
    /// A mount with no linked star field: `pulse_guide` still succeeds
    /// (useful for worker-thread plumbing tests) but moves nothing a
    /// camera would report. Use [`SimulatorMount::linked`] to exercise
    /// calibration/guiding against a [`crate::camera::simulator::SimulatorCamera`].
    pub fn new(params: SimulatorParams) -> SimulatorMount {
        SimulatorMount {
            params,
            tracking_rate: SIDEREAL_RATE,
            last_pulse: None,
            backlash_remaining: [params.backlash_ms, params.backlash_ms],
            star_field: None,
        }
    }

    /// A mount whose pulse-guide calls displace `star_field`, shared
    /// with a linked camera simulator. Primary is treated as the
    /// camera-frame x axis, secondary as y, matching the `xAngle=0`,
    /// `yAngle=90deg` convention used throughout this crate's tests.
    pub fn linked(params: SimulatorParams, star_field: SharedStarField) -> SimulatorMount {
        SimulatorMount {
            params,
            tracking_rate: SIDEREAL_RATE,
            last_pulse: None,
            backlash_remaining: [params.backlash_ms, params.backlash_ms],
            star_field: Some(star_field),
        }
    }

    pub fn tracking_rate(&self) -> f64 {
        self.tracking_rate
    }
}

impl Mount for SimulatorMount {
    fn info(&self) -> MountInfo {
        MountInfo { name: "Simulator".into(), can_pulse_guide: true, can_slew: true }
    }

    fn pulse_guide(&mut self, axis: Axis, direction: Direction, duration_ms: u32) -> Result<MoveResult, MountError> {
        let idx = match axis {
            Axis::Primary => 0,
            Axis::Secondary => 1,
        };
        let backlash_to_absorb = self.backlash_remaining[idx].min(duration_ms);
        self.backlash_remaining[idx] -= backlash_to_absorb;
        let effective_ms = duration_ms - backlash_to_absorb;

        if let Some(field) = &self.star_field {
            let sign = match direction {
                Direction::Positive => 1.0,
                Direction::Negative => -1.0,
            };
            let distance = self.params.guide_rate_px_per_sec * (effective_ms as f64 / 1000.0) * sign;
            match axis {
                Axis::Primary => field.shift(distance, 0.0),
                Axis::Secondary => field.shift(0.0, distance),
            }
        }

        // Simulates pulse-guide latency without blocking test execution for real.
        std::thread::sleep(Duration::from_millis(0));
        self.last_pulse = Some(Instant::now());
        Ok(MoveResult::Ok)
    }

    fn set_motion(&mut self, _axis: Axis, speed_rad_per_sec: f64) -> Result<(), MountError> {
        self.tracking_rate = speed_rad_per_sec;
        Ok(())
    }

    fn stop_motion(&mut self, _axis: Axis) -> Result<(), MountError> {
        self.tracking_rate = 0.0;
        Ok(())
    }

    fn declination(&self) -> Option<f64> {
        Some(self.params.declination)
    }
}

/// A simulated step guider, useful for exercising the bump controller
/// without real AO hardware.
pub struct SimulatorAo {
    position: StepPosition,
    max_position: i32,
}

impl SimulatorAo {
    pub fn new(max_position: i32) -> SimulatorAo {
        SimulatorAo { position: StepPosition::default(), max_position }
    }
}

impl AoDevice for SimulatorAo {
    fn step(&mut self, direction: Direction, axis_is_x: bool, steps: u32) -> Result<StepResult, MountError> {
        let delta = match direction {
            Direction::Positive => steps as i32,
            Direction::Negative => -(steps as i32),
        };
        let coord = if axis_is_x { &mut self.position.x } else { &mut self.position.y };
        let next = *coord + delta;
        if next.abs() > self.max_position {
            *coord = next.clamp(-self.max_position, self.max_position);
            return Ok(StepResult::LimitReached);
        }
        *coord = next;
        Ok(StepResult::Ok)
    }

    fn position(&self) -> StepPosition {
        self.position
    }

    fn max_position(&self) -> i32 {
        self.max_position
    }

    fn center(&mut self) -> Result<(), MountError> {
        self.position = StepPosition::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulator_mount_reports_declination() {
        let mount = SimulatorMount::new(SimulatorParams { declination: 0.5, ..Default::default() });
        assert_eq!(mount.declination(), Some(0.5));
    }

    #[test]
    fn simulator_ao_steps_and_hits_limit() {
        let mut ao = SimulatorAo::new(100);
        assert_eq!(ao.step(Direction::Positive, true, 50).unwrap(), StepResult::Ok);
        assert_eq!(ao.position().x, 50);
        assert_eq!(ao.step(Direction::Positive, true, 80).unwrap(), StepResult::LimitReached);
        assert_eq!(ao.position().x, 100);
    }

    #[test]
    fn simulator_ao_center_resets_position() {
        let mut ao = SimulatorAo::new(100);
        ao.step(Direction::Positive, true, 50).unwrap();
        ao.center().unwrap();
        assert_eq!(ao.position(), StepPosition::default());
    }
}
