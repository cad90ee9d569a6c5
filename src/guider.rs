//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! The guider: owns the lock position, drives star selection and
//! calibration, and turns measured star displacement into per-axis
//! correction requests while guiding.
//!

use cgmath::{Matrix2, SquareMatrix, Vector2};

use crate::algorithm::{Algorithm, GuideAlgorithm};
use crate::error::{CalibrationError, GuiderError};
use crate::geometry::Point;
use crate::image::{find_star, FindResult, GuideImage, Star, StarFindParams};
use crate::mount::calibration::{Calibration, CalibrationEngine, CalibrationMove, PierSide};
use crate::mount::{Axis, Direction};

/// Mirrors `GUIDER_STATE` in the original engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Selecting,
    Selected,
    CalibratingPrimary,
    CalibratingSecondary,
    Calibrated,
    Guiding,
    Stop,
}

/// Mirrors `PAUSE_TYPE`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PauseType {
    None,
    Guiding,
    Full,
}

/// The point the guider tries to hold the star at, with optional
/// per-second drift (a predictive dither/comet-tracking shift) and a
/// sticky flag that keeps it fixed across a star-loss/reacquire cycle.
#[derive(Copy, Clone, Debug)]
pub struct LockPosition {
    pub position: Point,
    pub shift_rate_px_per_sec: Option<(f64, f64)>,
    pub sticky: bool,
}

impl LockPosition {
    pub fn new(position: Point) -> LockPosition {
        LockPosition { position, shift_rate_px_per_sec: None, sticky: false }
    }

    /// Advances the lock position by `elapsed_sec` according to the
    /// configured shift rate.
    pub fn advance(&mut self, elapsed_sec: f64) {
        if let Some((dx, dy)) = self.shift_rate_px_per_sec {
            self.position = self.position + Point::new(dx * elapsed_sec, dy * elapsed_sec);
        }
    }
}

/// Emitted once per guide frame, the basis of the `GuideStep` event.
#[derive(Copy, Clone, Debug)]
pub struct GuideStepInfo {
    pub frame_number: u64,
    pub star_position: Point,
    pub camera_offset: Point,
    pub mount_offset: Point,
    pub primary_distance: f64,
    pub secondary_distance: f64,
    pub primary_correction: f64,
    pub secondary_correction: f64,
    /// Actual pulse duration dispatched to the mount for this frame, ms
    /// (0 when no move was issued, e.g. paused or measurement-only mode).
    pub primary_duration_ms: u32,
    pub secondary_duration_ms: u32,
    pub star_mass: f64,
    pub star_snr: f64,
    pub star_hfd: f64,
    pub avg_distance: f64,
}

/// A correction the caller should dispatch to the mount/AO.
#[derive(Copy, Clone, Debug)]
pub struct GuideMove {
    pub axis: Axis,
    pub direction: Direction,
    pub duration_ms: u32,
}

pub enum StepOutcome {
    /// Nothing actionable this frame (e.g. still selecting).
    None,
    StarSelected(Star),
    StarLost,
    CalibrationMoveRequested(CalibrationMove),
    /// `data_flipped` is set when this calibration's pier side differs
    /// from the previous one, meaning a stored calibration computed for
    /// the other side of the pier is no longer applicable as-is.
    CalibrationComplete { calibration: Calibration, data_flipped: bool },
    CalibrationFailed(CalibrationError),
    Guiding { info: GuideStepInfo, moves: Vec<GuideMove> },
}

/// Converts a pixel-space displacement into mount-axis-space components
/// via the calibration's inverse 2x2 rotation matrix, replicating
/// `create_img_to_mount_axes_matrix`/`guiding_direction`.
fn img_to_mount_axes(cal: &Calibration, displacement: Point) -> Result<(f64, f64), CalibrationError> {
    let (cx, sx) = (cal.x_angle.cos(), cal.x_angle.sin());
    let (cy, sy) = (cal.y_angle.cos(), cal.y_angle.sin());
    // Columns are the primary/secondary axis direction vectors in image
    // space; inverting gives image-space -> axis-space.
    let axes_to_img = Matrix2::new(cx, sx, cy, sy);
    if axes_to_img.determinant().abs() < 1e-9 {
        return Err(CalibrationError::NotOrthogonal(0.0));
    }
    let img_to_axes = axes_to_img.invert().ok_or(CalibrationError::NotOrthogonal(0.0))?;
    let axis_space = img_to_axes * Vector2::new(displacement.x, displacement.y);
    Ok((axis_space.x, axis_space.y))
}

pub struct Guider {
    state: State,
    pause: PauseType,
    lock_position: Option<LockPosition>,
    calibration: Option<Calibration>,
    calibration_engine: Option<CalibrationEngine>,
    primary_algorithm: Algorithm,
    secondary_algorithm: Algorithm,
    star_find_params: StarFindParams,
    measurement_mode: bool,
    star_lost_count: u32,
    max_star_lost: u32,
    frame_number: u64,
    avg_distance: f64,
    avg_distance_ra: f64,
    avg_distance_cnt: u32,
    last_star_pos: Option<Point>,
    last_frame_at: Option<std::time::Instant>,
    /// Sticky setting applied to future lock positions; mirrors the
    /// original's persistent "Enable Lock Position Sticky" toggle,
    /// independent of whichever `LockPosition` happens to be current.
    lock_sticky: bool,
}

impl Guider {
    pub fn new(primary_algorithm: Algorithm, secondary_algorithm: Algorithm) -> Guider {
        Guider {
            state: State::Uninitialized,
            pause: PauseType::None,
            lock_position: None,
            calibration: None,
            calibration_engine: None,
            primary_algorithm,
            secondary_algorithm,
            star_find_params: StarFindParams::default(),
            measurement_mode: false,
            star_lost_count: 0,
            max_star_lost: 3,
            frame_number: 0,
            avg_distance: 0.0,
            avg_distance_ra: 0.0,
            avg_distance_cnt: 0,
            last_star_pos: None,
            last_frame_at: None,
            lock_sticky: false,
        }
    }

    /// The last position a star was successfully located at, used by
    /// the session to seed [`Guider::start_calibration`] once the
    /// controller decides to calibrate.
    pub fn last_star_pos(&self) -> Option<Point> {
        self.last_star_pos
    }

    /// Runs the star finder against `image` at the guider's configured
    /// parameters without otherwise touching guider state, for callers
    /// (e.g. the calibration step) that need a fresh position but are
    /// not driving the selection/guiding state machine directly.
    pub fn locate_star(&self, image: &GuideImage) -> (FindResult, Option<Star>) {
        find_star(image, &self.star_find_params)
    }

    /// Nudges the lock position by an instantaneous pixel offset, used
    /// by dither. Unlike [`LockPosition::advance`] (a continuous drift
    /// rate), this is a one-shot displacement.
    pub fn dither_lock_position(&mut self, dx: f64, dy: f64) {
        if let Some(lock) = self.lock_position.as_mut() {
            lock.position = lock.position + Point::new(dx, dy);
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(self.state, State::CalibratingPrimary | State::CalibratingSecondary)
    }

    pub fn is_calibrating_or_guiding(&self) -> bool {
        self.is_calibrating() || matches!(self.state, State::Guiding)
    }

    pub fn lock_position(&self) -> Option<LockPosition> {
        self.lock_position
    }

    /// Explicitly (re)points the lock position, e.g. from the
    /// `set_lock_position` RPC or a dither. Always takes effect
    /// regardless of the sticky setting — sticky only forbids the
    /// *automatic* re-centering [`Guider::select_star`] would otherwise
    /// do on every star (re)selection.
    pub fn set_lock_position(&mut self, position: Point) {
        let mut lock = LockPosition::new(position);
        lock.sticky = self.lock_sticky;
        self.lock_position = Some(lock);
    }

    /// Sets whether the lock position is sticky: when true, an
    /// automatic star (re)selection in [`Guider::select_star`] leaves
    /// the current lock position untouched instead of re-centering it
    /// on the newly found star, per spec.md §3's "forbids automatic
    /// re-centering across guide stop/start".
    pub fn set_lock_position_sticky(&mut self, sticky: bool) {
        self.lock_sticky = sticky;
        if let Some(lock) = self.lock_position.as_mut() {
            lock.sticky = sticky;
        }
    }

    pub fn lock_position_sticky(&self) -> bool {
        self.lock_sticky
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn set_calibration(&mut self, cal: Calibration) {
        self.calibration = Some(cal);
        self.state = State::Calibrated;
    }

    pub fn enable_measurement_mode(&mut self, enable: bool) {
        self.measurement_mode = enable;
    }

    pub fn pause(&mut self, pause: PauseType) {
        self.pause = pause;
    }

    pub fn pause_type(&self) -> PauseType {
        self.pause
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn current_error(&self, primary_only: bool) -> f64 {
        if primary_only {
            self.avg_distance_ra
        } else {
            self.avg_distance
        }
    }

    /// Begins star selection against `image`. If a sticky lock position
    /// is already set, the newly found star is tracked but the lock
    /// position itself is left where it was (no automatic re-centering).
    pub fn select_star(&mut self, image: &GuideImage) -> StepOutcome {
        self.state = State::Selecting;
        let (result, star) = find_star(image, &self.star_find_params);
        match (result, star) {
            (FindResult::Ok, Some(star)) => {
                let recenter = !matches!(self.lock_position, Some(lock) if lock.sticky);
                if recenter {
                    self.set_lock_position(star.position);
                }
                self.last_star_pos = Some(star.position);
                self.state = State::Selected;
                StepOutcome::StarSelected(star)
            }
            _ => {
                self.state = State::Uninitialized;
                StepOutcome::StarLost
            }
        }
    }

    /// Starts a two-axis calibration run from the star's current
    /// position.
    pub fn start_calibration(&mut self, pulse_ms: u32, distance_target_px: f64, star_pos: Point) -> CalibrationMove {
        let mut engine = CalibrationEngine::new(pulse_ms, distance_target_px);
        let first_move = engine.start(star_pos);
        self.calibration_engine = Some(engine);
        self.state = State::CalibratingPrimary;
        first_move
    }

    /// Advances the calibration state machine with the star's position
    /// after the previous calibration move completed.
    pub fn calibration_step(&mut self, star_pos: Point, declination: Option<f64>, pier_side: Option<PierSide>, binning: u32) -> StepOutcome {
        if star_pos.is_valid() {
            self.last_star_pos = Some(star_pos);
        }

        let Some(engine) = self.calibration_engine.as_mut() else {
            return StepOutcome::CalibrationFailed(CalibrationError::StarLost);
        };

        self.state = match engine.state() {
            crate::mount::calibration::State::GoWest | crate::mount::calibration::State::GoEast => State::CalibratingPrimary,
            _ => State::CalibratingSecondary,
        };

        match engine.step(star_pos) {
            Ok(Some(mv)) => StepOutcome::CalibrationMoveRequested(mv),
            Ok(None) => {
                let cal = engine.finish(declination, pier_side, binning);
                match cal.validate() {
                    Ok(()) => {
                        let previous_pier_side = self.calibration.as_ref().and_then(|c| c.pier_side);
                        let data_flipped = matches!((previous_pier_side, cal.pier_side), (Some(a), Some(b)) if a != b);
                        self.set_calibration(cal.clone());
                        self.calibration_engine = None;
                        StepOutcome::CalibrationComplete { calibration: cal, data_flipped }
                    }
                    Err(e) => {
                        self.calibration_engine = None;
                        self.state = State::Selected;
                        StepOutcome::CalibrationFailed(e)
                    }
                }
            }
            Err(e) => {
                self.calibration_engine = None;
                self.state = State::Selected;
                StepOutcome::CalibrationFailed(e)
            }
        }
    }

    pub fn start_guiding(&mut self) -> Result<(), GuiderError> {
        if self.calibration.is_none() {
            return Err(GuiderError::NotCalibrated);
        }
        if self.lock_position.is_none() {
            return Err(GuiderError::NoStarSelected);
        }
        self.primary_algorithm.reset();
        self.secondary_algorithm.reset();
        self.star_lost_count = 0;
        self.avg_distance = 0.0;
        self.avg_distance_ra = 0.0;
        self.avg_distance_cnt = 0;
        self.state = State::Guiding;
        Ok(())
    }

    pub fn stop_guiding(&mut self) {
        self.state = State::Stop;
    }

    /// Processes one guide-camera frame while in `State::Guiding`.
    ///
    /// `current_declination` (radians, if the mount reports it and
    /// declination compensation is enabled) rescales the primary-axis
    /// pulse duration by `cos(currentDec)/cos(calibrationDec)`: only the
    /// RA rate drifts with declination after calibration, the secondary
    /// axis rate does not.
    pub fn guide_step(&mut self, image: &GuideImage, pulse_ms_cap: u32, current_declination: Option<f64>) -> StepOutcome {
        let (result, star) = find_star(image, &self.star_find_params);
        let Some(star) = star.filter(|_| result == FindResult::Ok) else {
            self.star_lost_count += 1;
            if self.star_lost_count > self.max_star_lost {
                self.state = State::Stop;
            }
            return StepOutcome::StarLost;
        };
        self.star_lost_count = 0;
        self.last_star_pos = Some(star.position);

        let now = std::time::Instant::now();
        let dt_sec = self.last_frame_at.map(|prev| now.saturating_duration_since(prev).as_secs_f64()).unwrap_or(0.0);
        self.last_frame_at = Some(now);

        let Some(lock) = self.lock_position.as_mut() else {
            return StepOutcome::StarLost;
        };
        lock.advance(dt_sec);
        let lock_pos = lock.position;
        let Some(cal) = self.calibration.as_ref() else {
            return StepOutcome::StarLost;
        };

        let displacement = star.position - lock_pos;
        let Ok((primary_err, secondary_err)) = img_to_mount_axes(cal, displacement) else {
            return StepOutcome::StarLost;
        };

        self.avg_distance_cnt += 1;
        let alpha = 1.0 / (self.avg_distance_cnt.min(10) as f64);
        self.avg_distance = self.avg_distance * (1.0 - alpha) + displacement.length() * alpha;
        self.avg_distance_ra = self.avg_distance_ra * (1.0 - alpha) + primary_err.abs() * alpha;

        let primary_correction = self.primary_algorithm.result(primary_err);
        let secondary_correction = self.secondary_algorithm.result(secondary_err);

        // The same projection `mount::calibration`'s sanity checks and
        // `GuideMove` dispatch use: pixels of correction over pixels-per-ms
        // gives the pulse duration actually sent to the mount.
        let dec_scale = match (current_declination, cal.declination) {
            (Some(current_dec), Some(cal_dec)) => {
                let cal_cos = cal_dec.cos();
                if cal_cos.abs() > 1e-6 {
                    (current_dec.cos() / cal_cos).abs().clamp(0.1, 10.0)
                } else {
                    1.0
                }
            }
            _ => 1.0,
        };
        let primary_duration_ms = ((primary_correction.abs() * dec_scale / cal.x_rate.max(1e-6)) as u32).min(pulse_ms_cap);
        let secondary_duration_ms = ((secondary_correction.abs() / cal.y_rate.max(1e-6)) as u32).min(pulse_ms_cap);

        self.frame_number += 1;
        let mut info = GuideStepInfo {
            frame_number: self.frame_number,
            star_position: star.position,
            camera_offset: displacement,
            mount_offset: Point::new(primary_err, secondary_err),
            primary_distance: primary_err,
            secondary_distance: secondary_err,
            primary_correction,
            secondary_correction,
            primary_duration_ms,
            secondary_duration_ms,
            star_mass: star.mass,
            star_snr: star.snr,
            star_hfd: star.hfd,
            avg_distance: self.avg_distance,
        };

        if self.measurement_mode || self.pause == PauseType::Full || self.pause == PauseType::Guiding {
            // No move is actually dispatched this frame; report that.
            info.primary_duration_ms = 0;
            info.secondary_duration_ms = 0;
            return StepOutcome::Guiding { info, moves: Vec::new() };
        }

        let mut moves = Vec::new();
        if primary_correction.abs() > 0.0 {
            moves.push(GuideMove {
                axis: Axis::Primary,
                direction: if primary_correction > 0.0 { Direction::Positive } else { Direction::Negative },
                duration_ms: primary_duration_ms,
            });
        }
        if secondary_correction.abs() > 0.0 {
            moves.push(GuideMove {
                axis: Axis::Secondary,
                direction: if secondary_correction > 0.0 { Direction::Positive } else { Direction::Negative },
                duration_ms: secondary_duration_ms,
            });
        }

        StepOutcome::Guiding { info, moves }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::HysteresisAlgorithm;
    use chrono::Utc;

    fn test_calibration() -> Calibration {
        Calibration {
            x_angle: 0.0,
            y_angle: std::f64::consts::FRAC_PI_2,
            x_rate: 10.0,
            y_rate: 10.0,
            declination: None,
            pier_side: None,
            binning: 1,
            rotator_angle: None,
            timestamp: Utc::now(),
        }
    }

    fn new_guider() -> Guider {
        Guider::new(Algorithm::Hysteresis(HysteresisAlgorithm::new()), Algorithm::Hysteresis(HysteresisAlgorithm::new()))
    }

    #[test]
    fn img_to_mount_axes_recovers_orthogonal_displacement() {
        let cal = test_calibration();
        let (p, s) = img_to_mount_axes(&cal, Point::new(3.0, 4.0)).unwrap();
        assert!((p - 3.0).abs() < 1e-9);
        assert!((s - 4.0).abs() < 1e-9);
    }

    #[test]
    fn start_guiding_requires_calibration_and_lock_position() {
        let mut guider = new_guider();
        assert!(matches!(guider.start_guiding(), Err(GuiderError::NotCalibrated)));
        guider.set_calibration(test_calibration());
        assert!(matches!(guider.start_guiding(), Err(GuiderError::NoStarSelected)));
        guider.set_lock_position(Point::new(50.0, 50.0));
        assert!(guider.start_guiding().is_ok());
        assert_eq!(guider.state(), State::Guiding);
    }

    #[test]
    fn repeated_star_loss_stops_guiding() {
        let mut guider = new_guider();
        guider.set_calibration(test_calibration());
        guider.set_lock_position(Point::new(50.0, 50.0));
        guider.start_guiding().unwrap();

        let blank = GuideImage::new(200, 200, vec![100u16; 200 * 200]);
        for _ in 0..guider.max_star_lost + 1 {
            guider.guide_step(&blank, 2000, None);
        }
        assert_eq!(guider.state(), State::Stop);
    }

    fn gaussian_star_image(width: u32, height: u32, cx: f64, cy: f64, peak: f64, sigma: f64, background: f64) -> GuideImage {
        let mut pixels = vec![0u16; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                let v = background + peak * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
                pixels[(y * width + x) as usize] = v as u16;
            }
        }
        GuideImage::new(width, height, pixels)
    }

    #[test]
    fn declination_compensation_scales_primary_duration() {
        let mut cal = test_calibration();
        cal.declination = Some(0.0); // calibrated at the equator, cos(0) = 1

        let mut guider = new_guider();
        guider.set_calibration(cal);
        guider.set_lock_position(Point::new(90.0, 80.0));
        guider.start_guiding().unwrap();
        let image = gaussian_star_image(200, 200, 100.0, 80.0, 40000.0, 2.0, 200.0);

        let uncompensated = guider.guide_step(&image, 8000, None);
        let StepOutcome::Guiding { info: info_uncompensated, .. } = uncompensated else { panic!("expected a guiding step") };

        // Reset back to the same starting point and re-run with the mount
        // currently at dec = 60 deg: cos(60 deg) = 0.5, so the scale halves
        // the primary-axis duration relative to the uncompensated run.
        let mut cal = test_calibration();
        cal.declination = Some(0.0);
        let mut guider = new_guider();
        guider.set_calibration(cal);
        guider.set_lock_position(Point::new(90.0, 80.0));
        guider.start_guiding().unwrap();
        let compensated = guider.guide_step(&image, 8000, Some(std::f64::consts::FRAC_PI_3));
        let StepOutcome::Guiding { info: info_compensated, .. } = compensated else { panic!("expected a guiding step") };

        assert!(
            info_compensated.primary_duration_ms < info_uncompensated.primary_duration_ms,
            "compensated duration {} should be smaller than uncompensated {}",
            info_compensated.primary_duration_ms,
            info_uncompensated.primary_duration_ms
        );
        // Secondary axis rate doesn't depend on declination.
        assert_eq!(info_compensated.secondary_duration_ms, info_uncompensated.secondary_duration_ms);
    }

    #[test]
    fn sticky_lock_position_is_not_recentered_on_reselect() {
        let mut guider = new_guider();
        guider.set_lock_position(Point::new(50.0, 50.0));
        guider.set_lock_position_sticky(true);

        let star_image = gaussian_star_image(200, 200, 120.0, 80.0, 40000.0, 2.0, 200.0);
        let outcome = guider.select_star(&star_image);
        assert!(matches!(outcome, StepOutcome::StarSelected(_)));
        // The found star is at (120, 80) but the sticky lock stays put.
        assert_eq!(guider.lock_position().unwrap().position, Point::new(50.0, 50.0));
    }

    #[test]
    fn non_sticky_lock_position_recenters_on_reselect() {
        let mut guider = new_guider();
        guider.set_lock_position(Point::new(50.0, 50.0));

        let star_image = gaussian_star_image(200, 200, 120.0, 80.0, 40000.0, 2.0, 200.0);
        let outcome = guider.select_star(&star_image);
        assert!(matches!(outcome, StepOutcome::StarSelected(_)));
        assert_eq!(guider.lock_position().unwrap().position, Point::new(120.0, 80.0));
    }
}
