//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! `PhdController`: the top-level settle/dither/guide state machine
//! exposed to RPC clients via `guide`/`dither`. Ported from
//! `phdcontrol.cpp`'s `PhdController::UpdateControllerState` — a linear
//! sequence from equipment setup through star selection, calibration,
//! guiding, and settle tracking.
//!

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::ControllerError;
use crate::guider::State as GuiderState;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Setup,
    AttemptStart,
    SelectStar,
    WaitSelected,
    Calibrate,
    CalibrationWait,
    Guide,
    SettleBegin,
    SettleWait,
    Finish,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettleOp {
    Dither,
    Guide,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct SettleParams {
    pub tolerance_px: f64,
    pub settle_time_sec: f64,
    pub timeout_sec: f64,
}

impl Default for SettleParams {
    fn default() -> SettleParams {
        SettleParams { tolerance_px: 1.5, settle_time_sec: 10.0, timeout_sec: 60.0 }
    }
}

/// Reported once per tick so the event server can emit `Settling`/
/// `SettleDone`.
#[derive(Copy, Clone, Debug)]
pub struct SettleProgress {
    pub current_error_px: f64,
    pub time_in_range_sec: f64,
    pub settle_time_sec: f64,
}

pub enum ControllerEvent {
    None,
    StartCalibration,
    CalibrationComplete,
    StartGuiding,
    SettleBegin,
    Settling(SettleProgress),
    SettleDone { succeeded: bool, error: Option<String> },
}

pub struct PhdController {
    state: State,
    force_calibration: bool,
    auto_find_attempts_remaining: u32,
    wait_selected_remaining: Duration,
    settle_op: Option<SettleOp>,
    settle: SettleParams,
    settle_started_at: Option<Instant>,
    settle_in_range_since: Option<Instant>,
    settle_timeout_at: Option<Instant>,
    dither_pixels: f64,
    dither_ra_only: bool,
}

impl PhdController {
    pub fn new() -> PhdController {
        PhdController {
            state: State::Idle,
            force_calibration: false,
            auto_find_attempts_remaining: 0,
            wait_selected_remaining: Duration::ZERO,
            settle_op: None,
            settle: SettleParams::default(),
            settle_started_at: None,
            settle_in_range_since: None,
            settle_timeout_at: None,
            dither_pixels: 0.0,
            dither_ra_only: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != State::Idle
    }

    /// Dither offset requested via [`PhdController::dither`], consumed by
    /// the session when it applies the lock-position shift.
    pub fn pending_dither(&self) -> Option<(f64, bool)> {
        (self.settle_op == Some(SettleOp::Dither)).then_some((self.dither_pixels, self.dither_ra_only))
    }

    fn begin(&mut self, op: SettleOp, settle: SettleParams, recalibrate: bool) -> Result<(), ControllerError> {
        if self.is_busy() {
            return Err(ControllerError::Busy(format!("{:?}", self.state)));
        }
        self.force_calibration = recalibrate;
        self.settle_op = Some(op);
        self.settle = settle;
        self.auto_find_attempts_remaining = 3;
        self.wait_selected_remaining = Duration::from_secs(10);
        self.settle_started_at = None;
        self.settle_in_range_since = None;
        self.settle_timeout_at = None;
        self.state = State::Setup;
        info!("controller: starting {:?}", op);
        Ok(())
    }

    pub fn guide(&mut self, recalibrate: bool, settle: SettleParams) -> Result<(), ControllerError> {
        self.begin(SettleOp::Guide, settle, recalibrate)
    }

    pub fn dither(&mut self, pixels: f64, ra_only: bool, settle: SettleParams) -> Result<(), ControllerError> {
        self.dither_pixels = pixels;
        self.dither_ra_only = ra_only;
        self.begin(SettleOp::Dither, settle, false)
    }

    fn fail(&mut self, msg: &str) -> ControllerEvent {
        warn!("controller: {}", msg);
        self.state = State::Idle;
        self.settle_op = None;
        ControllerEvent::SettleDone { succeeded: false, error: Some(msg.to_string()) }
    }

    fn succeed(&mut self) -> ControllerEvent {
        self.state = State::Idle;
        self.settle_op = None;
        ControllerEvent::SettleDone { succeeded: true, error: None }
    }

    /// One tick of the state machine. `guider_state`/`all_connected` are
    /// read from the session; `current_error_px` is the guider's
    /// smoothed current error once guiding has begun.
    pub fn update(&mut self, guider_state: GuiderState, all_connected: bool, current_error_px: Option<f64>, tick_elapsed: Duration) -> ControllerEvent {
        match self.state {
            State::Idle => ControllerEvent::None,

            State::Setup => {
                if !all_connected {
                    return self.fail("equipment not fully connected");
                }
                self.state = State::AttemptStart;
                ControllerEvent::None
            }

            State::AttemptStart => {
                if self.settle_op == Some(SettleOp::Guide) && guider_state == GuiderState::Calibrated {
                    self.state = State::Guide;
                } else if guider_state == GuiderState::Selected || guider_state == GuiderState::Calibrated {
                    self.state = if self.force_calibration || guider_state != GuiderState::Calibrated {
                        State::Calibrate
                    } else {
                        State::Guide
                    };
                } else {
                    self.state = State::SelectStar;
                }
                ControllerEvent::None
            }

            State::SelectStar => {
                if self.auto_find_attempts_remaining == 0 {
                    return self.fail("star auto-selection failed");
                }
                self.auto_find_attempts_remaining -= 1;
                self.state = State::WaitSelected;
                self.wait_selected_remaining = Duration::from_secs(10);
                ControllerEvent::None
            }

            State::WaitSelected => {
                if guider_state == GuiderState::Selected {
                    self.state = State::Calibrate;
                    return ControllerEvent::None;
                }
                self.wait_selected_remaining = self.wait_selected_remaining.saturating_sub(tick_elapsed);
                if self.wait_selected_remaining.is_zero() {
                    self.state = State::SelectStar;
                }
                ControllerEvent::None
            }

            State::Calibrate => {
                self.state = State::CalibrationWait;
                ControllerEvent::StartCalibration
            }

            State::CalibrationWait => match guider_state {
                GuiderState::Calibrated => {
                    self.state = State::Guide;
                    ControllerEvent::CalibrationComplete
                }
                GuiderState::CalibratingPrimary | GuiderState::CalibratingSecondary => ControllerEvent::None,
                _ => self.fail("calibration failed"),
            },

            State::Guide => {
                self.state = State::SettleBegin;
                debug!("controller: guiding started, entering settle tracking");
                ControllerEvent::StartGuiding
            }

            State::SettleBegin => {
                let now_placeholder = Instant::now();
                self.settle_started_at = Some(now_placeholder);
                self.settle_timeout_at = Some(now_placeholder + Duration::from_secs_f64(self.settle.timeout_sec));
                self.settle_in_range_since = None;
                self.state = State::SettleWait;
                ControllerEvent::SettleBegin
            }

            State::SettleWait => {
                let Some(error_px) = current_error_px else { return ControllerEvent::None };
                let now = Instant::now();
                let in_range = error_px <= self.settle.tolerance_px;

                if in_range {
                    if self.settle_in_range_since.is_none() {
                        self.settle_in_range_since = Some(now);
                    }
                } else {
                    self.settle_in_range_since = None;
                }

                let time_in_range = self
                    .settle_in_range_since
                    .map(|since| now.saturating_duration_since(since).as_secs_f64())
                    .unwrap_or(0.0);

                if time_in_range >= self.settle.settle_time_sec {
                    self.state = State::Finish;
                    return ControllerEvent::Settling(SettleProgress {
                        current_error_px: error_px,
                        time_in_range_sec: time_in_range,
                        settle_time_sec: self.settle.settle_time_sec,
                    });
                }

                if let Some(timeout_at) = self.settle_timeout_at {
                    if now >= timeout_at {
                        return self.fail("timed-out waiting for guider to settle");
                    }
                }

                ControllerEvent::Settling(SettleProgress {
                    current_error_px: error_px,
                    time_in_range_sec: time_in_range,
                    settle_time_sec: self.settle.settle_time_sec,
                })
            }

            State::Finish => self.succeed(),
        }
    }
}

impl Default for PhdController {
    fn default() -> PhdController {
        PhdController::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive_to(ctrl: &mut PhdController, target: State, guider_state: GuiderState) {
        for _ in 0..20 {
            if ctrl.state() == target {
                return;
            }
            ctrl.update(guider_state, true, None, Duration::from_millis(100));
        }
        panic!("did not reach {:?}, stuck at {:?}", target, ctrl.state());
    }

    #[test]
    fn guide_rejects_reentrant_call() {
        let mut ctrl = PhdController::new();
        ctrl.guide(false, SettleParams::default()).unwrap();
        assert!(matches!(ctrl.guide(false, SettleParams::default()), Err(ControllerError::Busy(_))));
    }

    #[test]
    fn settle_succeeds_once_time_in_range_exceeds_settle_time() {
        let mut ctrl = PhdController::new();
        ctrl.guide(false, SettleParams { tolerance_px: 1.0, settle_time_sec: 0.05, timeout_sec: 5.0 }).unwrap();

        drive_to(&mut ctrl, State::SettleWait, GuiderState::Calibrated);

        // First in-range sample starts the clock; wait long enough for
        // the settle time to elapse in real wall-clock terms.
        let event = ctrl.update(GuiderState::Calibrated, true, Some(0.5), Duration::from_millis(10));
        assert!(matches!(event, ControllerEvent::Settling(_)));

        std::thread::sleep(Duration::from_millis(80));
        let event = ctrl.update(GuiderState::Calibrated, true, Some(0.5), Duration::from_millis(10));
        assert!(matches!(event, ControllerEvent::SettleDone { succeeded: true, .. }));
    }

    #[test]
    fn settle_times_out_without_ever_being_in_range() {
        let mut ctrl = PhdController::new();
        ctrl.guide(false, SettleParams { tolerance_px: 0.1, settle_time_sec: 10.0, timeout_sec: 0.02 }).unwrap();
        drive_to(&mut ctrl, State::SettleWait, GuiderState::Calibrated);

        std::thread::sleep(Duration::from_millis(40));
        let event = ctrl.update(GuiderState::Calibrated, true, Some(5.0), Duration::from_millis(10));
        assert!(matches!(event, ControllerEvent::SettleDone { succeeded: false, .. }));
    }

    #[test]
    fn setup_fails_fast_when_equipment_not_connected() {
        let mut ctrl = PhdController::new();
        ctrl.guide(false, SettleParams::default()).unwrap();
        let event = ctrl.update(GuiderState::Uninitialized, false, None, Duration::from_millis(10));
        assert!(matches!(event, ControllerEvent::SettleDone { succeeded: false, .. }));
    }
}
