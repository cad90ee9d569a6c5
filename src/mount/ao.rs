//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Adaptive-optics (step guider) support: the `AoDevice` trait, and the
//! bump-to-mount controller that recentres the AO's limited travel range
//! by nudging the mount instead, once the AO tip/tilt mirror approaches
//! its limit.
//!

use crossbeam::channel::{Receiver, Sender};

use crate::error::MountError;
use crate::mount::Direction;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepResult {
    Ok,
    LimitReached,
    Error,
}

/// Step guider position, in actuator steps along each axis.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct StepPosition {
    pub x: i32,
    pub y: i32,
}

/// An adaptive-optics device: fast, small-range tip/tilt correction.
pub trait AoDevice: Send {
    fn step(&mut self, direction: Direction, axis_is_x: bool, steps: u32) -> Result<StepResult, MountError>;
    fn position(&self) -> StepPosition;
    fn max_position(&self) -> i32;
    fn center(&mut self) -> Result<(), MountError>;
}

/// Published whenever the AO's position changes, consumed by
/// [`BumpController`] to decide when to nudge the mount.
#[derive(Copy, Clone, Debug)]
pub struct PositionUpdate {
    pub position: StepPosition,
}

#[derive(Copy, Clone, Debug)]
pub struct BumpRequest {
    pub dx_steps: i32,
    pub dy_steps: i32,
}

/// Parameters controlling when and how hard the bump controller nudges
/// the mount, mirroring `stepguider.h`'s `m_bump*` fields.
#[derive(Copy, Clone, Debug)]
pub struct BumpParams {
    /// Fraction of `max_position` at which a bump is triggered.
    pub trigger_fraction: f64,
    /// Fraction of `max_position` the AO should be recentred to.
    pub center_tolerance_fraction: f64,
    /// Maximum mount pulse-guide duration issued per bump cycle (ms).
    pub max_step_ms_per_cycle: u32,
    /// Only bump while a dither settle is in progress.
    pub bump_on_dither_only: bool,
}

impl Default for BumpParams {
    fn default() -> BumpParams {
        BumpParams {
            trigger_fraction: 0.8,
            center_tolerance_fraction: 0.05,
            max_step_ms_per_cycle: 200,
            bump_on_dither_only: false,
        }
    }
}

/// Watches `PositionUpdate`s and emits `BumpRequest`s on a channel when
/// the AO nears its travel limit, so the caller can translate that into
/// a mount `pulse_guide` call. Kept decoupled from the `Mount` trait so
/// the bump decision and its execution can live on different threads,
/// matching the publish/subscribe shape used elsewhere in the worker.
pub struct BumpController {
    params: BumpParams,
    max_position: i32,
    updates: Receiver<PositionUpdate>,
    requests: Sender<BumpRequest>,
    in_progress: bool,
}

impl BumpController {
    pub fn new(
        params: BumpParams,
        max_position: i32,
        updates: Receiver<PositionUpdate>,
        requests: Sender<BumpRequest>,
    ) -> BumpController {
        BumpController { params, max_position, updates, requests, in_progress: false }
    }

    pub fn is_bump_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Drains all pending position updates and issues at most one bump
    /// request if the AO has crossed the trigger threshold.
    pub fn poll(&mut self) {
        let mut last = None;
        while let Ok(update) = self.updates.try_recv() {
            last = Some(update);
        }
        let Some(update) = last else { return };

        let trigger = self.max_position as f64 * self.params.trigger_fraction;
        let center_tolerance = self.max_position as f64 * self.params.center_tolerance_fraction;
        let x = update.position.x as f64;
        let y = update.position.y as f64;

        if x.abs() > trigger || y.abs() > trigger {
            self.in_progress = true;
            let _ = self.requests.send(BumpRequest { dx_steps: update.position.x, dy_steps: update.position.y });
        } else if x.abs() < center_tolerance && y.abs() < center_tolerance {
            self.in_progress = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    #[test]
    fn bump_triggers_past_threshold_and_clears_once_centered() {
        let (update_tx, update_rx) = unbounded();
        let (req_tx, req_rx) = unbounded();
        let mut ctrl = BumpController::new(BumpParams::default(), 100, update_rx, req_tx);

        update_tx.send(PositionUpdate { position: StepPosition { x: 90, y: 0 } }).unwrap();
        ctrl.poll();
        assert!(ctrl.is_bump_in_progress());
        assert!(req_rx.try_recv().is_ok());

        update_tx.send(PositionUpdate { position: StepPosition { x: 2, y: 1 } }).unwrap();
        ctrl.poll();
        assert!(!ctrl.is_bump_in_progress());
    }
}
