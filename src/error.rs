//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Typed errors for every module boundary, composed into `PhdError`.
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MountError {
    #[error("mount is not connected")]
    NotConnected,

    #[error("cannot connect to mount: {0}")]
    CannotConnect(String),

    #[error("axis {0:?} slew limit reached")]
    LimitReached(crate::mount::Axis),

    #[error("mount is slewing, motion request refused")]
    Slewing,

    #[error("driver error: {0}")]
    Driver(String),
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera is not connected")]
    NotConnected,

    #[error("cannot connect to camera: {0}")]
    CannotConnect(String),

    #[error("exposure failed: {0}")]
    ExposureFailed(String),

    #[error("capture was cancelled")]
    Cancelled,

    #[error("driver error: {0}")]
    Driver(String),
}

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("calibration step limit ({0}) reached before completion")]
    StepLimitReached(u32),

    #[error("calibration distance limit reached before completion")]
    DistanceLimitReached,

    #[error("mount axes are not orthogonal enough: |{0:.1}-90| exceeds tolerance")]
    NotOrthogonal(f64),

    #[error("RA/Dec rate ratio inconsistent with declination: got {got:.3}, expected {expected:.3}")]
    RateRatioMismatch { got: f64, expected: f64 },

    #[error("star lost during calibration")]
    StarLost,

    #[error("mount error during calibration: {0}")]
    Mount(#[from] MountError),
}

#[derive(Error, Debug)]
pub enum GuiderError {
    #[error("no star selected")]
    NoStarSelected,

    #[error("star lost")]
    StarLost,

    #[error("guider is not calibrated")]
    NotCalibrated,

    #[error("camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("mount error: {0}")]
    Mount(#[from] MountError),

    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("controller is busy (state: {0})")]
    Busy(String),

    #[error("equipment not fully connected")]
    NotAllConnected,

    #[error("timed-out waiting for guider to settle")]
    SettleTimedOut,

    #[error("guider error: {0}")]
    Guider(#[from] GuiderError),

    #[error("star auto-selection failed after {0} attempts")]
    AutoSelectFailed(u32),
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("invalid params")]
    InvalidParams,

    #[error("{0}")]
    Failed(String),

    #[error("malformed JSON-RPC request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// JSON-RPC error code, matching the original event server's two
    /// reserved application codes.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::InvalidParams => -32602,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum PhdError {
    #[error(transparent)]
    Mount(#[from] MountError),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Guider(#[from] GuiderError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("configuration error: {0}")]
    Config(String),
}
