//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Camera abstraction: the `Camera`/`FrameCapturer` traits, mirroring the
//! teacher's driver/capturer split so concrete SDK-backed drivers (ASCOM,
//! INDI, ZWO, ...) are external collaborators behind a thin interface.
//!

pub mod simulator;

use crate::error::CameraError;
use crate::geometry::Rect;
use crate::image::GuideImage;

#[derive(Clone, Debug)]
pub struct CameraInfo {
    pub name: String,
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub pixel_size_um: f64,
    pub has_cooler: bool,
}

/// A connected camera capable of producing a [`FrameCapturer`] for a
/// given exposure configuration.
pub trait Camera: Send {
    fn info(&self) -> CameraInfo;

    fn create_capturer(&mut self, exposure_ms: u32, subframe: Option<Rect>) -> Result<Box<dyn FrameCapturer>, CameraError>;

    fn set_gain(&mut self, gain: f64) -> Result<(), CameraError>;
    fn get_gain(&self) -> f64;

    fn temperature(&self) -> Option<f64> {
        None
    }
}

/// Produces exposures once configured by [`Camera::create_capturer`].
/// Separated from `Camera` so the worker thread can own a capturer
/// across many exposures without re-touching camera-wide settings.
pub trait FrameCapturer: Send {
    /// Blocks for the configured exposure time (or until `cancel` is
    /// observed) and returns the resulting frame.
    fn capture_frame(&mut self) -> Result<GuideImage, CameraError>;

    fn pause(&mut self) {}
    fn resume(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::simulator::SimulatorCamera;
    use super::*;

    #[test]
    fn simulator_camera_reports_info() {
        let cam = SimulatorCamera::new(1280, 960, 3.75);
        assert_eq!(cam.info().sensor_width, 1280);
    }
}
