//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! A camera that synthesizes a single Gaussian star drifting under a
//! configurable rate, for tests and equipment-free evaluation.
//!

use std::time::Duration;

use crate::camera::{Camera, CameraInfo, FrameCapturer};
use crate::error::CameraError;
use crate::geometry::Rect;
use crate::image::GuideImage;
use crate::sim_link::SharedStarField;

pub struct SimulatorCamera {
    width: u32,
    height: u32,
    pixel_size_um: f64,
    gain: f64,
    star_field: SharedStarField,
}

impl SimulatorCamera {
    /// A camera with its own private, unmoving star field — fine for
    /// frame-shape tests, but a mount's pulse-guide calls won't move
    /// anything this camera reports. Use [`SimulatorCamera::linked`]
    /// to wire it to a [`crate::mount::simulator::SimulatorMount`].
    pub fn new(width: u32, height: u32, pixel_size_um: f64) -> SimulatorCamera {
        SimulatorCamera::linked(width, height, pixel_size_um, SharedStarField::new(width as f64 / 2.0, height as f64 / 2.0))
    }

    /// A camera sharing `star_field` with a mount/AO simulator, so the
    /// star position this camera reports reflects every pulse-guide
    /// that simulator has applied.
    pub fn linked(width: u32, height: u32, pixel_size_um: f64, star_field: SharedStarField) -> SimulatorCamera {
        SimulatorCamera { width, height, pixel_size_um, gain: 1.0, star_field }
    }
}

impl Camera for SimulatorCamera {
    fn info(&self) -> CameraInfo {
        CameraInfo {
            name: "Simulator".into(),
            sensor_width: self.width,
            sensor_height: self.height,
            pixel_size_um: self.pixel_size_um,
            has_cooler: false,
        }
    }

    fn create_capturer(&mut self, exposure_ms: u32, subframe: Option<Rect>) -> Result<Box<dyn FrameCapturer>, CameraError> {
        Ok(Box::new(SimulatorCapturer {
            width: self.width,
            height: self.height,
            exposure_ms,
            subframe,
            star_field: self.star_field.clone(),
        }))
    }

    fn set_gain(&mut self, gain: f64) -> Result<(), CameraError> {
        self.gain = gain;
        Ok(())
    }

    fn get_gain(&self) -> f64 {
        self.gain
    }
}

struct SimulatorCapturer {
    width: u32,
    height: u32,
    exposure_ms: u32,
    subframe: Option<Rect>,
    star_field: SharedStarField,
}

impl FrameCapturer for SimulatorCapturer {
    fn capture_frame(&mut self) -> Result<GuideImage, CameraError> {
        std::thread::sleep(Duration::from_millis(0));

        let (star_x, star_y) = self.star_field.position();
        let mut pixels = vec![200u16; (self.width * self.height) as usize];
        let sigma = 2.0;
        let peak = 30000.0;
        for y in 0..self.height {
            for x in 0..self.width {
                let dx = x as f64 - star_x;
                let dy = y as f64 - star_y;
                let v = 200.0 + peak * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
                pixels[(y * self.width + x) as usize] = v as u16;
            }
        }

        let mut image = GuideImage::new(self.width, self.height, pixels);
        image.subframe = self.subframe;
        let _ = self.exposure_ms;
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capturer_produces_requested_dimensions() {
        let mut cam = SimulatorCamera::new(320, 240, 3.75);
        let mut capturer = cam.create_capturer(1000, None).unwrap();
        let frame = capturer.capture_frame().unwrap();
        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 240);
    }
}
