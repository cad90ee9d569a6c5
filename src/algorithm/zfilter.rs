//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! ZFilter: a second-order Butterworth low-pass IIR filter, applied to
//! the displacement signal before a proportional correction. Attenuates
//! high-frequency seeing noise more sharply than a moving average for
//! the same amount of lag.
//!

use crate::algorithm::{below_min_move, GuideAlgorithm};

pub const DEFAULT_MIN_MOVE: f64 = 0.2;
pub const DEFAULT_AGGRESSION: f64 = 1.0;
pub const DEFAULT_CUTOFF_HZ: f64 = 0.2;
pub const DEFAULT_SAMPLE_HZ: f64 = 1.0;

/// Coefficients for a direct-form-II biquad Butterworth low-pass.
#[derive(Copy, Clone, Debug)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    fn low_pass(cutoff_hz: f64, sample_hz: f64) -> Biquad {
        let nyquist = sample_hz / 2.0;
        let normalized = (cutoff_hz / nyquist).clamp(0.001, 0.999);
        let omega = std::f64::consts::PI * normalized;
        let sn = omega.sin();
        let cs = omega.cos();
        let q = std::f64::consts::FRAC_1_SQRT_2; // Butterworth Q
        let alpha = sn / (2.0 * q);

        let b0 = (1.0 - cs) / 2.0;
        let b1 = 1.0 - cs;
        let b2 = (1.0 - cs) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cs;
        let a2 = 1.0 - alpha;

        Biquad { b0: b0 / a0, b1: b1 / a0, b2: b2 / a0, a1: a1 / a0, a2: a2 / a0 }
    }
}

pub struct ZFilterAlgorithm {
    min_move: f64,
    aggression: f64,
    biquad: Biquad,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl ZFilterAlgorithm {
    pub fn new() -> ZFilterAlgorithm {
        ZFilterAlgorithm {
            min_move: DEFAULT_MIN_MOVE,
            aggression: DEFAULT_AGGRESSION,
            biquad: Biquad::low_pass(DEFAULT_CUTOFF_HZ, DEFAULT_SAMPLE_HZ),
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub fn set_cutoff(&mut self, cutoff_hz: f64, sample_hz: f64) {
        self.biquad = Biquad::low_pass(cutoff_hz, sample_hz);
    }
}

impl Default for ZFilterAlgorithm {
    fn default() -> ZFilterAlgorithm {
        ZFilterAlgorithm::new()
    }
}

impl GuideAlgorithm for ZFilterAlgorithm {
    fn result(&mut self, input: f64) -> f64 {
        let b = &self.biquad;
        let y = b.b0 * input + b.b1 * self.x1 + b.b2 * self.x2 - b.a1 * self.y1 - b.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = y;

        if below_min_move(input, self.min_move) {
            return 0.0;
        }

        y * self.aggression
    }

    fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    fn min_move(&self) -> f64 {
        self.min_move
    }

    fn set_min_move_unchecked(&mut self, min_move: f64) {
        self.min_move = min_move;
    }

    fn get_settings_summary(&self) -> String {
        format!("Aggression = {:.0}%, Minimum move = {:.2}\n", self.aggression * 100.0, self.min_move)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_input_converges_to_itself() {
        let mut algo = ZFilterAlgorithm::new();
        let mut last = 0.0;
        for _ in 0..200 {
            last = algo.result(1.0);
        }
        assert!((last - 1.0).abs() < 0.05);
    }

    #[test]
    fn attenuates_alternating_noise() {
        let mut algo = ZFilterAlgorithm::new();
        let mut max_abs = 0.0f64;
        for i in 0..50 {
            let input = if i % 2 == 0 { 1.0 } else { -1.0 };
            max_abs = max_abs.max(algo.result(input).abs());
        }
        assert!(max_abs < 1.0);
    }
}
