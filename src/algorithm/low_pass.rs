//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! LowPass: `median(window) + slopeWeight * linearFitSlope(window)`,
//! clamped so the correction never exceeds the raw input sample. A
//! single noisy sample cannot move the mount past itself, but a
//! sustained drift still gets corrected through the slope term.
//!

use std::collections::VecDeque;

use crate::algorithm::{below_min_move, GuideAlgorithm};

pub const DEFAULT_MIN_MOVE: f64 = 0.2;
pub const DEFAULT_SLOPE_WEIGHT: f64 = 5.0;
pub const DEFAULT_WINDOW: usize = 10;

pub struct LowPassAlgorithm {
    min_move: f64,
    slope_weight: f64,
    window: usize,
    history: VecDeque<f64>,
}

impl LowPassAlgorithm {
    pub fn new() -> LowPassAlgorithm {
        LowPassAlgorithm { min_move: DEFAULT_MIN_MOVE, slope_weight: DEFAULT_SLOPE_WEIGHT, window: DEFAULT_WINDOW, history: VecDeque::new() }
    }

    pub fn slope_weight(&self) -> f64 {
        self.slope_weight
    }

    pub fn set_slope_weight(&mut self, slope_weight: f64) -> Result<(), String> {
        if slope_weight < 0.0 {
            return Err("slopeWeight must be >= 0".into());
        }
        self.slope_weight = slope_weight;
        Ok(())
    }

    fn median(&self) -> f64 {
        let mut sorted: Vec<f64> = self.history.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        sorted[sorted.len() / 2]
    }

    pub fn set_window(&mut self, window: usize) {
        self.window = window.max(2);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
    }

    fn slope(&self) -> f64 {
        let n = self.history.len() as f64;
        if n < 2.0 {
            return 0.0;
        }
        let xs: Vec<f64> = (0..self.history.len()).map(|i| i as f64).collect();
        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = self.history.iter().sum::<f64>() / n;
        let mut num = 0.0;
        let mut den = 0.0;
        for (x, y) in xs.iter().zip(self.history.iter()) {
            num += (x - mean_x) * (y - mean_y);
            den += (x - mean_x).powi(2);
        }
        if den.abs() < 1e-12 {
            0.0
        } else {
            num / den
        }
    }
}

impl Default for LowPassAlgorithm {
    fn default() -> LowPassAlgorithm {
        LowPassAlgorithm::new()
    }
}

impl GuideAlgorithm for LowPassAlgorithm {
    fn result(&mut self, input: f64) -> f64 {
        self.history.push_back(input);
        if self.history.len() > self.window {
            self.history.pop_front();
        }

        let mut result = self.median() + self.slope_weight * self.slope();

        // Never trust the fit beyond what this one sample supports.
        if result.abs() > input.abs() {
            result = input;
        }

        if below_min_move(input, self.min_move) {
            result = 0.0;
        }

        result
    }

    fn reset(&mut self) {
        self.history.clear();
    }

    fn min_move(&self) -> f64 {
        self.min_move
    }

    fn set_min_move_unchecked(&mut self, min_move: f64) {
        self.min_move = min_move;
    }

    fn get_settings_summary(&self) -> String {
        format!("Slope weight = {:.3}, Minimum move = {:.3}\n", self.slope_weight, self.min_move)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_sustained_drift() {
        let mut algo = LowPassAlgorithm::new();
        let mut last = 0.0;
        for i in 0..20 {
            last = algo.result(i as f64 * 0.3);
        }
        assert!(last.abs() > 0.0);
    }

    #[test]
    fn result_never_exceeds_input_magnitude() {
        let mut algo = LowPassAlgorithm::new();
        algo.set_min_move(0.0).unwrap();
        algo.set_slope_weight(100.0).unwrap();
        for i in 0..5 {
            let input = i as f64 * 2.0;
            let result = algo.result(input);
            assert!(result.abs() <= input.abs() + 1e-9, "result {result} exceeded input {input}");
        }
    }

    #[test]
    fn zero_slope_weight_yields_plain_median() {
        let mut algo = LowPassAlgorithm::new();
        algo.set_min_move(0.0).unwrap();
        algo.set_slope_weight(0.0).unwrap();
        algo.result(1.0);
        algo.result(3.0);
        let result = algo.result(2.0);
        assert!((result - 2.0).abs() < 1e-9);
    }

    #[test]
    fn window_resize_truncates_history() {
        let mut algo = LowPassAlgorithm::new();
        for i in 0..10 {
            algo.result(i as f64);
        }
        algo.set_window(3);
        assert!(algo.history.len() <= 3);
    }
}
