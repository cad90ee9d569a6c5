//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! LinearRegression: fits a line to the recent (time, displacement)
//! history and corrects by the extrapolated drift, compensating for
//! steady periodic error rather than just the latest sample.
//!

use std::collections::VecDeque;

use crate::algorithm::{below_min_move, GuideAlgorithm};

pub const DEFAULT_MIN_MOVE: f64 = 0.2;
pub const DEFAULT_AGGRESSION: f64 = 1.0;
pub const DEFAULT_WINDOW: usize = 25;

pub struct LinearRegressionAlgorithm {
    min_move: f64,
    aggression: f64,
    window: usize,
    samples: VecDeque<f64>,
    sum_correction: f64,
}

impl LinearRegressionAlgorithm {
    pub fn new() -> LinearRegressionAlgorithm {
        LinearRegressionAlgorithm {
            min_move: DEFAULT_MIN_MOVE,
            aggression: DEFAULT_AGGRESSION,
            window: DEFAULT_WINDOW,
            samples: VecDeque::new(),
            sum_correction: 0.0,
        }
    }

    /// Least-squares slope/intercept of `samples` vs. sample index.
    fn fit(&self) -> (f64, f64) {
        let n = self.samples.len() as f64;
        if n < 2.0 {
            return (0.0, self.samples.back().copied().unwrap_or(0.0));
        }
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = self.samples.iter().sum::<f64>() / n;
        let mut num = 0.0;
        let mut den = 0.0;
        for (i, y) in self.samples.iter().enumerate() {
            let x = i as f64;
            num += (x - mean_x) * (y - mean_y);
            den += (x - mean_x).powi(2);
        }
        let slope = if den.abs() < 1e-12 { 0.0 } else { num / den };
        (slope, mean_y)
    }
}

impl Default for LinearRegressionAlgorithm {
    fn default() -> LinearRegressionAlgorithm {
        LinearRegressionAlgorithm::new()
    }
}

impl GuideAlgorithm for LinearRegressionAlgorithm {
    fn result(&mut self, input: f64) -> f64 {
        self.samples.push_back(input);
        if self.samples.len() > self.window {
            self.samples.pop_front();
        }

        // Predicted drift accumulated but not yet corrected, plus this
        // sample's own contribution, mirrors the original's running
        // "amount still owed to the star" bookkeeping.
        let (slope, mean) = self.fit();
        let predicted_next = mean + slope * self.samples.len() as f64;
        let total_error = predicted_next - self.sum_correction;

        if below_min_move(input, self.min_move) {
            return 0.0;
        }

        let correction = total_error * self.aggression;
        self.sum_correction += correction;
        correction
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.sum_correction = 0.0;
    }

    fn min_move(&self) -> f64 {
        self.min_move
    }

    fn set_min_move_unchecked(&mut self, min_move: f64) {
        self.min_move = min_move;
    }

    fn get_settings_summary(&self) -> String {
        format!("Aggression = {:.0}%, Minimum move = {:.2}, Window size = {}\n", self.aggression * 100.0, self.min_move, self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_increasing_trend() {
        let mut algo = LinearRegressionAlgorithm::new();
        for i in 0..15 {
            algo.result(i as f64 * 0.5);
        }
        let (slope, _) = algo.fit();
        assert!(slope > 0.0);
    }

    #[test]
    fn zero_input_after_settling_yields_no_correction_growth() {
        let mut algo = LinearRegressionAlgorithm::new();
        for _ in 0..30 {
            algo.result(0.0);
        }
        assert_eq!(algo.result(0.0), 0.0);
    }
}
