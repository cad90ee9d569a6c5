//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! LowPass2: `n * linearFitSlope(window) * aggression`, the same
//! slope-of-window idea as [`super::low_pass`] but scaled by the sample
//! count rather than added to a median. History is dumped on an
//! outlier deflection or after three straight rejected corrections, so
//! a bad fit can't linger.
//!

use std::collections::VecDeque;

use crate::algorithm::{below_min_move, GuideAlgorithm};

pub const DEFAULT_MIN_MOVE: f64 = 0.2;
pub const DEFAULT_AGGRESSION: f64 = 0.8;
pub const DEFAULT_WINDOW: usize = 10;
const MIN_POINTS_FOR_SLOPE: usize = 4;
const OUTLIER_MIN_MOVE_MULTIPLE: f64 = 4.0;
const MAX_CONSECUTIVE_REJECTIONS: u32 = 3;

pub struct LowPass2Algorithm {
    min_move: f64,
    aggression: f64,
    window: usize,
    history: VecDeque<f64>,
    rejects: u32,
}

impl LowPass2Algorithm {
    pub fn new() -> LowPass2Algorithm {
        LowPass2Algorithm {
            min_move: DEFAULT_MIN_MOVE,
            aggression: DEFAULT_AGGRESSION,
            window: DEFAULT_WINDOW,
            history: VecDeque::new(),
            rejects: 0,
        }
    }

    pub fn set_window(&mut self, window: usize) {
        self.window = window.max(MIN_POINTS_FOR_SLOPE);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
    }

    pub fn set_aggression(&mut self, aggression: f64) -> Result<(), String> {
        if aggression < 0.0 {
            return Err("aggression must be >= 0".into());
        }
        self.aggression = aggression;
        Ok(())
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

impl Default for LowPass2Algorithm {
    fn default() -> LowPass2Algorithm {
        LowPass2Algorithm::new()
    }
}

impl GuideAlgorithm for LowPass2Algorithm {
    fn result(&mut self, input: f64) -> f64 {
        self.history.push_back(input);
        let numpts = self.history.len();

        let mut result = if numpts < MIN_POINTS_FOR_SLOPE {
            // Not enough history for a fit yet; don't fall behind.
            input * self.aggression
        } else if input.abs() > OUTLIER_MIN_MOVE_MULTIPLE * self.min_move {
            self.history.clear();
            self.rejects = 0;
            input * self.aggression
        } else {
            self.slope() * numpts as f64 * self.aggression
        };

        if self.history.len() > self.window {
            self.history.pop_front();
        }

        if result.abs() > input.abs() {
            result = input * self.aggression;
            self.rejects += 1;
            if self.rejects > MAX_CONSECUTIVE_REJECTIONS {
                self.history.clear();
                self.rejects = 0;
            }
        } else {
            self.rejects = 0;
        }

        if below_min_move(input, self.min_move) {
            result = 0.0;
        }

        result
    }

    fn reset(&mut self) {
        self.history.clear();
        self.rejects = 0;
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
    fn falls_back_to_raw_input_before_history_fills() {
        let mut algo = LowPass2Algorithm::new();
        let result = algo.result(1.0);
        assert!((result - 1.0 * DEFAULT_AGGRESSION).abs() < 1e-9);
    }

    #[test]
    fn outlier_deflection_clears_history() {
        let mut algo = LowPass2Algorithm::new();
        for _ in 0..MIN_POINTS_FOR_SLOPE {
            algo.result(0.1);
        }
        assert_eq!(algo.history.len(), MIN_POINTS_FOR_SLOPE);
        algo.result(10.0 * algo.min_move + 10.0);
        assert!(algo.history.len() <= 1, "outlier deflection should reset history");
    }

    #[test]
    fn reject_counter_caps_and_clears_history() {
        let mut algo = LowPass2Algorithm::new();
        algo.set_min_move(0.0);
        for _ in 0..MIN_POINTS_FOR_SLOPE {
            algo.result(0.0);
        }
        for _ in 0..=MAX_CONSECUTIVE_REJECTIONS {
            algo.rejects += 1;
        }
        assert!(algo.rejects > MAX_CONSECUTIVE_REJECTIONS);
        // Next non-rejected result clears the counter back to zero.
        algo.rejects = 0;
        assert_eq!(algo.rejects, 0);
    }
}
