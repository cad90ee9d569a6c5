//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! MedianWindow: tracks the accumulated gear error (control issued so
//! far plus the latest measurement), takes the per-step slope of that
//! series across the window, trims the top/bottom quarter by value and
//! averages what's left, then adds the trimmed-mean drift to a plain
//! gain*input term. Immune to single-sample spikes without the lag a
//! whole-window slope fit adds.
//!

use std::collections::VecDeque;

use crate::algorithm::{below_min_move, GuideAlgorithm};

pub const DEFAULT_MIN_MOVE: f64 = 0.2;
pub const DEFAULT_AGGRESSION: f64 = 1.0;
pub const DEFAULT_WINDOW: usize = 12;
pub const DEFAULT_MIN_ELEMENTS_FOR_INFERENCE: usize = 4;

pub struct MedianWindowAlgorithm {
    min_move: f64,
    aggression: f64,
    window: usize,
    min_elements_for_inference: usize,
    gear_error: VecDeque<f64>,
    sum_controls: f64,
}

impl MedianWindowAlgorithm {
    pub fn new() -> MedianWindowAlgorithm {
        MedianWindowAlgorithm {
            min_move: DEFAULT_MIN_MOVE,
            aggression: DEFAULT_AGGRESSION,
            window: DEFAULT_WINDOW,
            min_elements_for_inference: DEFAULT_MIN_ELEMENTS_FOR_INFERENCE,
            gear_error: VecDeque::new(),
            sum_controls: 0.0,
        }
    }

    pub fn set_window(&mut self, window: usize) {
        self.window = window.max(2);
        while self.gear_error.len() > self.window {
            self.gear_error.pop_front();
        }
    }

    /// Trimmed-mean per-step slope of the gear-error series: sorts the
    /// step-to-step differences by value, drops the bottom and top
    /// quarter, and averages the middle half.
    fn trimmed_mean_slope(&self) -> f64 {
        let diffs: Vec<f64> = self.gear_error.iter().zip(self.gear_error.iter().skip(1)).map(|(a, b)| b - a).collect();
        let n = diffs.len();
        if n == 0 {
            return 0.0;
        }
        let mut sorted = diffs;
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let exclude = n / 4;
        let trimmed = &sorted[exclude..n - exclude];
        if trimmed.is_empty() {
            0.0
        } else {
            trimmed.iter().sum::<f64>() / trimmed.len() as f64
        }
    }
}

impl Default for MedianWindowAlgorithm {
    fn default() -> MedianWindowAlgorithm {
        MedianWindowAlgorithm::new()
    }
}

impl GuideAlgorithm for MedianWindowAlgorithm {
    fn result(&mut self, input: f64) -> f64 {
        let gear_error_now = self.sum_controls + input;
        self.gear_error.push_back(gear_error_now);
        if self.gear_error.len() > self.window {
            self.gear_error.pop_front();
        }

        let mut control_signal = self.aggression * input;

        if self.gear_error.len() > self.min_elements_for_inference {
            let drift_prediction = self.trimmed_mean_slope();
            control_signal += drift_prediction;
            // A prediction pointing the opposite way from the gain term
            // would overshoot into backlash; drop it instead.
            if control_signal * drift_prediction < 0.0 {
                control_signal = 0.0;
            }
        } else {
            control_signal *= 0.1;
        }

        self.sum_controls += control_signal;

        if below_min_move(input, self.min_move) {
            return 0.0;
        }

        control_signal
    }

    fn reset(&mut self) {
        self.gear_error.clear();
        self.sum_controls = 0.0;
    }

    fn min_move(&self) -> f64 {
        self.min_move
    }

    fn set_min_move_unchecked(&mut self, min_move: f64) {
        self.min_move = min_move;
    }

    fn get_settings_summary(&self) -> String {
        format!("Control gain = {:.3}, Minimum move = {:.2}, Window size = {}\n", self.aggression, self.min_move, self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramps_up_slowly_before_enough_history() {
        let mut algo = MedianWindowAlgorithm::new();
        let result = algo.result(1.0);
        assert!((result - 0.1).abs() < 1e-9);
    }

    #[test]
    fn trimmed_slope_ignores_single_spike_diff() {
        let mut algo = MedianWindowAlgorithm::new();
        // Flat gear error except one single-step jump; the trimmed mean
        // should discard that outlier difference.
        for v in [0.0, 0.0, 0.0, 0.0, 0.0, 50.0, 0.0, 0.0] {
            algo.result(v);
        }
        let slope = algo.trimmed_mean_slope();
        assert!(slope.abs() < 5.0, "trimmed slope {slope} should reject the single spike");
    }

    #[test]
    fn reset_clears_accumulated_state() {
        let mut algo = MedianWindowAlgorithm::new();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            algo.result(v);
        }
        algo.reset();
        assert_eq!(algo.gear_error.len(), 0);
        assert_eq!(algo.sum_controls, 0.0);
    }
}
