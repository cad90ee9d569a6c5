//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! ResistSwitch: vetoes a correction when the sign of the displacement
//! has just flipped, requiring a run of consistent-sign samples before
//! trusting the new direction. Guards against chasing seeing noise that
//! oscillates around the lock position. A large-enough excursion
//! bypasses the wait and switches side immediately.
//!

use crate::algorithm::{below_min_move, GuideAlgorithm};

pub const DEFAULT_MIN_MOVE: f64 = 0.2;
pub const DEFAULT_AGGRESSION: f64 = 1.0;
pub const DEFAULT_NUM_TO_CONFIRM: u32 = 2;
pub const DEFAULT_FAST_SWITCH_ENABLED: bool = true;
/// An input beyond `EXCURSION_MULTIPLE * minMove` in the new direction
/// forces an immediate side switch rather than waiting for confirmation.
pub const EXCURSION_MULTIPLE: f64 = 3.0;

pub struct ResistSwitchAlgorithm {
    min_move: f64,
    aggression: f64,
    num_to_confirm: u32,
    fast_switch_enabled: bool,
    last_sign: Option<bool>,
    consistent_count: u32,
}

impl ResistSwitchAlgorithm {
    pub fn new() -> ResistSwitchAlgorithm {
        ResistSwitchAlgorithm {
            min_move: DEFAULT_MIN_MOVE,
            aggression: DEFAULT_AGGRESSION,
            num_to_confirm: DEFAULT_NUM_TO_CONFIRM,
            fast_switch_enabled: DEFAULT_FAST_SWITCH_ENABLED,
            last_sign: None,
            consistent_count: 0,
        }
    }

    pub fn set_num_to_confirm(&mut self, n: u32) {
        self.num_to_confirm = n.max(1);
    }

    pub fn set_aggression(&mut self, a: f64) -> Result<(), String> {
        if !(0.0..=2.0).contains(&a) {
            return Err("aggression must be in [0, 2]".into());
        }
        self.aggression = a;
        Ok(())
    }

    pub fn set_fast_switch_enabled(&mut self, enabled: bool) {
        self.fast_switch_enabled = enabled;
    }
}

impl Default for ResistSwitchAlgorithm {
    fn default() -> ResistSwitchAlgorithm {
        ResistSwitchAlgorithm::new()
    }
}

impl GuideAlgorithm for ResistSwitchAlgorithm {
    fn result(&mut self, input: f64) -> f64 {
        if below_min_move(input, self.min_move) {
            return 0.0;
        }

        let sign = input > 0.0;
        let excursion_thresh = EXCURSION_MULTIPLE * self.min_move;

        let switching_side = matches!(self.last_sign, Some(prev) if prev != sign);
        if self.fast_switch_enabled && switching_side && input.abs() > excursion_thresh {
            // Large excursion away from the current side: trust the new
            // direction immediately instead of waiting on confirmation.
            self.last_sign = Some(sign);
            self.consistent_count = self.num_to_confirm;
            return input * self.aggression;
        }

        match self.last_sign {
            Some(prev) if prev == sign => {
                self.consistent_count += 1;
            }
            _ => {
                self.last_sign = Some(sign);
                self.consistent_count = 1;
            }
        }

        if self.consistent_count < self.num_to_confirm {
            // Side just switched (or first sample): veto the correction
            // until it's been confirmed by enough consistent samples.
            return 0.0;
        }

        input * self.aggression
    }

    fn reset(&mut self) {
        self.last_sign = None;
        self.consistent_count = 0;
    }

    fn min_move(&self) -> f64 {
        self.min_move
    }

    fn set_min_move_unchecked(&mut self, min_move: f64) {
        self.min_move = min_move;
    }

    fn get_settings_summary(&self) -> String {
        format!(
            "Aggression = {:.0}%, Minimum move = {:.2}, Number of points to confirm = {}\n",
            self.aggression * 100.0,
            self.min_move,
            self.num_to_confirm
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vetoes_first_switch_then_confirms() {
        let mut algo = ResistSwitchAlgorithm::new();
        algo.set_num_to_confirm(2);
        // Disable the excursion override so the small samples below must
        // go through the consistent-count confirmation path.
        algo.set_fast_switch_enabled(false);

        assert_eq!(algo.result(0.3), 0.0); // first sample of a new sign: count 1, vetoed
        assert!(algo.result(0.3) > 0.0); // second consistent sample: confirmed

        // Now flip sign: vetoed again until re-confirmed.
        assert_eq!(algo.result(-0.3), 0.0);
        assert!(algo.result(-0.3) < 0.0);
    }

    #[test]
    fn large_excursion_switches_side_immediately() {
        let mut algo = ResistSwitchAlgorithm::new();
        algo.set_num_to_confirm(5);

        assert_eq!(algo.result(0.3), 0.0); // establish a positive side, not yet confirmed

        // A large excursion in the opposite direction (> 3*minMove) should
        // switch immediately rather than wait for 5 consistent samples.
        let result = algo.result(-1.0);
        assert!(result < 0.0, "expected an immediate switch, got {result}");
    }

    #[test]
    fn small_opposite_sample_is_still_vetoed_without_confirmation() {
        let mut algo = ResistSwitchAlgorithm::new();
        algo.set_num_to_confirm(5);

        assert_eq!(algo.result(0.3), 0.0);
        // Opposite sign but below the excursion threshold: must still wait.
        assert_eq!(algo.result(-0.3), 0.0);
    }

    #[test]
    fn below_min_move_always_vetoed() {
        let mut algo = ResistSwitchAlgorithm::new();
        assert_eq!(algo.result(0.01), 0.0);
    }
}
