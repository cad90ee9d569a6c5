//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! GaussianProcess: fits a periodic-plus-smooth Gaussian process to the
//! recent displacement history and predicts the next sample, so a
//! repeating periodic error (worm-gear error, say) is anticipated
//! instead of merely reacted to.
//!
//! The original ships this algorithm against an external GP regression
//! library; that dependency is out of scope here (see DESIGN.md), so
//! hyperparameters are instead fit with a small self-contained BFGS
//! optimizer minimizing the negative log marginal likelihood, and the
//! posterior itself uses a hand-rolled Cholesky solve. The algorithm's
//! public shape — predict the next drift, add it to the correction —
//! is unchanged.

use std::collections::VecDeque;

use crate::algorithm::{below_min_move, GuideAlgorithm};

pub const DEFAULT_MIN_MOVE: f64 = 0.2;
pub const DEFAULT_AGGRESSION: f64 = 1.0;
pub const DEFAULT_WINDOW: usize = 50;
pub const DEFAULT_REFIT_INTERVAL: usize = 10;

/// Log-space hyperparameters of the periodic-plus-smooth kernel:
/// `k(dt) = signal_var * exp(-2*sin^2(pi*dt/period)/length_scale^2)`.
#[derive(Copy, Clone, Debug)]
struct HyperParams {
    log_length_scale: f64,
    log_period: f64,
    log_noise: f64,
}

impl HyperParams {
    fn initial() -> HyperParams {
        HyperParams { log_length_scale: 0.0, log_period: (500.0f64).ln(), log_noise: (0.1f64).ln() }
    }

    fn as_vec(&self) -> [f64; 3] {
        [self.log_length_scale, self.log_period, self.log_noise]
    }

    fn from_vec(v: &[f64; 3]) -> HyperParams {
        HyperParams { log_length_scale: v[0], log_period: v[1], log_noise: v[2] }
    }

    fn kernel(&self, dt: f64) -> f64 {
        let length_scale = self.log_length_scale.exp().max(1e-3);
        let period = self.log_period.exp().max(1e-3);
        let s = (std::f64::consts::PI * dt / period).sin();
        (-2.0 * s * s / (length_scale * length_scale)).exp()
    }

    fn noise(&self) -> f64 {
        self.log_noise.exp().max(1e-6)
    }
}

/// Lower-triangular Cholesky factor of a symmetric positive-definite
/// matrix stored row-major, plus forward/backward solves against it.
struct Cholesky {
    n: usize,
    l: Vec<f64>,
}

impl Cholesky {
    fn decompose(a: &[f64], n: usize) -> Option<Cholesky> {
        let mut l = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..=i {
                let mut sum = a[i * n + j];
                for k in 0..j {
                    sum -= l[i * n + k] * l[j * n + k];
                }
                if i == j {
                    if sum <= 0.0 {
                        return None;
                    }
                    l[i * n + j] = sum.sqrt();
                } else {
                    l[i * n + j] = sum / l[j * n + j];
                }
            }
        }
        Some(Cholesky { n, l })
    }

    fn log_det(&self) -> f64 {
        (0..self.n).map(|i| self.l[i * self.n + i].ln()).sum::<f64>() * 2.0
    }

    /// Solves `L L^T x = b`.
    fn solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.n;
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = b[i];
            for k in 0..i {
                sum -= self.l[i * n + k] * y[k];
            }
            y[i] = sum / self.l[i * n + i];
        }
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = y[i];
            for k in (i + 1)..n {
                sum -= self.l[k * n + i] * x[k];
            }
            x[i] = sum / self.l[i * n + i];
        }
        x
    }
}

fn build_covariance(times: &[f64], hp: &HyperParams) -> Vec<f64> {
    let n = times.len();
    let mut k = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            let mut v = hp.kernel(times[i] - times[j]);
            if i == j {
                v += hp.noise();
            }
            k[i * n + j] = v;
        }
    }
    k
}

/// Negative log marginal likelihood of `values` given `times` under `hp`.
fn neg_log_marginal_likelihood(times: &[f64], values: &[f64], hp: &HyperParams) -> f64 {
    let n = times.len();
    let k = build_covariance(times, hp);
    match Cholesky::decompose(&k, n) {
        Some(chol) => {
            let alpha = chol.solve(values);
            let data_fit: f64 = values.iter().zip(alpha.iter()).map(|(y, a)| y * a).sum();
            0.5 * data_fit + 0.5 * chol.log_det() + 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln()
        }
        None => f64::INFINITY,
    }
}

fn gradient(times: &[f64], values: &[f64], v: &[f64; 3]) -> [f64; 3] {
    let eps = 1e-4;
    let mut grad = [0.0; 3];
    for i in 0..3 {
        let mut plus = *v;
        let mut minus = *v;
        plus[i] += eps;
        minus[i] -= eps;
        let f_plus = neg_log_marginal_likelihood(times, values, &HyperParams::from_vec(&plus));
        let f_minus = neg_log_marginal_likelihood(times, values, &HyperParams::from_vec(&minus));
        grad[i] = (f_plus - f_minus) / (2.0 * eps);
    }
    grad
}

/// A small BFGS minimizer specialized to this 3-parameter problem, with
/// backtracking line search. Runs a fixed number of iterations rather
/// than to full convergence, which is adequate for the short, frequently
/// re-fit windows guiding uses.
fn bfgs_minimize(times: &[f64], values: &[f64], start: HyperParams, iterations: u32) -> HyperParams {
    let mut x = start.as_vec();
    let mut h = [[0.0f64; 3]; 3];
    for i in 0..3 {
        h[i][i] = 1.0;
    }
    let mut f = neg_log_marginal_likelihood(times, values, &HyperParams::from_vec(&x));
    let mut g = gradient(times, values, &x);

    for _ in 0..iterations {
        let mut direction = [0.0; 3];
        for i in 0..3 {
            for j in 0..3 {
                direction[i] -= h[i][j] * g[j];
            }
        }

        let mut step = 1.0;
        let mut x_new = x;
        let mut f_new = f;
        for _ in 0..20 {
            for i in 0..3 {
                x_new[i] = x[i] + step * direction[i];
            }
            f_new = neg_log_marginal_likelihood(times, values, &HyperParams::from_vec(&x_new));
            if f_new.is_finite() && f_new <= f {
                break;
            }
            step *= 0.5;
        }

        if !f_new.is_finite() || f_new > f {
            break;
        }

        let g_new = gradient(times, values, &x_new);
        let mut s = [0.0; 3];
        let mut y = [0.0; 3];
        for i in 0..3 {
            s[i] = x_new[i] - x[i];
            y[i] = g_new[i] - g[i];
        }
        let sy: f64 = s.iter().zip(y.iter()).map(|(a, b)| a * b).sum();
        if sy.abs() > 1e-10 {
            // BFGS inverse-Hessian update (Sherman-Morrison form).
            let rho = 1.0 / sy;
            let mut hy = [0.0; 3];
            for i in 0..3 {
                for j in 0..3 {
                    hy[i] += h[i][j] * y[j];
                }
            }
            let yhy: f64 = y.iter().zip(hy.iter()).map(|(a, b)| a * b).sum();
            for i in 0..3 {
                for j in 0..3 {
                    h[i][j] += rho * rho * yhy * s[i] * s[j] - rho * (s[i] * hy[j] + hy[i] * s[j]);
                }
            }
        }

        x = x_new;
        f = f_new;
        g = g_new;
    }

    HyperParams::from_vec(&x)
}

pub struct GaussianProcessAlgorithm {
    min_move: f64,
    aggression: f64,
    window: usize,
    refit_interval: usize,
    times: VecDeque<f64>,
    values: VecDeque<f64>,
    clock: f64,
    hyperparams: HyperParams,
    samples_since_refit: usize,
}

impl GaussianProcessAlgorithm {
    pub fn new() -> GaussianProcessAlgorithm {
        GaussianProcessAlgorithm {
            min_move: DEFAULT_MIN_MOVE,
            aggression: DEFAULT_AGGRESSION,
            window: DEFAULT_WINDOW,
            refit_interval: DEFAULT_REFIT_INTERVAL,
            times: VecDeque::new(),
            values: VecDeque::new(),
            clock: 0.0,
            hyperparams: HyperParams::initial(),
            samples_since_refit: 0,
        }
    }

    fn predict_next(&self) -> f64 {
        let n = self.times.len();
        if n < 3 {
            return 0.0;
        }
        let times: Vec<f64> = self.times.iter().copied().collect();
        let values: Vec<f64> = self.values.iter().copied().collect();
        let k = build_covariance(&times, &self.hyperparams);
        let Some(chol) = Cholesky::decompose(&k, n) else { return 0.0 };
        let alpha = chol.solve(&values);

        let t_star = self.clock + 1.0;
        let k_star: Vec<f64> = times.iter().map(|&t| self.hyperparams.kernel(t_star - t)).collect();
        k_star.iter().zip(alpha.iter()).map(|(a, b)| a * b).sum()
    }
}

impl Default for GaussianProcessAlgorithm {
    fn default() -> GaussianProcessAlgorithm {
        GaussianProcessAlgorithm::new()
    }
}

impl GuideAlgorithm for GaussianProcessAlgorithm {
    fn result(&mut self, input: f64) -> f64 {
        self.times.push_back(self.clock);
        self.values.push_back(input);
        self.clock += 1.0;
        if self.times.len() > self.window {
            self.times.pop_front();
            self.values.pop_front();
        }

        self.samples_since_refit += 1;
        if self.samples_since_refit >= self.refit_interval && self.times.len() >= 8 {
            let times: Vec<f64> = self.times.iter().copied().collect();
            let values: Vec<f64> = self.values.iter().copied().collect();
            self.hyperparams = bfgs_minimize(&times, &values, self.hyperparams, 15);
            self.samples_since_refit = 0;
        }

        if below_min_move(input, self.min_move) {
            return 0.0;
        }

        let predicted = self.predict_next();
        (input + predicted) / 2.0 * self.aggression
    }

    fn reset(&mut self) {
        self.times.clear();
        self.values.clear();
        self.clock = 0.0;
        self.hyperparams = HyperParams::initial();
        self.samples_since_refit = 0;
    }

    fn min_move(&self) -> f64 {
        self.min_move
    }

    fn set_min_move_unchecked(&mut self, min_move: f64) {
        self.min_move = min_move;
    }

    fn get_settings_summary(&self) -> String {
        format!(
            "Aggression = {:.0}%, Minimum move = {:.2}, Window size = {}\n",
            self.aggression * 100.0,
            self.min_move,
            self.window
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cholesky_solves_identity_system() {
        let n = 3;
        let a = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let chol = Cholesky::decompose(&a, n).unwrap();
        let x = chol.solve(&[1.0, 2.0, 3.0]);
        assert!((x[0] - 1.0).abs() < 1e-9);
        assert!((x[1] - 2.0).abs() < 1e-9);
        assert!((x[2] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn algorithm_runs_over_periodic_signal_without_diverging() {
        let mut algo = GaussianProcessAlgorithm::new();
        for i in 0..60 {
            let input = (i as f64 * 0.3).sin() * 2.0;
            let out = algo.result(input);
            assert!(out.is_finite());
        }
    }

    #[test]
    fn reset_clears_history() {
        let mut algo = GaussianProcessAlgorithm::new();
        for i in 0..20 {
            algo.result(i as f64 * 0.1);
        }
        algo.reset();
        assert!(algo.times.is_empty());
    }
}
