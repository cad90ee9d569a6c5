//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! A shared in-process "sky" that links the bundled camera and mount
//! simulators, so a simulated guide pulse actually displaces the star
//! the simulated camera reports, the way a real guide pulse displaces
//! the star a real camera sees. Neither simulator depends on the
//! other's crate module; both take a handle to this instead.
//!

use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic_float::AtomicF64;

/// Lock-free shared position, the same `Arc<atomic_float::AtomicF32>`
/// shape the teacher uses for its own cross-thread shared axis speeds
/// in `main.rs`, applied here to a shared star position instead.
#[derive(Clone)]
pub struct SharedStarField {
    x: Arc<AtomicF64>,
    y: Arc<AtomicF64>,
}

impl SharedStarField {
    pub fn new(x: f64, y: f64) -> SharedStarField {
        SharedStarField { x: Arc::new(AtomicF64::new(x)), y: Arc::new(AtomicF64::new(y)) }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x.load(Ordering::SeqCst), self.y.load(Ordering::SeqCst))
    }

    pub fn shift(&self, dx: f64, dy: f64) {
        self.x.fetch_add(dx, Ordering::SeqCst);
        self.y.fetch_add(dy, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_accumulates_across_clones() {
        let field = SharedStarField::new(100.0, 100.0);
        let other = field.clone();
        other.shift(5.0, -2.0);
        assert_eq!(field.position(), (105.0, 98.0));
    }
}
