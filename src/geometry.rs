//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! 2D geometry primitives shared across the guiding pipeline.
//!

use std::ops::{Add, Div, Mul, Sub};

/// A 2D floating-point vector with a validity flag.
///
/// Invalidity propagates through arithmetic: any operation involving an
/// invalid point yields an invalid point, so a chain of computations fails
/// closed instead of silently producing a bogus coordinate.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    valid: bool,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Point {
        Point { x, y, valid: true }
    }

    pub fn invalid() -> Point {
        Point { x: 0.0, y: 0.0, valid: false }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn distance(&self, other: &Point) -> f64 {
        if !self.valid || !other.valid {
            return f64::NAN;
        }
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn length(&self) -> f64 {
        if !self.valid {
            return f64::NAN;
        }
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

impl Default for Point {
    fn default() -> Point {
        Point::invalid()
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        if !self.valid || !rhs.valid {
            return Point::invalid();
        }
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        if !self.valid || !rhs.valid {
            return Point::invalid();
        }
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;
    fn mul(self, rhs: f64) -> Point {
        if !self.valid {
            return Point::invalid();
        }
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f64> for Point {
    type Output = Point;
    fn div(self, rhs: f64) -> Point {
        if !self.valid {
            return Point::invalid();
        }
        Point::new(self.x / rhs, self.y / rhs)
    }
}

/// An axis-aligned pixel rectangle (image subframe/ROI).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn pos(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width as i32 && y < self.y + self.height as i32
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width as i32 <= self.x + self.width as i32
            && other.y + other.height as i32 <= self.y + self.height as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_propagates_through_arithmetic() {
        let valid = Point::new(1.0, 2.0);
        let invalid = Point::invalid();

        assert!(!(valid + invalid).is_valid());
        assert!(!(invalid - valid).is_valid());
        assert!(!(invalid * 2.0).is_valid());
    }

    #[test]
    fn distance_between_valid_points() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn rect_contains() {
        let outer = Rect { x: 0, y: 0, width: 100, height: 100 };
        let inner = Rect { x: 10, y: 10, width: 20, height: 20 };
        assert!(outer.contains_rect(&inner));
        assert!(!inner.contains_rect(&outer));
    }
}
