//! Tactical AI engine: grid planner, state machines, conditions and the
//! behaviors every hostile agent is assembled from.
//!
//! Nothing in here touches the ECS. The host feeds positions and time in,
//! reads velocities and hits back out.

pub mod agent;
pub mod behaviors;
pub mod conditions;
pub mod controller;
pub mod planner;
pub mod state_machine;

use bevy::math::Vec2;
use serde::Deserialize;

/// Axis-aligned rectangle in room coordinates (origin top-left, y down).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box of `size` centred on `center`.
    pub fn centered(center: Vec2, size: Vec2) -> Self {
        Self::new(
            center.x - size.x / 2.0,
            center.y - size.y / 2.0,
            size.x,
            size.y,
        )
    }

    /// Grow (or shrink, for negative `pad`) every side by `pad`.
    pub fn padded(&self, pad: f32) -> Self {
        Self::new(
            self.x - pad,
            self.y - pad,
            self.width + pad * 2.0,
            self.height + pad * 2.0,
        )
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Strict overlap test; touching edges do not count.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }
}

/// Unit vector pointing from `from` to `to`, or zero when they coincide.
pub fn direction_to(from: Vec2, to: Vec2) -> Vec2 {
    let delta = to - from;
    if delta.length_squared() <= f32::EPSILON {
        return Vec2::ZERO;
    }
    let angle = delta.y.atan2(delta.x);
    Vec2::new(angle.cos(), angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_overlap_is_strict() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.overlaps(&Rect::new(5.0, 5.0, 10.0, 10.0)));
        // Shared edge only
        assert!(!a.overlaps(&Rect::new(10.0, 0.0, 10.0, 10.0)));
        assert!(!a.overlaps(&Rect::new(20.0, 20.0, 1.0, 1.0)));
    }

    #[test]
    fn padded_rect_grows_both_sides() {
        let r = Rect::new(10.0, 10.0, 4.0, 4.0).padded(6.0);
        assert_eq!(r, Rect::new(4.0, 4.0, 16.0, 16.0));
        assert_eq!(r.center(), Vec2::new(12.0, 12.0));
    }

    #[test]
    fn direction_is_unit_or_zero() {
        let d = direction_to(Vec2::ZERO, Vec2::new(3.0, 4.0));
        assert!((d.length() - 1.0).abs() < 1e-5);
        assert_eq!(direction_to(Vec2::ONE, Vec2::ONE), Vec2::ZERO);
    }
}
