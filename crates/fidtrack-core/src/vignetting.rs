//! Brightness falloff compensation applied while sampling.
//!
//! Lens vignetting darkens the frame toward the corners; the gain model
//! here is a small polynomial in the normalized position, controlled by
//! three percent-valued knobs. All zero means the correction is off.

use serde::{Deserialize, Serialize};

use crate::Real;

/// Falloff strengths in percent at the frame extremes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VignettingParams {
    /// Radial gain toward the corners.
    pub corners: i32,
    /// Horizontal gain toward the left and right edges.
    pub left_right: i32,
    /// Vertical gain toward the top and bottom edges.
    pub top_bottom: i32,
}

impl VignettingParams {
    pub fn is_off(&self) -> bool {
        self.corners == 0 && self.left_right == 0 && self.top_bottom == 0
    }

    /// Gain factor at pixel position `(x, y)` of a `width` x `height`
    /// frame. Unity in the frame center, never negative.
    pub fn gain(&self, x: Real, y: Real, width: usize, height: usize) -> Real {
        let nx = if width > 1 {
            2.0 * x / (width - 1) as Real - 1.0
        } else {
            0.0
        };
        let ny = if height > 1 {
            2.0 * y / (height - 1) as Real - 1.0
        } else {
            0.0
        };
        let radial = 0.5 * (nx * nx + ny * ny);
        let g = 1.0
            + self.corners as Real / 100.0 * radial
            + self.left_right as Real / 100.0 * nx * nx
            + self.top_bottom as Real / 100.0 * ny * ny;
        g.max(0.0)
    }

    /// Apply the gain to one luminance sample, clamped to u8 range.
    pub fn compensate(&self, luma: Real, x: Real, y: Real, width: usize, height: usize) -> Real {
        if self.is_off() {
            return luma;
        }
        (luma * self.gain(x, y, width, height)).clamp(0.0, 255.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_is_identity() {
        let v = VignettingParams::default();
        assert!(v.is_off());
        assert_eq!(v.compensate(117.0, 3.0, 5.0, 640, 480), 117.0);
    }

    #[test]
    fn corner_gain_peaks_at_corners() {
        let v = VignettingParams {
            corners: 40,
            ..VignettingParams::default()
        };
        let center = v.gain(319.5, 239.5, 640, 480);
        let corner = v.gain(0.0, 0.0, 640, 480);
        assert!((center - 1.0).abs() < 1e-6);
        assert!((corner - 1.4).abs() < 1e-9);
        // compensation saturates instead of overflowing
        assert_eq!(v.compensate(250.0, 0.0, 0.0, 640, 480), 255.0);
    }

    #[test]
    fn axis_gains_are_separable() {
        let v = VignettingParams {
            left_right: 20,
            top_bottom: 10,
            ..VignettingParams::default()
        };
        assert!((v.gain(0.0, 239.5, 640, 480) - 1.2).abs() < 1e-6);
        assert!((v.gain(319.5, 0.0, 640, 480) - 1.1).abs() < 1e-9);
    }
}
