//! Pinhole camera model with Brown-Conrady lens distortion.
//!
//! The calibration maps between observed pixel coordinates (as read from
//! the sensor) and ideal pixel coordinates (distortion removed). Pose
//! estimation and rendering both consume the ideal frame.

use nalgebra::{Matrix3, Matrix4, Point2, Vector2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Real;

pub const DEFAULT_NEAR_CLIP: Real = 1.0;
pub const DEFAULT_FAR_CLIP: Real = 1000.0;

const UNDISTORT_MAX_ITERS: usize = 10;
const UNDISTORT_TOL: Real = 1e-8;

#[derive(Debug, Error, PartialEq)]
pub enum CameraError {
    #[error("camera frame size {0}x{1} must be nonzero")]
    BadSize(u32, u32),
    #[error("focal lengths must be positive and finite")]
    BadFocal,
    #[error("clip planes must satisfy 0 < near < far, got near={near} far={far}")]
    BadClip { near: Real, far: Real },
}

/// Focal lengths and principal point, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: Real,
    pub fy: Real,
    pub cx: Real,
    pub cy: Real,
}

impl Intrinsics {
    pub fn matrix(&self) -> Matrix3<Real> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Pixel coordinates to normalized image coordinates.
    pub fn normalize(&self, p: Point2<Real>) -> Vector2<Real> {
        Vector2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    /// Normalized image coordinates back to pixels.
    pub fn denormalize(&self, n: Vector2<Real>) -> Point2<Real> {
        Point2::new(n.x * self.fx + self.cx, n.y * self.fy + self.cy)
    }
}

/// Radial (`k1..k3`) and tangential (`p1`, `p2`) distortion coefficients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    #[serde(default)]
    pub k1: Real,
    #[serde(default)]
    pub k2: Real,
    #[serde(default)]
    pub k3: Real,
    #[serde(default)]
    pub p1: Real,
    #[serde(default)]
    pub p2: Real,
}

impl Distortion {
    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.k3 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0
    }

    /// Apply the forward model to a normalized point.
    pub fn apply(&self, n: Vector2<Real>) -> Vector2<Real> {
        let r2 = n.x * n.x + n.y * n.y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let dx = 2.0 * self.p1 * n.x * n.y + self.p2 * (r2 + 2.0 * n.x * n.x);
        let dy = self.p1 * (r2 + 2.0 * n.y * n.y) + 2.0 * self.p2 * n.x * n.y;
        Vector2::new(n.x * radial + dx, n.y * radial + dy)
    }
}

fn default_near() -> Real {
    DEFAULT_NEAR_CLIP
}

fn default_far() -> Real {
    DEFAULT_FAR_CLIP
}

/// Full calibration: intrinsics, distortion and the frame size the
/// calibration was made for.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub intrinsics: Intrinsics,
    #[serde(default)]
    pub distortion: Distortion,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_near")]
    pub near: Real,
    #[serde(default = "default_far")]
    pub far: Real,
}

impl Camera {
    pub fn validate(&self) -> Result<(), CameraError> {
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::BadSize(self.width, self.height));
        }
        let Intrinsics { fx, fy, .. } = self.intrinsics;
        if !(fx.is_finite() && fy.is_finite()) || fx <= 0.0 || fy <= 0.0 {
            return Err(CameraError::BadFocal);
        }
        if !(self.near.is_finite() && self.far.is_finite())
            || self.near <= 0.0
            || self.far <= self.near
        {
            return Err(CameraError::BadClip {
                near: self.near,
                far: self.far,
            });
        }
        Ok(())
    }

    /// Rescale the calibration to a different frame size. Distortion
    /// coefficients act on normalized coordinates and carry over as is.
    pub fn resized(&self, width: u32, height: u32) -> Result<Self, CameraError> {
        if width == 0 || height == 0 {
            return Err(CameraError::BadSize(width, height));
        }
        let sx = width as Real / self.width as Real;
        let sy = height as Real / self.height as Real;
        let mut out = *self;
        out.intrinsics.fx *= sx;
        out.intrinsics.cx *= sx;
        out.intrinsics.fy *= sy;
        out.intrinsics.cy *= sy;
        out.width = width;
        out.height = height;
        Ok(out)
    }

    /// Observed pixel to ideal pixel, inverting the distortion model by
    /// fixed-point iteration.
    pub fn undistort(&self, observed: Point2<Real>) -> Point2<Real> {
        if self.distortion.is_zero() {
            return observed;
        }
        let target = self.intrinsics.normalize(observed);
        let mut ideal = target;
        for _ in 0..UNDISTORT_MAX_ITERS {
            let bias = self.distortion.apply(ideal) - ideal;
            let next = target - bias;
            if (next - ideal).norm_squared() < UNDISTORT_TOL * UNDISTORT_TOL {
                ideal = next;
                break;
            }
            ideal = next;
        }
        self.intrinsics.denormalize(ideal)
    }

    /// Ideal pixel to observed pixel through the forward model.
    pub fn distort(&self, ideal: Point2<Real>) -> Point2<Real> {
        if self.distortion.is_zero() {
            return ideal;
        }
        let n = self.intrinsics.normalize(ideal);
        self.intrinsics.denormalize(self.distortion.apply(n))
    }

    /// OpenGL-style projection matrix for the calibrated frame.
    ///
    /// Combined with [`crate::pose::PoseEstimate::model_view_matrix`] this
    /// reproduces the pinhole projection with the GL clip conventions
    /// (camera looking down -Z, pixel origin top-left).
    pub fn projection_matrix(&self) -> Matrix4<Real> {
        let w = self.width as Real;
        let h = self.height as Real;
        let Intrinsics { fx, fy, cx, cy } = self.intrinsics;
        let (n, f) = (self.near, self.far);
        Matrix4::new(
            2.0 * fx / w, 0.0, 1.0 - 2.0 * cx / w, 0.0, //
            0.0, 2.0 * fy / h, 2.0 * cy / h - 1.0, 0.0, //
            0.0, 0.0, -(f + n) / (f - n), -2.0 * f * n / (f - n), //
            0.0, 0.0, -1.0, 0.0,
        )
    }
}
