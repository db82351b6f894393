//! Observed-to-ideal point correction, by model or lookup table.
//!
//! The LUT trades the fixed-point undistortion loop for one bilinear
//! interpolation in a grid of precomputed corrections, which is the
//! usual choice when every boundary pixel of every candidate goes
//! through the corrector.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::Camera;
use crate::Real;

/// Lens-correction strategy for boundary points and sampling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndistortMode {
    /// No correction at all.
    Off,
    /// Evaluate the camera model per point.
    #[default]
    Model,
    /// Interpolate in a precomputed grid.
    Lut,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LutError {
    #[error("undistortion grid step must be positive")]
    BadStep,
}

/// Precomputed undistortion samples on a regular grid over the frame.
#[derive(Debug)]
pub struct UndistortLut {
    nx: usize,
    ny: usize,
    step: Real,
    nodes: Vec<[Real; 2]>,
}

impl UndistortLut {
    /// Sample the camera's undistortion every `step` pixels. The grid
    /// extends one node past the frame edge so lookups near the border
    /// still interpolate.
    pub fn build(camera: &Camera, step: u32) -> Result<Self, LutError> {
        if step == 0 {
            return Err(LutError::BadStep);
        }
        let nx = (camera.width as usize).div_ceil(step as usize) + 1;
        let ny = (camera.height as usize).div_ceil(step as usize) + 1;
        let mut nodes = Vec::with_capacity(nx * ny);
        for gy in 0..ny {
            for gx in 0..nx {
                let p = camera.undistort(Point2::new(
                    (gx as u32 * step) as Real,
                    (gy as u32 * step) as Real,
                ));
                nodes.push([p.x, p.y]);
            }
        }
        Ok(Self {
            nx,
            ny,
            step: step as Real,
            nodes,
        })
    }

    /// Bilinear lookup; positions beyond the grid clamp to the edge.
    pub fn lookup(&self, p: Point2<Real>) -> Point2<Real> {
        let gx = (p.x / self.step).clamp(0.0, (self.nx - 1) as Real);
        let gy = (p.y / self.step).clamp(0.0, (self.ny - 1) as Real);
        let x0 = gx.floor() as usize;
        let y0 = gy.floor() as usize;
        let x1 = (x0 + 1).min(self.nx - 1);
        let y1 = (y0 + 1).min(self.ny - 1);
        let fx = gx - x0 as Real;
        let fy = gy - y0 as Real;
        let at = |ix: usize, iy: usize| self.nodes[iy * self.nx + ix];
        let (p00, p10, p01, p11) = (at(x0, y0), at(x1, y0), at(x0, y1), at(x1, y1));
        let lerp = |a: Real, b: Real, t: Real| a + (b - a) * t;
        Point2::new(
            lerp(lerp(p00[0], p10[0], fx), lerp(p01[0], p11[0], fx), fy),
            lerp(lerp(p00[1], p10[1], fx), lerp(p01[1], p11[1], fx), fy),
        )
    }
}

/// Borrowed bundle of whatever the configured undistort mode needs;
/// degrades to the identity when the camera or table is missing.
#[derive(Clone, Copy)]
pub struct PointCorrector<'a> {
    mode: UndistortMode,
    camera: Option<&'a Camera>,
    lut: Option<&'a UndistortLut>,
}

impl<'a> PointCorrector<'a> {
    pub fn new(
        mode: UndistortMode,
        camera: Option<&'a Camera>,
        lut: Option<&'a UndistortLut>,
    ) -> Self {
        Self { mode, camera, lut }
    }

    /// Correction disabled; both directions are the identity.
    pub fn disabled() -> Self {
        Self {
            mode: UndistortMode::Off,
            camera: None,
            lut: None,
        }
    }

    /// Observed pixel to ideal pixel.
    pub fn to_ideal(&self, p: Point2<Real>) -> Point2<Real> {
        match self.mode {
            UndistortMode::Off => p,
            UndistortMode::Model => self.camera.map_or(p, |c| c.undistort(p)),
            UndistortMode::Lut => self.lut.map_or(p, |l| l.lookup(p)),
        }
    }

    /// Ideal pixel back to observed pixel, through the forward model.
    pub fn to_observed(&self, p: Point2<Real>) -> Point2<Real> {
        match (self.mode, self.camera) {
            (UndistortMode::Off, _) | (_, None) => p,
            (_, Some(c)) => c.distort(p),
        }
    }
}
