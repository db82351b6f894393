//! Plane-to-plane homography from four point correspondences.

use nalgebra::{Matrix3, Point2, SMatrix, SVector};

use crate::Real;

/// 3x3 projective map between two planes.
#[derive(Clone, Copy, Debug)]
pub struct Homography {
    m: Matrix3<Real>,
}

impl Homography {
    /// Solve the exact homography through four correspondences with the
    /// last entry pinned to one. Returns `None` when the points are
    /// degenerate (three collinear, or duplicates).
    pub fn from_4pt(src: &[Point2<Real>; 4], dst: &[Point2<Real>; 4]) -> Option<Self> {
        let mut a = SMatrix::<Real, 8, 8>::zeros();
        let mut b = SVector::<Real, 8>::zeros();
        for i in 0..4 {
            let (x, y) = (src[i].x, src[i].y);
            let (u, v) = (dst[i].x, dst[i].y);
            let r = 2 * i;
            a[(r, 0)] = x;
            a[(r, 1)] = y;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -x * u;
            a[(r, 7)] = -y * u;
            b[r] = u;
            a[(r + 1, 3)] = x;
            a[(r + 1, 4)] = y;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -x * v;
            a[(r + 1, 7)] = -y * v;
            b[r + 1] = v;
        }
        let h = a.lu().solve(&b)?;
        if !h.iter().all(|c| c.is_finite()) {
            return None;
        }
        Some(Self {
            m: Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0),
        })
    }

    /// Homography mapping the unit square `(0,0) (1,0) (1,1) (0,1)` onto
    /// the given quad, corner order preserved.
    pub fn unit_square_to(dst: &[Point2<Real>; 4]) -> Option<Self> {
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        Self::from_4pt(&src, dst)
    }

    pub fn apply(&self, p: Point2<Real>) -> Point2<Real> {
        let v = self.m * nalgebra::Vector3::new(p.x, p.y, 1.0);
        Point2::new(v.x / v.z, v.y / v.z)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.m.try_inverse().map(|m| Self { m })
    }

    pub fn matrix(&self) -> &Matrix3<Real> {
        &self.m
    }
}
