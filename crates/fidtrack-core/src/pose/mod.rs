//! Marker pose from corner correspondences.
//!
//! Estimation is a planar homography decomposition followed by damped
//! Gauss-Newton refinement of the reprojection error. The continuation
//! entry point seeds refinement with the previous frame's pose and
//! underrelaxes the update, which keeps small-motion jitter down at the
//! price of a slight lag; it reports divergence instead of silently
//! returning a pose that no longer fits.

mod assembly;
mod planar;
mod refine;

pub use assembly::{estimate_assembly, AssemblyMember, MarkerAssembly};
pub use refine::RefineOptions;

use nalgebra::{Isometry3, Matrix4, Point2, Point3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::Intrinsics;
use crate::homography::Homography;
use crate::Real;

/// Pose estimation strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseMode {
    /// Homography initialization plus full refinement.
    #[default]
    Direct,
    /// Seed refinement with the previous frame's pose when one exists.
    Continuation,
    /// Direct, additionally trying the mirrored planar solution and
    /// keeping whichever reprojects better.
    Robust,
}

#[derive(Debug, Error, PartialEq)]
pub enum PoseError {
    #[error("corner geometry is degenerate")]
    Degenerate,
    #[error("pose refinement did not produce a finite solution")]
    SolveFailed,
    #[error("continued pose diverged: residual {residual:.3} exceeds {limit:.3}")]
    Diverged { residual: Real, limit: Real },
}

/// A solved marker-to-camera transform.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub pose: Isometry3<Real>,
    /// RMS reprojection error per corner, ideal pixels.
    pub reproj_error: Real,
    /// Refinement iterations spent.
    pub iterations: usize,
}

impl PoseEstimate {
    /// The raw 3x4 transform, camera convention (x right, y down, z
    /// forward).
    pub fn to_rows(&self) -> [[Real; 4]; 3] {
        let m = self.pose.to_homogeneous();
        std::array::from_fn(|r| std::array::from_fn(|c| m[(r, c)]))
    }

    /// Render-convention 4x4 model-view matrix; pairs with
    /// [`crate::Camera::projection_matrix`].
    pub fn model_view_matrix(&self) -> Matrix4<Real> {
        let mut m = self.pose.to_homogeneous();
        for c in 0..4 {
            m[(1, c)] = -m[(1, c)];
            m[(2, c)] = -m[(2, c)];
        }
        m
    }
}

/// Marker corners in the marker frame (z = 0, y up), ordered to match
/// the image corner order of a frontally viewed marker: top-left first,
/// then clockwise.
pub fn marker_corners_3d(width: Real, center: Point2<Real>) -> [Point3<Real>; 4] {
    let h = width / 2.0;
    [
        Point3::new(center.x - h, center.y + h, 0.0),
        Point3::new(center.x + h, center.y + h, 0.0),
        Point3::new(center.x + h, center.y - h, 0.0),
        Point3::new(center.x - h, center.y - h, 0.0),
    ]
}

fn degenerate(corners: &[Point2<Real>; 4]) -> bool {
    if corners
        .iter()
        .any(|p| !p.x.is_finite() || !p.y.is_finite())
    {
        return true;
    }
    let mut scale2: Real = 0.0;
    for i in 0..4 {
        for j in i + 1..4 {
            scale2 = scale2.max((corners[i] - corners[j]).norm_squared());
        }
    }
    if scale2 < 1.0 {
        return true;
    }
    for i in 0..4 {
        for j in i + 1..4 {
            for k in j + 1..4 {
                let ab = corners[j] - corners[i];
                let ac = corners[k] - corners[i];
                if ab.perp(&ac).abs() < 1e-3 * scale2 {
                    return true;
                }
            }
        }
    }
    false
}

/// Direct pose from one marker's corners.
///
/// `corners` are ideal image points in the order produced by detection
/// (marker top-left first, clockwise); `width` is the physical marker
/// size and `center` an optional in-plane offset of the marker origin.
pub fn estimate(
    corners: &[Point2<Real>; 4],
    width: Real,
    center: Point2<Real>,
    intrinsics: &Intrinsics,
    mode: PoseMode,
) -> Result<PoseEstimate, PoseError> {
    if degenerate(corners) {
        return Err(PoseError::Degenerate);
    }
    let object = marker_corners_3d(width, center);
    let object_xy = object.map(|p| Point2::new(p.x, p.y));
    let h = Homography::from_4pt(&object_xy, corners).ok_or(PoseError::Degenerate)?;
    let init = planar::pose_from_homography(&h, intrinsics).ok_or(PoseError::SolveFailed)?;

    let opts = RefineOptions::default();
    let (pose, residual, iterations) =
        refine::refine_pose(&init, &object, corners, intrinsics, &opts)?;
    let mut best = PoseEstimate {
        pose,
        reproj_error: residual,
        iterations,
    };
    if mode == PoseMode::Robust {
        let mirrored = planar::mirrored_init(&init);
        if let Ok((pose, residual, iterations)) =
            refine::refine_pose(&mirrored, &object, corners, intrinsics, &opts)
        {
            if residual < best.reproj_error {
                best = PoseEstimate {
                    pose,
                    reproj_error: residual,
                    iterations,
                };
            }
        }
    }
    Ok(best)
}

/// Continued pose: refine from the previous frame's transform instead of
/// a fresh homography. Fails with [`PoseError::Diverged`] when the
/// refit residual exceeds `max_residual`, in which case the caller
/// should fall back to [`estimate`].
pub fn estimate_continued(
    corners: &[Point2<Real>; 4],
    width: Real,
    center: Point2<Real>,
    intrinsics: &Intrinsics,
    previous: &Isometry3<Real>,
    max_residual: Real,
) -> Result<PoseEstimate, PoseError> {
    if degenerate(corners) {
        return Err(PoseError::Degenerate);
    }
    let object = marker_corners_3d(width, center);
    let opts = RefineOptions::continuation();
    let (pose, residual, iterations) =
        refine::refine_pose(previous, &object, corners, intrinsics, &opts)?;
    if residual > max_residual {
        return Err(PoseError::Diverged {
            residual,
            limit: max_residual,
        });
    }
    Ok(PoseEstimate {
        pose,
        reproj_error: residual,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, Distortion, Intrinsics, DEFAULT_FAR_CLIP, DEFAULT_NEAR_CLIP};
    use nalgebra::{UnitQuaternion, Vector3, Vector4};
    use std::f64::consts::PI;

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            fx: 640.0,
            fy: 640.0,
            cx: 320.0,
            cy: 240.0,
        }
    }

    /// Marker facing the camera: its +z points back at the lens.
    fn facing() -> UnitQuaternion<Real> {
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI as Real)
    }

    fn project(
        pose: &Isometry3<Real>,
        object: &[Point3<Real>; 4],
        intr: &Intrinsics,
    ) -> [Point2<Real>; 4] {
        object.map(|p| {
            let pc = pose.transform_point(&p);
            Point2::new(
                intr.fx * pc.x / pc.z + intr.cx,
                intr.fy * pc.y / pc.z + intr.cy,
            )
        })
    }

    struct Lcg(u64);

    impl Lcg {
        fn next_unit(&mut self) -> Real {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 33) as Real) / (1u64 << 31) as Real
        }

        fn noise(&mut self, amp: Real) -> Real {
            (self.next_unit() - 0.5) * 2.0 * amp
        }
    }

    #[test]
    fn direct_recovers_ground_truth() {
        let intr = intrinsics();
        let gt = Isometry3::from_parts(
            Vector3::new(14.0, -22.0, 410.0).into(),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.35) * facing(),
        );
        let object = marker_corners_3d(80.0, Point2::origin());
        let corners = project(&gt, &object, &intr);
        let est = estimate(&corners, 80.0, Point2::origin(), &intr, PoseMode::Direct).unwrap();
        assert!(est.pose.rotation.angle_to(&gt.rotation) < 1e-5);
        assert!((est.pose.translation.vector - gt.translation.vector).norm() < 1e-2);
        assert!(est.reproj_error < 1e-6);
    }

    #[test]
    fn collinear_corners_are_degenerate() {
        let intr = intrinsics();
        let corners = [
            Point2::new(100.0, 100.0),
            Point2::new(150.0, 100.0),
            Point2::new(200.0, 100.05),
            Point2::new(120.0, 180.0),
        ];
        assert_eq!(
            estimate(&corners, 80.0, Point2::origin(), &intr, PoseMode::Direct).unwrap_err(),
            PoseError::Degenerate
        );
        let tiny = [
            Point2::new(100.0, 100.0),
            Point2::new(100.3, 100.0),
            Point2::new(100.3, 100.3),
            Point2::new(100.0, 100.3),
        ];
        assert_eq!(
            estimate(&tiny, 80.0, Point2::origin(), &intr, PoseMode::Direct).unwrap_err(),
            PoseError::Degenerate
        );
    }

    #[test]
    fn continuation_converges_and_reports_divergence() {
        let intr = intrinsics();
        let gt = Isometry3::from_parts(Vector3::new(0.0, 0.0, 380.0).into(), facing());
        let object = marker_corners_3d(80.0, Point2::origin());
        let corners = project(&gt, &object, &intr);

        let cont = estimate_continued(&corners, 80.0, Point2::origin(), &intr, &gt, 20.0).unwrap();
        assert!(cont.reproj_error < 1e-6);
        assert!(cont.iterations <= 5);

        // previous pose far off to the side: five underrelaxed steps
        // cannot close a 320 px gap
        let stale = Isometry3::from_parts(Vector3::new(200.0, 0.0, 380.0).into(), facing());
        let err =
            estimate_continued(&corners, 80.0, Point2::origin(), &intr, &stale, 1.0).unwrap_err();
        assert!(matches!(err, PoseError::Diverged { .. }));
    }

    #[test]
    fn robust_mode_never_reprojects_worse() {
        let intr = intrinsics();
        let gt = Isometry3::from_parts(
            Vector3::new(-30.0, 12.0, 500.0).into(),
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.5) * facing(),
        );
        let object = marker_corners_3d(60.0, Point2::origin());
        let corners = project(&gt, &object, &intr);
        let direct =
            estimate(&corners, 60.0, Point2::origin(), &intr, PoseMode::Direct).unwrap();
        let robust =
            estimate(&corners, 60.0, Point2::origin(), &intr, PoseMode::Robust).unwrap();
        assert!(robust.reproj_error <= direct.reproj_error + 1e-9);
    }

    #[test]
    fn continuation_jitters_less_than_direct() {
        let intr = intrinsics();
        let object = marker_corners_3d(80.0, Point2::origin());
        let mut rng = Lcg(0x5eed);
        let frames: Vec<[Point2<Real>; 4]> = (0..40)
            .map(|f| {
                let gt = Isometry3::from_parts(
                    Vector3::new(10.0 + 0.2 * f as Real, -5.0, 400.0).into(),
                    facing(),
                );
                let mut corners = project(&gt, &object, &intr);
                for c in &mut corners {
                    c.x += rng.noise(0.4);
                    c.y += rng.noise(0.4);
                }
                corners
            })
            .collect();

        let direct: Vec<Vector3<Real>> = frames
            .iter()
            .map(|c| {
                estimate(c, 80.0, Point2::origin(), &intr, PoseMode::Direct)
                    .unwrap()
                    .pose
                    .translation
                    .vector
            })
            .collect();

        let mut continued = Vec::new();
        let mut prev = estimate(&frames[0], 80.0, Point2::origin(), &intr, PoseMode::Direct)
            .unwrap()
            .pose;
        continued.push(prev.translation.vector);
        for c in &frames[1..] {
            let est =
                estimate_continued(c, 80.0, Point2::origin(), &intr, &prev, 20.0).unwrap();
            prev = est.pose;
            continued.push(prev.translation.vector);
        }

        let delta_var = |ts: &[Vector3<Real>]| {
            let deltas: Vec<Vector3<Real>> = ts.windows(2).map(|w| w[1] - w[0]).collect();
            let mean: Vector3<Real> =
                deltas.iter().sum::<Vector3<Real>>() / deltas.len() as Real;
            deltas.iter().map(|d| (d - mean).norm_squared()).sum::<Real>() / deltas.len() as Real
        };
        // skip the warm-up frames of the continued sequence
        let dv = delta_var(&direct[8..]);
        let cv = delta_var(&continued[8..]);
        assert!(cv < dv, "continued {cv} vs direct {dv}");
        // the smoothing lag stays bounded
        let last_gt = Vector3::new(10.0 + 0.2 * 39.0, -5.0, 400.0);
        assert!((continued[39] - last_gt).norm() < 3.0);
    }

    #[test]
    fn model_view_pairs_with_projection() {
        let intr = intrinsics();
        let cam = Camera {
            intrinsics: intr,
            distortion: Distortion::default(),
            width: 640,
            height: 480,
            near: DEFAULT_NEAR_CLIP,
            far: DEFAULT_FAR_CLIP,
        };
        let gt = Isometry3::from_parts(
            Vector3::new(25.0, -14.0, 300.0).into(),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.4) * facing(),
        );
        let est = PoseEstimate {
            pose: gt,
            reproj_error: 0.0,
            iterations: 0,
        };
        let object = marker_corners_3d(50.0, Point2::origin());
        let pixels = project(&gt, &object, &intr);
        let pm = cam.projection_matrix() * est.model_view_matrix();
        for (p, expect) in object.iter().zip(pixels.iter()) {
            let clip = pm * Vector4::new(p.x, p.y, p.z, 1.0);
            let u = (clip.x / clip.w + 1.0) / 2.0 * cam.width as Real;
            let v = (1.0 - clip.y / clip.w) / 2.0 * cam.height as Real;
            assert!((u - expect.x).abs() < 1e-6);
            assert!((v - expect.y).abs() < 1e-6);
        }
    }
}
