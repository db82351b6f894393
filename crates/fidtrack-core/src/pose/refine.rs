//! Damped Gauss-Newton reprojection refinement.

use nalgebra::{Isometry3, Point2, Point3, SMatrix, SVector, UnitQuaternion, Vector2, Vector3};

use crate::camera::Intrinsics;
use crate::Real;

use super::PoseError;

/// Iteration controls for [`refine_pose`].
#[derive(Clone, Copy, Debug)]
pub struct RefineOptions {
    pub max_iters: usize,
    /// Stop when the update norm drops below this.
    pub min_step: Real,
    /// Additive diagonal damping of the normal equations.
    pub damping: Real,
    /// Stop early once the RMS residual is below this; zero runs to
    /// convergence.
    pub fit_tolerance: Real,
    /// Fraction of each Gauss-Newton update actually applied. Below one
    /// the solver underrelaxes, trading convergence speed for smoothness.
    pub step_scale: Real,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            max_iters: 10,
            min_step: 1e-10,
            damping: 1e-9,
            fit_tolerance: 0.0,
            step_scale: 1.0,
        }
    }
}

impl RefineOptions {
    /// Preset for continuation tracking: few, underrelaxed iterations
    /// with a loose fit target. Warm-started from the previous pose this
    /// behaves like a light temporal filter on the estimate.
    pub fn continuation() -> Self {
        Self {
            max_iters: 5,
            fit_tolerance: 1.0,
            step_scale: 0.5,
            ..Self::default()
        }
    }
}

/// Minimize the pixel reprojection error of `object` against `image`
/// over the se(3) left perturbation of `init`. Returns the refined pose,
/// its final RMS residual and the iterations spent.
pub(super) fn refine_pose(
    init: &Isometry3<Real>,
    object: &[Point3<Real>],
    image: &[Point2<Real>],
    intrinsics: &Intrinsics,
    opts: &RefineOptions,
) -> Result<(Isometry3<Real>, Real, usize), PoseError> {
    if object.len() < 4 || object.len() != image.len() {
        return Err(PoseError::Degenerate);
    }
    let (fx, fy) = (intrinsics.fx, intrinsics.fy);
    let mut pose = *init;
    let mut iterations = 0;

    for _ in 0..opts.max_iters {
        let mut jtj = SMatrix::<Real, 6, 6>::zeros();
        let mut jtr = SVector::<Real, 6>::zeros();
        let mut sum2 = 0.0;
        let mut behind = false;
        for (p, obs) in object.iter().zip(image.iter()) {
            let pc = pose.transform_point(p);
            if pc.z < 1e-9 {
                behind = true;
                break;
            }
            let (x, y, z) = (pc.x, pc.y, pc.z);
            let z2 = z * z;
            let r = Vector2::new(
                fx * x / z + intrinsics.cx - obs.x,
                fy * y / z + intrinsics.cy - obs.y,
            );
            sum2 += r.norm_squared();
            // d(pixel)/d(dt, dw) for the left perturbation exp(d) * pose
            let j = SMatrix::<Real, 2, 6>::new(
                fx / z, 0.0, -fx * x / z2, -fx * x * y / z2, fx * (1.0 + x * x / z2), -fx * y / z,
                0.0, fy / z, -fy * y / z2, -fy * (1.0 + y * y / z2), fy * x * y / z2, fy * x / z,
            );
            jtj += j.transpose() * j;
            jtr += j.transpose() * r;
        }
        if behind {
            break;
        }
        let rms = (sum2 / object.len() as Real).sqrt();

        for d in 0..6 {
            jtj[(d, d)] += opts.damping;
        }
        let delta = jtj
            .cholesky()
            .map(|ch| ch.solve(&-jtr))
            .ok_or(PoseError::SolveFailed)?;
        if !delta.iter().all(|v| v.is_finite()) {
            return Err(PoseError::SolveFailed);
        }
        let delta = delta * opts.step_scale;
        let dt = Vector3::new(delta[0], delta[1], delta[2]);
        let dw = Vector3::new(delta[3], delta[4], delta[5]);
        let dq = UnitQuaternion::from_scaled_axis(dw);
        pose = Isometry3::from_parts(
            (dq * pose.translation.vector + dt).into(),
            dq * pose.rotation,
        );
        iterations += 1;

        if delta.norm() < opts.min_step {
            break;
        }
        if opts.fit_tolerance > 0.0 && rms < opts.fit_tolerance {
            break;
        }
    }

    let rms = rms_residual(&pose, object, image, intrinsics)?;
    Ok((pose, rms, iterations))
}

fn rms_residual(
    pose: &Isometry3<Real>,
    object: &[Point3<Real>],
    image: &[Point2<Real>],
    intrinsics: &Intrinsics,
) -> Result<Real, PoseError> {
    let mut sum2 = 0.0;
    for (p, obs) in object.iter().zip(image.iter()) {
        let pc = pose.transform_point(p);
        if pc.z < 1e-9 {
            return Err(PoseError::SolveFailed);
        }
        let du = intrinsics.fx * pc.x / pc.z + intrinsics.cx - obs.x;
        let dv = intrinsics.fy * pc.y / pc.z + intrinsics.cy - obs.y;
        sum2 += du * du + dv * dv;
    }
    let rms = (sum2 / object.len() as Real).sqrt();
    if !rms.is_finite() {
        return Err(PoseError::SolveFailed);
    }
    Ok(rms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            fx: 640.0,
            fy: 640.0,
            cx: 320.0,
            cy: 240.0,
        }
    }

    fn facing() -> UnitQuaternion<Real> {
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI as Real)
    }

    fn square(width: Real) -> [Point3<Real>; 4] {
        let h = width / 2.0;
        [
            Point3::new(-h, h, 0.0),
            Point3::new(h, h, 0.0),
            Point3::new(h, -h, 0.0),
            Point3::new(-h, -h, 0.0),
        ]
    }

    fn project(pose: &Isometry3<Real>, object: &[Point3<Real>]) -> Vec<Point2<Real>> {
        let intr = intrinsics();
        object
            .iter()
            .map(|p| {
                let pc = pose.transform_point(p);
                Point2::new(
                    intr.fx * pc.x / pc.z + intr.cx,
                    intr.fy * pc.y / pc.z + intr.cy,
                )
            })
            .collect()
    }

    #[test]
    fn converges_from_a_perturbed_start() {
        let gt = Isometry3::from_parts(Vector3::new(12.0, 7.0, 420.0).into(), facing());
        let object = square(80.0);
        let image = project(&gt, &object);
        let start = Isometry3::from_parts(
            Vector3::new(18.0, -2.0, 390.0).into(),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.08) * facing(),
        );
        let (pose, rms, iters) = refine_pose(
            &start,
            &object,
            &image,
            &intrinsics(),
            &RefineOptions::default(),
        )
        .unwrap();
        assert!(rms < 1e-6, "rms {rms}");
        assert!(iters <= 10);
        assert!((pose.translation.vector - gt.translation.vector).norm() < 1e-3);
        assert!(pose.rotation.angle_to(&gt.rotation) < 1e-5);
    }

    #[test]
    fn underrelaxed_step_moves_partway() {
        let gt = Isometry3::from_parts(Vector3::new(0.0, 0.0, 400.0).into(), facing());
        let object = square(80.0);
        let image = project(&gt, &object);
        let start = Isometry3::from_parts(Vector3::new(8.0, 0.0, 400.0).into(), facing());
        let opts = RefineOptions {
            max_iters: 1,
            step_scale: 0.5,
            ..RefineOptions::default()
        };
        let (pose, _, iters) = refine_pose(&start, &object, &image, &intrinsics(), &opts).unwrap();
        assert_eq!(iters, 1);
        let moved = start.translation.vector.x - pose.translation.vector.x;
        // roughly half of the 8 unit offset
        assert!(moved > 3.0 && moved < 5.0, "moved {moved}");
    }

    #[test]
    fn mismatched_inputs_are_degenerate() {
        let object = square(80.0);
        let err = refine_pose(
            &Isometry3::identity(),
            &object,
            &[Point2::new(0.0, 0.0)],
            &intrinsics(),
            &RefineOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, PoseError::Degenerate);
    }

    #[test]
    fn points_behind_the_camera_fail() {
        let object = square(80.0);
        let behind = Isometry3::from_parts(Vector3::new(0.0, 0.0, -200.0).into(), facing());
        let image = vec![Point2::new(0.0, 0.0); 4];
        let err = refine_pose(
            &behind,
            &object,
            &image,
            &intrinsics(),
            &RefineOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, PoseError::SolveFailed);
    }
}
