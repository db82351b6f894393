//! Homography decomposition into an initial rigid transform.

use nalgebra::{Isometry3, Matrix3, Rotation3, UnitQuaternion, Vector3};

use crate::camera::Intrinsics;
use crate::homography::Homography;
use crate::Real;

/// Decompose a plane-to-image homography into rotation and translation.
///
/// The homography maps marker-plane coordinates (z = 0) to ideal pixel
/// coordinates. Returns `None` for rank-deficient input. The result is
/// an initialization only; refinement cleans up the remaining error.
pub(super) fn pose_from_homography(
    h: &Homography,
    intrinsics: &Intrinsics,
) -> Option<Isometry3<Real>> {
    let kinv = intrinsics.matrix().try_inverse()?;
    let a = kinv * h.matrix();
    let h1 = a.column(0).into_owned();
    let h2 = a.column(1).into_owned();
    let h3 = a.column(2).into_owned();
    let l1 = h1.norm();
    let l2 = h2.norm();
    if l1 < 1e-12 || l2 < 1e-12 {
        return None;
    }
    let mut r1 = h1 / l1;
    let mut r2 = h2 / l2;
    let mut t = h3 * 2.0 / (l1 + l2);
    // the marker sits in front of the camera
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    let approx = Matrix3::from_columns(&[r1, r2, r3]);

    // nearest proper rotation in the Frobenius sense
    let svd = approx.svd(true, true);
    let mut u = svd.u?;
    let v_t = svd.v_t?;
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let rot = Rotation3::from_matrix_unchecked(u * v_t);

    if !t.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(Isometry3::from_parts(
        t.into(),
        UnitQuaternion::from_rotation_matrix(&rot),
    ))
}

/// The second solution of the planar pose ambiguity: reflect the marker
/// normal about the viewing ray and keep the translation. Far-away or
/// shallow markers make the two solutions reproject almost identically;
/// refining both and keeping the better fit resolves the flip.
pub(super) fn mirrored_init(pose: &Isometry3<Real>) -> Isometry3<Real> {
    let t = pose.translation.vector;
    if t.norm() < 1e-9 {
        return *pose;
    }
    let normal = pose.rotation * Vector3::z();
    let view = t.normalize();
    let reflected = 2.0 * normal.dot(&view) * view - normal;
    let delta = UnitQuaternion::rotation_between(&normal, &reflected)
        .unwrap_or_else(UnitQuaternion::identity);
    Isometry3::from_parts(pose.translation, delta * pose.rotation)
}
