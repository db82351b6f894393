//! Joint pose of a rigid multi-marker assembly.
//!
//! All visible member corners go into one least-squares solve, so the
//! assembly pose stays stable when individual markers are small, grazing
//! or partly occluded. Member transforms map marker-local coordinates
//! into the common assembly frame.

use nalgebra::{Isometry3, Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::camera::Intrinsics;
use crate::Real;

use super::planar::mirrored_init;
use super::refine::{refine_pose, RefineOptions};
use super::{estimate, marker_corners_3d, PoseError, PoseEstimate, PoseMode};

/// One marker of a rigid assembly.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AssemblyMember {
    pub id: u32,
    /// Physical marker width in assembly units.
    pub width: Real,
    /// Marker-local to assembly-frame transform.
    pub transform: Isometry3<Real>,
}

/// A rigid arrangement of markers with known relative geometry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MarkerAssembly {
    pub members: Vec<AssemblyMember>,
}

impl MarkerAssembly {
    pub fn member(&self, id: u32) -> Option<&AssemblyMember> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Corner positions of one member in the assembly frame, in the
    /// detection corner order.
    pub fn member_corners(&self, member: &AssemblyMember) -> [Point3<Real>; 4] {
        marker_corners_3d(member.width, Point2::origin())
            .map(|p| member.transform.transform_point(&p))
    }
}

/// Solve the assembly-to-camera transform from every observation whose
/// id belongs to the assembly; unknown ids are ignored. `previous` warm
/// starts the solve in continuation fashion; without it the first known
/// observation anchors a single-marker initialization.
pub fn estimate_assembly(
    observations: &[(u32, [Point2<Real>; 4])],
    assembly: &MarkerAssembly,
    intrinsics: &Intrinsics,
    previous: Option<&Isometry3<Real>>,
    mode: PoseMode,
) -> Result<PoseEstimate, PoseError> {
    let mut object: Vec<Point3<Real>> = Vec::new();
    let mut image: Vec<Point2<Real>> = Vec::new();
    let mut anchor: Option<(&AssemblyMember, &[Point2<Real>; 4])> = None;
    for (id, corners) in observations {
        let Some(member) = assembly.member(*id) else {
            continue;
        };
        object.extend(assembly.member_corners(member));
        image.extend(corners.iter().copied());
        if anchor.is_none() {
            anchor = Some((member, corners));
        }
    }
    let Some((anchor_member, anchor_corners)) = anchor else {
        return Err(PoseError::Degenerate);
    };

    let init = match previous {
        Some(p) => *p,
        None => {
            let single = estimate(
                anchor_corners,
                anchor_member.width,
                Point2::origin(),
                intrinsics,
                PoseMode::Direct,
            )?;
            single.pose * anchor_member.transform.inverse()
        }
    };
    let opts = if previous.is_some() {
        RefineOptions::continuation()
    } else {
        RefineOptions::default()
    };
    let (pose, residual, iterations) = refine_pose(&init, &object, &image, intrinsics, &opts)?;
    let mut best = PoseEstimate {
        pose,
        reproj_error: residual,
        iterations,
    };
    if mode == PoseMode::Robust && previous.is_none() {
        let mirrored = mirrored_init(&init);
        if let Ok((pose, residual, iterations)) = refine_pose(
            &mirrored,
            &object,
            &image,
            intrinsics,
            &RefineOptions::default(),
        ) {
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
