//! Perspective unwarping of a candidate quad into a fixed-size patch.
//!
//! Sampling runs through the homography from the unit square to the
//! candidate's ideal-coordinate corners, then back through the lens model
//! to read the raw frame. The border fraction cuts the marker's dark
//! frame out of the sampled area.

use nalgebra::Point2;

use crate::homography::Homography;
use crate::image::ImageView;
use crate::pattern::{PatternGrid, PATTERN_CELLS, PATTERN_GRID};
use crate::undistort::PointCorrector;
use crate::vignetting::VignettingParams;
use crate::Real;

/// Side length of the sampled patch.
pub const PATCH_SIZE: usize = 64;

/// A 64x64 grayscale unwarp of one candidate interior.
#[derive(Clone)]
pub struct Patch {
    values: [u8; PATCH_SIZE * PATCH_SIZE],
}

impl Patch {
    pub fn values(&self) -> &[u8] {
        &self.values
    }

    pub fn min_max(&self) -> (u8, u8) {
        let mut lo = u8::MAX;
        let mut hi = u8::MIN;
        for &v in &self.values {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        (lo, hi)
    }

    /// Block-average down to the matcher's grid.
    pub fn reduce(&self) -> PatternGrid {
        let block = PATCH_SIZE / PATTERN_GRID;
        let mut cells = [0u8; PATTERN_CELLS];
        for r in 0..PATTERN_GRID {
            for c in 0..PATTERN_GRID {
                let mut acc = 0u32;
                for y in r * block..(r + 1) * block {
                    for x in c * block..(c + 1) * block {
                        acc += self.values[y * PATCH_SIZE + x] as u32;
                    }
                }
                cells[r * PATTERN_GRID + c] = (acc / (block * block) as u32) as u8;
            }
        }
        PatternGrid::from_cells(cells)
    }

    /// Mean luminance per cell of an `n` x `n` grid laid over the patch.
    pub fn cell_means(&self, n: usize) -> Vec<u8> {
        debug_assert!(n > 0 && n <= PATCH_SIZE);
        let mut acc = vec![0u32; n * n];
        let mut cnt = vec![0u32; n * n];
        for y in 0..PATCH_SIZE {
            let cy = y * n / PATCH_SIZE;
            for x in 0..PATCH_SIZE {
                let cx = x * n / PATCH_SIZE;
                acc[cy * n + cx] += self.values[y * PATCH_SIZE + x] as u32;
                cnt[cy * n + cx] += 1;
            }
        }
        acc.iter()
            .zip(cnt.iter())
            .map(|(&a, &c)| (a / c.max(1)) as u8)
            .collect()
    }
}

/// Unwarp the quad interior into a patch.
///
/// `corners` are ideal image coordinates in clockwise screen order; patch
/// row zero runs from corner 0 toward corner 1. Returns `None` if the
/// corners admit no homography, the border fraction leaves no interior,
/// or any sample falls outside the frame.
pub fn sample_patch(
    frame: &ImageView<'_>,
    corners: &[Point2<Real>; 4],
    border_fraction: Real,
    corrector: &PointCorrector<'_>,
    vignetting: &VignettingParams,
) -> Option<Patch> {
    let span = 1.0 - 2.0 * border_fraction;
    if span <= 0.0 {
        return None;
    }
    let h = Homography::unit_square_to(corners)?;
    let mut values = [0u8; PATCH_SIZE * PATCH_SIZE];
    for j in 0..PATCH_SIZE {
        let v = border_fraction + span * (j as Real + 0.5) / PATCH_SIZE as Real;
        for i in 0..PATCH_SIZE {
            let u = border_fraction + span * (i as Real + 0.5) / PATCH_SIZE as Real;
            let ideal = h.apply(Point2::new(u, v));
            let observed = corrector.to_observed(ideal);
            let raw = frame.sample_bilinear(observed.x, observed.y)?;
            let lit = vignetting.compensate(raw, observed.x, observed.y, frame.width(), frame.height());
            values[j * PATCH_SIZE + i] = lit.round().clamp(0.0, 255.0) as u8;
        }
    }
    Some(Patch { values })
}
