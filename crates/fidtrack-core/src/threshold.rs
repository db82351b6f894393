//! Frame binarization and threshold scheduling.
//!
//! Marker borders are dark on light, so a pixel is foreground when its
//! luminance is at or below the threshold. The retry schedule spreads
//! fallback thresholds evenly over the usable range so that a handful of
//! retries covers bright and dark scenes alike.

use serde::{Deserialize, Serialize};

use crate::image::ImageView;

/// How much of the frame the binarizer reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageProcMode {
    /// Every pixel.
    #[default]
    Full,
    /// Every second pixel in both axes; candidate geometry is scaled
    /// back to full resolution afterwards.
    Half,
}

impl ImageProcMode {
    pub fn scale(self) -> usize {
        match self {
            ImageProcMode::Full => 1,
            ImageProcMode::Half => 2,
        }
    }
}

/// Packed binary mask produced by [`binarize`]; 1 marks foreground (dark).
pub struct BinaryImage {
    pub width: usize,
    pub height: usize,
    /// Factor between mask coordinates and frame coordinates.
    pub scale: usize,
    data: Vec<u8>,
}

impl BinaryImage {
    /// Build a mask from raw bytes, one byte per cell, row major.
    pub fn from_raw(width: usize, height: usize, scale: usize, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            scale,
            data,
        }
    }

    #[inline]
    pub fn is_set(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x] != 0
    }

    /// Bounds-checked lookup; coordinates outside the mask read as
    /// background.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return false;
        }
        self.is_set(x as usize, y as usize)
    }
}

/// Threshold the frame; luminance `<= threshold` becomes foreground.
pub fn binarize(frame: &ImageView<'_>, threshold: u8, mode: ImageProcMode) -> BinaryImage {
    let scale = mode.scale();
    let width = frame.width().div_ceil(scale);
    let height = frame.height().div_ceil(scale);
    let mut data = vec![0u8; width * height];
    for y in 0..height {
        let sy = y * scale;
        for x in 0..width {
            let sx = x * scale;
            data[y * width + x] = (frame.luma(sx, sy) <= threshold) as u8;
        }
    }
    BinaryImage {
        width,
        height,
        scale,
        data,
    }
}

/// Fallback thresholds for frames where the configured threshold finds
/// nothing. Van der Corput ordering keeps consecutive retries far apart,
/// so any prefix of the schedule samples the range evenly.
pub fn retry_schedule(retries: u32) -> impl Iterator<Item = u8> {
    (1..=retries).map(|k| {
        let mut v = 0.0f64;
        let mut base = 0.5f64;
        let mut n = k;
        while n > 0 {
            if n & 1 == 1 {
                v += base;
            }
            base /= 2.0;
            n >>= 1;
        }
        16 + (224.0 * v) as u8
    })
}

/// Blend the working threshold toward the midpoint of the detected
/// marker's luminance range.
pub fn adapted_threshold(previous: u8, patch_min: u8, patch_max: u8) -> u8 {
    let mid = (patch_min as u16 + patch_max as u16) / 2;
    ((previous as u16 + mid) / 2) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageView;

    #[test]
    fn binarize_marks_dark_pixels() {
        let data = [10u8, 200, 100, 101];
        let frame = ImageView::from_luma(&data, 2, 2).unwrap();
        let bin = binarize(&frame, 100, ImageProcMode::Full);
        assert!(bin.is_set(0, 0));
        assert!(!bin.is_set(1, 0));
        assert!(bin.is_set(0, 1));
        assert!(!bin.is_set(1, 1));
        assert!(!bin.get(-1, 0));
        assert!(!bin.get(0, 2));
    }

    #[test]
    fn half_mode_subsamples() {
        let mut data = vec![255u8; 5 * 5];
        data[0] = 0; // (0,0)
        data[2] = 0; // (2,0) sampled as (1,0)
        data[1] = 0; // (1,0) skipped in half mode
        let frame = ImageView::from_luma(&data, 5, 5).unwrap();
        let bin = binarize(&frame, 50, ImageProcMode::Half);
        assert_eq!(bin.width, 3);
        assert_eq!(bin.height, 3);
        assert_eq!(bin.scale, 2);
        assert!(bin.is_set(0, 0));
        assert!(bin.is_set(1, 0));
        assert!(!bin.is_set(2, 0));
    }

    #[test]
    fn retry_schedule_spreads_range() {
        let vals: Vec<u8> = retry_schedule(7).collect();
        assert_eq!(vals, vec![128, 72, 184, 44, 156, 100, 212]);
    }

    #[test]
    fn adaptation_moves_toward_patch_midpoint() {
        assert_eq!(adapted_threshold(100, 0, 200), 100);
        assert_eq!(adapted_threshold(100, 100, 240), 135);
        assert_eq!(adapted_threshold(200, 0, 40), 110);
    }
}
