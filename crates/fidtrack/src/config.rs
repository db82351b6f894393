use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use fidtrack_core::pose::PoseMode;
use fidtrack_core::{
    ImageProcMode, LutError, PixelFormat, QuadParams, Real, UndistortMode, VignettingParams,
};

use crate::error::ConfigError;

/// Split between dark and light cells when decoding binary-id markers.
pub const DEFAULT_BIT_THRESHOLD: u8 = 128;

fn default_bit_threshold() -> u8 {
    DEFAULT_BIT_THRESHOLD
}

/// Identification back end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerMode {
    /// Correlate the sampled patch against registered template patterns.
    #[default]
    Template,
    /// Decode the redundant 6x6 binary id code; nothing to register.
    BinaryId {
        #[serde(default = "default_bit_threshold")]
        threshold: u8,
    },
}

/// Everything the tracker can be tuned with. Construct via
/// [`Default`] and override fields, or deserialize from a config file;
/// every field has a serde default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerOptions {
    /// Initial luma threshold; pixels at or below it count as dark.
    pub threshold: u8,
    /// Retry empty frames at alternative thresholds and adapt the
    /// threshold to the detected marker's luma range.
    pub auto_threshold: bool,
    /// Alternative thresholds tried per empty frame when
    /// `auto_threshold` is on.
    pub threshold_retries: u32,
    pub undistort: UndistortMode,
    /// Grid pitch in pixels for [`UndistortMode::Lut`].
    pub lut_step: u32,
    /// Border thickness as a fraction of the full marker side.
    pub border_fraction: Real,
    /// Matches below this confidence are dropped.
    pub min_confidence: Real,
    /// Physical marker side length, in the unit poses are reported in.
    pub marker_width: Real,
    /// Per-id overrides of `marker_width`.
    pub marker_widths: HashMap<u32, Real>,
    /// In-plane offset of the marker origin from its geometric center.
    pub marker_center: [Real; 2],
    /// Capacity of the template pattern table.
    pub max_patterns: usize,
    pub marker_mode: MarkerMode,
    pub pixel_format: PixelFormat,
    pub image_proc: ImageProcMode,
    pub quad: QuadParams,
    pub vignetting: VignettingParams,
    pub pose: PoseMode,
    /// How many consecutive frames a marker may go unseen before its
    /// retained pose is dropped.
    pub max_missed_frames: u32,
    /// Continued poses whose RMS reprojection error exceeds this many
    /// pixels are re-estimated from scratch.
    pub max_continuation_error: Real,
    /// Compute pose and model-view matrices for every identified
    /// marker instead of only the best one.
    pub per_marker_matrices: bool,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            threshold: 100,
            auto_threshold: false,
            threshold_retries: 2,
            undistort: UndistortMode::default(),
            lut_step: 1,
            border_fraction: 0.25,
            min_confidence: 0.5,
            marker_width: 80.0,
            marker_widths: HashMap::new(),
            marker_center: [0.0, 0.0],
            max_patterns: 64,
            marker_mode: MarkerMode::default(),
            pixel_format: PixelFormat::default(),
            image_proc: ImageProcMode::default(),
            quad: QuadParams::default(),
            vignetting: VignettingParams::default(),
            pose: PoseMode::default(),
            max_missed_frames: 1,
            max_continuation_error: 20.0,
            per_marker_matrices: false,
        }
    }
}

impl TrackerOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..0.5).contains(&self.border_fraction) {
            return Err(ConfigError::BadBorderFraction(self.border_fraction));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::BadMinConfidence(self.min_confidence));
        }
        if !self.marker_width.is_finite() || self.marker_width <= 0.0 {
            return Err(ConfigError::BadMarkerWidth(self.marker_width));
        }
        for &width in self.marker_widths.values() {
            if !width.is_finite() || width <= 0.0 {
                return Err(ConfigError::BadMarkerWidth(width));
            }
        }
        if self.max_patterns == 0 {
            return Err(ConfigError::NoPatternSlots);
        }
        if self.lut_step == 0 {
            return Err(LutError::BadStep.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        TrackerOptions::default().validate().unwrap();
    }

    #[test]
    fn bad_fields_are_rejected() {
        let opts = TrackerOptions {
            border_fraction: 0.5,
            ..TrackerOptions::default()
        };
        assert_eq!(
            opts.validate(),
            Err(ConfigError::BadBorderFraction(0.5))
        );

        let opts = TrackerOptions {
            min_confidence: 1.5,
            ..TrackerOptions::default()
        };
        assert_eq!(opts.validate(), Err(ConfigError::BadMinConfidence(1.5)));

        let opts = TrackerOptions {
            marker_widths: HashMap::from([(3, -1.0)]),
            ..TrackerOptions::default()
        };
        assert_eq!(opts.validate(), Err(ConfigError::BadMarkerWidth(-1.0)));

        let opts = TrackerOptions {
            max_patterns: 0,
            ..TrackerOptions::default()
        };
        assert_eq!(opts.validate(), Err(ConfigError::NoPatternSlots));
    }

    #[test]
    fn deserializes_from_partial_config() {
        let opts: TrackerOptions = serde_json::from_str(
            r#"{
                "threshold": 120,
                "marker_mode": { "binary_id": { "threshold": 90 } },
                "undistort": "off",
                "quad": { "min_area": 150.0 }
            }"#,
        )
        .unwrap();
        assert_eq!(opts.threshold, 120);
        assert_eq!(opts.marker_mode, MarkerMode::BinaryId { threshold: 90 });
        assert_eq!(opts.undistort, UndistortMode::Off);
        assert_eq!(opts.quad.min_area, 150.0);
        // untouched fields keep their defaults
        assert_eq!(opts.border_fraction, 0.25);
        opts.validate().unwrap();
    }
}
