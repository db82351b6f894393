use nalgebra::Matrix4;

use fidtrack_core::pose::PoseMode;
use fidtrack_core::{
    Camera, HullMode, ImageProcMode, PixelFormat, Real, UndistortMode, VignettingParams,
};

use crate::config::MarkerMode;
use crate::engine::{FrameResult, TrackingEngine};
use crate::error::ConfigError;

/// Surface shared by the concrete trackers. Everything forwards to the
/// wrapped [`TrackingEngine`]; implementors only supply the accessors.
pub trait Tracker {
    fn engine(&self) -> &TrackingEngine;
    fn engine_mut(&mut self) -> &mut TrackingEngine;

    fn set_camera(&mut self, camera: Camera) -> Result<(), ConfigError> {
        self.engine_mut().set_camera(camera)
    }

    /// OpenGL projection for the current calibration.
    fn projection_matrix(&self) -> Option<Matrix4<Real>> {
        self.engine().projection_matrix()
    }

    /// Result of the most recent frame.
    fn result(&self) -> &FrameResult {
        self.engine().result()
    }

    fn threshold(&self) -> u8 {
        self.engine().threshold()
    }

    fn set_threshold(&mut self, threshold: u8) {
        self.engine_mut().set_threshold(threshold);
    }

    fn set_auto_threshold(&mut self, enabled: bool) {
        self.engine_mut().set_auto_threshold(enabled);
    }

    fn set_threshold_retries(&mut self, retries: u32) {
        self.engine_mut().set_threshold_retries(retries);
    }

    fn set_marker_mode(&mut self, mode: MarkerMode) {
        self.engine_mut().set_marker_mode(mode);
    }

    fn set_pixel_format(&mut self, format: PixelFormat) {
        self.engine_mut().set_pixel_format(format);
    }

    fn set_image_proc_mode(&mut self, mode: ImageProcMode) {
        self.engine_mut().set_image_proc_mode(mode);
    }

    fn set_pose_mode(&mut self, mode: PoseMode) {
        self.engine_mut().set_pose_mode(mode);
    }

    fn set_hull_mode(&mut self, mode: HullMode) {
        self.engine_mut().set_hull_mode(mode);
    }

    fn set_vignetting(&mut self, vignetting: VignettingParams) {
        self.engine_mut().set_vignetting(vignetting);
    }

    fn set_undistort_mode(&mut self, mode: UndistortMode) -> Result<(), ConfigError> {
        self.engine_mut().set_undistort_mode(mode)
    }

    fn set_border_fraction(&mut self, fraction: Real) -> Result<(), ConfigError> {
        self.engine_mut().set_border_fraction(fraction)
    }

    fn set_min_confidence(&mut self, confidence: Real) -> Result<(), ConfigError> {
        self.engine_mut().set_min_confidence(confidence)
    }
}
