use thiserror::Error;

use fidtrack_core::pose::PoseError;
use fidtrack_core::{CameraError, ImageError, LutError, Real};

/// Rejected tracker configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("border fraction {0} must lie in [0, 0.5)")]
    BadBorderFraction(Real),
    #[error("minimum confidence {0} must lie in [0, 1]")]
    BadMinConfidence(Real),
    #[error("marker width {0} must be positive and finite")]
    BadMarkerWidth(Real),
    #[error("pattern table needs at least one slot")]
    NoPatternSlots,
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Lut(#[from] LutError),
}

/// Per-frame tracking failure.
#[derive(Debug, Error, PartialEq)]
pub enum TrackError {
    /// [`calc`](crate::TrackingEngine::calc) was called before
    /// [`set_camera`](crate::TrackingEngine::set_camera).
    #[error("no camera calibration set")]
    NotInitialized,
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("marker {0} is not visible in the current frame")]
    MarkerNotVisible(u32),
    /// An explicitly requested pose could not be solved.
    #[error(transparent)]
    Pose(#[from] PoseError),
}
