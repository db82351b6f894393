//! Core building blocks of the fidtrack marker-tracking pipeline.
//!
//! Everything in this crate is frame-local and stateless: thresholding,
//! contour and quad extraction, pattern sampling and matching, binary-id
//! decoding, lens correction and pose estimation. Cross-frame behaviour
//! (adaptive threshold, pose continuation, retained poses) lives in the
//! `fidtrack` crate, which drives these stages in order for every frame.

pub mod bitcode;
mod camera;
mod contour;
mod homography;
mod image;
mod logger;
mod pattern;
pub mod pose;
mod quad;
mod sample;
mod threshold;
mod undistort;
mod vignetting;

/// Scalar type used for all geometry in the pipeline.
///
/// `f64` by default; the `single-precision` feature narrows every stage to
/// `f32`.
#[cfg(not(feature = "single-precision"))]
pub type Real = f64;

/// Scalar type used for all geometry in the pipeline.
#[cfg(feature = "single-precision")]
pub type Real = f32;

pub use camera::{
    Camera, CameraError, Distortion, Intrinsics, DEFAULT_FAR_CLIP, DEFAULT_NEAR_CLIP,
};
pub use contour::{find_components, trace_boundary, Component};
pub use homography::Homography;
pub use image::{ImageError, ImageView, PixelFormat};
pub use pattern::{
    PatternGrid, PatternMatch, PatternStore, PatternStoreError, PATTERN_CELLS, PATTERN_GRID,
};
pub use quad::{HullMode, MarkerCandidate, QuadParams, QuadScan};
pub use sample::{sample_patch, Patch, PATCH_SIZE};
pub use threshold::{adapted_threshold, binarize, retry_schedule, BinaryImage, ImageProcMode};
pub use undistort::{LutError, PointCorrector, UndistortLut, UndistortMode};
pub use vignetting::VignettingParams;

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
