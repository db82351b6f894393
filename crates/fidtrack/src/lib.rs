//! Real-time square fiducial marker tracking.
//!
//! A tracker turns raw camera frames into identified markers and their
//! camera-relative poses:
//! - binarize the frame and trace dark connected components
//! - fit quadrilaterals with subpixel line-fit corners
//! - rectify each quad's interior and identify it, either against
//!   registered template patterns or by decoding the redundant binary
//!   id code
//! - solve the camera-from-marker transform and refine it, warm-started
//!   from the previous frame when continuation is enabled
//!
//! ## Quickstart
//!
//! ```no_run
//! use fidtrack::{Camera, MarkerMode, SingleMarkerTracker, Tracker, TrackerOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = TrackerOptions {
//!     marker_mode: MarkerMode::BinaryId { threshold: 128 },
//!     ..TrackerOptions::default()
//! };
//! let mut tracker = SingleMarkerTracker::new(options)?;
//! let camera: Camera = serde_json::from_str(&std::fs::read_to_string("camera.json")?)?;
//! tracker.set_camera(camera)?;
//!
//! let frame: Vec<u8> = std::fs::read("frame.raw")?;
//! let ids = tracker.calc(&frame)?;
//! println!("visible: {ids:?}, confidence {:.2}", tracker.confidence());
//! if let Some(mv) = tracker.model_view_matrix() {
//!     // feed mv and tracker.projection_matrix() to the renderer
//!     let _ = mv;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - [`SingleMarkerTracker`]: independent markers, best match selected.
//! - [`MultiMarkerTracker`]: rigid marker assemblies, one joint pose.
//! - [`TrackingEngine`]: the underlying pipeline with raw per-frame
//!   results, for callers the trackers are too narrow for.
//! - [`render`]: printable marker art and synthetic test frames.
//! - [`fidtrack_core`] (re-exported as `fidtrack::core`): the
//!   individual pipeline stages.

pub use fidtrack_core as core;

mod config;
mod engine;
mod error;
mod multi;
pub mod render;
mod single;
mod tracker;

pub use config::{MarkerMode, TrackerOptions, DEFAULT_BIT_THRESHOLD};
pub use engine::{FrameResult, MarkerInfo, TrackingEngine};
pub use error::{ConfigError, TrackError};
pub use multi::MultiMarkerTracker;
pub use single::SingleMarkerTracker;
pub use tracker::Tracker;

pub use fidtrack_core::pose::{AssemblyMember, MarkerAssembly, PoseEstimate, PoseMode};
pub use fidtrack_core::{
    Camera, CameraError, Distortion, HullMode, ImageProcMode, ImageView, Intrinsics, PatternGrid,
    PatternStoreError, PixelFormat, QuadParams, Real, UndistortMode, VignettingParams,
};

pub use fidtrack_core::init_with_level;
#[cfg(feature = "tracing")]
pub use fidtrack_core::init_tracing;
