use log::debug;
use nalgebra::{Isometry3, Matrix4, Point2};

use fidtrack_core::pose::{estimate_assembly, MarkerAssembly, PoseEstimate};
use fidtrack_core::Real;

use crate::config::TrackerOptions;
use crate::engine::TrackingEngine;
use crate::error::{ConfigError, TrackError};
use crate::tracker::Tracker;

/// Joint pose retained across frames for warm starts.
struct RetainedAssembly {
    pose: Isometry3<Real>,
    missed: u32,
}

/// Tracker for a rigid assembly of markers. Every visible member feeds
/// one joint pose, which survives partial occlusion of the set.
pub struct MultiMarkerTracker {
    engine: TrackingEngine,
    assembly: MarkerAssembly,
    previous: Option<RetainedAssembly>,
    estimate: Option<PoseEstimate>,
    visible: Vec<u32>,
}

impl MultiMarkerTracker {
    pub fn new(options: TrackerOptions, assembly: MarkerAssembly) -> Result<Self, ConfigError> {
        Ok(Self {
            engine: TrackingEngine::new(options)?,
            assembly,
            previous: None,
            estimate: None,
            visible: Vec::new(),
        })
    }

    pub fn assembly(&self) -> &MarkerAssembly {
        &self.assembly
    }

    /// Process one frame; returns how many assembly members were seen.
    pub fn calc(&mut self, data: &[u8]) -> Result<usize, TrackError> {
        self.engine.calc(data)?;
        let intrinsics = match self.engine.camera() {
            Some(camera) => camera.intrinsics,
            None => return Err(TrackError::NotInitialized),
        };
        let observations: Vec<(u32, [Point2<Real>; 4])> = self
            .engine
            .result()
            .markers
            .iter()
            .filter(|m| self.assembly.member(m.id).is_some())
            .map(|m| (m.id, m.corners))
            .collect();
        self.visible = observations.iter().map(|(id, _)| *id).collect();

        if observations.is_empty() {
            self.miss();
            return Ok(0);
        }

        let options = self.engine.options();
        let max_missed = options.max_missed_frames;
        let max_error = options.max_continuation_error;
        let mode = options.pose;
        let warm = self
            .previous
            .as_ref()
            .filter(|prev| prev.missed <= max_missed)
            .map(|prev| prev.pose);

        let solved = match warm {
            Some(pose) => {
                match estimate_assembly(&observations, &self.assembly, &intrinsics, Some(&pose), mode)
                {
                    Ok(e) if e.reproj_error <= max_error => Ok(e),
                    Ok(e) => {
                        debug!(
                            "continued assembly pose drifted to {:.3} px, re-solving",
                            e.reproj_error
                        );
                        estimate_assembly(&observations, &self.assembly, &intrinsics, None, mode)
                    }
                    Err(err) => {
                        debug!("continued assembly pose rejected: {err}");
                        estimate_assembly(&observations, &self.assembly, &intrinsics, None, mode)
                    }
                }
            }
            None => estimate_assembly(&observations, &self.assembly, &intrinsics, None, mode),
        };

        match solved {
            Ok(e) => {
                self.previous = Some(RetainedAssembly {
                    pose: e.pose,
                    missed: 0,
                });
                self.estimate = Some(e);
            }
            Err(err) => {
                debug!("assembly pose failed: {err}");
                self.miss();
            }
        }
        Ok(self.visible.len())
    }

    fn miss(&mut self) {
        self.estimate = None;
        let bound = self.engine.options().max_missed_frames;
        let keep = match &mut self.previous {
            Some(prev) => {
                prev.missed += 1;
                prev.missed <= bound
            }
            None => false,
        };
        if !keep {
            self.previous = None;
        }
    }

    /// Joint assembly pose for the current frame.
    pub fn pose(&self) -> Option<&PoseEstimate> {
        self.estimate.as_ref()
    }

    pub fn model_view_matrix(&self) -> Option<Matrix4<Real>> {
        self.estimate.as_ref().map(PoseEstimate::model_view_matrix)
    }

    /// Ids of the assembly members seen in the current frame.
    pub fn visible_members(&self) -> &[u32] {
        &self.visible
    }
}

impl Tracker for MultiMarkerTracker {
    fn engine(&self) -> &TrackingEngine {
        &self.engine
    }

    fn engine_mut(&mut self) -> &mut TrackingEngine {
        &mut self.engine
    }
}
