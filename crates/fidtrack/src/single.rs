use nalgebra::Matrix4;

use fidtrack_core::{PatternStoreError, Real};

use crate::config::TrackerOptions;
use crate::engine::{MarkerInfo, TrackingEngine};
use crate::error::{ConfigError, TrackError};
use crate::tracker::Tracker;

/// Tracker for scenes of independent markers; the usual entry point
/// when one marker at a time drives the view.
pub struct SingleMarkerTracker {
    engine: TrackingEngine,
    /// Caller-picked marker the transform accessors report on.
    selected: Option<u32>,
}

impl SingleMarkerTracker {
    pub fn new(options: TrackerOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            engine: TrackingEngine::new(options)?,
            selected: None,
        })
    }

    /// Register a template pattern; returns the id it will match as.
    pub fn add_pattern(&mut self, data: &[u8], side: usize) -> Result<u32, PatternStoreError> {
        self.engine.add_pattern(data, side)
    }

    pub fn free_pattern(&mut self, id: u32) -> Result<(), PatternStoreError> {
        self.engine.free_pattern(id)
    }

    /// Process one frame; returns the identified ids, best first. Any
    /// earlier [`select`](Self::select) is cleared.
    pub fn calc(&mut self, data: &[u8]) -> Result<Vec<u32>, TrackError> {
        self.selected = None;
        let result = self.engine.calc(data)?;
        Ok(result.markers.iter().map(|m| m.id).collect())
    }

    /// Drive the transform accessors from this visible marker instead of
    /// the confidence-ranked best, solving its pose if the frame pass
    /// skipped it. Cleared by the next [`calc`](Self::calc).
    pub fn select(&mut self, id: u32) -> Result<(), TrackError> {
        self.engine.solve_pose_for(id)?;
        self.selected = Some(id);
        Ok(())
    }

    /// Best marker of the current frame.
    pub fn best(&self) -> Option<&MarkerInfo> {
        self.engine.result().best()
    }

    /// A specific marker of the current frame.
    pub fn marker(&self, id: u32) -> Result<&MarkerInfo, TrackError> {
        self.engine
            .result()
            .markers
            .iter()
            .find(|m| m.id == id)
            .ok_or(TrackError::MarkerNotVisible(id))
    }

    /// The selected marker, or the best one when nothing is selected.
    fn current(&self) -> Option<&MarkerInfo> {
        match self.selected {
            Some(id) => self.marker(id).ok(),
            None => self.best(),
        }
    }

    /// Confidence of the current marker, zero when nothing was found.
    pub fn confidence(&self) -> Real {
        self.current().map_or(0.0, |m| m.confidence)
    }

    /// 3x4 camera-from-marker transform of the current marker.
    pub fn transform(&self) -> Option<[[Real; 4]; 3]> {
        self.current()?.pose.as_ref().map(|p| p.to_rows())
    }

    /// Model-view matrix of the current marker.
    pub fn model_view_matrix(&self) -> Option<Matrix4<Real>> {
        self.current()?.model_view
    }

    pub fn set_marker_width(&mut self, width: Real) -> Result<(), ConfigError> {
        self.engine.set_marker_width(width)
    }

    /// Override the physical width for one marker id.
    pub fn set_marker_width_for(&mut self, id: u32, width: Real) -> Result<(), ConfigError> {
        self.engine.set_marker_width_for(id, width)
    }

    pub fn set_marker_center(&mut self, center: [Real; 2]) {
        self.engine.set_marker_center(center);
    }
}

impl Tracker for SingleMarkerTracker {
    fn engine(&self) -> &TrackingEngine {
        &self.engine
    }

    fn engine_mut(&mut self) -> &mut TrackingEngine {
        &mut self.engine
    }
}
