use std::collections::HashMap;

use log::debug;
use nalgebra::{Isometry3, Matrix4, Point2};
use serde::{Deserialize, Serialize};

use fidtrack_core::bitcode::{decode_cells, BITCODE_CELLS, BITCODE_GRID};
use fidtrack_core::pose::{estimate, estimate_continued, PoseError, PoseEstimate, PoseMode};
use fidtrack_core::{
    adapted_threshold, binarize, find_components, retry_schedule, sample_patch, Camera, HullMode,
    ImageProcMode, ImageView, MarkerCandidate, PatternStore, PatternStoreError, PixelFormat,
    PointCorrector, QuadScan, Real, UndistortLut, UndistortMode, VignettingParams,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::config::{MarkerMode, TrackerOptions};
use crate::error::{ConfigError, TrackError};

/// One identified marker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarkerInfo {
    /// Pattern slot or decoded binary id.
    pub id: u32,
    /// Match confidence in [0, 1].
    pub confidence: Real,
    /// Quarter turns clockwise from the registered orientation to the
    /// observed one.
    pub rotation: u8,
    /// Ideal image corners, marker top-left first, clockwise on screen.
    pub corners: [Point2<Real>; 4],
    /// Intersection of the corner diagonals.
    pub center: Point2<Real>,
    /// Enclosed area in full-resolution pixels.
    pub area: Real,
    /// Camera-from-marker transform. Solved for the best marker, or for
    /// every marker with
    /// [`per_marker_matrices`](TrackerOptions::per_marker_matrices).
    pub pose: Option<PoseEstimate>,
    /// OpenGL model-view form of `pose`.
    pub model_view: Option<Matrix4<Real>>,
}

/// Everything one [`TrackingEngine::calc`] call produced.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameResult {
    /// Identified markers, best first: highest confidence, ties going
    /// to the larger enclosed area.
    pub markers: Vec<MarkerInfo>,
    /// Quad candidates that survived the geometry gates.
    pub candidates: usize,
    /// Threshold the accepted scan used.
    pub threshold: u8,
}

impl FrameResult {
    pub fn best(&self) -> Option<&MarkerInfo> {
        self.markers.first()
    }
}

/// Pose carried over from an earlier frame for warm starts.
struct RetainedPose {
    pose: Isometry3<Real>,
    rotation: u8,
    /// Consecutive frames the marker has gone unseen.
    missed: u32,
}

struct Identified {
    info: MarkerInfo,
    /// Luma extremes of the sampled patch, feeds threshold adaptation.
    luma_range: (u8, u8),
}

struct Scan {
    candidates: usize,
    markers: Vec<Identified>,
}

/// Frame-to-markers pipeline with all per-session state: calibration,
/// registered patterns, the adaptive threshold and retained poses.
///
/// [`SingleMarkerTracker`](crate::SingleMarkerTracker) and
/// [`MultiMarkerTracker`](crate::MultiMarkerTracker) wrap this with a
/// narrower surface; use the engine directly when you want raw
/// per-frame results.
pub struct TrackingEngine {
    options: TrackerOptions,
    camera: Option<Camera>,
    store: PatternStore,
    lut: Option<UndistortLut>,
    /// Current threshold; tracks `options.threshold` until adaptation
    /// moves it.
    threshold: u8,
    previous: HashMap<u32, RetainedPose>,
    result: FrameResult,
}

impl TrackingEngine {
    pub fn new(options: TrackerOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            camera: None,
            store: PatternStore::with_capacity(options.max_patterns),
            lut: None,
            threshold: options.threshold,
            previous: HashMap::new(),
            result: FrameResult::default(),
            options,
        })
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    /// Install the calibration frames will be interpreted with. Drops
    /// every retained pose and, in LUT mode, rebuilds the grid.
    pub fn set_camera(&mut self, camera: Camera) -> Result<(), ConfigError> {
        camera.validate()?;
        self.lut = match self.options.undistort {
            UndistortMode::Lut => Some(UndistortLut::build(&camera, self.options.lut_step)?),
            _ => None,
        };
        self.previous.clear();
        self.camera = Some(camera);
        Ok(())
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    /// OpenGL projection for the current calibration.
    pub fn projection_matrix(&self) -> Option<Matrix4<Real>> {
        self.camera.as_ref().map(Camera::projection_matrix)
    }

    /// Result of the most recent [`calc`](Self::calc).
    pub fn result(&self) -> &FrameResult {
        &self.result
    }

    /// Register a template pattern; returns the id matches will carry.
    pub fn add_pattern(&mut self, data: &[u8], side: usize) -> Result<u32, PatternStoreError> {
        self.store.add(data, side)
    }

    /// Release a pattern slot and the pose retained under its id.
    pub fn free_pattern(&mut self, id: u32) -> Result<(), PatternStoreError> {
        self.store.free(id)?;
        self.previous.remove(&id);
        Ok(())
    }

    pub fn pattern_count(&self) -> usize {
        self.store.len()
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Set the binarization threshold and make it the new baseline for
    /// adaptation.
    pub fn set_threshold(&mut self, threshold: u8) {
        self.options.threshold = threshold;
        self.threshold = threshold;
    }

    pub fn set_auto_threshold(&mut self, enabled: bool) {
        self.options.auto_threshold = enabled;
    }

    pub fn set_threshold_retries(&mut self, retries: u32) {
        self.options.threshold_retries = retries;
    }

    pub fn set_marker_mode(&mut self, mode: MarkerMode) {
        self.options.marker_mode = mode;
    }

    pub fn set_pixel_format(&mut self, format: PixelFormat) {
        self.options.pixel_format = format;
    }

    pub fn set_image_proc_mode(&mut self, mode: ImageProcMode) {
        self.options.image_proc = mode;
    }

    pub fn set_pose_mode(&mut self, mode: PoseMode) {
        self.options.pose = mode;
    }

    pub fn set_hull_mode(&mut self, mode: HullMode) {
        self.options.quad.hull = mode;
    }

    pub fn set_vignetting(&mut self, vignetting: VignettingParams) {
        self.options.vignetting = vignetting;
    }

    /// Switch the lens-correction strategy, building or dropping the
    /// LUT as needed.
    pub fn set_undistort_mode(&mut self, mode: UndistortMode) -> Result<(), ConfigError> {
        self.lut = match (mode, self.camera.as_ref()) {
            (UndistortMode::Lut, Some(camera)) => {
                Some(UndistortLut::build(camera, self.options.lut_step)?)
            }
            _ => None,
        };
        self.options.undistort = mode;
        Ok(())
    }

    pub fn set_border_fraction(&mut self, fraction: Real) -> Result<(), ConfigError> {
        if !(0.0..0.5).contains(&fraction) {
            return Err(ConfigError::BadBorderFraction(fraction));
        }
        self.options.border_fraction = fraction;
        Ok(())
    }

    pub fn set_min_confidence(&mut self, confidence: Real) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ConfigError::BadMinConfidence(confidence));
        }
        self.options.min_confidence = confidence;
        Ok(())
    }

    pub fn set_marker_width(&mut self, width: Real) -> Result<(), ConfigError> {
        if !width.is_finite() || width <= 0.0 {
            return Err(ConfigError::BadMarkerWidth(width));
        }
        self.options.marker_width = width;
        Ok(())
    }

    /// Override the physical width for one marker id.
    pub fn set_marker_width_for(&mut self, id: u32, width: Real) -> Result<(), ConfigError> {
        if !width.is_finite() || width <= 0.0 {
            return Err(ConfigError::BadMarkerWidth(width));
        }
        self.options.marker_widths.insert(id, width);
        Ok(())
    }

    pub fn set_marker_center(&mut self, center: [Real; 2]) {
        self.options.marker_center = center;
    }

    /// Run the full pipeline on one frame. `data` is a packed pixel
    /// buffer in the configured format, sized to the camera frame.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, data), fields(threshold = self.threshold))
    )]
    pub fn calc(&mut self, data: &[u8]) -> Result<&FrameResult, TrackError> {
        let camera = self.camera.ok_or(TrackError::NotInitialized)?;
        let frame = ImageView::new(
            data,
            camera.width as usize,
            camera.height as usize,
            self.options.pixel_format,
        )?;

        let mut threshold = self.threshold;
        let mut scan = self.scan(&frame, Some(&camera), threshold);
        if scan.markers.is_empty() && self.options.auto_threshold {
            for retry in retry_schedule(self.options.threshold_retries) {
                let outcome = self.scan(&frame, Some(&camera), retry);
                if !outcome.markers.is_empty() {
                    debug!(
                        "threshold retry {retry} found {} markers",
                        outcome.markers.len()
                    );
                    threshold = retry;
                    scan = outcome;
                    break;
                }
            }
        }
        if self.options.auto_threshold {
            if let Some(best) = scan.markers.first() {
                let (lo, hi) = best.luma_range;
                self.threshold = adapted_threshold(threshold, lo, hi);
            }
        }

        let Scan {
            candidates,
            markers,
        } = scan;
        let mut markers: Vec<MarkerInfo> = markers.into_iter().map(|m| m.info).collect();
        self.solve_poses(&mut markers, &camera);
        self.retain_poses(&markers);

        self.result = FrameResult {
            markers,
            candidates,
            threshold,
        };
        Ok(&self.result)
    }

    /// Identify markers without touching tracker state: no poses, no
    /// threshold adaptation, no retained transforms. Works without a
    /// camera, in which case lens correction is skipped.
    pub fn detect_only(&self, frame: &ImageView<'_>) -> FrameResult {
        let scan = self.scan(frame, self.camera.as_ref(), self.threshold);
        FrameResult {
            markers: scan.markers.into_iter().map(|m| m.info).collect(),
            candidates: scan.candidates,
            threshold: self.threshold,
        }
    }

    fn scan(&self, frame: &ImageView<'_>, camera: Option<&Camera>, threshold: u8) -> Scan {
        let bin = binarize(frame, threshold, self.options.image_proc);
        let components = find_components(&bin, labeling_floor(self.options.quad.min_area, bin.scale));
        let corrector = PointCorrector::new(self.options.undistort, camera, self.lut.as_ref());
        let mut scan = Scan {
            candidates: 0,
            markers: Vec::new(),
        };
        for cand in QuadScan::new(&bin, corrector, self.options.quad, components) {
            scan.candidates += 1;
            if let Some(found) = self.identify(frame, &corrector, &cand) {
                scan.markers.push(found);
            }
        }
        scan.markers.sort_by(|a, b| {
            b.info
                .confidence
                .partial_cmp(&a.info.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.info
                        .area
                        .partial_cmp(&a.info.area)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        scan
    }

    fn identify(
        &self,
        frame: &ImageView<'_>,
        corrector: &PointCorrector<'_>,
        cand: &MarkerCandidate,
    ) -> Option<Identified> {
        // Start the patch at the traced corner so the rotation index
        // stays put for a marker at rest.
        let ordered = rotated_corners(&cand.corners, cand.dir_hint);
        let patch = sample_patch(
            frame,
            &ordered,
            self.options.border_fraction,
            corrector,
            &self.options.vignetting,
        )?;
        let matched = match self.options.marker_mode {
            MarkerMode::Template => self.store.match_grid(&patch.reduce()),
            MarkerMode::BinaryId { threshold } => {
                let cells: [u8; BITCODE_CELLS] = patch.cell_means(BITCODE_GRID).try_into().ok()?;
                decode_cells(&cells, threshold)
            }
        }?;
        if matched.confidence < self.options.min_confidence {
            return None;
        }
        let mut corners = ordered;
        corners.rotate_left(matched.rotation as usize);
        Some(Identified {
            info: MarkerInfo {
                id: matched.id,
                confidence: matched.confidence,
                rotation: matched.rotation,
                corners,
                center: cand.center,
                area: cand.area,
                pose: None,
                model_view: None,
            },
            luma_range: patch.min_max(),
        })
    }

    /// Solve the pose of one marker from the current result, for callers
    /// that picked a marker other than the best-ranked one. Reuses an
    /// already solved pose; a fresh solve also updates the retained pose.
    pub(crate) fn solve_pose_for(&mut self, id: u32) -> Result<PoseEstimate, TrackError> {
        let camera = self.camera.ok_or(TrackError::NotInitialized)?;
        let index = self
            .result
            .markers
            .iter()
            .position(|m| m.id == id)
            .ok_or(TrackError::MarkerNotVisible(id))?;
        if let Some(pose) = self.result.markers[index].pose {
            return Ok(pose);
        }

        let marker = self.result.markers[index].clone();
        let width = self
            .options
            .marker_widths
            .get(&id)
            .copied()
            .unwrap_or(self.options.marker_width);
        let center = Point2::new(self.options.marker_center[0], self.options.marker_center[1]);
        let pose = match self.options.pose {
            PoseMode::Continuation => self.continued_or_direct(&marker, width, center, &camera)?,
            mode => estimate(&marker.corners, width, center, &camera.intrinsics, mode)?,
        };

        let marker = &mut self.result.markers[index];
        marker.model_view = Some(pose.model_view_matrix());
        marker.pose = Some(pose);
        self.previous.insert(
            id,
            RetainedPose {
                pose: pose.pose,
                rotation: marker.rotation,
                missed: 0,
            },
        );
        Ok(pose)
    }

    fn solve_poses(&self, markers: &mut [MarkerInfo], camera: &Camera) {
        for (rank, marker) in markers.iter_mut().enumerate() {
            if rank > 0 && !self.options.per_marker_matrices {
                break;
            }
            let width = self
                .options
                .marker_widths
                .get(&marker.id)
                .copied()
                .unwrap_or(self.options.marker_width);
            let center = Point2::new(self.options.marker_center[0], self.options.marker_center[1]);
            let solved = match self.options.pose {
                PoseMode::Continuation => self.continued_or_direct(marker, width, center, camera),
                mode => estimate(&marker.corners, width, center, &camera.intrinsics, mode),
            };
            match solved {
                Ok(pose) => {
                    marker.model_view = Some(pose.model_view_matrix());
                    marker.pose = Some(pose);
                }
                Err(err) => debug!("pose for marker {} failed: {err}", marker.id),
            }
        }
    }

    /// Warm-started refinement when the marker was recently seen with
    /// the same rotation index; anything else, or a diverged refit,
    /// falls back to a direct solve.
    fn continued_or_direct(
        &self,
        marker: &MarkerInfo,
        width: Real,
        center: Point2<Real>,
        camera: &Camera,
    ) -> Result<PoseEstimate, PoseError> {
        let warm = self.previous.get(&marker.id).filter(|prev| {
            prev.rotation == marker.rotation && prev.missed <= self.options.max_missed_frames
        });
        if let Some(prev) = warm {
            match estimate_continued(
                &marker.corners,
                width,
                center,
                &camera.intrinsics,
                &prev.pose,
                self.options.max_continuation_error,
            ) {
                Ok(pose) => return Ok(pose),
                Err(err) => debug!("continued pose for marker {} rejected: {err}", marker.id),
            }
        }
        estimate(
            &marker.corners,
            width,
            center,
            &camera.intrinsics,
            PoseMode::Direct,
        )
    }

    fn retain_poses(&mut self, markers: &[MarkerInfo]) {
        for slot in self.previous.values_mut() {
            slot.missed += 1;
        }
        // Reverse order so the best of duplicate ids wins.
        for marker in markers.iter().rev() {
            if let Some(pose) = &marker.pose {
                self.previous.insert(
                    marker.id,
                    RetainedPose {
                        pose: pose.pose,
                        rotation: marker.rotation,
                        missed: 0,
                    },
                );
            }
        }
        let bound = self.options.max_missed_frames;
        self.previous.retain(|_, slot| slot.missed <= bound);
    }
}

fn rotated_corners(corners: &[Point2<Real>; 4], start: usize) -> [Point2<Real>; 4] {
    std::array::from_fn(|i| corners[(start + i) % 4])
}

/// A dark border ring covers at least about a quarter of its quad's
/// area, so smaller components cannot become a quad of `min_area` and
/// are skipped before tracing.
fn labeling_floor(min_area: Real, scale: usize) -> u32 {
    (min_area * 0.25 / (scale * scale) as Real).max(1.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerOptions;

    #[test]
    fn rotated_corners_shift_start() {
        let corners = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let shifted = rotated_corners(&corners, 3);
        assert_eq!(shifted[0], corners[3]);
        assert_eq!(shifted[1], corners[0]);
        assert_eq!(shifted[3], corners[2]);
    }

    #[test]
    fn labeling_floor_scales_down() {
        assert_eq!(labeling_floor(70.0, 1), 17);
        assert_eq!(labeling_floor(70.0, 2), 4);
        assert_eq!(labeling_floor(4.0, 2), 1);
    }

    #[test]
    fn calc_without_camera_is_an_error() {
        let mut engine = TrackingEngine::new(TrackerOptions::default()).unwrap();
        assert!(matches!(
            engine.calc(&[0u8; 16]),
            Err(TrackError::NotInitialized)
        ));
    }

    #[test]
    fn bad_options_are_rejected() {
        let opts = TrackerOptions {
            max_patterns: 0,
            ..TrackerOptions::default()
        };
        assert!(TrackingEngine::new(opts).is_err());
    }
}
