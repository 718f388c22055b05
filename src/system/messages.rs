//! Measurement types reported by the pipeline stages.
//!
//! Producers (image ingestion, tracking, local mapping, loop closing) build
//! these values and hand them to a [`TelemetryReporter`](super::TelemetryReporter).
//! The collector only ever reads the latest value of each.

use std::sync::Arc;

use image::GrayImage;

use crate::geometry::SE3;

/// Latest image reported by the ingestion stage.
#[derive(Debug, Clone)]
pub struct ImageSnapshot {
    /// Capture timestamp in seconds.
    pub timestamp_s: f64,
    pub filename: String,
    /// Greyscale raster, `None` until the first image arrives.
    pub raster: Option<Arc<GrayImage>>,
    /// Number of rasters reported so far. Also the image sequence number.
    pub counter: u64,
}

/// A landmark seen by the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkObservation {
    pub id: u64,
    /// Minimum distance at which the landmark can be reliably observed
    /// (scale-invariance limit from the feature pyramid).
    pub min_distance: f64,
}

/// Latest tracked frame reported by the tracking stage.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub keypoint_count: usize,
    /// Absolute camera pose `T_wc` (camera to world).
    pub pose: SE3,
    /// Landmarks matched in this frame.
    pub landmarks: Vec<LandmarkObservation>,
    /// Image counter this frame was tracked from, when the producer knows it.
    pub image_sequence: Option<u64>,
}

impl FrameSnapshot {
    pub fn new(keypoint_count: usize, pose: SE3, landmarks: Vec<LandmarkObservation>) -> Self {
        Self {
            keypoint_count,
            pose,
            landmarks,
            image_sequence: None,
        }
    }

    /// Tag the frame with the image counter returned by
    /// `report_image_pixels`.
    pub fn with_image_sequence(mut self, sequence: u64) -> Self {
        self.image_sequence = Some(sequence);
        self
    }
}

/// How the tracker obtained the current pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMode {
    MotionModel,
    ReferenceFrame,
    Relocalization,
}

impl TrackMode {
    /// Integer code written to the log.
    pub fn code(self) -> u8 {
        match self {
            TrackMode::MotionModel => 0,
            TrackMode::ReferenceFrame => 1,
            TrackMode::Relocalization => 2,
        }
    }
}

/// Correspondence counts around pose optimization for the current frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoseOptimizationCounts {
    pub pre_outliers: usize,
    pub pre_lost_landmarks: usize,
    pub inliers: usize,
    pub post_outliers: usize,
    pub post_lost_landmarks: usize,
    pub matched_inliers: usize,
}

/// Problem size of the latest local bundle adjustment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalBaCounts {
    /// Keyframes that observe local landmarks but are held fixed.
    pub fixed_keyframes: usize,
    /// Local keyframes being optimized.
    pub optimized_keyframes: usize,
    pub landmarks: usize,
    pub edges: usize,
}

/// Running optimizer statistics from a BA stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OptimizerRuns {
    /// Number of completed optimizations.
    pub count: u64,
    /// Mean visual error of the latest optimization.
    pub mean_error: f64,
}

/// Combined bundle adjustment statistics for one row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BundleAdjustmentStats {
    pub local: LocalBaCounts,
    pub local_runs: OptimizerRuns,
    pub global_runs: OptimizerRuns,
}
