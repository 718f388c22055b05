//! Pose and landmark features of the tracked frame.

use nalgebra::{UnitQuaternion, Vector3};
use tracing::debug;

use crate::error::TelemetryError;
use crate::geometry::SE3;
use crate::system::messages::{FrameSnapshot, LandmarkObservation};

/// Mean and population variance of landmark minimum distances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthStats {
    pub mean: f64,
    pub variance: f64,
}

/// Features derived from one frame snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFeatures {
    pub keypoint_count: usize,
    /// Camera position in world (translation of `T_wc`).
    pub position: Vector3<f64>,
    /// Camera orientation in world (rotation of `T_wc`).
    pub orientation: UnitQuaternion<f64>,
    /// Translation of the motion since the previous frame.
    pub relative_translation: Vector3<f64>,
    /// Rotation of the motion since the previous frame as ZYX Euler `(z, y, x)`.
    pub relative_euler_zyx: Vector3<f64>,
    /// `None` when the frame had no landmarks.
    pub depth: Option<DepthStats>,
}

/// Depth statistics over the landmarks' minimum observation distances.
///
/// An empty set has no mean, so it is reported as an error rather than a
/// zero that would be indistinguishable from a real measurement.
pub fn depth_statistics(landmarks: &[LandmarkObservation]) -> Result<DepthStats, TelemetryError> {
    if landmarks.is_empty() {
        return Err(TelemetryError::DegenerateNumeric(
            "depth statistics over zero landmarks",
        ));
    }
    let n = landmarks.len() as f64;
    let mean = landmarks.iter().map(|l| l.min_distance).sum::<f64>() / n;
    let variance = landmarks
        .iter()
        .map(|l| (l.min_distance - mean).powi(2))
        .sum::<f64>()
        / n;
    Ok(DepthStats { mean, variance })
}

/// Tracks the previous absolute pose so each frame yields a frame-to-frame delta.
#[derive(Debug, Clone, Default)]
pub struct RelativeMotion {
    previous: SE3,
}

impl RelativeMotion {
    pub fn new() -> Self {
        Self {
            previous: SE3::identity(),
        }
    }

    pub fn previous(&self) -> &SE3 {
        &self.previous
    }

    /// Motion `previous⁻¹ * current`, then remember `current`.
    pub fn advance(&mut self, current: &SE3) -> SE3 {
        let relative = current.relative_to(&self.previous);
        self.previous = *current;
        relative
    }
}

/// Derive pose and depth features and advance the relative-motion reference.
pub fn frame_features(frame: &FrameSnapshot, motion: &mut RelativeMotion) -> FrameFeatures {
    let relative = motion.advance(&frame.pose);

    let depth = match depth_statistics(&frame.landmarks) {
        Ok(stats) => Some(stats),
        Err(e) => {
            debug!("Frame depth skipped: {}", e);
            None
        }
    };

    FrameFeatures {
        keypoint_count: frame.keypoint_count,
        position: frame.pose.translation,
        orientation: frame.pose.rotation,
        relative_translation: relative.translation,
        relative_euler_zyx: relative.euler_zyx(),
        depth,
    }
}
