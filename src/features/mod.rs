//! Feature extraction from the latest reported snapshots.
//!
//! Image features are pure functions of the raster. Frame features carry
//! state: the previous absolute pose, so deltas are frame-to-frame.

pub mod frame_stats;
pub mod image_stats;

use image::GrayImage;

use crate::error::TelemetryError;
use crate::system::messages::FrameSnapshot;

pub use frame_stats::{depth_statistics, DepthStats, FrameFeatures, RelativeMotion};
pub use image_stats::{downsample_nearest, entropy_bits, ImageFeatures, DOWNSAMPLE_FACTOR};

/// Extractor owned by the collector thread.
#[derive(Debug, Default)]
pub struct FeatureExtractor {
    motion: RelativeMotion,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            motion: RelativeMotion::new(),
        }
    }

    /// Image statistics, or `MissingData` when no usable raster exists.
    pub fn image(&self, raster: Option<&GrayImage>) -> Result<ImageFeatures, TelemetryError> {
        let raster = raster.ok_or(TelemetryError::MissingData("no image raster reported"))?;
        image_stats::image_features(raster)
    }

    /// Frame features; advances the stored previous pose.
    pub fn frame(&mut self, frame: &FrameSnapshot) -> FrameFeatures {
        frame_stats::frame_features(frame, &mut self.motion)
    }
}
