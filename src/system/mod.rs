//! Telemetry collection and thread management.
//!
//! This module contains the shared store written by the pipeline stages,
//! the readiness flags gating collection, and the `DataCollector` that owns
//! the background collector thread.

mod collector;
pub mod messages;
pub mod readiness;
pub mod shared_state;

pub use collector::{CollectorConfig, DataCollector, PairingPolicy};
pub use messages::{
    BundleAdjustmentStats, FrameSnapshot, ImageSnapshot, LandmarkObservation, LocalBaCounts,
    OptimizerRuns, PoseOptimizationCounts, TrackMode,
};
pub use readiness::{PendingDomains, ReadinessTracker};
pub use shared_state::{NullReporter, SharedStateStore, TelemetryReporter};
