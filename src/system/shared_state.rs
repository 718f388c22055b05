//! Shared state between the producer stages and the collector thread.
//!
//! Every reported field sits behind its own lock, so a producer only ever
//! waits on writers of the same field and never on the collector's
//! computation. Bulky values (raster, frame) are held in an `Arc`: readers
//! clone the pointer and release the lock immediately.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use image::GrayImage;
use parking_lot::Mutex;

use super::messages::{
    BundleAdjustmentStats, FrameSnapshot, ImageSnapshot, LocalBaCounts, OptimizerRuns,
    PoseOptimizationCounts, TrackMode,
};
use super::readiness::ReadinessTracker;

/// Reporting contract handed to the pipeline stages at construction.
///
/// All methods overwrite the previous value (last write wins), return
/// immediately and cannot fail.
pub trait TelemetryReporter: Send + Sync {
    fn report_image_timestamp(&self, timestamp_s: f64);
    fn report_image_filename(&self, filename: &str);
    /// Store a new raster and mark the image domain ready.
    ///
    /// Returns the image counter, which the tracker can attach to the
    /// matching [`FrameSnapshot`].
    fn report_image_pixels(&self, raster: GrayImage) -> u64;
    /// Store a new frame and mark the frame domain ready.
    fn report_frame(&self, frame: FrameSnapshot);
    fn report_track_mode(&self, mode: TrackMode);
    fn report_pre_opt_outliers(&self, n: usize);
    fn report_pre_opt_lost_landmarks(&self, n: usize);
    fn report_inliers(&self, n: usize);
    fn report_post_opt_outliers(&self, n: usize);
    fn report_post_opt_lost_landmarks(&self, n: usize);
    fn report_matched_inliers(&self, n: usize);
    fn report_local_ba(&self, counts: LocalBaCounts);
    fn report_local_ba_error(&self, mean_error: f64);
    fn report_global_ba_error(&self, mean_error: f64);
}

/// Reporter that discards everything, for pipelines running without telemetry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl TelemetryReporter for NullReporter {
    fn report_image_timestamp(&self, _timestamp_s: f64) {}
    fn report_image_filename(&self, _filename: &str) {}
    fn report_image_pixels(&self, _raster: GrayImage) -> u64 {
        0
    }
    fn report_frame(&self, _frame: FrameSnapshot) {}
    fn report_track_mode(&self, _mode: TrackMode) {}
    fn report_pre_opt_outliers(&self, _n: usize) {}
    fn report_pre_opt_lost_landmarks(&self, _n: usize) {}
    fn report_inliers(&self, _n: usize) {}
    fn report_post_opt_outliers(&self, _n: usize) {}
    fn report_post_opt_lost_landmarks(&self, _n: usize) {}
    fn report_matched_inliers(&self, _n: usize) {}
    fn report_local_ba(&self, _counts: LocalBaCounts) {}
    fn report_local_ba_error(&self, _mean_error: f64) {}
    fn report_global_ba_error(&self, _mean_error: f64) {}
}

/// Latest value of every reported field plus the collector's control flags.
pub struct SharedStateStore {
    image_timestamp: Mutex<f64>,
    image_filename: Mutex<String>,
    image_raster: Mutex<Option<Arc<GrayImage>>>,
    image_counter: AtomicU64,

    frame: Mutex<Option<Arc<FrameSnapshot>>>,
    track_mode: Mutex<Option<TrackMode>>,
    pre_outliers: Mutex<usize>,
    pre_lost_landmarks: Mutex<usize>,
    inliers: Mutex<usize>,
    post_outliers: Mutex<usize>,
    post_lost_landmarks: Mutex<usize>,
    matched_inliers: Mutex<usize>,

    local_ba: Mutex<LocalBaCounts>,
    local_runs: Mutex<OptimizerRuns>,
    global_runs: Mutex<OptimizerRuns>,

    readiness: ReadinessTracker,

    /// Set by `request_finish`; checked by the collector every iteration.
    finish_requested: AtomicBool,
    /// Set by the collector once the sink is closed.
    finished: AtomicBool,

    cycles_completed: AtomicU64,
    rows_written: AtomicU64,
}

impl SharedStateStore {
    /// Create an empty store, shared between producers and the collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Readiness flags gating collection cycles.
    pub fn readiness(&self) -> &ReadinessTracker {
        &self.readiness
    }

    // --- collector-side reads -------------------------------------------

    /// Read the image fields one at a time.
    ///
    /// The fields are not read under a common lock, so a concurrent writer
    /// may leave the timestamp from one image next to the raster of another.
    pub fn image_snapshot(&self) -> ImageSnapshot {
        ImageSnapshot {
            timestamp_s: *self.image_timestamp.lock(),
            filename: self.image_filename.lock().clone(),
            raster: self.image_raster.lock().clone(),
            counter: self.image_counter.load(Ordering::SeqCst),
        }
    }

    /// Number of rasters reported so far.
    pub fn image_counter(&self) -> u64 {
        self.image_counter.load(Ordering::SeqCst)
    }

    /// Latest frame, if any was reported.
    pub fn frame(&self) -> Option<Arc<FrameSnapshot>> {
        self.frame.lock().clone()
    }

    /// Latest track mode, if any was reported.
    pub fn track_mode(&self) -> Option<TrackMode> {
        *self.track_mode.lock()
    }

    /// Latest correspondence counts, each read under its own lock.
    pub fn pose_optimization_counts(&self) -> PoseOptimizationCounts {
        PoseOptimizationCounts {
            pre_outliers: *self.pre_outliers.lock(),
            pre_lost_landmarks: *self.pre_lost_landmarks.lock(),
            inliers: *self.inliers.lock(),
            post_outliers: *self.post_outliers.lock(),
            post_lost_landmarks: *self.post_lost_landmarks.lock(),
            matched_inliers: *self.matched_inliers.lock(),
        }
    }

    /// Latest local and global BA statistics.
    pub fn bundle_adjustment(&self) -> BundleAdjustmentStats {
        BundleAdjustmentStats {
            local: *self.local_ba.lock(),
            local_runs: *self.local_runs.lock(),
            global_runs: *self.global_runs.lock(),
        }
    }

    // --- lifecycle flags -------------------------------------------------

    /// Ask the collector to drain and close. Wakes it if it is waiting.
    ///
    /// Does not wait for the collector; `DataCollector::request_finish` does.
    pub(crate) fn request_finish(&self) {
        self.finish_requested.store(true, Ordering::SeqCst);
        self.readiness.notify();
    }

    /// Check if finish was requested.
    pub fn is_finish_requested(&self) -> bool {
        self.finish_requested.load(Ordering::SeqCst)
    }

    /// Mark the collector as finished (sink closed).
    pub(crate) fn set_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    /// Check if the collector has closed its sink.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Count a completed cycle and, if it reached the file, its row.
    pub(crate) fn record_cycle(&self, row_written: bool) {
        if row_written {
            self.rows_written.fetch_add(1, Ordering::SeqCst);
        }
        self.cycles_completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of completed collection cycles.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::SeqCst)
    }

    /// Number of rows that reached the output file.
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::SeqCst)
    }
}

impl Default for SharedStateStore {
    fn default() -> Self {
        Self {
            image_timestamp: Mutex::new(0.0),
            image_filename: Mutex::new(String::new()),
            image_raster: Mutex::new(None),
            image_counter: AtomicU64::new(0),
            frame: Mutex::new(None),
            track_mode: Mutex::new(None),
            pre_outliers: Mutex::new(0),
            pre_lost_landmarks: Mutex::new(0),
            inliers: Mutex::new(0),
            post_outliers: Mutex::new(0),
            post_lost_landmarks: Mutex::new(0),
            matched_inliers: Mutex::new(0),
            local_ba: Mutex::new(LocalBaCounts::default()),
            local_runs: Mutex::new(OptimizerRuns::default()),
            global_runs: Mutex::new(OptimizerRuns::default()),
            readiness: ReadinessTracker::new(),
            finish_requested: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cycles_completed: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
        }
    }
}

impl TelemetryReporter for SharedStateStore {
    fn report_image_timestamp(&self, timestamp_s: f64) {
        *self.image_timestamp.lock() = timestamp_s;
    }

    fn report_image_filename(&self, filename: &str) {
        let mut slot = self.image_filename.lock();
        slot.clear();
        slot.push_str(filename);
    }

    fn report_image_pixels(&self, raster: GrayImage) -> u64 {
        *self.image_raster.lock() = Some(Arc::new(raster));
        let sequence = self.image_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.readiness.mark_image_ready();
        sequence
    }

    fn report_frame(&self, frame: FrameSnapshot) {
        *self.frame.lock() = Some(Arc::new(frame));
        self.readiness.mark_frame_ready();
    }

    fn report_track_mode(&self, mode: TrackMode) {
        *self.track_mode.lock() = Some(mode);
    }

    fn report_pre_opt_outliers(&self, n: usize) {
        *self.pre_outliers.lock() = n;
    }

    fn report_pre_opt_lost_landmarks(&self, n: usize) {
        *self.pre_lost_landmarks.lock() = n;
    }

    fn report_inliers(&self, n: usize) {
        *self.inliers.lock() = n;
    }

    fn report_post_opt_outliers(&self, n: usize) {
        *self.post_outliers.lock() = n;
    }

    fn report_post_opt_lost_landmarks(&self, n: usize) {
        *self.post_lost_landmarks.lock() = n;
    }

    fn report_matched_inliers(&self, n: usize) {
        *self.matched_inliers.lock() = n;
    }

    fn report_local_ba(&self, counts: LocalBaCounts) {
        *self.local_ba.lock() = counts;
    }

    fn report_local_ba_error(&self, mean_error: f64) {
        let mut runs = self.local_runs.lock();
        runs.mean_error = mean_error;
        runs.count += 1;
    }

    fn report_global_ba_error(&self, mean_error: f64) {
        let mut runs = self.global_runs.lock();
        runs.mean_error = mean_error;
        runs.count += 1;
    }
}
