//! Data collector - background thread turning reported measurements into rows.
//!
//! Producers write into the [`SharedStateStore`] through the
//! [`TelemetryReporter`] contract. One collector thread waits for a domain to
//! become ready, extracts features from the latest values, and appends one
//! row per cycle to the CSV sink:
//! 1. Wait for a wake-up (or the poll interval as a fallback)
//! 2. Optionally hold an image cycle until its matching frame arrives
//! 3. Claim the cycle, clearing the domain flags
//! 4. Extract image and frame features
//! 5. Write the row
//!
//! On finish the loop drains one last pending cycle, closes the sink and
//! exits. The handle joins the thread, so nothing is written afterwards.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::features::FeatureExtractor;
use crate::io::{CsvSink, FrameSection, ImageSection, TelemetryRecord};

use super::readiness::{PendingDomains, Wake};
use super::shared_state::{SharedStateStore, TelemetryReporter};

/// How image and frame reports are paired into one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingPolicy {
    /// Use whatever values are latest when the cycle runs.
    Latest,
    /// Hold an image cycle until a frame tagged with the same image counter
    /// arrives (bounded by `pairing_timeout`). Untagged frames match any image.
    MatchSequence,
}

/// Configuration for the data collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Prefix of the output file name.
    pub sequence_name: String,

    /// Directory the CSV file is created in.
    pub output_dir: PathBuf,

    /// Longest wait between checks when no producer signals.
    pub poll_interval: Duration,

    pub pairing: PairingPolicy,

    /// Longest an image cycle is held back waiting for its frame.
    pub pairing_timeout: Duration,

    /// Sleep before the first poll, letting the pipeline warm up.
    pub startup_delay: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            sequence_name: "sequence".to_string(),
            output_dir: PathBuf::from("."),
            poll_interval: Duration::from_millis(10),
            pairing: PairingPolicy::MatchSequence,
            pairing_timeout: Duration::from_millis(100),
            startup_delay: Duration::ZERO,
        }
    }
}

/// The collector thread's state. Runs until finish is requested.
pub(crate) struct CollectorLoop {
    store: Arc<SharedStateStore>,
    sink: CsvSink,
    extractor: FeatureExtractor,
    config: CollectorConfig,

    /// Duration of the last completed cycle, written in the next full row.
    last_cycle_us: u64,

    /// When the current image cycle started waiting for its frame.
    deferred_since: Option<Instant>,
}

impl CollectorLoop {
    pub(crate) fn new(store: Arc<SharedStateStore>, sink: CsvSink, config: CollectorConfig) -> Self {
        Self {
            store,
            sink,
            extractor: FeatureExtractor::new(),
            config,
            last_cycle_us: 0,
            deferred_since: None,
        }
    }

    /// Main thread loop.
    pub(crate) fn run(mut self) {
        info!("Data collector thread started");

        if !self.config.startup_delay.is_zero() {
            thread::sleep(self.config.startup_delay);
        }

        loop {
            if self.store.is_finish_requested() {
                break;
            }

            if self.store.readiness().is_processed() || self.should_defer() {
                match self.store.readiness().wait(self.config.poll_interval) {
                    Wake::Signalled | Wake::TimedOut => continue,
                    Wake::Disconnected => break,
                }
            }

            self.run_cycle();
        }

        // Drain: the last reported values still get their row.
        self.run_cycle();
        self.sink.close();
        self.store.set_finished();
        info!(
            "Data collector finished after {} cycles",
            self.store.cycles_completed()
        );
    }

    /// Whether a pending image cycle should wait for its frame.
    fn should_defer(&mut self) -> bool {
        if self.config.pairing != PairingPolicy::MatchSequence {
            return false;
        }

        let pending = self.store.readiness().peek();
        if !pending.image {
            self.deferred_since = None;
            return false;
        }

        let image_sequence = self.store.image_counter();
        let frame_matches = pending.frame
            && self
                .store
                .frame()
                .is_some_and(|f| f.image_sequence.map_or(true, |s| s == image_sequence));
        if frame_matches {
            self.deferred_since = None;
            return false;
        }

        let since = *self.deferred_since.get_or_insert_with(Instant::now);
        if since.elapsed() < self.config.pairing_timeout {
            return true;
        }

        debug!(
            "No frame for image {} after {:?}, collecting unpaired",
            image_sequence, self.config.pairing_timeout
        );
        self.deferred_since = None;
        false
    }

    /// Claim and process one cycle, if one is pending.
    fn run_cycle(&mut self) {
        let Some(pending) = self.store.readiness().claim() else {
            return;
        };
        self.deferred_since = None;

        let start = Instant::now();
        let record = self.collect(pending);
        let written = self.sink.write_record(&record);
        self.store.record_cycle(written);
        self.last_cycle_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
    }

    fn collect(&mut self, pending: PendingDomains) -> TelemetryRecord {
        let image = self.store.image_snapshot();

        let image_section = if pending.image {
            match self.extractor.image(image.raster.as_deref()) {
                Ok(features) => ImageSection::Present(features),
                Err(e) => {
                    warn!("Image features skipped for image {}: {}", image.counter, e);
                    ImageSection::Missing
                }
            }
        } else {
            ImageSection::Omitted
        };

        let frame_features = if pending.frame {
            self.store.frame().map(|frame| {
                if let Some(seq) = frame.image_sequence {
                    if seq != image.counter {
                        debug!("Frame tracked on image {} paired with image {}", seq, image.counter);
                    }
                }
                self.extractor.frame(&frame)
            })
        } else {
            None
        };

        let frame_section = match frame_features {
            Some(features) if pending.is_full() => Some(FrameSection {
                features,
                track_mode: self.store.track_mode(),
                optimization: self.store.pose_optimization_counts(),
                bundle_adjustment: self.store.bundle_adjustment(),
                cycle_duration_us: self.last_cycle_us,
            }),
            _ => None,
        };

        TelemetryRecord {
            counter: image.counter,
            timestamp_s: image.timestamp_s,
            filename: image.filename,
            image: image_section,
            frame: frame_section,
        }
    }
}

/// Handle owning the collector thread.
///
/// Pipeline stages get the reporting side via [`DataCollector::reporter`];
/// only the owner can finish the collector.
pub struct DataCollector {
    store: Arc<SharedStateStore>,
    output_path: PathBuf,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DataCollector {
    /// Open the output file and spawn the collector thread.
    pub fn spawn(config: CollectorConfig) -> Result<Self> {
        let store = SharedStateStore::new();
        let sink = CsvSink::create(&config.output_dir, &config.sequence_name);
        let output_path = sink.path().to_path_buf();

        let collector = CollectorLoop::new(Arc::clone(&store), sink, config);
        let handle = thread::Builder::new()
            .name("data-collector".to_string())
            .spawn(move || collector.run())
            .context("Failed to spawn data collector thread")?;

        Ok(Self {
            store,
            output_path,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Reporting interface for producers.
    pub fn reporter(&self) -> Arc<dyn TelemetryReporter> {
        self.store.clone()
    }

    /// Path of the CSV file (it may not exist if opening failed).
    pub fn output_path(&self) -> &PathBuf {
        &self.output_path
    }

    /// Stop collecting, write any pending row, and close the file.
    ///
    /// Blocks until the collector thread has exited. Later calls return
    /// immediately.
    pub fn request_finish(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        self.store.request_finish();
        if handle.join().is_err() {
            warn!("Data collector thread panicked");
        }
    }

    /// Whether the collector thread has closed the sink.
    pub fn is_finished(&self) -> bool {
        self.store.is_finished()
    }

    /// Number of completed collection cycles.
    pub fn cycles_completed(&self) -> u64 {
        self.store.cycles_completed()
    }

    /// Number of rows that reached the output file.
    pub fn rows_written(&self) -> u64 {
        self.store.rows_written()
    }
}

impl Drop for DataCollector {
    fn drop(&mut self) {
        self.request_finish();
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;
    use std::path::Path;

    use approx::assert_relative_eq;
    use image::{GrayImage, Luma};
    use nalgebra::{UnitQuaternion, Vector3};

    use super::*;
    use crate::geometry::SE3;
    use crate::io::csv_sink::header;
    use crate::system::messages::{FrameSnapshot, LandmarkObservation, LocalBaCounts, TrackMode};

    fn test_config(dir: &Path) -> CollectorConfig {
        CollectorConfig {
            sequence_name: "test".to_string(),
            output_dir: dir.to_path_buf(),
            pairing_timeout: Duration::from_secs(5),
            ..CollectorConfig::default()
        }
    }

    fn wait_for_cycles(collector: &DataCollector, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while collector.cycles_completed() < n {
            assert!(Instant::now() < deadline, "collector did not reach {n} cycles");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .unwrap()
            .records()
            .map(|r| r.unwrap())
            .collect()
    }

    fn column(row: &csv::StringRecord, name: &str) -> String {
        let idx = header().iter().position(|c| *c == name).unwrap();
        row[idx].to_string()
    }

    fn landmarks(distances: &[f64]) -> Vec<LandmarkObservation> {
        distances
            .iter()
            .enumerate()
            .map(|(i, &d)| LandmarkObservation {
                id: i as u64,
                min_distance: d,
            })
            .collect()
    }

    fn report_image(reporter: &dyn TelemetryReporter, t: f64, name: &str) -> u64 {
        reporter.report_image_timestamp(t);
        reporter.report_image_filename(name);
        reporter.report_image_pixels(GrayImage::from_pixel(64, 48, Luma([90])))
    }

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: CollectorConfig =
            serde_json::from_str(r#"{"sequence_name": "MH01", "pairing": "Latest"}"#).unwrap();

        assert_eq!(config.sequence_name, "MH01");
        assert_eq!(config.pairing, PairingPolicy::Latest);
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.pairing_timeout, Duration::from_millis(100));
        assert_eq!(config.startup_delay, Duration::ZERO);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = CollectorConfig {
            sequence_name: "V202".to_string(),
            pairing_timeout: Duration::from_millis(250),
            ..CollectorConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: CollectorConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(back.sequence_name, "V202");
        assert_eq!(back.pairing_timeout, Duration::from_millis(250));
        assert_eq!(back.pairing, PairingPolicy::MatchSequence);
    }

    #[test]
    fn test_finish_returns_after_sink_closed() {
        let dir = tempfile::tempdir().unwrap();
        let collector = DataCollector::spawn(test_config(dir.path())).unwrap();

        report_image(collector.reporter().as_ref(), 0.0, "a.png");
        assert!(!collector.is_finished());
        collector.request_finish();

        // No waiting: the handle joined the thread, so the row is on disk.
        assert!(collector.is_finished());
        assert_eq!(collector.rows_written(), 1);
        assert_eq!(read_rows(collector.output_path()).len(), 2);
    }

    #[test]
    fn test_uniform_image_without_frame() {
        let dir = tempfile::tempdir().unwrap();
        let collector = DataCollector::spawn(test_config(dir.path())).unwrap();

        collector
            .reporter()
            .report_image_pixels(GrayImage::from_pixel(640, 480, Luma([128])));
        collector.request_finish();

        let rows = read_rows(collector.output_path());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), header().len());

        let row = &rows[1];
        assert_eq!(row.len(), 6);
        assert_eq!(&row[0], "1");
        assert_eq!(&row[3], "128.000000");
        assert_eq!(&row[4], "0.000000");
        assert_eq!(&row[5], "0.000000");
    }

    #[test]
    fn test_relative_rotation_between_frames() {
        let dir = tempfile::tempdir().unwrap();
        let collector = DataCollector::spawn(test_config(dir.path())).unwrap();
        let reporter = collector.reporter();
        let t = Vector3::new(1.0, 2.0, 0.5);

        let seq = report_image(reporter.as_ref(), 1.0, "a.png");
        reporter.report_frame(
            FrameSnapshot::new(500, SE3::from_quaternion(UnitQuaternion::identity(), t), Vec::new())
                .with_image_sequence(seq),
        );
        wait_for_cycles(&collector, 1);

        let seq = report_image(reporter.as_ref(), 1.05, "b.png");
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        reporter.report_frame(
            FrameSnapshot::new(480, SE3::from_quaternion(yaw, t), landmarks(&[1.0, 2.0, 3.0]))
                .with_image_sequence(seq),
        );
        wait_for_cycles(&collector, 2);
        collector.request_finish();

        let rows = read_rows(collector.output_path());
        assert_eq!(rows.len(), 3);
        assert!(rows[1..].iter().all(|r| r.len() == header().len()));

        let second = &rows[2];
        assert_eq!(&second[0], "2");
        assert_eq!(&second[2], "b.png");
        assert_eq!(&second[1], "1050000000.000000");
        let parse = |name: &str| column(second, name).parse::<f64>().unwrap();
        assert_relative_eq!(parse("rel_euler_z"), FRAC_PI_2, epsilon = 1e-3);
        assert_relative_eq!(parse("rel_euler_y"), 0.0, epsilon = 1e-3);
        assert_relative_eq!(parse("rel_euler_x"), 0.0, epsilon = 1e-3);
        assert_relative_eq!(parse("rel_t_x"), 0.0, epsilon = 1e-9);
        assert_relative_eq!(parse("mp_min_depth_mean"), 2.0, epsilon = 1e-6);
        assert_relative_eq!(parse("mp_min_depth_var"), 2.0 / 3.0, epsilon = 1e-6);
        assert_eq!(column(second, "keypoints"), "480");

        // The first frame had no landmarks: no depth measurement.
        assert_eq!(column(&rows[1], "mp_min_depth_mean"), "");
    }

    #[test]
    fn test_full_row_carries_latest_scalars() {
        let dir = tempfile::tempdir().unwrap();
        let collector = DataCollector::spawn(test_config(dir.path())).unwrap();
        let reporter = collector.reporter();

        reporter.report_track_mode(TrackMode::Relocalization);
        reporter.report_pre_opt_outliers(11);
        reporter.report_inliers(250);
        reporter.report_matched_inliers(240);
        reporter.report_local_ba(LocalBaCounts {
            fixed_keyframes: 2,
            optimized_keyframes: 9,
            landmarks: 700,
            edges: 3100,
        });
        reporter.report_local_ba_error(0.5);
        reporter.report_global_ba_error(2.0);

        let seq = report_image(reporter.as_ref(), 2.0, "c.png");
        reporter.report_frame(
            FrameSnapshot::new(900, SE3::identity(), Vec::new()).with_image_sequence(seq),
        );
        collector.request_finish();

        let rows = read_rows(collector.output_path());
        assert_eq!(rows.len(), 2);
        let row = &rows[1];
        assert_eq!(column(row, "track_mode"), "2");
        assert_eq!(column(row, "pre_po_outliers"), "11");
        assert_eq!(column(row, "inliers"), "250");
        assert_eq!(column(row, "matched_inliers"), "240");
        assert_eq!(column(row, "ba_optimized_kfs"), "9");
        assert_eq!(column(row, "local_ba_count"), "1");
        assert_eq!(column(row, "global_ba_error"), "2.000000000");
        assert_eq!(column(row, "brightness"), "90.000000");
    }

    #[test]
    fn test_frame_only_cycle_writes_minimal_row() {
        let dir = tempfile::tempdir().unwrap();
        let collector = DataCollector::spawn(test_config(dir.path())).unwrap();

        collector
            .reporter()
            .report_frame(FrameSnapshot::new(10, SE3::identity(), Vec::new()));
        wait_for_cycles(&collector, 1);
        collector.request_finish();

        let rows = read_rows(collector.output_path());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].len(), 3);
    }

    #[test]
    fn test_unpaired_image_is_collected_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            pairing_timeout: Duration::from_millis(20),
            ..test_config(dir.path())
        };
        let collector = DataCollector::spawn(config).unwrap();

        report_image(collector.reporter().as_ref(), 0.1, "lonely.png");
        wait_for_cycles(&collector, 1);
        assert!(!collector.is_finished());
        collector.request_finish();

        let rows = read_rows(collector.output_path());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].len(), 6);
    }

    #[test]
    fn test_latest_policy_collects_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            pairing: PairingPolicy::Latest,
            ..test_config(dir.path())
        };
        let collector = DataCollector::spawn(config).unwrap();

        report_image(collector.reporter().as_ref(), 0.1, "a.png");
        wait_for_cycles(&collector, 1);
        collector.request_finish();

        assert_eq!(collector.rows_written(), 1);
    }

    #[test]
    fn test_empty_raster_leaves_image_cells_empty() {
        let dir = tempfile::tempdir().unwrap();
        let collector = DataCollector::spawn(test_config(dir.path())).unwrap();
        let reporter = collector.reporter();

        let seq = reporter.report_image_pixels(GrayImage::new(0, 0));
        reporter.report_frame(
            FrameSnapshot::new(5, SE3::identity(), Vec::new()).with_image_sequence(seq),
        );
        collector.request_finish();

        let rows = read_rows(collector.output_path());
        let row = &rows[1];
        assert_eq!(row.len(), header().len());
        assert_eq!(column(row, "brightness"), "");
        assert_eq!(column(row, "keypoints"), "5");
    }

    #[test]
    fn test_finish_is_idempotent_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let collector = DataCollector::spawn(test_config(dir.path())).unwrap();
        let reporter = collector.reporter();

        report_image(reporter.as_ref(), 0.0, "a.png");
        collector.request_finish();
        collector.request_finish();
        assert!(collector.is_finished());

        let before = std::fs::read_to_string(collector.output_path()).unwrap();
        report_image(reporter.as_ref(), 1.0, "b.png");
        reporter.report_frame(FrameSnapshot::new(1, SE3::identity(), Vec::new()));
        thread::sleep(Duration::from_millis(30));
        let after = std::fs::read_to_string(collector.output_path()).unwrap();

        assert_eq!(before, after);
        assert_eq!(collector.rows_written(), 1);
    }

    #[test]
    fn test_drop_finishes_collector() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let collector = DataCollector::spawn(test_config(dir.path())).unwrap();
            report_image(collector.reporter().as_ref(), 0.0, "a.png");
            collector.output_path().clone()
        };

        assert_eq!(read_rows(&path).len(), 2);
    }

    #[test]
    fn test_unavailable_output_does_not_reach_producers() {
        let dir = tempfile::tempdir().unwrap();
        let collector = DataCollector::spawn(test_config(&dir.path().join("missing"))).unwrap();

        report_image(collector.reporter().as_ref(), 0.0, "a.png");
        collector.request_finish();

        assert!(collector.is_finished());
        assert_eq!(collector.cycles_completed(), 1);
        assert_eq!(collector.rows_written(), 0);
        assert!(!collector.output_path().exists());
    }

    #[test]
    fn test_concurrent_producers() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            pairing: PairingPolicy::Latest,
            ..test_config(dir.path())
        };
        let collector = DataCollector::spawn(config).unwrap();

        let producers: Vec<_> = (0..4)
            .map(|i| {
                let reporter = collector.reporter();
                thread::spawn(move || {
                    for k in 0..200 {
                        match i {
                            0 => {
                                report_image(reporter.as_ref(), k as f64 * 0.05, "img.png");
                            }
                            1 => reporter.report_frame(FrameSnapshot::new(
                                k,
                                SE3::identity(),
                                landmarks(&[1.0, 3.0]),
                            )),
                            2 => reporter.report_local_ba_error(k as f64),
                            _ => reporter.report_inliers(k),
                        }
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        collector.request_finish();

        let rows = read_rows(collector.output_path());
        assert!(rows.len() >= 2);
        let counters: Vec<u64> = rows[1..].iter().map(|r| r[0].parse().unwrap()).collect();
        // Rows are written by one thread in cycle order.
        assert!(counters.windows(2).all(|w| w[0] <= w[1]));
        for row in &rows[1..] {
            assert!(matches!(row.len(), 3 | 6 | 38));
        }
        assert_eq!(collector.rows_written(), (rows.len() - 1) as u64);
    }
}
