//! CSV log of collected telemetry, one row per collection cycle.
//!
//! The header names every column. A row always carries the first three
//! columns, then the image block when the image domain was ready, then the
//! frame block when both domains were ready. Every row is therefore a prefix
//! of the header.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use csv::{Writer, WriterBuilder};
use tracing::{error, info};

use crate::error::TelemetryError;
use crate::features::{FrameFeatures, ImageFeatures};
use crate::system::messages::{BundleAdjustmentStats, PoseOptimizationCounts, TrackMode};

pub const BASE_COLUMNS: [&str; 3] = ["counter", "timestamp_ns", "filename"];

pub const IMAGE_COLUMNS: [&str; 3] = ["brightness", "contrast", "entropy"];

pub const FRAME_COLUMNS: [&str; 32] = [
    "mp_min_depth_mean",
    "mp_min_depth_var",
    "track_mode",
    "pre_po_outliers",
    "pre_po_lost_landmarks",
    "inliers",
    "post_po_outliers",
    "post_po_lost_landmarks",
    "matched_inliers",
    "keypoints",
    "twc_x",
    "twc_y",
    "twc_z",
    "q_x",
    "q_y",
    "q_z",
    "q_w",
    "rel_t_x",
    "rel_t_y",
    "rel_t_z",
    "rel_euler_z",
    "rel_euler_y",
    "rel_euler_x",
    "ba_fixed_kfs",
    "ba_optimized_kfs",
    "ba_landmarks",
    "ba_edges",
    "local_ba_count",
    "local_ba_error",
    "global_ba_count",
    "global_ba_error",
    "cycle_duration_us",
];

/// All column names in output order.
pub fn header() -> Vec<&'static str> {
    BASE_COLUMNS
        .iter()
        .chain(IMAGE_COLUMNS.iter())
        .chain(FRAME_COLUMNS.iter())
        .copied()
        .collect()
}

/// Image block of a row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageSection {
    /// Image domain not ready: the block is left out.
    Omitted,
    /// Image domain ready but extraction was skipped: empty cells.
    Missing,
    Present(ImageFeatures),
}

/// Frame block of a full row.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSection {
    pub features: FrameFeatures,
    pub track_mode: Option<TrackMode>,
    pub optimization: PoseOptimizationCounts,
    pub bundle_adjustment: BundleAdjustmentStats,
    /// Duration of the previous collection cycle.
    pub cycle_duration_us: u64,
}

/// One collection cycle's output.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub counter: u64,
    pub timestamp_s: f64,
    pub filename: String,
    pub image: ImageSection,
    pub frame: Option<FrameSection>,
}

fn fixed6(v: f64) -> String {
    format!("{:.6}", v)
}

fn fixed9(v: f64) -> String {
    format!("{:.9}", v)
}

impl TelemetryRecord {
    /// Row with only the always-present columns.
    pub fn minimal(counter: u64, timestamp_s: f64, filename: String) -> Self {
        Self {
            counter,
            timestamp_s,
            filename,
            image: ImageSection::Omitted,
            frame: None,
        }
    }

    /// Formatted cells in column order.
    pub fn fields(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(BASE_COLUMNS.len() + IMAGE_COLUMNS.len() + FRAME_COLUMNS.len());
        out.push(self.counter.to_string());
        out.push(fixed6(self.timestamp_s * 1e9));
        out.push(self.filename.clone());

        match (&self.image, &self.frame) {
            (ImageSection::Present(f), _) => {
                out.extend([fixed6(f.brightness), fixed6(f.contrast), fixed6(f.entropy)]);
            }
            // Keep the frame block aligned with the header.
            (ImageSection::Missing, _) | (ImageSection::Omitted, Some(_)) => {
                out.extend(std::iter::repeat(String::new()).take(IMAGE_COLUMNS.len()));
            }
            (ImageSection::Omitted, None) => {}
        }

        if let Some(frame) = &self.frame {
            push_frame_fields(&mut out, frame);
        }
        out
    }
}

fn push_frame_fields(out: &mut Vec<String>, frame: &FrameSection) {
    let f = &frame.features;
    match f.depth {
        Some(depth) => out.extend([fixed6(depth.mean), fixed6(depth.variance)]),
        None => out.extend([String::new(), String::new()]),
    }
    out.push(
        frame
            .track_mode
            .map(|m| m.code().to_string())
            .unwrap_or_default(),
    );

    let o = &frame.optimization;
    out.extend(
        [
            o.pre_outliers,
            o.pre_lost_landmarks,
            o.inliers,
            o.post_outliers,
            o.post_lost_landmarks,
            o.matched_inliers,
            f.keypoint_count,
        ]
        .iter()
        .map(|n| n.to_string()),
    );

    let q = f.orientation.coords;
    out.extend(
        [
            f.position.x,
            f.position.y,
            f.position.z,
            q.x,
            q.y,
            q.z,
            q.w,
            f.relative_translation.x,
            f.relative_translation.y,
            f.relative_translation.z,
            f.relative_euler_zyx.x,
            f.relative_euler_zyx.y,
            f.relative_euler_zyx.z,
        ]
        .into_iter()
        .map(fixed9),
    );

    let ba = &frame.bundle_adjustment;
    out.extend(
        [
            ba.local.fixed_keyframes,
            ba.local.optimized_keyframes,
            ba.local.landmarks,
            ba.local.edges,
        ]
        .iter()
        .map(|n| n.to_string()),
    );
    out.push(ba.local_runs.count.to_string());
    out.push(fixed9(ba.local_runs.mean_error));
    out.push(ba.global_runs.count.to_string());
    out.push(fixed9(ba.global_runs.mean_error));
    out.push(frame.cycle_duration_us.to_string());
}

/// `<sequence>_<YYMMDD_HHMMSS>.csv`
pub fn file_name(sequence_name: &str, created_at: &DateTime<Local>) -> String {
    format!("{}_{}.csv", sequence_name, created_at.format("%y%m%d_%H%M%S"))
}

/// Owner of the output file for one run.
///
/// If the file cannot be opened the failure is logged once and every later
/// row is dropped (and counted) instead of failing the caller.
pub struct CsvSink {
    path: PathBuf,
    writer: Option<Writer<File>>,
    rows_written: u64,
    rows_dropped: u64,
    write_error_logged: bool,
    closed: bool,
}

impl CsvSink {
    /// Create `<output_dir>/<sequence>_<now>.csv` and write the header.
    pub fn create(output_dir: &Path, sequence_name: &str) -> Self {
        let path = output_dir.join(file_name(sequence_name, &Local::now()));
        match Self::open(&path) {
            Ok(sink) => sink,
            Err(e) => {
                error!("{}", e);
                Self {
                    path,
                    writer: None,
                    rows_written: 0,
                    rows_dropped: 0,
                    write_error_logged: true,
                    closed: false,
                }
            }
        }
    }

    /// Open `path` (truncating) and write the header row.
    pub fn open(path: &Path) -> Result<Self, TelemetryError> {
        let unavailable = |source: csv::Error| TelemetryError::ResourceUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let mut writer = WriterBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(unavailable)?;
        writer.write_record(header()).map_err(unavailable)?;
        writer
            .flush()
            .map_err(|e| unavailable(csv::Error::from(e)))?;

        info!("Telemetry log opened at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            rows_written: 0,
            rows_dropped: 0,
            write_error_logged: false,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn rows_dropped(&self) -> u64 {
        self.rows_dropped
    }

    /// Append one row and flush it. Returns whether it reached the file.
    pub fn write_record(&mut self, record: &TelemetryRecord) -> bool {
        let Some(writer) = self.writer.as_mut() else {
            self.rows_dropped += 1;
            return false;
        };

        let result = writer
            .write_record(record.fields())
            .and_then(|()| writer.flush().map_err(csv::Error::from));

        match result {
            Ok(()) => {
                self.rows_written += 1;
                true
            }
            Err(e) => {
                if !self.write_error_logged {
                    error!("{}", TelemetryError::Write(e));
                    self.write_error_logged = true;
                }
                self.rows_dropped += 1;
                false
            }
        }
    }

    /// Flush and release the file. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                error!("Failed to flush telemetry log {}: {}", self.path.display(), e);
            }
        }
        info!(
            "Telemetry log closed: {} rows written, {} dropped",
            self.rows_written, self.rows_dropped
        );
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        self.close();
    }
}
