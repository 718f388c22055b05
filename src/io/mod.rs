//! Output of collected telemetry.

pub mod csv_sink;

pub use csv_sink::{CsvSink, FrameSection, ImageSection, TelemetryRecord};
