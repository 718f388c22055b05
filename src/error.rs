//! Error taxonomy for the telemetry collector.
//!
//! None of these errors ever reach a producer. They are raised and contained
//! inside the collector thread, where they are logged and degrade only the
//! completeness of the emitted row.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The output file could not be opened.
    #[error("telemetry output unavailable at {}: {source}", .path.display())]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Writing a row to an open output failed.
    #[error("failed to write telemetry row: {0}")]
    Write(#[from] csv::Error),

    /// A feature's input was empty or never reported.
    #[error("missing data: {0}")]
    MissingData(&'static str),

    /// A statistic had no samples to be computed over.
    #[error("degenerate numeric input: {0}")]
    DegenerateNumeric(&'static str),
}
