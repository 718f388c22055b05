pub mod error;
pub mod features;
pub mod geometry;
pub mod io;
pub mod system;

pub use error::TelemetryError;
pub use system::{CollectorConfig, DataCollector, TelemetryReporter};
