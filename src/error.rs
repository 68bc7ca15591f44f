//! Error types for FlyMAD analysis

use thiserror::Error;

/// Errors that can occur while loading and processing an experiment log
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse event log: {0}")]
    ParseError(String),

    #[error("Timezone is not specified (MADPLOT_FORCE_USER_TZNAME is set)")]
    MissingTimezone,

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Arena already calibrated with a different calibration: {0}")]
    ConflictingCalibration(String),

    #[error("Arena geometry does not intersect: {0}")]
    GeometryMismatch(String),

    #[error("Unrecognised log file name: {0}")]
    InvalidFilename(String),

    #[error("Invalid load options: {0}")]
    InvalidOptions(String),

    #[error("Smoother failed: {0}")]
    SmootherError(String),

    #[error("No sessions to merge")]
    EmptyMerge,
}
