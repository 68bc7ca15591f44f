//! FlyMAD analysis - Offline processing of logged optogenetic experiments
//!
//! Turns a recorded FlyMAD event log into typed, time-ordered tables through a
//! deterministic pipeline: log reading → ingestion → track filtering →
//! smoothing → arena geometry, memoized by a result cache next to the input.
//!
//! ## Modules
//!
//! - **Pipeline**: [`SessionLoader`] and [`merge_sessions`] for single and batch loads
//! - **Signal processing**: [`kalman`] smoother and [`smoothing`] derivatives
//! - **Analysis helpers**: [`align`] tables by timestamp, [`area`] statistics

pub mod align;
pub mod arena;
pub mod area;
pub mod cache;
pub mod config;
pub mod error;
pub mod extra;
pub mod filter;
pub mod geometry;
pub mod ingest;
pub mod kalman;
pub mod pipeline;
pub mod schema;
pub mod smoothing;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use arena::{Arena, ArenaConfig, Calibration, Unit};
pub use config::{LoadOptions, TimezonePolicy};
pub use error::AnalysisError;
pub use extra::{ExtraTopics, FieldKind, FieldSpec};
pub use pipeline::{load_session, merge_sessions, session_start_from_filename, SessionLoader};
pub use types::{HeadDetectRow, Session, TargetedRow, TrackedRow};

/// Crate version, reported by the batch driver
pub const MADPLOT_VERSION: &str = env!("CARGO_PKG_VERSION");
