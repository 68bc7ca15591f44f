//! Event log schema
//!
//! This module defines the envelope and message types of a FlyMAD event log
//! and the readers that decode a log file into a sequence of events.

mod log_event;
mod reader;

pub use log_event::*;
pub use reader::*;
