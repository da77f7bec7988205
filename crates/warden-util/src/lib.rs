//! Shared utilities for warden
//!
//! This crate provides:
//! - Task identity (`TaskId`)
//! - Time utilities (monotonic instants for failure windows, wall clock for records)
//! - Default paths for the configuration file

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
