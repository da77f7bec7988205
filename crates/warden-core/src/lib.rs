//! Supervision for warden
//!
//! This crate contains:
//! - The failure-window state machine deciding whether an ended task is respawned
//! - The supervising loop that follows a task across respawns and shuts it down

mod driver;
mod error;
mod supervisor;

pub use driver::*;
pub use error::*;
pub use supervisor::*;
