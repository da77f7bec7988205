//! Supervision errors

use std::time::Duration;
use thiserror::Error;
use warden_task::SpawnError;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The failure window tripped. Reported once; nothing is respawned.
    #[error(
        "Supervision exhausted: {max_failures} failures within {within:?}, last error: {}",
        .last.as_deref().unwrap_or("none")
    )]
    Exhausted {
        max_failures: usize,
        within: Duration,
        last: Option<String>,
    },

    #[error("Supervision has stopped; reset the supervisor to continue")]
    Stopped,

    #[error("Failed to respawn task: {0}")]
    Respawn(#[from] SpawnError),

    #[error("Task output closed without an end event")]
    SourceClosed,
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
