//! Error types for tasks

use nix::errno::Errno;
use nix::sys::signal::Signal;
use thiserror::Error;

use crate::ExitStatus;

/// Failure to bring a task up. Never retried internally.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Failed to allocate pseudo-terminal: {0}")]
    PtyAllocation(#[source] Errno),

    #[error("Failed to configure terminal: {0}")]
    Terminal(#[source] Errno),

    #[error("Failed to duplicate terminal handle: {0}")]
    Handle(#[source] std::io::Error),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Failed to start {program}: {source}")]
    Start {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start {role} worker: {source}")]
    Worker {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },
}

pub type SpawnResult<T> = Result<T, SpawnError>;

/// Failure to signal a live process
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to send {signal} to process group {pgid}: {source}")]
    Signal {
        signal: Signal,
        pgid: i32,
        #[source]
        source: Errno,
    },
}

/// Failure while turning terminal bytes into tokens
#[derive(Debug, Error)]
pub enum TokenizeError {
    #[error("Split function failed: {0}")]
    Split(String),

    #[error("Split function advanced {advance} bytes past a {available}-byte buffer")]
    AdvanceTooFar { advance: usize, available: usize },

    #[error("Split function made no progress with {remaining} bytes pending")]
    NoProgress { remaining: usize },

    #[error("Token exceeds maximum size of {max} bytes")]
    TooLong { max: usize },

    #[error("Failed to read terminal: {0}")]
    Read(#[source] std::io::Error),
}

/// Why a task ended unsuccessfully. Carried by the `Ended` event.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Process exited unsuccessfully: {0}")]
    Exited(ExitStatus),

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Output tokenization failed: {0}")]
    Tokenize(#[from] TokenizeError),

    #[error("Failed to write terminal input: {0}")]
    Io(#[source] std::io::Error),
}

impl TaskError {
    /// Exit status, if the process itself reported the failure
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            Self::Exited(status) => Some(*status),
            _ => None,
        }
    }
}

/// Input sent to a task whose writer has stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Task input is closed")]
pub struct InputClosed;

/// Invalid delimiter configuration for a split function
#[derive(Debug, Error)]
pub enum SplitConfigError {
    #[error("Delimiter set cannot be empty")]
    EmptyDelimiters,

    #[error("Invalid delimiter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Delimiter pattern '{0}' matches the empty string")]
    EmptyMatch(String),
}
