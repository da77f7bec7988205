//! Tasks for warden
//!
//! Provides:
//! - Process spawning on a raw-mode pseudo-terminal, as a session leader
//! - Reader and writer workers turning terminal bytes into ordered events
//! - Pluggable split functions (lines, delimiter bytes, regex delimiters)
//! - Forceful (SIGKILL) and graceful (SIGTERM) termination, respawn
//! - Fan-in of many tasks' events through `Mux`
//! - Command specifications and a flag-aware command builder

mod command;
mod error;
mod event;
mod mux;
mod process;
mod pty;
mod scanner;
mod split;
mod task;

pub use command::*;
pub use error::*;
pub use event::*;
pub use mux::*;
pub use process::{ExitStatus, EXTRA_FD_BASE};
pub use pty::WindowSize;
pub use scanner::*;
pub use split::*;
pub use task::*;
