//! Process management utilities

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::{dup2, setsid, Pid};
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use tracing::debug;

use crate::{CommandSpec, ProcessError, SpawnError, SpawnResult};

/// First descriptor number handed to extra files in the child
pub const EXTRA_FD_BASE: RawFd = 3;

/// Exit status of a task's process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,

    /// Signal number if the process was killed by a signal
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            signal: None,
        }
    }

    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => Self::with_code(code),
            (None, Some(sig)) => Self::signaled(sig),
            (None, None) => Self::with_code(-1),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(sig)) => match Signal::try_from(sig) {
                Ok(signal) => write!(f, "killed by {}", signal),
                Err(_) => write!(f, "killed by signal {}", sig),
            },
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Start `spec` with `terminal` as its stdin, stdout and stderr.
///
/// The child becomes a session leader with the terminal as its controlling
/// tty, so its pid doubles as its process group id.
pub(crate) fn spawn_in_terminal(spec: &CommandSpec, terminal: &OwnedFd) -> SpawnResult<Child> {
    if spec.program.as_os_str().is_empty() {
        return Err(SpawnError::InvalidCommand("empty program".into()));
    }

    let program = spec.display_name();

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);

    if !spec.inherit_env {
        cmd.env_clear();
    }
    cmd.envs(&spec.env);

    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }
    if let Some(uid) = spec.attrs.uid {
        cmd.uid(uid);
    }
    if let Some(gid) = spec.attrs.gid {
        cmd.gid(gid);
    }

    cmd.stdin(terminal_stdio(terminal)?);
    cmd.stdout(terminal_stdio(terminal)?);
    cmd.stderr(terminal_stdio(terminal)?);

    // Extra files are first moved above the target range so that a source
    // descriptor can never be clobbered by an earlier dup2.
    let extra: Vec<RawFd> = spec.extra_files.iter().map(|f| f.as_raw_fd()).collect();
    let mut staged: Vec<RawFd> = vec![-1; extra.len()];
    let first_free = EXTRA_FD_BASE + extra.len() as RawFd;

    // SAFETY: the closure runs between fork and exec. It only performs
    // async-signal-safe syscalls and never allocates.
    unsafe {
        cmd.pre_exec(move || {
            setsid().map_err(io::Error::from)?;

            if libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY, 0) < 0 {
                return Err(io::Error::last_os_error());
            }

            for (slot, fd) in staged.iter_mut().zip(extra.iter()) {
                *slot = fcntl(*fd, FcntlArg::F_DUPFD_CLOEXEC(first_free))
                    .map_err(io::Error::from)?;
            }
            for (offset, fd) in staged.iter().enumerate() {
                dup2(*fd, EXTRA_FD_BASE + offset as RawFd).map_err(io::Error::from)?;
            }
            Ok(())
        });
    }

    let child = cmd
        .spawn()
        .map_err(|source| SpawnError::Start { program: program.clone(), source })?;

    debug!(pid = child.id(), program = %program, "Process spawned");

    Ok(child)
}

fn terminal_stdio(terminal: &OwnedFd) -> SpawnResult<Stdio> {
    terminal
        .try_clone()
        .map(Stdio::from)
        .map_err(SpawnError::Handle)
}

/// Send `signal` to the process group led by `pgid`.
///
/// A group that no longer exists is not an error.
pub(crate) fn signal_group(pgid: i32, signal: Signal) -> Result<(), ProcessError> {
    match signal::kill(Pid::from_raw(-pgid), signal) {
        Ok(()) => {
            debug!(pgid, signal = %signal, "Signalled process group");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            // Process already gone
            Ok(())
        }
        Err(source) => Err(ProcessError::Signal {
            signal,
            pgid,
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status() {
        assert!(ExitStatus::success().is_success());
        assert!(!ExitStatus::with_code(1).is_success());
        assert!(!ExitStatus::signaled(9).is_success());
    }

    #[test]
    fn exit_status_display() {
        assert_eq!(ExitStatus::with_code(3).to_string(), "exit code 3");
        assert_eq!(ExitStatus::signaled(9).to_string(), "killed by SIGKILL");
    }

    #[test]
    fn exit_status_from_std() {
        let status = Command::new("sh").args(["-c", "exit 3"]).status().unwrap();
        assert_eq!(ExitStatus::from(status), ExitStatus::with_code(3));

        let status = Command::new("true").status().unwrap();
        assert!(ExitStatus::from(status).is_success());
    }

    #[test]
    fn signal_missing_group_is_ok() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();

        // The reaped child never led a group of its own
        assert!(signal_group(pid, Signal::SIGTERM).is_ok());
    }

    #[test]
    fn reject_empty_program() {
        let pty = crate::pty::open(Default::default()).unwrap();
        let result = spawn_in_terminal(&CommandSpec::new(""), &pty.slave);
        assert!(matches!(result, Err(SpawnError::InvalidCommand(_))));
    }
}
