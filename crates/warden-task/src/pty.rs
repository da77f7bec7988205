//! Pseudo-terminal allocation

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd};

use crate::{SpawnError, SpawnResult};

/// Terminal window size reported to the child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

pub(crate) struct Pty {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Open a terminal pair in raw mode.
///
/// Raw mode disables echo and line discipline, so input written to the
/// master reaches the child unchanged and is not reflected back as output.
pub(crate) fn open(size: WindowSize) -> SpawnResult<Pty> {
    let winsize = Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    let pair = openpty(Some(&winsize), None).map_err(SpawnError::PtyAllocation)?;

    // Neither end may leak into children spawned later by this process
    set_cloexec(&pair.master)?;
    set_cloexec(&pair.slave)?;

    let mut termios = tcgetattr(&pair.slave).map_err(SpawnError::Terminal)?;
    cfmakeraw(&mut termios);
    tcsetattr(&pair.slave, SetArg::TCSANOW, &termios).map_err(SpawnError::Terminal)?;

    Ok(Pty {
        master: pair.master,
        slave: pair.slave,
    })
}

fn set_cloexec(fd: &OwnedFd) -> SpawnResult<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map(|_| ())
        .map_err(SpawnError::Terminal)
}

/// Reader over the master side.
///
/// Linux reports `EIO` once every slave descriptor is closed; that is the
/// terminal's end of file.
pub(crate) struct PtyReader {
    file: File,
}

impl PtyReader {
    pub fn new(master: OwnedFd) -> Self {
        Self {
            file: File::from(master),
        }
    }
}

impl Read for PtyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.read(buf) {
            Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => Ok(0),
            other => other,
        }
    }
}
