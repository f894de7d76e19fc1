use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::os::unix::io::{AsRawFd, RawFd};

/// Represents an owned file descriptor, closed on drop.
pub struct Fd(RawFd);

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.as_raw()
    }
}

impl Fd {
    pub fn new(inner: RawFd) -> Self {
        Fd(inner)
    }

    pub fn as_raw(&self) -> RawFd {
        self.0
    }

    /// Adds `O_NONBLOCK` to the descriptor's file status flags.
    pub fn set_nonblocking(&self) -> nix::Result<()> {
        let flags = fcntl(self.0, FcntlArg::F_GETFL)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(self.0, FcntlArg::F_SETFL(flags)).map(drop)
    }
}

impl std::fmt::Debug for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Fd({})", self.0)
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.0);
    }
}
