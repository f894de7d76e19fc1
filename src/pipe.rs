use crate::{error::Error, fd::Fd};
use nix::{fcntl::OFlag, unistd};
use std::os::unix::io::RawFd;

/// To be used with fork(2), to let the parent read the child's stdout or
/// stderr, separately and non-blocking. Ends up owning the read end, on the
/// parent side. On the child side it is lost in exec().
pub struct Pipe {
    read: Option<Fd>,
    write: Option<Fd>,
}

impl Pipe {
    /// Both ends are close-on-exec; the read end is also non-blocking.
    /// The write end reaches the child through `dup2`, which clears the
    /// close-on-exec flag on the copy.
    pub fn new() -> Result<Pipe, Error> {
        let (rfd, wfd) = unistd::pipe2(OFlag::O_CLOEXEC)?;
        let read = Fd::new(rfd);
        let write = Fd::new(wfd);
        read.set_nonblocking()?;
        Ok(Pipe {
            read: Some(read),
            write: Some(write),
        })
    }

    /// The read descriptor, for the stream table and the reactor.
    pub fn fd(&self) -> RawFd {
        self.read.as_ref().map(Fd::as_raw).unwrap_or(-1)
    }

    /// To be called once on the parent/reader side: gives up the write end.
    pub fn parent(&mut self) {
        self.write.take();
    }

    /// To be called once on the child side: closes the read end and moves
    /// the write end to a nominated descriptor (usually 1 or 2).
    pub fn child(&mut self, target: RawFd) {
        self.read.take();
        if let Some(write) = self.write.take() {
            let _ = unistd::dup2(write.as_raw(), target);
        }
    }
}
