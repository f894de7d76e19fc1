use crate::{error::Error, fd::Fd};
use nix::{fcntl::OFlag, unistd};
use std::os::unix::io::RawFd;

/// The usual roundtripping mechanism through the kernel, to turn e.g. a
/// signal into a poll event: the signal handler writes one byte, and the
/// read end becomes readable in the event loop.
///
/// Both ends are non-blocking; a full pipe means a notification is already
/// pending, which is all we need.
pub struct SelfPipe {
    read: Fd,
    write: Fd,
}

impl SelfPipe {
    pub fn new() -> Result<SelfPipe, Error> {
        let (rfd, wfd) = unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
        Ok(SelfPipe {
            read: Fd::new(rfd),
            write: Fd::new(wfd),
        })
    }

    /// Wake up the event loop. Failure (e.g. the pipe being full) is
    /// ignored. Only makes one write(2) call, so it is safe to invoke from
    /// signal context.
    pub fn notify(&self) {
        let _ = unistd::write(self.write.as_raw(), b">");
    }

    /// The read descriptor, for registration with the reactor.
    pub fn read_fd(&self) -> RawFd {
        self.read.as_raw()
    }

    /// Read and discard until the pipe is empty. Must run before the reap
    /// pass, so a notification arriving mid-reap stays visible.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match unistd::read(self.read.as_raw(), &mut buf) {
                Ok(n) if n == buf.len() => continue,
                _ => break,
            }
        }
    }
}
