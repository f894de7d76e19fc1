use crate::{error::Error, fd::Fd};
use nix::errno::Errno;
use nix::sys::epoll::{
    epoll_create1, epoll_ctl, epoll_wait, EpollCreateFlags, EpollEvent, EpollFlags, EpollOp,
};
use std::collections::HashMap;
use std::os::unix::io::RawFd;

/// A specialized wrapper around epoll(7). Only supports acting on
/// descriptors being readable.
///
/// Registration maps an fd to a caller-chosen token; the owner of the loop
/// matches on the token to dispatch. There is no unregistering: the kernel
/// drops a closed fd from the epoll set, and the next `watch` on a reused
/// fd overwrites the token entry.
pub struct Reactor<T> {
    epfd: Option<Fd>,
    tokens: HashMap<RawFd, T>,
}

impl<T: Copy> Reactor<T> {
    pub fn new() -> Result<Reactor<T>, Error> {
        let epfd = epoll_create1(EpollCreateFlags::EPOLL_CLOEXEC)?;
        Ok(Reactor {
            epfd: Some(Fd::new(epfd)),
            tokens: HashMap::new(),
        })
    }

    /// Monitor `fd` for readability. Watching an fd twice overwrites its
    /// token.
    pub fn watch(&mut self, fd: RawFd, token: T) {
        self.tokens.insert(fd, token);
        if let Some(epfd) = &self.epfd {
            let mut ev = EpollEvent::new(EpollFlags::EPOLLIN, fd as u64);
            let _ = epoll_ctl(epfd.as_raw(), EpollOp::EpollCtlAdd, fd, &mut ev);
        }
    }

    /// Block until at least one watched descriptor is readable and return
    /// the ready set. Interrupted waits are retried here; after [`stop`]
    /// the result is `Error::Stopped`.
    ///
    /// [`stop`]: Reactor::stop
    pub fn wait(&mut self) -> Result<Vec<(RawFd, T)>, Error> {
        let epfd = match &self.epfd {
            Some(epfd) => epfd,
            None => return Err(Error::Stopped),
        };
        let mut events = [EpollEvent::empty(); 5];
        loop {
            match epoll_wait(epfd.as_raw(), &mut events, -1) {
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
                Ok(n) => {
                    let mut ready = Vec::with_capacity(n);
                    for ev in &events[..n] {
                        let fd = ev.data() as RawFd;
                        if let Some(token) = self.tokens.get(&fd) {
                            ready.push((fd, *token));
                        }
                    }
                    return Ok(ready);
                }
            }
        }
    }

    /// Terminate the loop after the current iteration. Closing the epoll
    /// descriptor is a very explicit and final action; no extra flag
    /// needed.
    pub fn stop(&mut self) {
        tracing::debug!("reactor stopping");
        self.epfd = None;
    }

    pub fn stopped(&self) -> bool {
        self.epfd.is_none()
    }
}
