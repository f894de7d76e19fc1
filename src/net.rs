//! The listening socket for the control channel.

use crate::{error::Error, fd::Fd};
use nix::sys::socket::{
    bind, getsockname, listen, setsockopt, socket, sockopt, AddressFamily, SockFlag,
    SockaddrIn, SockaddrIn6, SockaddrStorage, SockType,
};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::RawFd;

const RCVBUF: usize = 8192;
const BACKLOG: usize = 10;

/// Create a listening socket on host:port (the wildcard address if `host`
/// is absent). Does everything including listen(). The name-resolution
/// layer decides which address families come back; the first one that
/// binds wins.
pub fn listening_socket(host: Option<&str>, port: &str) -> Result<Fd, Error> {
    let target = format!("{}:{}", host.unwrap_or("0.0.0.0"), port);
    let addrs = target
        .to_socket_addrs()
        .map_err(|_| Error::Resolve(target.clone()))?;

    let mut last = Error::Resolve(target);
    for addr in addrs {
        let family = match addr {
            SocketAddr::V4(_) => AddressFamily::Inet,
            SocketAddr::V6(_) => AddressFamily::Inet6,
        };
        let fd = match socket(
            family,
            SockType::Stream,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            None,
        ) {
            Ok(fd) => Fd::new(fd),
            Err(e) => {
                last = e.into();
                continue;
            }
        };
        if let Err(e) = setsockopt(fd.as_raw(), sockopt::ReuseAddr, &true) {
            last = e.into();
            continue;
        }
        let bound = match addr {
            SocketAddr::V4(a) => bind(fd.as_raw(), &SockaddrIn::from(a)),
            SocketAddr::V6(a) => bind(fd.as_raw(), &SockaddrIn6::from(a)),
        };
        match bound {
            Ok(()) => {
                setsockopt(fd.as_raw(), sockopt::RcvBuf, &RCVBUF)?;
                listen(fd.as_raw(), BACKLOG)?;
                return Ok(fd);
            }
            Err(e) => last = e.into(),
        }
    }
    Err(last)
}

/// The port the socket actually listens on; interesting when it was bound
/// to port 0.
pub fn local_port(fd: RawFd) -> Result<u16, Error> {
    let ss: SockaddrStorage = getsockname(fd)?;
    if let Some(sin) = ss.as_sockaddr_in() {
        Ok(sin.port())
    } else if let Some(sin6) = ss.as_sockaddr_in6() {
        Ok(sin6.port())
    } else {
        Err(Error::Resolve("unnamed socket".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};

    #[test]
    fn binds_and_listens_on_an_ephemeral_port() {
        let fd = listening_socket(Some("127.0.0.1"), "0").unwrap();
        let port = local_port(fd.as_raw()).unwrap();
        assert_ne!(port, 0);
        // a client can actually connect
        let stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        drop(stream);
    }

    #[test]
    fn listener_is_nonblocking_and_cloexec() {
        let fd = listening_socket(Some("127.0.0.1"), "0").unwrap();
        let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw(), FcntlArg::F_GETFL).unwrap());
        assert!(flags.contains(OFlag::O_NONBLOCK));
        let fdflags = FdFlag::from_bits_truncate(fcntl(fd.as_raw(), FcntlArg::F_GETFD).unwrap());
        assert!(fdflags.contains(FdFlag::FD_CLOEXEC));
    }

    #[test]
    fn bad_port_is_reported() {
        assert!(listening_socket(None, "notaport").is_err());
    }
}
