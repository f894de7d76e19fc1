//! TCP server for the user interface, where you can tell djcl to start
//! programs, and stuff. One CRLF-terminated command line in; one or more
//! CRLF-terminated reply lines out.

use crate::{fd::Fd, line_reader::LineReader, log::Logger, supervisor::Supervisor};
use nix::sys::socket::{accept4, getpeername, SockFlag, SockaddrStorage};
use nix::unistd;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;

const GREETING: &str = "ok Hello. This is djcl; please type commands.";

const USAGE: &str = " usage:\n\
                     \x20  start [name]\n\
                     \x20  stop  [name]\n\
                     \x20  list\n\
                     \x20  help\n\
                     \x20  die\n\
                     \x20  exit";

/// What a dispatched command asks of the connection afterwards.
enum Verdict {
    Keep,
    Close,
    Die,
}

struct Client {
    _fd: Fd,
    peer: String,
    line: LineReader,
}

/// Accepts control connections and executes the line commands arriving on
/// them against the supervisor.
pub struct Server {
    clients: HashMap<RawFd, Client>,
}

impl Server {
    pub fn new() -> Server {
        Server {
            clients: HashMap::new(),
        }
    }

    /// The listening socket is readable; let a client connect. The new
    /// descriptor is handed to `reg` for readability registration.
    pub fn connect(&mut self, lfd: RawFd, log: &mut Logger, reg: &mut dyn FnMut(RawFd)) {
        let fd = match accept4(lfd, SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC) {
            Ok(fd) => Fd::new(fd),
            Err(_) => return,
        };
        let peer = peer_name(fd.as_raw());
        log.info(format_args!("new connection from {}", peer));
        tracing::debug!(%peer, "control connection");

        let mut resp = String::from(GREETING);
        if drain(fd.as_raw(), &mut resp).is_err() {
            log.info(format_args!("{}: closing connection", peer));
            return;
        }

        let raw = fd.as_raw();
        self.clients.remove(&raw);
        self.clients.insert(
            raw,
            Client {
                _fd: fd,
                peer,
                line: LineReader::new(b"\r\n"),
            },
        );
        reg(raw);
    }

    /// A client socket is readable; read, and maybe find commands to
    /// execute, or find out that the socket got closed. Returns true when
    /// an operator asked the whole daemon to die.
    pub fn read(
        &mut self,
        fd: RawFd,
        sup: &mut Supervisor,
        log: &mut Logger,
        reg: &mut dyn FnMut(RawFd),
    ) -> bool {
        let client = match self.clients.get_mut(&fd) {
            Some(client) => client,
            None => return false,
        };
        client.line.feed(fd);

        let mut die = false;
        let mut close = false;
        let mut resp = String::new();
        while let Some(rec) = client.line.next_record() {
            let cmd = String::from_utf8_lossy(&rec).into_owned();
            match exec(&mut resp, &cmd, sup, log, reg) {
                Verdict::Keep => (),
                Verdict::Close => close = true,
                Verdict::Die => die = true,
            }
            if drain(fd, &mut resp).is_err() {
                close = true;
                break;
            }
            if close || die {
                break;
            }
        }

        let eof = client.line.eof();
        let peer = client.peer.clone();
        if eof {
            log.info(format_args!("{}: connection closed by peer", peer));
            self.clients.remove(&fd);
        } else if close {
            log.info(format_args!("{}: closing connection", peer));
            self.clients.remove(&fd);
        }
        die
    }
}

impl Default for Server {
    fn default() -> Server {
        Server::new()
    }
}

/// Execute a single textual command. Writes the response to `resp`
/// without line-terminating it; the verdict says what should happen to
/// the connection.
fn exec(
    resp: &mut String,
    line: &str,
    sup: &mut Supervisor,
    log: &mut Logger,
    reg: &mut dyn FnMut(RawFd),
) -> Verdict {
    let mut words = line.split_whitespace();
    let cmd = match words.next() {
        Some(cmd) => cmd,
        None => {
            resp.push_str("ok");
            return Verdict::Keep;
        }
    };
    let name = words.next();

    match (cmd, name) {
        ("start", Some(name)) => sup.start(resp, name, log, reg),
        ("start", None) => sup.start_all(resp, log, reg),
        ("stop", Some(name)) => sup.stop(resp, name),
        ("stop", None) => sup.stop_all(resp),
        ("list", _) => {
            sup.list(resp);
            resp.push_str("ok");
        }
        ("die", _) => {
            resp.push_str("ok djcl exiting");
            return Verdict::Die;
        }
        ("exit", _) => {
            resp.push_str("ok closing connection");
            return Verdict::Close;
        }
        ("help", _) => {
            resp.push_str("ok");
            resp.push_str(USAGE);
        }
        _ => {
            resp.push_str("error");
            resp.push_str(USAGE);
        }
    }
    Verdict::Keep
}

/// Write the buffered response, each internal line CRLF-terminated and a
/// final CRLF appended, in one attempt. Then empty the buffer so it can be
/// reused. We have no support for buffering while sockets are blocked; a
/// write that doesn't complete costs the peer its connection.
fn drain(fd: RawFd, resp: &mut String) -> io::Result<()> {
    let mut wire = resp.replace('\n', "\r\n");
    wire.push_str("\r\n");
    resp.clear();
    match unistd::write(fd, wire.as_bytes()) {
        Ok(n) if n == wire.len() => Ok(()),
        Ok(_) => Err(io::ErrorKind::WriteZero.into()),
        Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
    }
}

fn peer_name(fd: RawFd) -> String {
    match getpeername::<SockaddrStorage>(fd) {
        Ok(ss) => {
            if let Some(sin) = ss.as_sockaddr_in() {
                sin.to_string()
            } else if let Some(sin6) = ss.as_sockaddr_in6() {
                sin6.to_string()
            } else {
                "unknown".to_owned()
            }
        }
        Err(e) => format!("unknown({})", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Schedule;

    fn fixture() -> (Supervisor, Logger) {
        let mut log = Logger::with_writer(Box::new(std::io::sink()));
        // /bin/true exits at once but stays tracked: nothing reaps here
        let schedule = Schedule::parse("a.exec = /bin/true\n").unwrap();
        let sup = Supervisor::new(schedule, &mut log, &mut |_| ());
        (sup, log)
    }

    fn run(line: &str) -> (String, &'static str) {
        let (mut sup, mut log) = fixture();
        let mut resp = String::new();
        let verdict = exec(&mut resp, line, &mut sup, &mut log, &mut |_| ());
        let verdict = match verdict {
            Verdict::Keep => "keep",
            Verdict::Close => "close",
            Verdict::Die => "die",
        };
        (resp, verdict)
    }

    #[test]
    fn empty_command_is_ok() {
        assert_eq!(run(""), ("ok".to_owned(), "keep"));
        assert_eq!(run("   "), ("ok".to_owned(), "keep"));
    }

    #[test]
    fn help_and_unknown_share_the_usage_text() {
        let (help, _) = run("help");
        let (unknown, verdict) = run("frobnicate");
        assert!(help.starts_with("ok usage:"));
        assert!(unknown.starts_with("error usage:"));
        assert_eq!(verdict, "keep");
        assert_eq!(help.strip_prefix("ok"), unknown.strip_prefix("error"));
        for cmd in ["start [name]", "stop  [name]", "list", "help", "die", "exit"] {
            assert!(help.contains(cmd), "usage lacks {}", cmd);
        }
    }

    #[test]
    fn die_and_exit_verdicts() {
        assert_eq!(run("die"), ("ok djcl exiting".to_owned(), "die"));
        assert_eq!(run("exit"), ("ok closing connection".to_owned(), "close"));
    }

    #[test]
    fn start_duplicate_is_refused() {
        let (resp, _) = run("start a");
        assert_eq!(resp, "error: a already running");
    }

    #[test]
    fn list_ends_with_ok() {
        let (resp, _) = run("list");
        let mut lines = resp.lines().rev();
        assert_eq!(lines.next(), Some("ok"));
        let a = lines.next().unwrap();
        assert!(a.ends_with(" a"));
    }

    #[test]
    fn replies_are_crlf_framed_on_the_wire() {
        let (r, w) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).unwrap();
        let (r, w) = (Fd::new(r), Fd::new(w));
        let mut resp = String::from("error usage:\n   start [name]");
        drain(w.as_raw(), &mut resp).unwrap();
        assert_eq!(resp, "");
        let mut buf = [0u8; 64];
        let n = nix::unistd::read(r.as_raw(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"error usage:\r\n   start [name]\r\n");
    }
}
