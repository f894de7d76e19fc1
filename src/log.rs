//! The unified log sink. A daemon should log to stderr until it goes into
//! the background, so [`Logger`] does too, with a time-of-day prefix; after
//! [`Logger::activate`] messages go to syslog(3) at their priority instead.
//!
//! Messages are composed into a fixed-size buffer; overlong messages are
//! simply truncated, and the buffer is reset for the next message.

use std::ffi::CString;
use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::os::raw::c_int;

/// The standard syslog priority ladder.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Priority {
    Emerg,
    Alert,
    Crit,
    Err,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Priority {
    fn syslog_level(self) -> c_int {
        match self {
            Priority::Emerg => libc::LOG_EMERG,
            Priority::Alert => libc::LOG_ALERT,
            Priority::Crit => libc::LOG_CRIT,
            Priority::Err => libc::LOG_ERR,
            Priority::Warning => libc::LOG_WARNING,
            Priority::Notice => libc::LOG_NOTICE,
            Priority::Info => libc::LOG_INFO,
            Priority::Debug => libc::LOG_DEBUG,
        }
    }
}

const BUF_SIZE: usize = 500;
const IDENT: &[u8] = b"djcl\0";
const SYSLOG_FMT: &[u8] = b"%s\0";

enum Sink {
    Writer(Box<dyn Write + Send>),
    Syslog,
}

pub struct Logger {
    sink: Sink,
}

impl Logger {
    /// A logger writing to standard error.
    pub fn new() -> Logger {
        Logger::with_writer(Box::new(io::stderr()))
    }

    /// A logger writing somewhere else; lets tests capture the log.
    pub fn with_writer(writer: Box<dyn Write + Send>) -> Logger {
        Logger {
            sink: Sink::Writer(writer),
        }
    }

    /// Switch to syslog. For use once the daemon has detached from its
    /// terminal.
    pub fn activate(&mut self) {
        unsafe {
            libc::openlog(IDENT.as_ptr().cast(), 0, libc::LOG_DAEMON);
        }
        self.sink = Sink::Syslog;
    }

    pub fn log(&mut self, prio: Priority, args: fmt::Arguments<'_>) {
        let mut msg = MsgBuf::new();
        let _ = msg.write_fmt(args);
        match &mut self.sink {
            Sink::Writer(w) => {
                let mut line = Vec::with_capacity(16 + msg.len);
                time_of_day(&mut line);
                line.push(b' ');
                line.extend_from_slice(msg.as_bytes());
                line.push(b'\n');
                let _ = w.write_all(&line);
            }
            Sink::Syslog => {
                let bytes = msg.as_bytes();
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                if let Ok(text) = CString::new(&bytes[..end]) {
                    unsafe {
                        libc::syslog(prio.syslog_level(), SYSLOG_FMT.as_ptr().cast(), text.as_ptr());
                    }
                }
            }
        }
    }

    pub fn err(&mut self, args: fmt::Arguments<'_>) {
        self.log(Priority::Err, args)
    }

    pub fn warning(&mut self, args: fmt::Arguments<'_>) {
        self.log(Priority::Warning, args)
    }

    pub fn info(&mut self, args: fmt::Arguments<'_>) {
        self.log(Priority::Info, args)
    }

    pub fn debug(&mut self, args: fmt::Arguments<'_>) {
        self.log(Priority::Debug, args)
    }
}

impl Default for Logger {
    fn default() -> Logger {
        Logger::new()
    }
}

/// Fixed-size message buffer; writes past the end disappear.
struct MsgBuf {
    buf: [u8; BUF_SIZE],
    len: usize,
}

impl MsgBuf {
    fn new() -> MsgBuf {
        MsgBuf {
            buf: [0; BUF_SIZE],
            len: 0,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl fmt::Write for MsgBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = BUF_SIZE - self.len;
        let take = room.min(s.len());
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// Current local time as just time of day, e.g. "06:02:00.999". The
/// milliseconds are for debug logging.
fn time_of_day(out: &mut Vec<u8>) {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
        libc::localtime_r(&ts.tv_sec, &mut tm);
    }
    let _ = write!(
        VecWriter(out),
        "{:02}:{:02}:{:02}.{:03}",
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec,
        ts.tv_nsec / 1_000_000
    );
}

struct VecWriter<'a>(&'a mut Vec<u8>);

impl fmt::Write for VecWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}
