use std::fmt;

/// A slightly more convenient `pid_t`: ordered so it can key a map, and
/// rendered as `[N]` in log lines.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(libc::pid_t);

impl Pid {
    pub fn new(raw: libc::pid_t) -> Pid {
        Pid(raw)
    }

    pub fn as_raw(self) -> libc::pid_t {
        self.0
    }
}

impl From<nix::unistd::Pid> for Pid {
    fn from(pid: nix::unistd::Pid) -> Pid {
        Pid(pid.as_raw())
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]", self.0)
    }
}
