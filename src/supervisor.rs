//! The thing which forks and keeps track of forked processes; the core of
//! djcl.

use crate::{
    line_reader::LineReader,
    log::Logger,
    pid::Pid,
    pipe::Pipe,
    schedule::{Command, Schedule},
};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{self, ForkResult};
use std::collections::{BTreeMap, HashMap};
use std::ffi::CString;
use std::fmt::Write as _;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;

/// One captured output channel of a child: which command it belongs to,
/// whether it is stdout or stderr, the read end of the pipe, and the line
/// reassembly state. Keyed by the pipe's read descriptor.
struct Stream {
    name: String,
    tag: &'static str,
    line: LineReader,
    _pipe: Pipe,
}

/// Owns the child table and the stream table. All operations write their
/// `ok`/`error` outcome as text into a caller-supplied buffer; nothing here
/// panics or unwinds into the event loop.
///
/// New stream descriptors are handed to the `reg` callback so the caller
/// can register them for readability; the supervisor never names the
/// reactor type.
pub struct Supervisor {
    schedule: Schedule,
    children: BTreeMap<Pid, String>,
    streams: HashMap<RawFd, Stream>,
}

impl Supervisor {
    /// Constructing the supervisor includes trying to bring up the whole
    /// schedule.
    pub fn new(
        schedule: Schedule,
        log: &mut Logger,
        reg: &mut dyn FnMut(RawFd),
    ) -> Supervisor {
        let mut sup = Supervisor {
            schedule,
            children: BTreeMap::new(),
            streams: HashMap::new(),
        };
        let cmds: Vec<Command> = sup.schedule.iter().cloned().collect();
        for cmd in &cmds {
            if cmd.valid() {
                sup.spawn(cmd, log, reg);
            }
        }
        sup
    }

    /// Start one named command, unless it is unknown or already running.
    pub fn start(
        &mut self,
        out: &mut String,
        name: &str,
        log: &mut Logger,
        reg: &mut dyn FnMut(RawFd),
    ) {
        if self.pid_of(name).is_some() {
            let _ = write!(out, "error: {} already running", name);
            return;
        }
        let cmd = match self.schedule.find(name) {
            Some(cmd) if cmd.valid() => cmd.clone(),
            Some(_) => {
                let _ = write!(out, "error: {} has nothing to exec", name);
                return;
            }
            None => {
                let _ = write!(out, "error: no such program: {}", name);
                return;
            }
        };
        if self.spawn(&cmd, log, reg) {
            out.push_str("ok");
        } else {
            let _ = write!(out, "error: cannot start {}", name);
        }
    }

    /// Start every schedule entry which isn't already running.
    pub fn start_all(&mut self, out: &mut String, log: &mut Logger, reg: &mut dyn FnMut(RawFd)) {
        let cmds: Vec<Command> = self
            .schedule
            .iter()
            .filter(|cmd| cmd.valid() && self.pid_of(&cmd.name).is_none())
            .cloned()
            .collect();
        let mut n = 0;
        for cmd in &cmds {
            if self.spawn(cmd, log, reg) {
                n += 1;
            }
        }
        let _ = write!(out, "ok started {} programs", n);
    }

    /// Ask one named command to terminate. SIGINT is the whole of the stop
    /// protocol; a child which ignores it stays tracked until it exits.
    pub fn stop(&mut self, out: &mut String, name: &str) {
        if self.schedule.find(name).is_none() {
            let _ = write!(out, "error: no such program: {}", name);
            return;
        }
        match self.pid_of(name) {
            Some(pid) => match kill(unistd::Pid::from_raw(pid.as_raw()), Signal::SIGINT) {
                Ok(()) => out.push_str("ok"),
                Err(e) => {
                    let _ = write!(out, "error: cannot stop {}: {}", name, e);
                }
            },
            None => {
                let _ = write!(out, "error: {} not running", name);
            }
        }
    }

    pub fn stop_all(&mut self, out: &mut String) {
        let mut n = 0;
        for pid in self.children.keys() {
            if kill(unistd::Pid::from_raw(pid.as_raw()), Signal::SIGINT).is_ok() {
                n += 1;
            }
        }
        let _ = write!(out, "ok stopped {} programs", n);
    }

    /// One line per schedule entry: the pid, or `-` for a command that
    /// isn't running, then the name.
    pub fn list(&self, out: &mut String) {
        for cmd in self.schedule.iter() {
            match self.pid_of(&cmd.name) {
                Some(pid) => {
                    let _ = writeln!(out, "{:>6} {}", pid.as_raw(), cmd.name);
                }
                None => {
                    let _ = writeln!(out, "{:>6} {}", '-', cmd.name);
                }
            }
        }
    }

    /// Reap any children which have terminated. The name is a bit
    /// misleading: the call doesn't block.
    ///
    /// The streams cannot sensibly be closed here: the child might have
    /// forked, and some grandchild might still want to write.
    pub fn wait(&mut self, log: &mut Logger) {
        loop {
            let mut si = std::mem::MaybeUninit::<libc::siginfo_t>::zeroed();
            let rc = unsafe {
                libc::waitid(
                    libc::P_ALL,
                    0,
                    si.as_mut_ptr(),
                    libc::WEXITED | libc::WNOHANG,
                )
            };
            if rc == -1 {
                break;
            }
            let si = unsafe { si.assume_init() };
            let raw = unsafe { si.si_pid() };
            if raw == 0 {
                break;
            }
            let pid = Pid::new(raw);
            let cause = exit_cause(&si);
            match self.children.remove(&pid) {
                Some(name) => log.info(format_args!("{} {}: {}", name, pid, cause)),
                None => {
                    // Not sure why we'd be notified about a process
                    // terminating when we don't remember forking it, but
                    // anyway:
                    log.warning(format_args!("{} (unknown): {}", pid, cause));
                }
            }
        }
    }

    /// A stdout or stderr pipe has become readable, which might mean
    /// there's new text on it, or that it has closed.
    pub fn on_read(&mut self, fd: RawFd, log: &mut Logger) {
        let stream = match self.streams.get_mut(&fd) {
            Some(stream) => stream,
            None => return,
        };
        stream.line.feed(fd);
        while let Some(rec) = stream.line.next_record() {
            log.info(format_args!(
                "{}: {}: {}",
                stream.name,
                stream.tag,
                String::from_utf8_lossy(&rec)
            ));
        }
        if stream.line.eof() {
            log.info(format_args!("{}: {}: EOF", stream.name, stream.tag));
            self.streams.remove(&fd);
        }
    }

    /// Ask the whole fleet to terminate, for when the supervisor itself is
    /// going away.
    pub fn shutdown(&mut self, log: &mut Logger) {
        for (pid, name) in &self.children {
            tracing::debug!(pid = pid.as_raw(), name = name.as_str(), "stopping");
            let _ = kill(unistd::Pid::from_raw(pid.as_raw()), Signal::SIGINT);
        }
        if !self.children.is_empty() {
            log.info(format_args!(
                "asked {} remaining programs to stop",
                self.children.len()
            ));
        }
    }

    fn pid_of(&self, name: &str) -> Option<Pid> {
        self.children
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(pid, _)| *pid)
    }

    /// Fork and exec one command, and install its pid and streams in the
    /// tables. Fork failure is logged and reported as `false`.
    fn spawn(&mut self, cmd: &Command, log: &mut Logger, reg: &mut dyn FnMut(RawFd)) -> bool {
        let spawned = match spawn(cmd, log) {
            Some(spawned) => spawned,
            None => return false,
        };
        let (pid, stdout, stderr) = spawned;
        tracing::debug!(pid = pid.as_raw(), name = cmd.name.as_str(), "spawned");
        self.children.insert(pid, cmd.name.clone());
        for (tag, pipe) in [("stdout", stdout), ("stderr", stderr)] {
            let fd = pipe.fd();
            self.streams.remove(&fd);
            self.streams.insert(
                fd,
                Stream {
                    name: cmd.name.clone(),
                    tag,
                    line: LineReader::new(b"\n"),
                    _pipe: pipe,
                },
            );
            reg(fd);
        }
        true
    }
}

/// Render a `waitid` result as e.g. `exit 0`, `aborted`, `killed by
/// SIGILL`, `killed by signal 42`.
fn exit_cause(si: &libc::siginfo_t) -> String {
    let status = unsafe { si.si_status() };
    match si.si_code {
        libc::CLD_EXITED => format!("exit {}", status),
        libc::CLD_KILLED | libc::CLD_DUMPED => match status {
            libc::SIGABRT => "aborted".to_owned(),
            libc::SIGHUP => "killed by SIGHUP".to_owned(),
            libc::SIGILL => "killed by SIGILL".to_owned(),
            libc::SIGINT => "killed by SIGINT".to_owned(),
            libc::SIGKILL => "killed by SIGKILL".to_owned(),
            libc::SIGSEGV => "killed by SIGSEGV".to_owned(),
            libc::SIGTERM => "killed by SIGTERM".to_owned(),
            n => format!("killed by signal {}", n),
        },
        _ => String::new(),
    }
}

/// Fork, and exec `cmd` in the child with its stdout and stderr replaced
/// by the pipes' write ends. Returns the parent-side halves.
fn spawn(cmd: &Command, log: &mut Logger) -> Option<(Pid, Pipe, Pipe)> {
    let mut stdout = match Pipe::new() {
        Ok(pipe) => pipe,
        Err(e) => {
            log.err(format_args!("cannot pipe: {}", e));
            return None;
        }
    };
    let mut stderr = match Pipe::new() {
        Ok(pipe) => pipe,
        Err(e) => {
            log.err(format_args!("cannot pipe: {}", e));
            return None;
        }
    };
    // Everything exec needs is materialized before forking; between fork
    // and exec the child only makes async-signal-safe calls.
    let image = match ExecImage::new(cmd) {
        Some(image) => image,
        None => {
            log.err(format_args!("{}: malformed argv or environment", cmd.name));
            return None;
        }
    };

    match unsafe { unistd::fork() } {
        Err(e) => {
            log.err(format_args!("cannot fork: {}", e));
            None
        }
        Ok(ForkResult::Parent { child }) => {
            stdout.parent();
            stderr.parent();
            Some((Pid::from(child), stdout, stderr))
        }
        Ok(ForkResult::Child) => {
            stdout.child(1);
            stderr.child(2);
            image.exec()
        }
    }
}

/// The argv, environment and cwd of a child, flattened into the C strings
/// exec wants, plus preformatted diagnostics for the failure paths.
struct ExecImage {
    argv: Vec<CString>,
    envp: Vec<CString>,
    cwd: CString,
    chdir_failed: Vec<u8>,
    exec_failed: Vec<u8>,
}

impl ExecImage {
    fn new(cmd: &Command) -> Option<ExecImage> {
        let mut argv = Vec::with_capacity(cmd.argv.len());
        for arg in &cmd.argv {
            argv.push(CString::new(arg.as_str()).ok()?);
        }
        if argv.is_empty() {
            return None;
        }
        // getenv resolves a duplicate key to its first occurrence, so an
        // inherited variable must be dropped for a command's binding of
        // the same name to take effect
        let overridden: Vec<&[u8]> = cmd
            .env
            .iter()
            .map(|binding| binding.split('=').next().unwrap_or("").as_bytes())
            .collect();
        let mut envp = Vec::new();
        for (key, val) in std::env::vars_os() {
            if overridden.contains(&key.as_bytes()) {
                continue;
            }
            let mut kv = key.as_bytes().to_vec();
            kv.push(b'=');
            kv.extend_from_slice(val.as_bytes());
            envp.push(CString::new(kv).ok()?);
        }
        for binding in &cmd.env {
            envp.push(CString::new(binding.as_str()).ok()?);
        }
        Some(ExecImage {
            argv,
            envp,
            cwd: CString::new(cmd.cwd.as_str()).ok()?,
            chdir_failed: format!("error: {}: cannot chdir to {}: ", cmd.name, cmd.cwd)
                .into_bytes(),
            exec_failed: format!("error: {}: exec failed: ", cmd.name).into_bytes(),
        })
    }

    /// In the child process. As usual after forking, it's a matter of
    /// setting $CWD, and lastly calling exec. A diagnostic on the
    /// inherited stderr pipe is all a failure can amount to.
    fn exec(&self) -> ! {
        if unistd::chdir(self.cwd.as_c_str()).is_err() {
            die(&self.chdir_failed);
        }
        let _ = unistd::execvpe(&self.argv[0], &self.argv, &self.envp);
        die(&self.exec_failed);
    }
}

/// Write `msg` and the current errno text to stderr, then exit 1. Makes
/// only write(2) calls; no allocation between fork and _exit.
fn die(msg: &[u8]) -> ! {
    let err = errno::errno();
    let text = unsafe { std::ffi::CStr::from_ptr(libc::strerror(err.0)) };
    let _ = unistd::write(2, msg);
    let _ = unistd::write(2, text.to_bytes());
    let _ = unistd::write(2, b"\n");
    unsafe { libc::_exit(1) }
}
