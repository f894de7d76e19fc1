/*!
 * This crate implements djcl, a lightweight process supervisor.
 *
 * A daemon loads a [`Schedule`] of named commands, forks and execs each of
 * them, and captures their stdout/stderr line by line into a [`Logger`].
 * Operators drive it over a CRLF line-oriented TCP control channel
 * (`start`, `stop`, `list`, `help`, `die`, `exit`).
 *
 * Everything runs on one thread: a [`Reactor`] multiplexes readability over
 * the listening socket, the control clients, the children's output pipes
 * and a [`SelfPipe`] which turns `SIGCHLD` into a poll event.
 *
 * # Platform support
 * Linux only (epoll, `waitid`, `accept4`).
 */

pub mod daemon;
mod error;
mod fd;
mod line_reader;
pub mod log;
pub mod net;
mod pid;
mod pipe;
mod reactor;
mod schedule;
mod selfpipe;
mod server;
pub mod signals;
mod supervisor;

pub use crate::{
    error::Error,
    fd::Fd,
    line_reader::LineReader,
    log::{Logger, Priority},
    pid::Pid,
    pipe::Pipe,
    reactor::Reactor,
    schedule::{Command, Schedule, ScheduleError},
    selfpipe::SelfPipe,
    server::Server,
    supervisor::Supervisor,
};
