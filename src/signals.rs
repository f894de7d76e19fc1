//! Process-wide signal wiring. A `SIGCHLD` does nothing but write one byte
//! into a self-pipe; all bookkeeping happens on the main thread once the
//! reactor wakes up on the read end. The pipe is drained before acting, so
//! a signal arriving mid-action stays visible.

use crate::{error::Error, selfpipe::SelfPipe};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use once_cell::sync::OnceCell;

/// The handler has no arguments to reach state through, so the pipe it
/// writes to is process-global.
static PIPE: OnceCell<SelfPipe> = OnceCell::new();

extern "C" fn on_sigchld(_: libc::c_int) {
    if let Some(pipe) = PIPE.get() {
        pipe.notify();
    }
}

/// Install the `SIGCHLD` handler and ignore `SIGPIPE`, and hand back the
/// self-pipe whose read end the reactor should watch. Idempotent; there is
/// no runtime recovery from a broken self-pipe, so the first failure is
/// terminal.
pub fn install() -> Result<&'static SelfPipe, Error> {
    let pipe = PIPE.get_or_try_init(SelfPipe::new)?;

    // SA_NOCLDSTOP: stopped children are not exits, and must not wake the
    // reaper. SA_RESTART: interrupted syscalls other than the wait resume.
    let chld = SigAction::new(
        SigHandler::Handler(on_sigchld),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    let pipe_ign = SigAction::new(
        SigHandler::SigIgn,
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGCHLD, &chld)?;
        sigaction(Signal::SIGPIPE, &pipe_ign)?;
    }
    tracing::debug!("signal handlers installed");
    Ok(pipe)
}
