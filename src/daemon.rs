//! The daemon wiring: one reactor, one supervisor, one control server,
//! bound together by a token-dispatch loop. The wiring owns all of them
//! and passes mutable borrows into each dispatch, which is sound because
//! handlers run to completion one at a time.

use crate::{
    error::Error, fd::Fd, log::Logger, reactor::Reactor, schedule::Schedule, server::Server,
    signals, supervisor::Supervisor,
};

/// What a readable descriptor means to the event loop.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Token {
    Listener,
    SelfPipe,
    Stream,
    Client,
}

/// The main event loop. Spawns the schedule, serves the control channel on
/// `lfd`, and runs until an operator says `die`; on the way out the
/// remaining children are asked to stop.
pub fn run(lfd: Fd, schedule: Schedule, log: &mut Logger) -> Result<(), Error> {
    let selfpipe = signals::install()?;

    let mut reactor: Reactor<Token> = Reactor::new()?;
    reactor.watch(selfpipe.read_fd(), Token::SelfPipe);
    reactor.watch(lfd.as_raw(), Token::Listener);

    let mut supervisor =
        Supervisor::new(schedule, log, &mut |fd| reactor.watch(fd, Token::Stream));
    let mut server = Server::new();

    loop {
        let ready = match reactor.wait() {
            Ok(ready) => ready,
            Err(Error::Stopped) => break,
            Err(e) => return Err(e),
        };

        for (fd, token) in ready {
            match token {
                Token::SelfPipe => {
                    // drain first: a signal arriving during the reap just
                    // causes one spurious extra wakeup
                    selfpipe.drain();
                    supervisor.wait(log);
                }
                Token::Listener => {
                    server.connect(fd, log, &mut |fd| reactor.watch(fd, Token::Client));
                }
                Token::Client => {
                    let die = server.read(fd, &mut supervisor, log, &mut |fd| {
                        reactor.watch(fd, Token::Stream)
                    });
                    if die {
                        reactor.stop();
                    }
                }
                Token::Stream => supervisor.on_read(fd, log),
            }
        }
    }

    tracing::debug!("event loop finished");
    supervisor.shutdown(log);
    Ok(())
}
