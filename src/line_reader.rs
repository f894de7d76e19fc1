use nix::errno::Errno;
use nix::unistd;
use std::os::unix::io::RawFd;

/// A stateful stream decoder: bytes go in via non-blocking reads from a
/// descriptor, complete terminator-delimited records come out. Used with
/// `\n` for child output and `\r\n` for the control protocol.
///
/// The internal buffer grows with the longest pending record; the log sink
/// is where oversized messages get truncated.
pub struct LineReader {
    terminator: &'static [u8],
    buf: Vec<u8>,
    closed: bool,
}

impl LineReader {
    pub fn new(terminator: &'static [u8]) -> LineReader {
        LineReader {
            terminator,
            buf: Vec::new(),
            closed: false,
        }
    }

    /// Does one non-blocking read. A read of zero marks end-of-stream;
    /// `EAGAIN` and `EINTR` are transient; any other failure counts as
    /// end-of-stream too, since nothing more can be read past it.
    pub fn feed(&mut self, fd: RawFd) {
        let mut chunk = [0u8; 4096];
        match unistd::read(fd, &mut chunk) {
            Ok(0) => self.closed = true,
            Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => (),
            Err(_) => self.closed = true,
        }
    }

    /// The next complete record, terminator stripped. Repeated calls yield
    /// every buffered complete record in order.
    pub fn next_record(&mut self) -> Option<Vec<u8>> {
        let at = self.find_terminator()?;
        let mut record: Vec<u8> = self.buf.drain(..at + self.terminator.len()).collect();
        record.truncate(at);
        Some(record)
    }

    /// True once the stream has closed and no complete record remains. A
    /// final unterminated fragment is dropped.
    pub fn eof(&self) -> bool {
        self.closed && self.find_terminator().is_none()
    }

    fn find_terminator(&self) -> Option<usize> {
        self.buf
            .windows(self.terminator.len())
            .position(|w| w == self.terminator)
    }
}
