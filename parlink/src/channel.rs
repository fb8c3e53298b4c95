//! Byte channel adapter.
//!
//! [`Channel`] wraps a raw byte link behind deadline-aware read primitives.
//! The link is expected to behave like a serial port: `read` blocks for a
//! short internal timeout and fails with [`std::io::ErrorKind::TimedOut`]
//! (or `WouldBlock`) when no byte arrived. The channel loops such reads
//! against a caller-supplied deadline, so the port's own timeout only bounds
//! how often the cancellation token is polled.
//!
//! Production code hands a serial port to [`Channel::new`]; the test suite
//! hands one end of [`mem_link_pair`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::frame::MAX_LINE;

/// A raw, ordered, possibly lossy byte pipe between two peers.
///
/// On top of [`Read`] and [`Write`], a link can drop whatever sits in its
/// buffers. For a serial port that maps to the driver's buffer clear; the
/// in-memory link discards its queue.
pub trait Link: Read + Write {
    fn clear_input(&mut self) -> io::Result<()>;
    fn clear_output(&mut self) -> io::Result<()>;
}

/// Deadline-aware channel over a [`Link`].
pub struct Channel<L: Link> {
    link: L,
    cancel: CancelToken,
}

impl<L: Link> Channel<L> {
    pub fn new(link: L, cancel: CancelToken) -> Self {
        Channel { link, cancel }
    }

    /// True once the cancellation token fired.
    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Writes all of `bytes` and flushes the link.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_interrupt()?;
        self.link.write_all(bytes).map_err(Error::LinkBroken)?;
        self.link.flush().map_err(Error::LinkBroken)
    }

    /// Reads exactly `buf.len()` bytes, accumulating partial reads until
    /// `deadline` elapses.
    pub fn read_exact(&mut self, buf: &mut [u8], deadline: Duration) -> Result<()> {
        let start = Instant::now();
        let mut filled = 0;
        while filled < buf.len() {
            self.check_interrupt()?;
            match self.link.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::LinkBroken(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the link",
                    )))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    if start.elapsed() >= deadline {
                        return Err(Error::LinkTimeout);
                    }
                }
                Err(e) => return Err(Error::LinkBroken(e)),
            }
        }
        Ok(())
    }

    /// Reads up to and including the next `\n`, or fails with
    /// [`Error::LinkTimeout`] once `deadline` elapses. Lines are capped at
    /// [`MAX_LINE`] bytes; an over-long line is returned as-is (without a
    /// terminator) and left to the caller to reject.
    pub fn read_line(&mut self, deadline: Duration) -> Result<Vec<u8>> {
        let start = Instant::now();
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.check_interrupt()?;
            match self.link.read(&mut byte) {
                Ok(0) => {
                    return Err(Error::LinkBroken(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the link",
                    )))
                }
                Ok(_) => {
                    line.push(byte[0]);
                    if byte[0] == b'\n' || line.len() >= MAX_LINE {
                        return Ok(line);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    if start.elapsed() >= deadline {
                        return Err(Error::LinkTimeout);
                    }
                }
                Err(e) => return Err(Error::LinkBroken(e)),
            }
        }
    }

    /// Drops whatever sits in the link's input buffer.
    pub fn flush_input(&mut self) -> Result<()> {
        self.link.clear_input().map_err(Error::LinkBroken)
    }

    /// Drops whatever sits in the link's output buffer.
    pub fn flush_output(&mut self) -> Result<()> {
        self.link.clear_output().map_err(Error::LinkBroken)
    }
}

// ---------------------------------------------------------------------------
// In-memory link
// ---------------------------------------------------------------------------

/// How long a [`MemLink`] read blocks before reporting `TimedOut`, mimicking
/// a serial port's base timeout at test-friendly scale.
const POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    avail: Condvar,
}

impl Pipe {
    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.avail.notify_all();
    }
}

/// One end of an in-memory full-duplex byte link.
///
/// Used by the test suite in place of a serial port, and handy for loopback
/// experiments. Reads block for a short poll interval and then fail with
/// `TimedOut`, like a serial port with a base timeout; once the peer end is
/// dropped, reads drain the remaining bytes and then report end-of-file.
pub struct MemLink {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
}

/// Creates a connected pair of in-memory links.
pub fn mem_link_pair() -> (MemLink, MemLink) {
    let a = Arc::new(Pipe::default());
    let b = Arc::new(Pipe::default());
    (
        MemLink {
            rx: a.clone(),
            tx: b.clone(),
        },
        MemLink { rx: b, tx: a },
    )
}

impl Read for MemLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.rx.state.lock().unwrap();
        if state.buf.is_empty() && !state.closed {
            state = self.rx.avail.wait_timeout(state, POLL).unwrap().0;
        }
        if state.buf.is_empty() {
            return if state.closed {
                Ok(0)
            } else {
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            };
        }
        let n = buf.len().min(state.buf.len());
        for slot in buf[..n].iter_mut() {
            *slot = state.buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MemLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.tx.state.lock().unwrap();
        if state.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer end dropped",
            ));
        }
        state.buf.extend(buf);
        self.tx.avail.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for MemLink {
    fn clear_input(&mut self) -> io::Result<()> {
        self.rx.state.lock().unwrap().buf.clear();
        Ok(())
    }

    fn clear_output(&mut self) -> io::Result<()> {
        self.tx.state.lock().unwrap().buf.clear();
        Ok(())
    }
}

impl Drop for MemLink {
    fn drop(&mut self) {
        self.rx.close();
        self.tx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(200);

    #[test]
    fn write_then_read_exact() {
        let (a, b) = mem_link_pair();
        let mut near = Channel::new(a, CancelToken::new());
        let mut far = Channel::new(b, CancelToken::new());

        near.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        far.read_exact(&mut buf, SHORT).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn read_exact_accumulates_partial_arrivals() {
        let (a, b) = mem_link_pair();
        let mut far = Channel::new(b, CancelToken::new());

        let writer = thread::spawn(move || {
            let mut near = Channel::new(a, CancelToken::new());
            near.write_all(b"par").unwrap();
            thread::sleep(Duration::from_millis(50));
            near.write_all(b"tial").unwrap();
            near
        });

        let mut buf = [0u8; 7];
        far.read_exact(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(&buf, b"partial");
        writer.join().unwrap();
    }

    #[test]
    fn read_exact_times_out() {
        let (a, b) = mem_link_pair();
        let _keep_alive = a;
        let mut far = Channel::new(b, CancelToken::new());
        let mut buf = [0u8; 1];
        match far.read_exact(&mut buf, Duration::from_millis(80)) {
            Err(Error::LinkTimeout) => {}
            other => panic!("expected LinkTimeout, got {other:?}"),
        }
    }

    #[test]
    fn read_line_stops_at_newline() {
        let (a, b) = mem_link_pair();
        let mut near = Channel::new(a, CancelToken::new());
        let mut far = Channel::new(b, CancelToken::new());

        near.write_all(b"START:demo.bin\nleftover").unwrap();
        let line = far.read_line(SHORT).unwrap();
        assert_eq!(line, b"START:demo.bin\n");
    }

    #[test]
    fn flush_input_drops_pending_bytes() {
        let (a, b) = mem_link_pair();
        let mut near = Channel::new(a, CancelToken::new());
        let mut far = Channel::new(b, CancelToken::new());

        near.write_all(b"stale").unwrap();
        far.flush_input().unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(
            far.read_exact(&mut buf, Duration::from_millis(60)),
            Err(Error::LinkTimeout)
        ));
    }

    #[test]
    fn cancellation_interrupts_a_blocked_read() {
        let (a, b) = mem_link_pair();
        let _keep_alive = a;
        let token = CancelToken::new();
        let mut far = Channel::new(b, token.clone());

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            token.cancel();
        });

        let mut buf = [0u8; 1];
        match far.read_exact(&mut buf, Duration::from_secs(5)) {
            Err(Error::Interrupted) => {}
            other => panic!("expected Interrupted, got {other:?}"),
        }
        canceller.join().unwrap();
    }

    #[test]
    fn peer_drop_breaks_the_link() {
        let (a, b) = mem_link_pair();
        drop(a);
        let mut far = Channel::new(b, CancelToken::new());
        let mut buf = [0u8; 1];
        assert!(matches!(
            far.read_exact(&mut buf, SHORT),
            Err(Error::LinkBroken(_))
        ));
    }
}
