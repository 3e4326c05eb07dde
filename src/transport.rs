// transport.rs — serial transport (C2): timed read, write, buffer drain
//
// The "system type" auto-detection in the original Python (probing the
// reader for an `in_waiting` attribute to pick a python3-serial vs
// micropython read loop) becomes a trait here: one real implementation for
// any blocking reader/writer pair, one in-memory implementation for tests.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::*;

/// Gap between bytes within which a read is still considered "in progress".
pub const DEFAULT_IDLE_GAP: Duration = Duration::from_millis(150);

/// Ownership of the serial line for the duration of one request/response
/// cycle. Implementations must not block forever: every read honours a
/// caller-supplied timeout.
pub trait SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Discard anything currently buffered. Used before a request so a
    /// stale response from a previous exchange cannot leak into this one.
    fn drain(&mut self, timeout: Duration) -> io::Result<Vec<u8>>;

    /// Wait up to `timeout` for the first byte, then keep reading while new
    /// bytes keep arriving within `idle_gap`. An empty result on timeout is
    /// not an error — it's the normal "nothing came back" outcome.
    fn read_until_idle(&mut self, timeout: Duration, idle_gap: Duration) -> io::Result<Vec<u8>>;
}

/// Real transport over any blocking `Read + Write` pair (a serial port, or
/// a TCP socket bridging to one). The underlying reader must be configured
/// by the caller to time out its individual `read()` calls in a short,
/// bounded slice (tens of milliseconds) — that per-call timeout is what
/// lets this type poll for the gap between bytes without blocking forever
/// on a single `read()`. A reader that blocks indefinitely on `read()`
/// defeats the gap-timeout policy entirely.
pub struct GapTimeoutTransport<R, W> {
    reader: R,
    writer: W,
    poll_quantum: Duration,
}

impl<R: Read, W: Write> GapTimeoutTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            poll_quantum: Duration::from_millis(20),
        }
    }

    fn read_available(&mut self, out: &mut Vec<u8>) -> io::Result<usize> {
        let mut buf = [0u8; 256];
        match self.reader.read(&mut buf) {
            Ok(0) => Ok(0),
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

impl<R: Read, W: Write> SerialTransport for GapTimeoutTransport<R, W> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    fn drain(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        self.read_until_idle(timeout, Duration::from_millis(100))
    }

    fn read_until_idle(&mut self, timeout: Duration, idle_gap: Duration) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let deadline = Instant::now() + timeout;

        // Wait for the first byte.
        while out.is_empty() {
            if Instant::now() >= deadline {
                return Ok(out);
            }
            self.read_available(&mut out)?;
            if out.is_empty() {
                std::thread::sleep(self.poll_quantum.min(idle_gap));
            }
        }

        // Keep reading while new bytes keep arriving inside the gap window.
        let mut last_arrival = Instant::now();
        loop {
            let n = self.read_available(&mut out)?;
            if n > 0 {
                last_arrival = Instant::now();
                continue;
            }
            if last_arrival.elapsed() >= idle_gap {
                break;
            }
            std::thread::sleep(self.poll_quantum.min(idle_gap));
        }

        debug!("transport: read {} byte(s) within {:?}", out.len(), timeout);
        Ok(out)
    }
}

/// In-memory transport for tests: writes are recorded, reads are served
/// from a preloaded queue with no real timing. `read_until_idle` returns
/// everything queued immediately, treating the absence of timing as "the
/// whole exchange already happened".
#[derive(Default)]
pub struct BufferedTransport {
    pub written: Vec<Vec<u8>>,
    pub incoming: VecDeque<u8>,
}

impl BufferedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes that a subsequent `read_until_idle`/`drain` call will
    /// return.
    pub fn push_incoming(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes.iter().copied());
    }
}

impl SerialTransport for BufferedTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.written.push(bytes.to_vec());
        Ok(())
    }

    fn drain(&mut self, _timeout: Duration) -> io::Result<Vec<u8>> {
        Ok(self.incoming.drain(..).collect())
    }

    fn read_until_idle(&mut self, _timeout: Duration, _idle_gap: Duration) -> io::Result<Vec<u8>> {
        Ok(self.incoming.drain(..).collect())
    }
}

// EOF
