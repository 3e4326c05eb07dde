// dispatcher.rs — MT dispatcher (C3)
//
// The single point where a synchronous request/response is realised over
// the intrinsically asynchronous serial stream: one request goes out, then
// whatever arrives inside the response window comes back as a list of
// decoded frames. Frames with a bad CRC are still returned (flagged);
// classifying them is the caller's job, same as the dispatcher has no
// opinion about which command codes matter.

use std::time::Duration;

use crate::*;

pub struct Dispatcher<T> {
    transport: T,
}

impl<T: SerialTransport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Discard whatever is sitting in the buffer before a new exchange.
    pub fn drain(&mut self, timeout: Duration) -> io::Result<()> {
        let discarded = self.transport.drain(timeout)?;
        if !discarded.is_empty() {
            trace!("dispatcher: drained {} stale byte(s)", discarded.len());
        }
        Ok(())
    }

    /// Send one encoded request and collect every frame the radio returns
    /// within `response_window`.
    pub fn request(
        &mut self,
        cmd: u16,
        payload: &[u8],
        response_window: Duration,
    ) -> io::Result<Vec<Frame>> {
        let bytes = self.request_raw(cmd, payload, response_window)?;

        let frames = frame::decode_all(&bytes)
            .into_iter()
            .filter_map(|r| match r {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!("dispatcher: dropping corrupt frame batch: {e}");
                    None
                }
            })
            .collect();
        Ok(frames)
    }

    /// Send one encoded request and return whatever raw bytes the radio
    /// sent back within `response_window`, without frame decoding. Used by
    /// the coordinator driver (C4), which verifies steps against the raw
    /// byte stream rather than decoded frames.
    pub fn request_raw(
        &mut self,
        cmd: u16,
        payload: &[u8],
        response_window: Duration,
    ) -> io::Result<Vec<u8>> {
        let wire = frame::encode(cmd, payload);
        self.transport.write(&wire)?;
        self.transport
            .read_until_idle(response_window, transport::DEFAULT_IDLE_GAP)
    }
}

// EOF
