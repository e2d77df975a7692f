//! Incremental frame decoding.

use crate::error::ProtocolError;
use crate::frame::{Frame, tag};
use bytes::{Buf, BytesMut};

/// Largest frame we will accept: 1 GiB, PostgreSQL's own ceiling.
pub const MAX_FRAME_LEN: i32 = 0x4000_0000;

/// Accumulates raw socket bytes and yields complete [`Frame`]s, keeping any
/// residual partial frame buffered for the next feed.
///
/// In startup mode frames carry no tag byte (StartupMessage, SSLRequest,
/// CancelRequest); the session flips the buffer to normal framing once the
/// startup message has been relayed.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    startup: bool,
}

impl FrameBuffer {
    /// A buffer for a stream that begins with tagged frames (the server side).
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            startup: false,
        }
    }

    /// A buffer for a stream that begins with the untagged startup exchange
    /// (the client side).
    pub fn new_startup() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            startup: true,
        }
    }

    /// Switch from startup framing to normal tagged framing.
    pub fn leave_startup(&mut self) {
        self.startup = false;
    }

    /// Whether the buffer is still in startup framing.
    pub fn in_startup(&self) -> bool {
        self.startup
    }

    /// Append raw bytes read from the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.startup {
            return self.next_startup_frame();
        }

        if self.buf.len() < 5 {
            return Ok(None);
        }
        let msg_tag = self.buf[0];
        let length = i32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
        if !(4..=MAX_FRAME_LEN).contains(&length) {
            return Err(ProtocolError::InvalidLength {
                tag: msg_tag,
                length,
            });
        }
        let total = 1 + length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        self.buf.advance(5);
        let payload = self.buf.split_to(length as usize - 4).freeze();
        Ok(Some(Frame::new(msg_tag, payload)))
    }

    fn next_startup_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let length = i32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if !(4..=MAX_FRAME_LEN).contains(&length) {
            return Err(ProtocolError::InvalidLength {
                tag: tag::STARTUP,
                length,
            });
        }
        if self.buf.len() < length as usize {
            return Ok(None);
        }

        self.buf.advance(4);
        let payload = self.buf.split_to(length as usize - 4).freeze();
        Ok(Some(Frame::new(tag::STARTUP, payload)))
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
