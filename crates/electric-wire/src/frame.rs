//! Raw protocol frames.

use bytes::{BufMut, Bytes, BytesMut};

/// Message tag bytes the proxy cares about. Everything else passes through
/// untouched.
pub mod tag {
    /// Startup-phase frames carry no tag byte; we use 0 internally.
    pub const STARTUP: u8 = 0;

    // Frontend
    pub const QUERY: u8 = b'Q';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const DESCRIBE: u8 = b'D';
    pub const EXECUTE: u8 = b'E';
    pub const CLOSE: u8 = b'C';
    pub const SYNC: u8 = b'S';
    pub const FLUSH: u8 = b'H';
    pub const TERMINATE: u8 = b'X';
    pub const PASSWORD: u8 = b'p';

    // Backend
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const NO_DATA: u8 = b'n';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
}

/// One framed protocol message: the tag byte plus the payload that followed
/// the length word. Encoding a frame reproduces the exact bytes it was
/// decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message tag, or [`tag::STARTUP`] for untagged startup-phase frames.
    pub tag: u8,
    /// The payload, excluding tag and length word.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame from parts.
    pub fn new(tag: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// A frame with an empty payload (Sync, Terminate, ParseComplete, ...).
    pub fn empty(tag: u8) -> Self {
        Self::new(tag, Bytes::new())
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        let header = if self.tag == tag::STARTUP { 4 } else { 5 };
        header + self.payload.len()
    }

    /// Append the wire encoding of this frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        if self.tag != tag::STARTUP {
            buf.put_u8(self.tag);
        }
        buf.put_i32(self.payload.len() as i32 + 4);
        buf.put_slice(&self.payload);
    }

    /// The wire encoding as a standalone buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Read a NUL-terminated UTF-8 string field from a payload.
pub(crate) fn read_cstr(
    buf: &mut Bytes,
    message: &'static str,
) -> Result<String, crate::error::ProtocolError> {
    use bytes::Buf;

    let Some(end) = buf.iter().position(|&b| b == 0) else {
        return Err(crate::error::ProtocolError::Truncated { message });
    };
    let raw = buf.split_to(end);
    buf.advance(1);
    String::from_utf8(raw.to_vec())
        .map_err(|_| crate::error::ProtocolError::BadString { message })
}

/// Append a NUL-terminated string field to a payload under construction.
pub(crate) fn put_cstr(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_tagged() {
        let frame = Frame::new(tag::QUERY, &b"SELECT 1\0"[..]);
        let bytes = frame.to_bytes();
        assert_eq!(bytes[0], b'Q');
        assert_eq!(&bytes[1..5], &13i32.to_be_bytes());
        assert_eq!(&bytes[5..], b"SELECT 1\0");
    }

    #[test]
    fn test_encode_startup() {
        let frame = Frame::new(tag::STARTUP, 196608i32.to_be_bytes().to_vec());
        let bytes = frame.to_bytes();
        assert_eq!(&bytes[0..4], &8i32.to_be_bytes());
        assert_eq!(bytes.len(), 8);
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::empty(tag::SYNC);
        assert_eq!(frame.to_bytes().as_ref(), &[b'S', 0, 0, 0, 4]);
    }
}
