//! Frontend (client-to-server) message views and builders.

use crate::error::ProtocolError;
use crate::frame::{Frame, put_cstr, read_cstr, tag};
use bytes::{Buf, BytesMut};

/// Decoded view of a frontend frame. Only the fields the injector consults
/// are extracted; anything unrecognized is [`FrontendView::Other`] and
/// forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendView {
    /// Simple-protocol query string.
    Query(String),
    /// Extended-protocol statement parse.
    Parse {
        /// Destination prepared-statement name ("" for unnamed).
        statement: String,
        /// The SQL text.
        sql: String,
    },
    /// Portal bind. Parameter values are left undecoded.
    Bind {
        /// Destination portal name.
        portal: String,
        /// Source prepared-statement name.
        statement: String,
    },
    /// Describe a statement (`'S'`) or portal (`'P'`).
    Describe {
        /// `b'S'` or `b'P'`.
        kind: u8,
        /// The statement or portal name.
        name: String,
    },
    /// Portal execution.
    Execute {
        /// The portal name.
        portal: String,
    },
    /// Close a statement or portal.
    Close {
        /// `b'S'` or `b'P'`.
        kind: u8,
        /// The statement or portal name.
        name: String,
    },
    /// End of an extended-protocol pipeline.
    Sync,
    /// Flush request.
    Flush,
    /// Connection termination.
    Terminate,
    /// Any other frontend message; passes through untouched.
    Other,
}

impl FrontendView {
    /// Decode the parts of a frontend frame the injector interprets.
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let mut payload = frame.payload.clone();
        match frame.tag {
            tag::QUERY => Ok(Self::Query(read_cstr(&mut payload, "Query")?)),
            tag::PARSE => {
                let statement = read_cstr(&mut payload, "Parse")?;
                let sql = read_cstr(&mut payload, "Parse")?;
                Ok(Self::Parse { statement, sql })
            }
            tag::BIND => {
                let portal = read_cstr(&mut payload, "Bind")?;
                let statement = read_cstr(&mut payload, "Bind")?;
                Ok(Self::Bind { portal, statement })
            }
            tag::DESCRIBE => {
                if payload.remaining() < 1 {
                    return Err(ProtocolError::Truncated {
                        message: "Describe",
                    });
                }
                let kind = payload.get_u8();
                let name = read_cstr(&mut payload, "Describe")?;
                Ok(Self::Describe { kind, name })
            }
            tag::EXECUTE => {
                let portal = read_cstr(&mut payload, "Execute")?;
                Ok(Self::Execute { portal })
            }
            tag::CLOSE => {
                if payload.remaining() < 1 {
                    return Err(ProtocolError::Truncated { message: "Close" });
                }
                let kind = payload.get_u8();
                let name = read_cstr(&mut payload, "Close")?;
                Ok(Self::Close { kind, name })
            }
            tag::SYNC => Ok(Self::Sync),
            tag::FLUSH => Ok(Self::Flush),
            tag::TERMINATE => Ok(Self::Terminate),
            _ => Ok(Self::Other),
        }
    }
}

/// Best-effort decode of a Bind frame's first parameter value, with the
/// format code that applies to it (`0` text, `1` binary). Returns `None`
/// when the frame is not a well-formed Bind or carries no parameters.
pub fn bind_first_param(frame: &Frame) -> Option<(i16, Option<bytes::Bytes>)> {
    if frame.tag != tag::BIND {
        return None;
    }
    let mut payload = frame.payload.clone();
    read_cstr(&mut payload, "Bind").ok()?;
    read_cstr(&mut payload, "Bind").ok()?;
    if payload.remaining() < 2 {
        return None;
    }
    let nformats = payload.get_u16() as usize;
    let mut first_format = 0i16;
    for i in 0..nformats {
        if payload.remaining() < 2 {
            return None;
        }
        let format = payload.get_i16();
        if i == 0 {
            first_format = format;
        }
    }
    if payload.remaining() < 2 {
        return None;
    }
    let nparams = payload.get_u16();
    if nparams == 0 {
        return None;
    }
    if payload.remaining() < 4 {
        return None;
    }
    let len = payload.get_i32();
    let value = if len < 0 {
        None
    } else {
        if payload.remaining() < len as usize {
            return None;
        }
        Some(payload.split_to(len as usize))
    };
    Some((first_format, value))
}

/// Build a simple-protocol `Query` frame.
pub fn query(sql: &str) -> Frame {
    let mut payload = BytesMut::with_capacity(sql.len() + 1);
    put_cstr(&mut payload, sql);
    Frame::new(tag::QUERY, payload.freeze())
}

/// Build a `Terminate` frame.
pub fn terminate() -> Frame {
    Frame::empty(tag::TERMINATE)
}
