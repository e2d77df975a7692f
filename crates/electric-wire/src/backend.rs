//! Backend (server-to-client) message views and builders.

use crate::error::ProtocolError;
use crate::frame::{Frame, put_cstr, read_cstr, tag};
use bytes::{Buf, Bytes, BytesMut};

/// The transaction status byte carried by `ReadyForQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// `'I'` — no transaction open.
    Idle,
    /// `'T'` — inside a transaction block.
    InTransaction,
    /// `'E'` — inside a failed transaction block.
    Failed,
}

impl TxStatus {
    /// The wire byte for this status.
    pub fn byte(self) -> u8 {
        match self {
            TxStatus::Idle => b'I',
            TxStatus::InTransaction => b'T',
            TxStatus::Failed => b'E',
        }
    }

    /// Parse the wire byte.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            b'I' => Ok(TxStatus::Idle),
            b'T' => Ok(TxStatus::InTransaction),
            b'E' => Ok(TxStatus::Failed),
            other => Err(ProtocolError::BadTxStatus(other)),
        }
    }
}

/// The fields of an `ErrorResponse` or `NoticeResponse` the proxy reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// `S` field (severity).
    pub severity: String,
    /// `C` field (SQLSTATE code).
    pub code: String,
    /// `M` field (primary message).
    pub message: String,
}

/// Decoded view of a backend frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendView {
    /// Statement parse acknowledged.
    ParseComplete,
    /// Portal bind acknowledged.
    BindComplete,
    /// Close acknowledged.
    CloseComplete,
    /// Statement parameter types.
    ParameterDescription,
    /// Result-set shape. Only field names are extracted.
    RowDescription(Vec<String>),
    /// One result row; values stay raw (text format for our own queries).
    DataRow(Vec<Option<Bytes>>),
    /// Statement has no result rows.
    NoData,
    /// Empty query string acknowledged.
    EmptyQueryResponse,
    /// Command finished; carries the completion tag.
    CommandComplete(String),
    /// Server is ready for the next statement.
    ReadyForQuery(TxStatus),
    /// Server error.
    ErrorResponse(ErrorFields),
    /// Server notice; always passed through.
    NoticeResponse,
    /// Any other backend message; passes through untouched.
    Other,
}

impl BackendView {
    /// Decode the parts of a backend frame the injector interprets.
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let mut payload = frame.payload.clone();
        match frame.tag {
            tag::PARSE_COMPLETE => Ok(Self::ParseComplete),
            tag::BIND_COMPLETE => Ok(Self::BindComplete),
            tag::CLOSE_COMPLETE => Ok(Self::CloseComplete),
            tag::PARAMETER_DESCRIPTION => Ok(Self::ParameterDescription),
            tag::NO_DATA => Ok(Self::NoData),
            tag::EMPTY_QUERY_RESPONSE => Ok(Self::EmptyQueryResponse),
            tag::ROW_DESCRIPTION => {
                if payload.remaining() < 2 {
                    return Err(ProtocolError::Truncated {
                        message: "RowDescription",
                    });
                }
                let count = payload.get_u16();
                let mut fields = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    fields.push(read_cstr(&mut payload, "RowDescription")?);
                    // table oid, attnum, type oid, typlen, typmod, format
                    if payload.remaining() < 18 {
                        return Err(ProtocolError::Truncated {
                            message: "RowDescription",
                        });
                    }
                    payload.advance(18);
                }
                Ok(Self::RowDescription(fields))
            }
            tag::DATA_ROW => {
                if payload.remaining() < 2 {
                    return Err(ProtocolError::Truncated { message: "DataRow" });
                }
                let count = payload.get_u16();
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    if payload.remaining() < 4 {
                        return Err(ProtocolError::Truncated { message: "DataRow" });
                    }
                    let len = payload.get_i32();
                    if len < 0 {
                        values.push(None);
                    } else {
                        if payload.remaining() < len as usize {
                            return Err(ProtocolError::Truncated { message: "DataRow" });
                        }
                        values.push(Some(payload.split_to(len as usize)));
                    }
                }
                Ok(Self::DataRow(values))
            }
            tag::COMMAND_COMPLETE => Ok(Self::CommandComplete(read_cstr(
                &mut payload,
                "CommandComplete",
            )?)),
            tag::READY_FOR_QUERY => {
                if payload.remaining() < 1 {
                    return Err(ProtocolError::Truncated {
                        message: "ReadyForQuery",
                    });
                }
                Ok(Self::ReadyForQuery(TxStatus::from_byte(payload.get_u8())?))
            }
            tag::ERROR_RESPONSE => Ok(Self::ErrorResponse(decode_error_fields(&mut payload)?)),
            tag::NOTICE_RESPONSE => Ok(Self::NoticeResponse),
            _ => Ok(Self::Other),
        }
    }
}

fn decode_error_fields(payload: &mut Bytes) -> Result<ErrorFields, ProtocolError> {
    let mut fields = ErrorFields::default();
    loop {
        if payload.remaining() < 1 {
            return Err(ProtocolError::Truncated {
                message: "ErrorResponse",
            });
        }
        let kind = payload.get_u8();
        if kind == 0 {
            return Ok(fields);
        }
        let value = read_cstr(payload, "ErrorResponse")?;
        match kind {
            b'S' => fields.severity = value,
            b'C' => fields.code = value,
            b'M' => fields.message = value,
            _ => {}
        }
    }
}

/// Build a `CommandComplete` frame with the given completion tag.
pub fn command_complete(completion_tag: &str) -> Frame {
    let mut payload = BytesMut::with_capacity(completion_tag.len() + 1);
    put_cstr(&mut payload, completion_tag);
    Frame::new(tag::COMMAND_COMPLETE, payload.freeze())
}

/// Build a `ReadyForQuery` frame.
pub fn ready_for_query(status: TxStatus) -> Frame {
    Frame::new(tag::READY_FOR_QUERY, vec![status.byte()])
}

/// Build a `ParseComplete` frame.
pub fn parse_complete() -> Frame {
    Frame::empty(tag::PARSE_COMPLETE)
}

/// Build a `BindComplete` frame.
pub fn bind_complete() -> Frame {
    Frame::empty(tag::BIND_COMPLETE)
}

/// Build a `CloseComplete` frame.
pub fn close_complete() -> Frame {
    Frame::empty(tag::CLOSE_COMPLETE)
}

/// Build a `NoData` frame.
pub fn no_data() -> Frame {
    Frame::empty(tag::NO_DATA)
}

/// Build a `ParameterDescription` frame for a statement without parameters.
pub fn parameter_description_empty() -> Frame {
    Frame::new(tag::PARAMETER_DESCRIPTION, 0u16.to_be_bytes().to_vec())
}

/// Build an `ErrorResponse` frame with severity ERROR.
pub fn error_response(code: &str, message: &str) -> Frame {
    let mut payload = BytesMut::new();
    payload.extend_from_slice(b"S");
    put_cstr(&mut payload, "ERROR");
    payload.extend_from_slice(b"V");
    put_cstr(&mut payload, "ERROR");
    payload.extend_from_slice(b"C");
    put_cstr(&mut payload, code);
    payload.extend_from_slice(b"M");
    put_cstr(&mut payload, message);
    payload.extend_from_slice(&[0]);
    Frame::new(tag::ERROR_RESPONSE, payload.freeze())
}
