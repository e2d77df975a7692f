//! Wire protocol errors.

use thiserror::Error;

/// A violation of the PostgreSQL v3 framing rules.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The length header is impossible: below the header size or above 1 GiB.
    #[error("impossible message length {length} for tag {tag:?}")]
    InvalidLength {
        /// The tag byte the length arrived with (0 for startup frames).
        tag: u8,
        /// The offending length value.
        length: i32,
    },

    /// A payload ended before the field being decoded.
    #[error("truncated {message} message")]
    Truncated {
        /// Which message was being decoded.
        message: &'static str,
    },

    /// A string field was not valid UTF-8.
    #[error("non-utf8 string in {message} message")]
    BadString {
        /// Which message was being decoded.
        message: &'static str,
    },

    /// An unknown transaction-status byte in ReadyForQuery.
    #[error("unknown transaction status byte {0:?}")]
    BadTxStatus(u8),
}
