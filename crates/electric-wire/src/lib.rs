//! # electric-wire
//!
//! PostgreSQL v3 wire-protocol framing.
//!
//! This crate handles framing only: a [`FrameBuffer`] turns an arbitrary
//! byte stream into tag-byte + length [`Frame`]s (tolerating partial reads),
//! and frames encode back to the exact bytes they were read from. Typed
//! *views* decode just the payloads the proxy interprets; every other
//! message stays an opaque frame and is forwarded verbatim.

pub mod backend;
pub mod codec;
pub mod error;
pub mod frame;
pub mod frontend;

pub use backend::{BackendView, ErrorFields, TxStatus};
pub use codec::FrameBuffer;
pub use error::ProtocolError;
pub use frame::{Frame, tag};
pub use frontend::FrontendView;
