//! Proxy errors.

use electric_wire::ProtocolError;
use thiserror::Error;

/// Errors that can occur running the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Failed to bind to the listen address.
    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        /// The address that could not be bound.
        address: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to connect to the upstream server.
    #[error("failed to connect to upstream {address}: {source}")]
    UpstreamConnectFailed {
        /// The upstream address.
        address: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A wire-framing violation on either socket.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A socket read or write failed.
    #[error("connection i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A synthetic server request exceeded the query timeout.
    #[error("timed out after {seconds}s waiting for the server")]
    Timeout {
        /// The configured bound that was exceeded.
        seconds: u64,
    },

    /// The session bootstrap (electrified set / rules row) failed.
    #[error("session bootstrap failed: {0}")]
    Bootstrap(String),
}
