//! Error types for connector operations.

use std::time::Duration;

use quay_types::TransportType;

/// Errors that can occur while moving bytes to or from a node.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// The requested remote object does not exist on the node.
    #[error("remote object not found: {0}")]
    NotFound(String),

    /// The remote path cannot be mapped to a location on the node.
    #[error("invalid remote path: {0}")]
    InvalidPath(String),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The node could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The exchange did not complete in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// A malformed or unexpected frame was received.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The node agent reported a failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// Transferred bytes do not match their blake3 checksum.
    #[error("integrity check failed for {0}")]
    Integrity(String),

    /// The payload exceeds the transport's frame limit.
    #[error("payload too large: {size} bytes (max {max})")]
    TooLarge {
        /// Size of the rejected payload.
        size: u64,
        /// Largest payload the transport accepts.
        max: u64,
    },

    /// No builder is registered for the transport tag.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(TransportType),

    /// The upload failed after its bytes may have reached the node, and
    /// removing them again failed too.
    #[error("upload of {path} may have left bytes on the node: {cause}")]
    Stranded {
        /// Remote path that may still hold bytes.
        path: String,
        /// What went wrong.
        cause: String,
    },

    /// A failure injected by [`FaultyConnector`](crate::FaultyConnector).
    #[error("injected fault: {0}")]
    Injected(String),
}

impl ConnectorError {
    /// Whether the error means the node itself was unreachable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

impl From<postcard::Error> for ConnectorError {
    fn from(e: postcard::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}
