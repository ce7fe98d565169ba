//! Error types for the coordinator.

use std::fmt;

use quay_connector::ConnectorError;
use quay_meta::MetaError;
use quay_placement::PlacementError;
use quay_registry::RegistryError;
use quay_types::{NodeId, TypeError};

/// Errors returned by [`QuayServer`](crate::QuayServer) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No node is registered under this id.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// No file is stored under this path.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The path is already stored or busy.
    #[error("path already exists: {0}")]
    Conflict(String),

    /// No single node has room for the file.
    #[error("no node has {size} bytes free")]
    NoCapacityAvailable {
        /// Requested file size.
        size: u64,
    },

    /// The node still owns files; clean it first.
    #[error("node {id} still owns {files} file(s)")]
    NodeNotEmpty {
        /// Node that could not be removed.
        id: NodeId,
        /// Number of files it owns.
        files: usize,
    },

    /// The node could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// Moving bytes to or from a node failed.
    #[error("transfer of {path} failed: {source}")]
    Transfer {
        /// Logical path being transferred.
        path: String,
        /// Underlying connector failure.
        #[source]
        source: ConnectorError,
    },

    /// Clean left some files behind.
    #[error("could not clean {} file(s) from node {id}: {failed:?}", .failed.len())]
    PartialFailure {
        /// Node being cleaned.
        id: NodeId,
        /// Paths whose records were retained.
        failed: Vec<String>,
    },

    /// Metadata could not be written; any uploaded bytes were rolled back.
    #[error("internal error: {0}")]
    Internal(String),

    /// Failed to access the record store.
    #[error("metadata error: {0}")]
    Meta(#[from] MetaError),

    /// The record was removed but its bytes may remain on the node.
    #[error("orphaned bytes for {path} on node {node}: {cause}")]
    OrphanedBytes {
        /// Logical path whose record was removed.
        path: String,
        /// Node that may still hold the bytes.
        node: NodeId,
        /// Why the physical delete failed.
        cause: String,
    },

    /// Bytes were uploaded, the commit failed and the rollback failed too.
    #[error("reconciliation needed for {path} on node {node}: {detail}")]
    Reconciliation {
        /// Logical path involved.
        path: String,
        /// Node holding the unrecorded bytes.
        node: NodeId,
        /// What went wrong.
        detail: String,
    },

    /// A committed record points at bytes the node does not have.
    #[error("bytes for {path} are missing on node {node}")]
    MissingBytes {
        /// Logical path.
        path: String,
        /// Owning node.
        node: NodeId,
    },
}

/// Flat error classification for front ends mapping errors to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input.
    InvalidArgument,
    /// Unknown node or file.
    NotFound,
    /// Path already stored or busy.
    Conflict,
    /// No node can take the file.
    NoCapacityAvailable,
    /// Node still owns files.
    NodeNotEmpty,
    /// Node unreachable.
    ConnectionError,
    /// Byte transfer failed.
    TransferError,
    /// Some files of a clean were left behind.
    PartialFailure,
    /// Metadata failure or broken internal state.
    InternalError,
    /// Registry and node contents have diverged.
    Reconciliation,
}

impl ErrorKind {
    /// Stable name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::NotFound => "NotFound",
            Self::Conflict => "Conflict",
            Self::NoCapacityAvailable => "NoCapacityAvailable",
            Self::NodeNotEmpty => "NodeNotEmpty",
            Self::ConnectionError => "ConnectionError",
            Self::TransferError => "TransferError",
            Self::PartialFailure => "PartialFailure",
            Self::InternalError => "InternalError",
            Self::Reconciliation => "Reconciliation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NodeNotFound(_) | Self::FileNotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NoCapacityAvailable { .. } => ErrorKind::NoCapacityAvailable,
            Self::NodeNotEmpty { .. } => ErrorKind::NodeNotEmpty,
            Self::Connection(_) => ErrorKind::ConnectionError,
            Self::Transfer { .. } => ErrorKind::TransferError,
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
            Self::Internal(_) | Self::Meta(_) => ErrorKind::InternalError,
            Self::OrphanedBytes { .. } | Self::Reconciliation { .. } | Self::MissingBytes { .. } => {
                ErrorKind::Reconciliation
            }
        }
    }

    /// Map a connector failure while transferring `path`.
    pub(crate) fn transfer(path: &str, source: ConnectorError) -> Self {
        if source.is_connection() {
            Self::Connection(source.to_string())
        } else {
            Self::Transfer {
                path: path.to_string(),
                source,
            }
        }
    }
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            RegistryError::NodeNotFound(id) => Self::NodeNotFound(id),
            RegistryError::FileNotFound(path) => Self::FileNotFound(path),
            RegistryError::Conflict(path) => Self::Conflict(path),
            RegistryError::NodeNotEmpty { id, files } => Self::NodeNotEmpty { id, files },
            RegistryError::PartialFailure { id, failed } => Self::PartialFailure { id, failed },
            RegistryError::Placement(PlacementError::NoCapacityAvailable { size }) => {
                Self::NoCapacityAvailable { size }
            }
            RegistryError::ConnectorUnavailable(id) => {
                Self::Connection(format!("node {id} has no usable connector"))
            }
            RegistryError::Meta(e) => Self::Meta(e),
        }
    }
}

impl From<TypeError> for EngineError {
    fn from(e: TypeError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}
