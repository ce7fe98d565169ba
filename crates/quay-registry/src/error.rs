//! Error types for registry operations.

use quay_meta::MetaError;
use quay_placement::PlacementError;
use quay_types::NodeId;

/// Errors returned by [`NodeRegistry`](crate::NodeRegistry) and
/// [`FileRegistry`](crate::FileRegistry).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Malformed input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No node is registered under this id.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// No file is stored under this path.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The path is already stored or has an operation in flight.
    #[error("path already exists: {0}")]
    Conflict(String),

    /// The node still owns file records.
    #[error("node {id} still owns {files} file(s)")]
    NodeNotEmpty {
        /// The node that could not be removed.
        id: NodeId,
        /// Number of records it owns.
        files: usize,
    },

    /// Some files could not be deleted from the node; their records remain.
    #[error("could not clean {} file(s) from node {id}", .failed.len())]
    PartialFailure {
        /// The node being cleaned.
        id: NodeId,
        /// Paths whose records were retained.
        failed: Vec<String>,
    },

    /// Placement could not find room for the file.
    #[error(transparent)]
    Placement(#[from] PlacementError),

    /// The node was loaded but its connector could not be built.
    #[error("node {0} has no usable connector")]
    ConnectorUnavailable(NodeId),

    /// Failed to read or write the record store.
    #[error("metadata error: {0}")]
    Meta(#[from] MetaError),
}
