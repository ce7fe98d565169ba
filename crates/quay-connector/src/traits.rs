//! Core trait for node transports.

use std::path::Path;

use quay_types::TransportType;

use crate::error::ConnectorError;

/// Moves bytes to and from one storage node over a specific transport.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Remote paths are logical file paths; each implementation maps them to a
/// physical location with [`quay_types::location_for`].
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Copy the local file at `source` to `remote_path` on the node.
    ///
    /// On error nothing is left behind on the node: implementations clean
    /// up their own partial writes.
    async fn upload(&self, source: &Path, remote_path: &str) -> Result<(), ConnectorError>;

    /// Copy `remote_path` from the node to the local file `destination`.
    ///
    /// Returns [`ConnectorError::NotFound`] if the node does not hold it.
    async fn download(&self, remote_path: &str, destination: &Path)
    -> Result<(), ConnectorError>;

    /// Delete `remote_path` from the node. Deleting an absent path is `Ok`.
    async fn delete(&self, remote_path: &str) -> Result<(), ConnectorError>;

    /// Check whether the node is reachable.
    async fn probe(&self) -> bool;

    /// The transport this connector implements.
    fn transport(&self) -> TransportType;

    /// The endpoint this connector talks to.
    fn address(&self) -> &str;
}
