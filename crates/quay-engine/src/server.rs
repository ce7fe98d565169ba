//! [`QuayServer`], the registry coordinator.
//!
//! Each operation is a short transaction over the node registry, the file
//! registry and one node's connector. Registry locks are only held for
//! in-memory updates; byte transfers run under the target node's operation
//! guard so unrelated nodes and paths stay available.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use quay_connector::{Connector, ConnectorError, ConnectorFactory, ConnectorTarget, NetOptions};
use quay_meta::RecordStore;
use quay_registry::{FileRegistry, NodeRegistry, NodeSlot, Violation, check_invariants};
use quay_types::{FileEntry, FileRecord, Node, NodeId, TransportType, canonical_path};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;

/// Configuration for a [`QuayServer`].
#[derive(Debug, Clone)]
pub struct QuayServerConfig {
    /// How many times AddFile re-runs placement after its chosen node was
    /// removed while it waited.
    pub placement_attempts: usize,
    /// Timeouts for the network transport.
    pub net: NetOptions,
}

impl Default for QuayServerConfig {
    fn default() -> Self {
        Self {
            placement_attempts: 4,
            net: NetOptions::default(),
        }
    }
}

/// Bytes that may remain on a node without a record pointing at them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    /// Logical path the bytes were stored under.
    pub path: String,
    /// Node holding the bytes.
    pub node: NodeId,
    /// Physical location on the node.
    pub location: String,
    /// Byte length.
    pub size: u64,
    /// Why the bytes could not be deleted.
    pub cause: String,
}

/// The registry coordinator.
pub struct QuayServer {
    config: QuayServerConfig,
    factory: ConnectorFactory,
    nodes: NodeRegistry,
    files: FileRegistry,
    orphans: Mutex<Vec<Orphan>>,
}

impl QuayServer {
    /// Open a server over `store`, loading any nodes and files it holds.
    pub fn open(
        config: QuayServerConfig,
        store: Arc<dyn RecordStore>,
        factory: ConnectorFactory,
    ) -> Result<Self, EngineError> {
        let files = FileRegistry::load(store.clone())?;
        let nodes = NodeRegistry::load(store, &factory, &files)?;
        info!(nodes = nodes.len(), files = files.len(), "quay server opened");

        Ok(Self {
            config,
            factory,
            nodes,
            files,
            orphans: Mutex::new(Vec::new()),
        })
    }

    /// Return the server configuration.
    pub fn config(&self) -> &QuayServerConfig {
        &self.config
    }

    /// Return the node registry.
    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    /// Return the file registry.
    pub fn files(&self) -> &FileRegistry {
        &self.files
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Register a storage node after checking it is reachable.
    ///
    /// `key` is handed to the connector factory unchanged; the built-in
    /// transports ignore it.
    pub async fn add_node(
        &self,
        address: &str,
        key: Option<&str>,
        capacity: u64,
        transport: TransportType,
    ) -> Result<NodeId, EngineError> {
        if capacity == 0 {
            return Err(EngineError::InvalidArgument(
                "capacity must be positive".into(),
            ));
        }

        let target = ConnectorTarget {
            transport,
            address,
            key,
        };
        let connector = self.factory.build(&target).map_err(|e| match e {
            ConnectorError::UnsupportedTransport(t) => {
                EngineError::InvalidArgument(format!("unsupported transport: {t}"))
            }
            other => EngineError::Connection(other.to_string()),
        })?;

        if !connector.probe().await {
            warn!(address, %transport, "node unreachable at registration");
            return Err(EngineError::Connection(format!(
                "{transport} node at {address} is unreachable"
            )));
        }

        Ok(self.nodes.add_node(address, transport, capacity, connector)?)
    }

    /// Deregister a node. Fails with `NodeNotEmpty` while it owns files.
    pub async fn remove_node(&self, id: &NodeId) -> Result<(), EngineError> {
        Ok(self.nodes.remove_node(id, &self.files).await?)
    }

    /// Delete every file on a node, keeping the node registered.
    pub async fn clean_node(&self, id: &NodeId) -> Result<(), EngineError> {
        Ok(self.nodes.clean_node(id, &self.files).await?)
    }

    /// Snapshot of one node.
    pub fn get_node(&self, id: &NodeId) -> Result<Node, EngineError> {
        Ok(self.nodes.get_node(id)?)
    }

    /// Snapshot of all nodes, ordered by id.
    pub fn list_nodes(&self) -> Vec<Node> {
        self.nodes.list_nodes()
    }

    // ------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------

    /// Every stored file in commit order.
    pub fn list_all_files(&self) -> Vec<FileEntry> {
        self.files.list_all().iter().map(FileRecord::entry).collect()
    }

    /// Files stored on one node, in commit order.
    pub fn list_node_files(&self, id: &NodeId) -> Result<Vec<FileEntry>, EngineError> {
        self.nodes.get_node(id)?;
        Ok(self
            .files
            .list_by_node(id)
            .iter()
            .map(FileRecord::entry)
            .collect())
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// Store the local file at `local` under the logical path `remote`.
    pub async fn add_file(&self, local: &Path, remote: &str) -> Result<FileRecord, EngineError> {
        let remote = canonical_path(remote)?;
        let location = self.files.claim(&remote)?;
        let result = self.place_and_upload(local, &remote, &location).await;
        if result.is_err() {
            self.files.abandon(&remote);
        }
        result
    }

    async fn place_and_upload(
        &self,
        local: &Path,
        remote: &str,
        location: &str,
    ) -> Result<FileRecord, EngineError> {
        let size = source_size(local).await?;
        let attempts = self.config.placement_attempts.max(1);

        for attempt in 1..=attempts {
            let reservation = self.nodes.reserve(size)?;
            let slot = Arc::clone(reservation.slot());
            let _guard = slot.lock().await;
            if slot.is_retired() {
                debug!(node_id = %slot.id(), attempt, "chosen node was removed, placing again");
                continue;
            }

            let connector = slot.connector()?;
            match connector.upload(local, location).await {
                Ok(()) => {}
                Err(ConnectorError::Stranded { cause, .. }) => {
                    error!(path = remote, node_id = %slot.id(), %cause, "failed upload left bytes on node");
                    self.track_orphan(Orphan {
                        path: remote.to_string(),
                        node: slot.id(),
                        location: location.to_string(),
                        size,
                        cause: cause.clone(),
                    });
                    return Err(EngineError::Reconciliation {
                        path: remote.to_string(),
                        node: slot.id(),
                        detail: format!("upload failed and its bytes could not be removed: {cause}"),
                    });
                }
                Err(e) => {
                    warn!(path = remote, node_id = %slot.id(), %e, "upload failed");
                    return Err(EngineError::transfer(remote, e));
                }
            }
            debug!(path = remote, node_id = %slot.id(), size, "upload complete");

            // Count the bytes before the record becomes visible, so a listed
            // file is always included in its owner's `used`.
            reservation.commit();
            return match self.files.commit(remote, size, slot.id()) {
                Ok(record) => {
                    info!(path = remote, node_id = %slot.id(), size, "file added");
                    Ok(record)
                }
                Err(e) => {
                    slot.release_used(size);
                    Err(self
                        .roll_back_upload(&slot, connector.as_ref(), remote, location, size, e.to_string())
                        .await)
                }
            };
        }

        Err(EngineError::Internal(format!(
            "placement for {remote} did not settle after {attempts} attempts"
        )))
    }

    /// Delete bytes whose record could not be committed.
    async fn roll_back_upload(
        &self,
        slot: &NodeSlot,
        connector: &dyn Connector,
        remote: &str,
        location: &str,
        size: u64,
        commit_error: String,
    ) -> EngineError {
        warn!(path = remote, node_id = %slot.id(), error = %commit_error, "commit failed, rolling back upload");
        match connector.delete(location).await {
            Ok(()) => EngineError::Internal(format!(
                "failed to record {remote}: {commit_error}; upload rolled back"
            )),
            Err(e) => {
                let detail = format!("commit failed ({commit_error}) and rollback failed ({e})");
                error!(path = remote, node_id = %slot.id(), %detail, "uploaded bytes left without a record");
                self.track_orphan(Orphan {
                    path: remote.to_string(),
                    node: slot.id(),
                    location: location.to_string(),
                    size,
                    cause: e.to_string(),
                });
                EngineError::Reconciliation {
                    path: remote.to_string(),
                    node: slot.id(),
                    detail,
                }
            }
        }
    }

    /// Download the file stored under `remote` to `local`.
    ///
    /// Runs without the node guard. If the bytes are gone, the record is
    /// read again: a file removed or replaced during the download is
    /// `FileNotFound`, and only a record that is still current reports
    /// `MissingBytes`.
    pub async fn get_file(&self, remote: &str, local: &Path) -> Result<(), EngineError> {
        let record = self.files.get(remote)?;
        let path = record.path.as_str();
        let slot = self.owner_slot(&record)?;
        let connector = slot.connector()?;

        match connector.download(&record.location, local).await {
            Ok(()) => {
                debug!(path, node_id = %record.owner, size = record.size, "file retrieved");
                Ok(())
            }
            Err(ConnectorError::NotFound(_)) => match self.files.get(path) {
                Ok(current) if current.seq == record.seq => {
                    error!(path, node_id = %record.owner, "record present but bytes missing");
                    Err(EngineError::MissingBytes {
                        path: path.to_string(),
                        node: record.owner,
                    })
                }
                _ => {
                    debug!(path, node_id = %record.owner, "file removed during download");
                    Err(EngineError::FileNotFound(path.to_string()))
                }
            },
            Err(e) => Err(EngineError::transfer(path, e)),
        }
    }

    /// Remove the file stored under `path`.
    ///
    /// The record is removed before the bytes. If the physical delete then
    /// fails the record stays removed and `OrphanedBytes` is returned.
    pub async fn remove_file(&self, path: &str) -> Result<(), EngineError> {
        let path = canonical_path(path)?;
        let path = path.as_str();
        for _ in 0..self.config.placement_attempts.max(1) {
            let record = self.files.get(path)?;
            let slot = self.owner_slot(&record)?;
            let _guard = slot.lock().await;
            if self.files.get(path)?.owner != slot.id() {
                // Replaced on another node while we waited.
                continue;
            }

            let record = self.files.remove(path)?;
            let deleted = match slot.connector() {
                Ok(connector) => connector
                    .delete(&record.location)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            slot.release_used(record.size);
            self.files.release(path);

            return match deleted {
                Ok(()) => {
                    info!(path, node_id = %record.owner, size = record.size, "file removed");
                    Ok(())
                }
                Err(cause) => {
                    error!(path, node_id = %record.owner, %cause, "record removed but bytes remain");
                    self.track_orphan(Orphan {
                        path: record.path,
                        node: record.owner,
                        location: record.location,
                        size: record.size,
                        cause: cause.clone(),
                    });
                    Err(EngineError::OrphanedBytes {
                        path: path.to_string(),
                        node: slot.id(),
                        cause,
                    })
                }
            };
        }

        Err(EngineError::Internal(format!(
            "owner of {path} kept changing"
        )))
    }

    fn owner_slot(&self, record: &FileRecord) -> Result<Arc<NodeSlot>, EngineError> {
        self.nodes.slot(&record.owner).map_err(|_| {
            EngineError::Internal(format!(
                "file {} is owned by unregistered node {}",
                record.path, record.owner
            ))
        })
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    fn track_orphan(&self, orphan: Orphan) {
        self.orphans.lock().push(orphan);
    }

    /// Orphaned-bytes conditions recorded since the server opened.
    pub fn orphans(&self) -> Vec<Orphan> {
        self.orphans.lock().clone()
    }

    /// Check the registry invariants. Meaningful while no operation is in flight.
    pub fn check_invariants(&self) -> Vec<Violation> {
        check_invariants(&self.nodes, &self.files)
    }
}

/// Size of the local upload source.
async fn source_size(local: &Path) -> Result<u64, EngineError> {
    let metadata = tokio::fs::metadata(local).await.map_err(|e| {
        EngineError::InvalidArgument(format!("local source {}: {e}", local.display()))
    })?;
    if !metadata.is_file() {
        return Err(EngineError::InvalidArgument(format!(
            "local source {} is not a file",
            local.display()
        )));
    }
    Ok(metadata.len())
}
