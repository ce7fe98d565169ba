//! The [`QuayEngine`] operation surface for front ends.
//!
//! Request handlers (CLI, RPC, HTTP) depend on this trait instead of the
//! concrete [`QuayServer`], so they can be tested against a stand-in.

use std::path::Path;

use async_trait::async_trait;
use quay_types::{FileEntry, FileRecord, Node, NodeId, TransportType};

use crate::error::EngineError;
use crate::server::QuayServer;

/// The eight file-store operations plus node inspection.
#[async_trait]
pub trait QuayEngine: Send + Sync {
    /// Register a storage node after probing it.
    async fn add_node(
        &self,
        address: &str,
        key: Option<&str>,
        capacity: u64,
        transport: TransportType,
    ) -> Result<NodeId, EngineError>;

    /// Deregister an empty node.
    async fn remove_node(&self, id: &NodeId) -> Result<(), EngineError>;

    /// Delete every file on a node.
    async fn clean_node(&self, id: &NodeId) -> Result<(), EngineError>;

    /// Every stored file, in commit order.
    async fn list_all_files(&self) -> Result<Vec<FileEntry>, EngineError>;

    /// Files on one node, in commit order.
    async fn list_node_files(&self, id: &NodeId) -> Result<Vec<FileEntry>, EngineError>;

    /// Upload a local file under a logical path.
    async fn add_file(&self, local: &Path, remote: &str) -> Result<FileRecord, EngineError>;

    /// Download a stored file to a local path.
    async fn get_file(&self, remote: &str, local: &Path) -> Result<(), EngineError>;

    /// Remove a stored file.
    async fn remove_file(&self, path: &str) -> Result<(), EngineError>;

    /// Snapshot of one node.
    async fn get_node(&self, id: &NodeId) -> Result<Node, EngineError>;

    /// Snapshot of all nodes.
    async fn list_nodes(&self) -> Result<Vec<Node>, EngineError>;
}

#[async_trait]
impl QuayEngine for QuayServer {
    async fn add_node(
        &self,
        address: &str,
        key: Option<&str>,
        capacity: u64,
        transport: TransportType,
    ) -> Result<NodeId, EngineError> {
        QuayServer::add_node(self, address, key, capacity, transport).await
    }

    async fn remove_node(&self, id: &NodeId) -> Result<(), EngineError> {
        QuayServer::remove_node(self, id).await
    }

    async fn clean_node(&self, id: &NodeId) -> Result<(), EngineError> {
        QuayServer::clean_node(self, id).await
    }

    async fn list_all_files(&self) -> Result<Vec<FileEntry>, EngineError> {
        Ok(QuayServer::list_all_files(self))
    }

    async fn list_node_files(&self, id: &NodeId) -> Result<Vec<FileEntry>, EngineError> {
        QuayServer::list_node_files(self, id)
    }

    async fn add_file(&self, local: &Path, remote: &str) -> Result<FileRecord, EngineError> {
        QuayServer::add_file(self, local, remote).await
    }

    async fn get_file(&self, remote: &str, local: &Path) -> Result<(), EngineError> {
        QuayServer::get_file(self, remote, local).await
    }

    async fn remove_file(&self, path: &str) -> Result<(), EngineError> {
        QuayServer::remove_file(self, path).await
    }

    async fn get_node(&self, id: &NodeId) -> Result<Node, EngineError> {
        QuayServer::get_node(self, id)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, EngineError> {
        Ok(QuayServer::list_nodes(self))
    }
}
