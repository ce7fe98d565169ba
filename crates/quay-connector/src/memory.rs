//! In-memory connector.

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use parking_lot::RwLock;
use quay_types::{TransportType, location_for};
use tracing::debug;

use crate::error::ConnectorError;
use crate::local::write_atomic;
use crate::traits::Connector;

/// Connector for a volatile node whose bytes live in a `RwLock<HashMap>`.
///
/// Useful for testing and for scratch nodes. The address is only a label.
pub struct MemoryConnector {
    address: String,
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryConnector {
    /// Create an empty in-memory node labelled `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Whether an object is stored at `remote_path`.
    pub fn contains(&self, remote_path: &str) -> bool {
        location_for(remote_path)
            .map(|loc| self.objects.read().contains_key(&loc))
            .unwrap_or(false)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the node holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Total bytes held.
    pub fn stored_bytes(&self) -> u64 {
        self.objects.read().values().map(|v| v.len() as u64).sum()
    }
}

fn location(remote_path: &str) -> Result<String, ConnectorError> {
    location_for(remote_path).map_err(|e| ConnectorError::InvalidPath(e.to_string()))
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn upload(&self, source: &Path, remote_path: &str) -> Result<(), ConnectorError> {
        let loc = location(remote_path)?;
        let data = Bytes::from(tokio::fs::read(source).await?);
        debug!(remote_path, size = data.len(), "storing file in memory");
        self.objects.write().insert(loc, data);
        Ok(())
    }

    async fn download(
        &self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<(), ConnectorError> {
        let loc = location(remote_path)?;
        let data = self
            .objects
            .read()
            .get(&loc)
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound(remote_path.to_string()))?;
        write_atomic(destination, &data).await
    }

    async fn delete(&self, remote_path: &str) -> Result<(), ConnectorError> {
        let loc = location(remote_path)?;
        self.objects.write().remove(&loc);
        debug!(remote_path, "deleted file from memory");
        Ok(())
    }

    async fn probe(&self) -> bool {
        true
    }

    fn transport(&self) -> TransportType {
        TransportType::Memory
    }

    fn address(&self) -> &str {
        &self.address
    }
}
