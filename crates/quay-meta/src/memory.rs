//! In-memory record store.

use std::collections::HashMap;

use parking_lot::RwLock;
use quay_types::{FileRecord, Node, NodeId};

use crate::{MetaError, RecordStore};

/// Volatile [`RecordStore`] backed by two `RwLock<HashMap>`s.
#[derive(Debug, Default)]
pub struct MemoryMeta {
    nodes: RwLock<HashMap<NodeId, Node>>,
    files: RwLock<HashMap<String, FileRecord>>,
}

impl MemoryMeta {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryMeta {
    fn put_node(&self, node: &Node) -> Result<(), MetaError> {
        let mut stored = node.clone();
        stored.used = 0;
        self.nodes.write().insert(node.id, stored);
        Ok(())
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), MetaError> {
        self.nodes.write().remove(id);
        Ok(())
    }

    fn list_nodes(&self) -> Result<Vec<Node>, MetaError> {
        Ok(self.nodes.read().values().cloned().collect())
    }

    fn put_file(&self, record: &FileRecord) -> Result<(), MetaError> {
        self.files
            .write()
            .insert(record.path.clone(), record.clone());
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<(), MetaError> {
        self.files.write().remove(path);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<FileRecord>, MetaError> {
        Ok(self.files.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use quay_types::TransportType;

    use super::*;

    #[test]
    fn test_memory_meta_matches_contract() {
        let store = MemoryMeta::new();
        let node = Node {
            id: NodeId::random(),
            address: "mem".into(),
            transport: TransportType::Memory,
            capacity: 10,
            used: 4,
        };
        store.put_node(&node).unwrap();
        assert_eq!(store.list_nodes().unwrap()[0].used, 0);

        let record = FileRecord {
            path: "p".into(),
            size: 4,
            owner: node.id,
            location: "p".into(),
            seq: 1,
        };
        store.put_file(&record).unwrap();
        assert_eq!(store.list_files().unwrap(), vec![record]);

        store.remove_file("p").unwrap();
        store.remove_node(&node.id).unwrap();
        assert!(store.list_files().unwrap().is_empty());
        assert!(store.list_nodes().unwrap().is_empty());
    }
}
