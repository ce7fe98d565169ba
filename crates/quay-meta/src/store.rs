//! [`MetaStore`] implementation wrapping Fjall keyspaces.

use std::path::Path;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use quay_types::{FileRecord, Node, NodeId};
use tempfile::TempDir;
use tracing::debug;

use crate::{MetaError, RecordStore};

type Result<T> = std::result::Result<T, MetaError>;

/// Record store backed by Fjall.
pub struct MetaStore {
    /// The underlying Fjall database handle.
    #[allow(dead_code)]
    db: Database,
    /// NodeId bytes → serialized Node.
    nodes: Keyspace,
    /// Logical path → serialized FileRecord.
    files: Keyspace,
    /// Keeps the directory of a temporary store alive.
    _tmp: Option<TempDir>,
}

impl MetaStore {
    /// Open a persistent MetaStore at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db, None)
    }

    /// Open a temporary MetaStore that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db, Some(tmp))
    }

    fn init_keyspaces(db: Database, tmp: Option<TempDir>) -> Result<Self> {
        let nodes = db.keyspace("nodes", KeyspaceCreateOptions::default)?;
        let files = db.keyspace("files", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            nodes,
            files,
            _tmp: tmp,
        })
    }
}

impl RecordStore for MetaStore {
    // ----- Nodes -----

    fn put_node(&self, node: &Node) -> Result<()> {
        let value = postcard::to_allocvec(node)?;
        self.nodes.insert(node.id.as_bytes(), value.as_slice())?;
        debug!(node_id = %node.id, "stored node record");
        Ok(())
    }

    fn remove_node(&self, id: &NodeId) -> Result<()> {
        self.nodes.remove(id.as_bytes())?;
        debug!(node_id = %id, "removed node record");
        Ok(())
    }

    fn list_nodes(&self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        for guard in self.nodes.iter() {
            let v = guard.value()?;
            nodes.push(postcard::from_bytes(&v)?);
        }
        Ok(nodes)
    }

    // ----- Files -----

    fn put_file(&self, record: &FileRecord) -> Result<()> {
        let value = postcard::to_allocvec(record)?;
        self.files.insert(record.path.as_bytes(), value.as_slice())?;
        debug!(path = %record.path, owner = %record.owner, "stored file record");
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<()> {
        self.files.remove(path.as_bytes())?;
        debug!(path, "removed file record");
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut files = Vec::new();
        for guard in self.files.iter() {
            let v = guard.value()?;
            files.push(postcard::from_bytes(&v)?);
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use quay_types::TransportType;

    use super::*;

    fn test_node(capacity: u64) -> Node {
        Node {
            id: NodeId::random(),
            address: "/srv/node".to_string(),
            transport: TransportType::Local,
            capacity,
            used: 0,
        }
    }

    fn test_file(path: &str, owner: NodeId, seq: u64) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            size: 10 * seq,
            owner,
            location: path.trim_start_matches('/').to_string(),
            seq,
        }
    }

    #[test]
    fn test_node_put_list_remove() {
        let store = MetaStore::open_temporary().unwrap();
        let a = test_node(100);
        let b = test_node(200);

        store.put_node(&a).unwrap();
        store.put_node(&b).unwrap();
        let mut listed = store.list_nodes().unwrap();
        listed.sort_by_key(|n| n.capacity);
        assert_eq!(listed, vec![a.clone(), b.clone()]);

        store.remove_node(&a.id).unwrap();
        assert_eq!(store.list_nodes().unwrap(), vec![b]);
    }

    #[test]
    fn test_node_used_not_persisted() {
        let store = MetaStore::open_temporary().unwrap();
        let mut node = test_node(100);
        node.used = 60;
        store.put_node(&node).unwrap();

        let listed = store.list_nodes().unwrap();
        assert_eq!(listed[0].used, 0);
    }

    #[test]
    fn test_remove_absent_is_ok() {
        let store = MetaStore::open_temporary().unwrap();
        store.remove_node(&NodeId::random()).unwrap();
        store.remove_file("never/stored").unwrap();
    }

    #[test]
    fn test_file_put_replace_remove() {
        let store = MetaStore::open_temporary().unwrap();
        let owner = NodeId::random();

        store.put_file(&test_file("/a", owner, 1)).unwrap();
        store.put_file(&test_file("/b", owner, 2)).unwrap();
        store.put_file(&test_file("/a", owner, 3)).unwrap();

        let mut files = store.list_files().unwrap();
        files.sort_by_key(|f| f.seq);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "/b");
        assert_eq!(files[1].path, "/a");
        assert_eq!(files[1].size, 30);

        store.remove_file("/a").unwrap();
        assert_eq!(store.list_files().unwrap().len(), 1);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().to_path_buf();
        let node = test_node(500);

        {
            let store = MetaStore::open(&path).unwrap();
            store.put_node(&node).unwrap();
            store.put_file(&test_file("/kept", node.id, 7)).unwrap();
        }

        {
            let store = MetaStore::open(&path).unwrap();
            assert_eq!(store.list_nodes().unwrap(), vec![node.clone()]);
            let files = store.list_files().unwrap();
            assert_eq!(files, vec![test_file("/kept", node.id, 7)]);
        }
    }
}
