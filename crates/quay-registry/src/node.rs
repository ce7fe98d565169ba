//! Registered storage nodes and their capacity accounting.
//!
//! Every node lives in a [`NodeSlot`] holding its record, its connector,
//! its `used`/`reserved` counters and an async operation guard. Operations
//! that mutate what a node stores (upload through commit, remove, clean,
//! deregistration) hold that guard, so they serialize per node while
//! different nodes proceed independently.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use quay_connector::{Connector, ConnectorFactory, ConnectorTarget};
use quay_meta::RecordStore;
use quay_placement::{Candidate, choose_placement};
use quay_types::{Node, NodeId, TransportType};
use tracing::{debug, error, info, warn};

use crate::{FileRegistry, RegistryError};

type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    used: u64,
    reserved: u64,
}

/// One registered node.
pub struct NodeSlot {
    /// Identity and registration fields. `used` here is unused; see `usage`.
    record: Node,
    usage: Mutex<Usage>,
    connector: Option<Arc<dyn Connector>>,
    op_lock: tokio::sync::Mutex<()>,
    retired: AtomicBool,
}

impl NodeSlot {
    fn new(record: Node, connector: Option<Arc<dyn Connector>>) -> Self {
        Self {
            record,
            usage: Mutex::new(Usage::default()),
            connector,
            op_lock: tokio::sync::Mutex::new(()),
            retired: AtomicBool::new(false),
        }
    }

    /// Node identity.
    pub fn id(&self) -> NodeId {
        self.record.id
    }

    /// Consistent snapshot of the node record.
    pub fn node(&self) -> Node {
        Node {
            used: self.usage.lock().used,
            ..self.record.clone()
        }
    }

    /// Bytes owned by committed records.
    pub fn used(&self) -> u64 {
        self.usage.lock().used
    }

    /// Bytes held for in-flight uploads.
    pub fn reserved(&self) -> u64 {
        self.usage.lock().reserved
    }

    /// The connector moving bytes to this node.
    pub fn connector(&self) -> Result<Arc<dyn Connector>> {
        self.connector
            .clone()
            .ok_or(RegistryError::ConnectorUnavailable(self.record.id))
    }

    /// Acquire the per-node operation guard.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.op_lock.lock().await
    }

    /// Whether the node was deregistered. A caller that waited on
    /// [`lock`](Self::lock) must check this before touching the node.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Return `size` bytes of committed usage.
    pub fn release_used(&self, size: u64) {
        let mut usage = self.usage.lock();
        usage.used = usage.used.saturating_sub(size);
    }

    fn candidate(&self) -> Candidate {
        let usage = *self.usage.lock();
        Candidate {
            id: self.record.id,
            capacity: self.record.capacity,
            used: usage.used,
            reserved: usage.reserved,
        }
    }
}

/// Capacity held on one node for an upload in flight.
///
/// Dropping an uncommitted reservation returns the bytes.
pub struct Reservation {
    slot: Arc<NodeSlot>,
    size: u64,
    settled: bool,
}

impl Reservation {
    /// The node the bytes were reserved on.
    pub fn slot(&self) -> &Arc<NodeSlot> {
        &self.slot
    }

    /// Reserved byte count.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Turn the reservation into committed usage.
    pub fn commit(mut self) {
        {
            let mut usage = self.slot.usage.lock();
            usage.reserved = usage.reserved.saturating_sub(self.size);
            usage.used += self.size;
        }
        self.settled = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            let mut usage = self.slot.usage.lock();
            usage.reserved = usage.reserved.saturating_sub(self.size);
        }
    }
}

/// The authoritative set of storage nodes.
pub struct NodeRegistry {
    store: Arc<dyn RecordStore>,
    slots: RwLock<BTreeMap<NodeId, Arc<NodeSlot>>>,
    /// Serializes placement so concurrent uploads see each other's reservations.
    placement: Mutex<()>,
}

impl NodeRegistry {
    /// Create an empty registry writing through to `store`.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            slots: RwLock::new(BTreeMap::new()),
            placement: Mutex::new(()),
        }
    }

    /// Rebuild the registry from `store`.
    ///
    /// Connectors are rebuilt through `factory` without probing. A node
    /// whose connector cannot be built stays registered but every transfer
    /// to it fails. `used` is recomputed from the records in `files`.
    pub fn load(
        store: Arc<dyn RecordStore>,
        factory: &ConnectorFactory,
        files: &FileRegistry,
    ) -> Result<Self> {
        let mut slots = BTreeMap::new();
        for node in store.list_nodes()? {
            let target = ConnectorTarget {
                transport: node.transport,
                address: &node.address,
                key: None,
            };
            let connector = match factory.build(&target) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(node_id = %node.id, transport = %node.transport, %e, "could not rebuild connector");
                    None
                }
            };
            slots.insert(node.id, Arc::new(NodeSlot::new(node, connector)));
        }

        let mut totals: HashMap<NodeId, u64> = HashMap::new();
        for record in files.list_all() {
            if slots.contains_key(&record.owner) {
                *totals.entry(record.owner).or_default() += record.size;
            } else {
                warn!(path = %record.path, owner = %record.owner, "file record owned by unknown node");
            }
        }
        for (id, slot) in &slots {
            let used = totals.get(id).copied().unwrap_or(0);
            if used > slot.record.capacity {
                warn!(node_id = %id, used, capacity = slot.record.capacity, "node is over capacity");
            }
            slot.usage.lock().used = used;
        }

        info!(nodes = slots.len(), "loaded node registry");
        Ok(Self {
            store,
            slots: RwLock::new(slots),
            placement: Mutex::new(()),
        })
    }

    /// Register a node with a ready connector.
    pub fn add_node(
        &self,
        address: &str,
        transport: TransportType,
        capacity: u64,
        connector: Arc<dyn Connector>,
    ) -> Result<NodeId> {
        if capacity == 0 {
            return Err(RegistryError::InvalidArgument(
                "capacity must be positive".into(),
            ));
        }

        let node = Node {
            id: NodeId::random(),
            address: address.to_string(),
            transport,
            capacity,
            used: 0,
        };
        self.store.put_node(&node)?;

        let id = node.id;
        self.slots
            .write()
            .insert(id, Arc::new(NodeSlot::new(node, Some(connector))));
        info!(node_id = %id, address, %transport, capacity, "node registered");
        Ok(id)
    }

    /// Deregister a node that owns no files.
    pub async fn remove_node(&self, id: &NodeId, files: &FileRegistry) -> Result<()> {
        let slot = self.slot(id)?;
        let _guard = slot.lock().await;
        if slot.is_retired() {
            return Err(RegistryError::NodeNotFound(*id));
        }

        let owned = files.owned_count(id);
        if owned > 0 {
            return Err(RegistryError::NodeNotEmpty {
                id: *id,
                files: owned,
            });
        }

        self.store.remove_node(id)?;
        slot.retired.store(true, Ordering::Release);
        self.slots.write().remove(id);
        info!(node_id = %id, "node removed");
        Ok(())
    }

    /// Delete every file owned by `id`, keeping the node registered.
    ///
    /// A file whose physical delete fails keeps its record and is reported
    /// in [`RegistryError::PartialFailure`].
    pub async fn clean_node(&self, id: &NodeId, files: &FileRegistry) -> Result<()> {
        let slot = self.slot(id)?;
        let _guard = slot.lock().await;
        if slot.is_retired() {
            return Err(RegistryError::NodeNotFound(*id));
        }

        let records = files.list_by_node(id);
        if records.is_empty() {
            return Ok(());
        }
        let connector = slot.connector()?;

        let mut failed = Vec::new();
        let mut removed = 0usize;
        for record in records {
            if files.begin_delete(&record.path).is_err() {
                continue;
            }
            if let Err(e) = connector.delete(&record.location).await {
                warn!(node_id = %id, path = %record.path, %e, "physical delete failed during clean");
                files.restore(&record.path);
                failed.push(record.path);
                continue;
            }
            match files.finish_delete(&record.path) {
                Ok(()) => {
                    slot.release_used(record.size);
                    removed += 1;
                    debug!(node_id = %id, path = %record.path, "cleaned file");
                }
                Err(e) => {
                    error!(node_id = %id, path = %record.path, %e, "bytes deleted but record kept");
                    failed.push(record.path);
                }
            }
        }

        if failed.is_empty() {
            info!(node_id = %id, removed, "node cleaned");
            Ok(())
        } else {
            warn!(node_id = %id, removed, failed = failed.len(), "node partially cleaned");
            Err(RegistryError::PartialFailure { id: *id, failed })
        }
    }

    /// Reserve `size` bytes on the node with the most free capacity.
    pub fn reserve(&self, size: u64) -> Result<Reservation> {
        let _placement = self.placement.lock();
        let slots = self.slots.read();

        let candidates: Vec<Candidate> = slots
            .values()
            .filter(|s| !s.is_retired())
            .map(|s| s.candidate())
            .collect();
        let chosen = choose_placement(&candidates, size)?;

        let slot = slots
            .get(&chosen)
            .cloned()
            .ok_or(RegistryError::NodeNotFound(chosen))?;
        slot.usage.lock().reserved += size;
        debug!(node_id = %chosen, size, "capacity reserved");

        Ok(Reservation {
            slot,
            size,
            settled: false,
        })
    }

    /// Look up a node's slot.
    pub fn slot(&self, id: &NodeId) -> Result<Arc<NodeSlot>> {
        self.slots
            .read()
            .get(id)
            .cloned()
            .ok_or(RegistryError::NodeNotFound(*id))
    }

    /// Snapshot of one node.
    pub fn get_node(&self, id: &NodeId) -> Result<Node> {
        Ok(self.slot(id)?.node())
    }

    /// Snapshot of every node, ordered by id.
    pub fn list_nodes(&self) -> Vec<Node> {
        self.slots.read().values().map(|s| s.node()).collect()
    }

    pub(crate) fn slots(&self) -> Vec<Arc<NodeSlot>> {
        self.slots.read().values().cloned().collect()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no node is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use quay_connector::{FaultyConnector, MemoryConnector, NetOptions};
    use quay_meta::MemoryMeta;

    use super::*;

    struct Fixture {
        meta: Arc<dyn RecordStore>,
        nodes: NodeRegistry,
        files: FileRegistry,
    }

    fn fixture() -> Fixture {
        let meta: Arc<dyn RecordStore> = Arc::new(MemoryMeta::new());
        Fixture {
            nodes: NodeRegistry::new(meta.clone()),
            files: FileRegistry::new(meta.clone()),
            meta,
        }
    }

    fn memory(label: &str) -> Arc<MemoryConnector> {
        Arc::new(MemoryConnector::new(label))
    }

    /// Upload `data` under `path` the same way a coordinator would.
    async fn store_file(f: &Fixture, path: &str, data: &[u8], dir: &Path) -> NodeId {
        let location = f.files.claim(path).unwrap();
        let reservation = f.nodes.reserve(data.len() as u64).unwrap();
        let source = dir.join("source");
        std::fs::write(&source, data).unwrap();
        reservation
            .slot()
            .connector()
            .unwrap()
            .upload(&source, &location)
            .await
            .unwrap();
        let owner = reservation.slot().id();
        f.files.commit(path, data.len() as u64, owner).unwrap();
        reservation.commit();
        owner
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let f = fixture();
        let err = f
            .nodes
            .add_node("m", TransportType::Memory, 0, memory("m"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
        assert!(f.nodes.is_empty());
    }

    #[test]
    fn test_list_nodes_ordered_by_id() {
        let f = fixture();
        for i in 0..5 {
            let label = format!("m{i}");
            f.nodes
                .add_node(&label, TransportType::Memory, 100, memory(&label))
                .unwrap();
        }
        let ids: Vec<_> = f.nodes.list_nodes().into_iter().map(|n| n.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(f.meta.list_nodes().unwrap().len(), 5);
    }

    #[test]
    fn test_reservations_spread_and_release_on_drop() {
        let f = fixture();
        let a = f.nodes.add_node("a", TransportType::Memory, 100, memory("a")).unwrap();
        let b = f.nodes.add_node("b", TransportType::Memory, 100, memory("b")).unwrap();

        let first = f.nodes.reserve(60).unwrap();
        let second = f.nodes.reserve(60).unwrap();
        assert_ne!(first.slot().id(), second.slot().id());
        assert!(matches!(
            f.nodes.reserve(60),
            Err(RegistryError::Placement(_))
        ));

        drop(first);
        let third = f.nodes.reserve(60).unwrap();
        third.commit();
        drop(second);

        let used: u64 = [a, b].iter().map(|id| f.nodes.get_node(id).unwrap().used).sum();
        assert_eq!(used, 60);
        for slot in f.nodes.slots() {
            assert_eq!(slot.reserved(), 0);
        }
    }

    #[tokio::test]
    async fn test_remove_node_requires_empty() {
        let dir = tempfile_dir();
        let f = fixture();
        let id = f.nodes.add_node("a", TransportType::Memory, 100, memory("a")).unwrap();
        store_file(&f, "/x", b"12345", dir.path()).await;

        let err = f.nodes.remove_node(&id, &f.files).await.unwrap_err();
        assert!(matches!(err, RegistryError::NodeNotEmpty { files: 1, .. }));

        f.nodes.clean_node(&id, &f.files).await.unwrap();
        assert_eq!(f.nodes.get_node(&id).unwrap().used, 0);
        f.nodes.remove_node(&id, &f.files).await.unwrap();

        assert!(matches!(
            f.nodes.get_node(&id),
            Err(RegistryError::NodeNotFound(_))
        ));
        assert!(f.meta.list_nodes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_removed_slot_is_retired() {
        let f = fixture();
        let id = f.nodes.add_node("a", TransportType::Memory, 100, memory("a")).unwrap();
        let slot = f.nodes.slot(&id).unwrap();
        f.nodes.remove_node(&id, &f.files).await.unwrap();
        assert!(slot.is_retired());
        assert!(matches!(
            f.nodes.remove_node(&id, &f.files).await,
            Err(RegistryError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_clean_node_partial_failure() {
        let dir = tempfile_dir();
        let f = fixture();
        let faulty = Arc::new(FaultyConnector::new(memory("a")).fail_delete_of("f2"));
        let id = f
            .nodes
            .add_node("a", TransportType::Memory, 100, faulty.clone())
            .unwrap();
        store_file(&f, "/f1", &[1; 10], dir.path()).await;
        store_file(&f, "/f2", &[2; 20], dir.path()).await;
        assert_eq!(f.nodes.get_node(&id).unwrap().used, 30);

        let err = f.nodes.clean_node(&id, &f.files).await.unwrap_err();
        match err {
            RegistryError::PartialFailure { id: failed_on, failed } => {
                assert_eq!(failed_on, id);
                assert_eq!(failed, vec!["/f2".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let remaining: Vec<_> = f.files.list_by_node(&id).into_iter().map(|r| r.path).collect();
        assert_eq!(remaining, ["/f2"]);
        assert_eq!(f.nodes.get_node(&id).unwrap().used, 20);

        faulty.heal();
        f.nodes.clean_node(&id, &f.files).await.unwrap();
        assert_eq!(f.nodes.get_node(&id).unwrap().used, 0);
        assert!(f.files.is_empty());
    }

    #[tokio::test]
    async fn test_load_recomputes_used() {
        let dir = tempfile_dir();
        let f = fixture();
        let id = f.nodes.add_node("a", TransportType::Memory, 100, memory("a")).unwrap();
        store_file(&f, "/one", &[0; 7], dir.path()).await;
        store_file(&f, "/two", &[0; 5], dir.path()).await;

        let files = FileRegistry::load(f.meta.clone()).unwrap();
        let factory = ConnectorFactory::standard(NetOptions::default());
        let nodes = NodeRegistry::load(f.meta.clone(), &factory, &files).unwrap();

        let node = nodes.get_node(&id).unwrap();
        assert_eq!(node.used, 12);
        assert_eq!(node.capacity, 100);
        assert!(nodes.slot(&id).unwrap().connector().is_ok());
    }

    #[tokio::test]
    async fn test_load_without_builder_keeps_node() {
        let f = fixture();
        let id = f.nodes.add_node("a", TransportType::Memory, 100, memory("a")).unwrap();

        let files = FileRegistry::load(f.meta.clone()).unwrap();
        let nodes = NodeRegistry::load(f.meta.clone(), &ConnectorFactory::new(), &files).unwrap();

        let slot = nodes.slot(&id).unwrap();
        assert!(matches!(
            slot.connector(),
            Err(RegistryError::ConnectorUnavailable(_))
        ));
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn test_guard_serializes_same_node() {
        let f = fixture();
        let id = f.nodes.add_node("a", TransportType::Memory, 100, memory("a")).unwrap();
        let slot = f.nodes.slot(&id).unwrap();

        let held = slot.lock().await;
        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                let _g = slot.lock().await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
    }

    fn tempfile_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }
}
