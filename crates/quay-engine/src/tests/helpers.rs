//! Shared test utilities for quay-engine tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use quay_connector::{
    Connector, ConnectorError, ConnectorFactory, FaultyConnector, LocalConnector, MemoryConnector,
};
use quay_meta::{MemoryMeta, MetaError, RecordStore};
use quay_types::{FileRecord, Node, NodeId, TransportType};
use tempfile::TempDir;

use crate::error::EngineError;
use crate::server::{QuayServer, QuayServerConfig};

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// Record store whose file writes can be switched to fail.
#[derive(Default)]
pub struct FlakyMeta {
    pub inner: MemoryMeta,
    pub fail_file_writes: AtomicBool,
}

impl FlakyMeta {
    fn check(&self) -> Result<(), MetaError> {
        if self.fail_file_writes.load(Ordering::SeqCst) {
            Err(MetaError::Unavailable("file writes disabled".into()))
        } else {
            Ok(())
        }
    }
}

impl RecordStore for FlakyMeta {
    fn put_node(&self, node: &Node) -> Result<(), MetaError> {
        self.inner.put_node(node)
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), MetaError> {
        self.inner.remove_node(id)
    }

    fn list_nodes(&self) -> Result<Vec<Node>, MetaError> {
        self.inner.list_nodes()
    }

    fn put_file(&self, record: &FileRecord) -> Result<(), MetaError> {
        self.check()?;
        self.inner.put_file(record)
    }

    fn remove_file(&self, path: &str) -> Result<(), MetaError> {
        self.check()?;
        self.inner.remove_file(path)
    }

    fn list_files(&self) -> Result<Vec<FileRecord>, MetaError> {
        self.inner.list_files()
    }
}

/// Handles to a node registered by [`Harness::memory_node`].
pub struct TestNode {
    pub id: NodeId,
    pub faulty: Arc<FaultyConnector>,
    pub memory: Arc<MemoryConnector>,
}

type Connectors = Arc<Mutex<HashMap<String, Arc<dyn Connector>>>>;

/// A server over a [`FlakyMeta`] whose memory-transport nodes resolve to
/// connectors registered by the test.
pub struct Harness {
    pub server: Arc<QuayServer>,
    pub meta: Arc<FlakyMeta>,
    pub dir: TempDir,
    connectors: Connectors,
    fetched: AtomicUsize,
}

impl Harness {
    pub fn new() -> Self {
        let meta = Arc::new(FlakyMeta::default());
        let connectors: Connectors = Arc::default();
        let server = Arc::new(open_server(&meta, &connectors));
        Self {
            server,
            meta,
            dir: TempDir::new().unwrap(),
            connectors,
            fetched: AtomicUsize::new(0),
        }
    }

    /// Open a second server over the same records and connectors.
    pub fn reopen(&self) -> QuayServer {
        open_server(&self.meta, &self.connectors)
    }

    /// Register a fault-injectable in-memory node.
    pub async fn memory_node(&self, label: &str, capacity: u64) -> TestNode {
        let memory = Arc::new(MemoryConnector::new(label));
        let faulty = Arc::new(FaultyConnector::new(memory.clone()));
        let id = self.node_with(label, capacity, faulty.clone()).await;
        TestNode { id, faulty, memory }
    }

    /// Register a node served by `connector`.
    pub async fn node_with(&self, label: &str, capacity: u64, connector: Arc<dyn Connector>) -> NodeId {
        self.connectors.lock().insert(label.to_string(), connector);
        self.server
            .add_node(label, None, capacity, TransportType::Memory)
            .await
            .unwrap()
    }

    /// Make `connector` available under `label` without registering it.
    pub fn provide(&self, label: &str, connector: Arc<dyn Connector>) {
        self.connectors.lock().insert(label.to_string(), connector);
    }

    /// Write a local source file.
    pub fn write_source(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    /// Upload `data` under `remote`.
    pub async fn add(&self, remote: &str, data: &[u8]) -> Result<FileRecord, EngineError> {
        let n = self.fetched.fetch_add(1, Ordering::Relaxed);
        let source = self.write_source(&format!("source-{n}"), data);
        self.server.add_file(&source, remote).await
    }

    /// Download `remote` and return its bytes.
    pub async fn fetch(&self, remote: &str) -> Result<Vec<u8>, EngineError> {
        let n = self.fetched.fetch_add(1, Ordering::Relaxed);
        let out = self.dir.path().join(format!("fetched-{n}"));
        self.server.get_file(remote, &out).await?;
        Ok(std::fs::read(out).unwrap())
    }

    /// Assert every registry invariant holds.
    pub fn assert_consistent(&self) {
        assert_consistent(&self.server);
    }
}

pub fn assert_consistent(server: &QuayServer) {
    let violations = server.check_invariants();
    assert!(violations.is_empty(), "invariants violated: {violations:?}");
    for node in server.list_nodes() {
        assert!(node.used <= node.capacity, "{node:?} over capacity");
    }
}

fn open_server(meta: &Arc<FlakyMeta>, connectors: &Connectors) -> QuayServer {
    let lookup = Arc::clone(connectors);
    let factory = ConnectorFactory::new()
        .with(TransportType::Memory, move |target| {
            lookup
                .lock()
                .get(target.address)
                .cloned()
                .ok_or_else(|| ConnectorError::Connection(format!("no test node {}", target.address)))
        })
        .with(TransportType::Local, |target| {
            Ok(Arc::new(LocalConnector::new(target.address)) as Arc<dyn Connector>)
        });

    QuayServer::open(QuayServerConfig::default(), meta.clone(), factory).unwrap()
}
