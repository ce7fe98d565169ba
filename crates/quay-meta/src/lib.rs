//! Durable record storage for the Quay registries.
//!
//! [`RecordStore`] is the mapping contract the registries persist through.
//! Two implementations are provided:
//!
//! - [`MetaStore`]: Fjall-backed, with two keyspaces:
//!   - `nodes`: [`NodeId`](quay_types::NodeId) → serialized [`Node`](quay_types::Node)
//!   - `files`: logical path → serialized [`FileRecord`](quay_types::FileRecord)
//! - [`MemoryMeta`]: volatile maps, for tests and scratch coordinators.
//!
//! Node usage is never stored; the registries derive it from the file
//! records when they load.

mod error;
mod memory;
mod store;

pub use error::MetaError;
pub use memory::MemoryMeta;
pub use store::MetaStore;

use quay_types::{FileRecord, Node, NodeId};

/// Persistence contract for node and file records.
///
/// Every method is a single atomic put, delete or scan. Implementations
/// must be safe to share across threads.
pub trait RecordStore: Send + Sync {
    /// Insert or replace a node record.
    fn put_node(&self, node: &Node) -> Result<(), MetaError>;

    /// Delete a node record. Deleting an absent node is `Ok`.
    fn remove_node(&self, id: &NodeId) -> Result<(), MetaError>;

    /// All node records, in no particular order.
    fn list_nodes(&self) -> Result<Vec<Node>, MetaError>;

    /// Insert or replace a file record.
    fn put_file(&self, record: &FileRecord) -> Result<(), MetaError>;

    /// Delete a file record. Deleting an absent path is `Ok`.
    fn remove_file(&self, path: &str) -> Result<(), MetaError>;

    /// All file records, in no particular order.
    fn list_files(&self) -> Result<Vec<FileRecord>, MetaError>;
}
