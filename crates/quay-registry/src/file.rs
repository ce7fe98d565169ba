//! Logical path → owning node mapping.
//!
//! Each path moves through `PendingUpload → Present → PendingDelete`.
//! Any entry, whatever its state, blocks a new claim of the same path, so
//! two uploads of one path can never both commit. Only `Present` entries
//! are visible to lookups and listings.
//!
//! Entries are keyed by the canonical path, so every spelling of a path
//! (`a`, `/a`, `//a`) resolves to the same entry and the same location.
//! Listings and records carry the canonical form.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use quay_meta::RecordStore;
use quay_types::{FileRecord, NodeId, canonical_path};
use tracing::{debug, warn};

use crate::RegistryError;

type Result<T> = std::result::Result<T, RegistryError>;

fn canonical(path: &str) -> Result<String> {
    canonical_path(path).map_err(|e| RegistryError::InvalidArgument(e.to_string()))
}

/// Physical location of a canonical path.
fn location_of(key: &str) -> String {
    key.trim_start_matches('/').to_string()
}

#[derive(Debug)]
enum PathState {
    /// Claimed by an upload that has not committed yet.
    PendingUpload,
    /// Committed and visible.
    Present(FileRecord),
    /// Physical delete in progress.
    PendingDelete(FileRecord),
}

/// Authoritative path → [`FileRecord`] table.
pub struct FileRegistry {
    store: Arc<dyn RecordStore>,
    table: RwLock<HashMap<String, PathState>>,
    next_seq: AtomicU64,
}

impl FileRegistry {
    /// Create an empty registry writing through to `store`.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            table: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Rebuild the registry from the records in `store`.
    pub fn load(store: Arc<dyn RecordStore>) -> Result<Self> {
        let records = store.list_files()?;
        let next_seq = records.iter().map(|r| r.seq).max().unwrap_or(0) + 1;
        let table = records
            .into_iter()
            .map(|r| (r.path.clone(), PathState::Present(r)))
            .collect::<HashMap<_, _>>();
        debug!(files = table.len(), next_seq, "loaded file registry");

        Ok(Self {
            store,
            table: RwLock::new(table),
            next_seq: AtomicU64::new(next_seq),
        })
    }

    // ----- Upload path -----

    /// Reserve `path` for an upload.
    ///
    /// Returns the physical location the bytes should be written to.
    pub fn claim(&self, path: &str) -> Result<String> {
        let key = canonical(path)?;
        let location = location_of(&key);
        match self.table.write().entry(key) {
            Entry::Occupied(entry) => Err(RegistryError::Conflict(entry.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(PathState::PendingUpload);
                Ok(location)
            }
        }
    }

    /// Persist and publish the record for a claimed path.
    ///
    /// On failure the claim stays in place; the caller decides whether to
    /// [`abandon`](Self::abandon) it.
    pub fn commit(&self, path: &str, size: u64, owner: NodeId) -> Result<FileRecord> {
        let key = canonical(path)?;
        if !matches!(self.table.read().get(&key), Some(PathState::PendingUpload)) {
            return Err(RegistryError::InvalidArgument(format!(
                "path {key:?} is not claimed"
            )));
        }

        let record = FileRecord {
            location: location_of(&key),
            path: key,
            size,
            owner,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.store.put_file(&record)?;

        self.table
            .write()
            .insert(record.path.clone(), PathState::Present(record.clone()));
        debug!(path = %record.path, size, owner = %owner, seq = record.seq, "file committed");
        Ok(record)
    }

    /// Drop a claim whose upload did not commit.
    pub fn abandon(&self, path: &str) {
        let Ok(key) = canonical(path) else { return };
        let mut table = self.table.write();
        if matches!(table.get(&key), Some(PathState::PendingUpload)) {
            table.remove(&key);
        }
    }

    /// Claim and commit in one step.
    pub fn put(&self, path: &str, size: u64, owner: NodeId) -> Result<FileRecord> {
        self.claim(path)?;
        self.commit(path, size, owner).inspect_err(|_| self.abandon(path))
    }

    // ----- Delete path -----

    /// Remove the record from the store and mark the path as being deleted.
    ///
    /// The path stays blocked until [`release`](Self::release) so a new
    /// upload cannot land while the old bytes are being removed.
    pub fn remove(&self, path: &str) -> Result<FileRecord> {
        let record = self.begin_delete(path)?;
        if let Err(e) = self.store.remove_file(&record.path) {
            self.restore(&record.path);
            return Err(e.into());
        }
        Ok(record)
    }

    /// Unblock a path after [`remove`](Self::remove).
    pub fn release(&self, path: &str) {
        let Ok(key) = canonical(path) else { return };
        let mut table = self.table.write();
        if matches!(table.get(&key), Some(PathState::PendingDelete(_))) {
            table.remove(&key);
        }
    }

    /// Mark a present path as being deleted without touching the store.
    pub fn begin_delete(&self, path: &str) -> Result<FileRecord> {
        let key = canonical(path)?;
        let mut table = self.table.write();
        let record = match table.get(&key) {
            Some(PathState::Present(record)) => record.clone(),
            _ => return Err(RegistryError::FileNotFound(key)),
        };
        table.insert(key, PathState::PendingDelete(record.clone()));
        Ok(record)
    }

    /// Return a path marked by [`begin_delete`](Self::begin_delete) to `Present`.
    pub fn restore(&self, path: &str) {
        let Ok(key) = canonical(path) else { return };
        let mut table = self.table.write();
        if let Some(state) = table.get_mut(&key)
            && let PathState::PendingDelete(record) = state
        {
            let record = record.clone();
            *state = PathState::Present(record);
        }
    }

    /// Remove a path marked by [`begin_delete`](Self::begin_delete) from the
    /// store and the table.
    ///
    /// If the store write fails the path is restored to `Present`.
    pub fn finish_delete(&self, path: &str) -> Result<()> {
        let key = canonical(path)?;
        if let Err(e) = self.store.remove_file(&key) {
            warn!(path = %key, %e, "failed to remove file record, restoring");
            self.restore(&key);
            return Err(e.into());
        }
        self.release(&key);
        Ok(())
    }

    // ----- Lookups -----

    /// Look up a present file.
    pub fn get(&self, path: &str) -> Result<FileRecord> {
        let key = canonical(path)?;
        match self.table.read().get(&key) {
            Some(PathState::Present(record)) => Ok(record.clone()),
            _ => Err(RegistryError::FileNotFound(key)),
        }
    }

    /// All present files in commit order.
    pub fn list_all(&self) -> Vec<FileRecord> {
        self.collect(|_| true)
    }

    /// Present files owned by `id`, in commit order.
    pub fn list_by_node(&self, id: &NodeId) -> Vec<FileRecord> {
        self.collect(|r| r.owner == *id)
    }

    /// Number of present files.
    pub fn len(&self) -> usize {
        self.table
            .read()
            .values()
            .filter(|s| matches!(s, PathState::Present(_)))
            .count()
    }

    /// Whether no file is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records owned by `id` that still count against its capacity,
    /// including ones being deleted.
    pub fn owned_count(&self, id: &NodeId) -> usize {
        self.accounted().iter().filter(|r| r.owner == *id).count()
    }

    /// Sum of sizes of the records counted by [`owned_count`](Self::owned_count).
    pub fn used_by(&self, id: &NodeId) -> u64 {
        self.accounted()
            .iter()
            .filter(|r| r.owner == *id)
            .map(|r| r.size)
            .sum()
    }

    /// Present and pending-delete records.
    pub(crate) fn accounted(&self) -> Vec<FileRecord> {
        self.table
            .read()
            .values()
            .filter_map(|s| match s {
                PathState::Present(r) | PathState::PendingDelete(r) => Some(r.clone()),
                PathState::PendingUpload => None,
            })
            .collect()
    }

    fn collect(&self, keep: impl Fn(&FileRecord) -> bool) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self
            .table
            .read()
            .values()
            .filter_map(|s| match s {
                PathState::Present(r) if keep(r) => Some(r.clone()),
                _ => None,
            })
            .collect();
        records.sort_by_key(|r| r.seq);
        records
    }
}
