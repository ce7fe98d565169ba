//! Placement of new files onto storage nodes.
//!
//! A file goes to the node with the most free capacity among those that can
//! hold it whole. Free capacity counts bytes already committed (`used`) and
//! bytes promised to uploads still in flight (`reserved`). Ties are broken
//! by lowest [`NodeId`] so the choice is deterministic.

use quay_types::NodeId;
use tracing::trace;

/// Errors returned by [`choose_placement`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// No candidate has `size` bytes free.
    #[error("no node has {size} bytes free")]
    NoCapacityAvailable {
        /// Requested file size.
        size: u64,
    },
}

/// Capacity snapshot of one node, as seen by the placement engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Node identity.
    pub id: NodeId,
    /// Fixed capacity in bytes.
    pub capacity: u64,
    /// Bytes owned by committed file records.
    pub used: u64,
    /// Bytes held for uploads that have not committed yet.
    pub reserved: u64,
}

impl Candidate {
    /// Bytes available to a new file.
    pub fn free(&self) -> u64 {
        self.capacity
            .saturating_sub(self.used)
            .saturating_sub(self.reserved)
    }
}

/// Pick the node that receives a file of `size` bytes.
pub fn choose_placement(candidates: &[Candidate], size: u64) -> Result<NodeId, PlacementError> {
    let chosen = candidates
        .iter()
        .filter(|c| c.free() >= size)
        // Greatest free wins; on equal free the lower id compares greater.
        .max_by(|a, b| a.free().cmp(&b.free()).then_with(|| b.id.cmp(&a.id)))
        .ok_or(PlacementError::NoCapacityAvailable { size })?;

    trace!(node_id = %chosen.id, size, free = chosen.free(), "placement chosen");
    Ok(chosen.id)
}
