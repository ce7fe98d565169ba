//! Consistency checks across the two registries.

use std::collections::HashMap;
use std::fmt;

use quay_types::NodeId;

use crate::{FileRegistry, NodeRegistry};

/// A broken registry invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// `used` differs from the sum of the node's record sizes.
    UsedMismatch {
        /// Node whose accounting is off.
        node: NodeId,
        /// Tracked usage.
        used: u64,
        /// Sum of the node's record sizes.
        expected: u64,
    },
    /// `used` exceeds `capacity`.
    OverCapacity {
        /// Overfull node.
        node: NodeId,
        /// Tracked usage.
        used: u64,
        /// Registered capacity.
        capacity: u64,
    },
    /// A record names an owner that is not registered.
    UnknownOwner {
        /// Path of the stranded record.
        path: String,
        /// Owner id with no registered node.
        owner: NodeId,
    },
    /// Capacity is still reserved although no upload is running.
    LeakedReservation {
        /// Node holding the reservation.
        node: NodeId,
        /// Bytes still reserved.
        reserved: u64,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsedMismatch {
                node,
                used,
                expected,
            } => write!(f, "node {node}: used {used} but records sum to {expected}"),
            Self::OverCapacity {
                node,
                used,
                capacity,
            } => write!(f, "node {node}: used {used} exceeds capacity {capacity}"),
            Self::UnknownOwner { path, owner } => {
                write!(f, "file {path}: owner {owner} is not registered")
            }
            Self::LeakedReservation { node, reserved } => {
                write!(f, "node {node}: {reserved} bytes still reserved")
            }
        }
    }
}

/// Check the node/file invariants.
///
/// Meant to be called while no operation is in flight: an upload between
/// reservation and commit shows up as [`Violation::LeakedReservation`], and a
/// removal between its metadata and byte steps may show a transient
/// [`Violation::UsedMismatch`].
pub fn check_invariants(nodes: &NodeRegistry, files: &FileRegistry) -> Vec<Violation> {
    let slots = nodes.slots();
    let mut expected: HashMap<NodeId, u64> = slots.iter().map(|s| (s.id(), 0)).collect();
    let mut violations = Vec::new();

    for record in files.accounted() {
        match expected.get_mut(&record.owner) {
            Some(total) => *total += record.size,
            None => violations.push(Violation::UnknownOwner {
                path: record.path,
                owner: record.owner,
            }),
        }
    }

    for slot in &slots {
        let node = slot.node();
        let want = expected.get(&node.id).copied().unwrap_or(0);
        if node.used != want {
            violations.push(Violation::UsedMismatch {
                node: node.id,
                used: node.used,
                expected: want,
            });
        }
        if node.used > node.capacity {
            violations.push(Violation::OverCapacity {
                node: node.id,
                used: node.used,
                capacity: node.capacity,
            });
        }
        let reserved = slot.reserved();
        if reserved > 0 {
            violations.push(Violation::LeakedReservation {
                node: node.id,
                reserved,
            });
        }
    }

    violations
}
