//! Authoritative node and file state for Quay.
//!
//! [`NodeRegistry`] owns the registered nodes, their connectors and their
//! capacity accounting. [`FileRegistry`] maps logical paths to the node
//! holding their bytes. Both write through to a [`RecordStore`] and keep an
//! in-memory view guarded by short `parking_lot` locks that are never held
//! across an `.await`.
//!
//! [`RecordStore`]: quay_meta::RecordStore

mod error;
mod file;
mod invariants;
mod node;

pub use error::RegistryError;
pub use file::FileRegistry;
pub use invariants::{Violation, check_invariants};
pub use node::{NodeRegistry, NodeSlot, Reservation};
