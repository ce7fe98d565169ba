//! Registry coordinator for Quay.
//!
//! [`QuayServer`] composes the node and file registries, the placement
//! engine and the connector layer into the eight file-store operations.
//! Front ends depend on the [`QuayEngine`] trait rather than the concrete
//! server.

pub mod engine;
pub mod error;
pub mod server;

pub use engine::QuayEngine;
pub use error::{EngineError, ErrorKind};
pub use quay_registry::Violation;
pub use server::{Orphan, QuayServer, QuayServerConfig};

#[cfg(test)]
mod tests;
