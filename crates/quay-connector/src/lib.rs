//! Transport connectors for Quay storage nodes.
//!
//! This crate defines the [`Connector`] trait for moving file bytes to and
//! from a single storage node, along with the built-in transports:
//!
//! - [`LocalConnector`]: a directory on the local filesystem.
//! - [`MemoryConnector`]: volatile in-process storage.
//! - [`NetConnector`]: a remote [`NodeAgent`] reached over TCP, speaking
//!   length-prefixed postcard frames ([`AgentMessage`]).
//!
//! [`ConnectorFactory`] maps a [`TransportType`](quay_types::TransportType)
//! tag to the builder for its connector. [`FaultyConnector`] wraps any
//! connector to inject failures and latency.

mod agent;
mod error;
mod factory;
mod faulty;
mod local;
mod memory;
mod message;
mod net;
mod traits;

pub use agent::NodeAgent;
pub use error::ConnectorError;
pub use factory::{ConnectorBuilder, ConnectorFactory, ConnectorTarget};
pub use faulty::FaultyConnector;
pub use local::LocalConnector;
pub use memory::MemoryConnector;
pub use message::{AgentMessage, Payload};
pub use net::{MAX_MESSAGE_SIZE, NetConnector, NetOptions};
pub use traits::Connector;
