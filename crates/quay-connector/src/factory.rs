//! Transport tag → connector construction.

use std::collections::HashMap;
use std::sync::Arc;

use quay_types::TransportType;

use crate::error::ConnectorError;
use crate::local::LocalConnector;
use crate::memory::MemoryConnector;
use crate::net::{NetConnector, NetOptions};
use crate::traits::Connector;

/// What a builder needs to construct a connector for one node.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorTarget<'a> {
    /// The transport tag given at registration.
    pub transport: TransportType,
    /// Transport-specific endpoint.
    pub address: &'a str,
    /// Opaque credential passed through from registration.
    ///
    /// None of the built-in transports use it.
    pub key: Option<&'a str>,
}

/// Constructs the connector for one node of a given transport type.
pub type ConnectorBuilder =
    dyn Fn(&ConnectorTarget<'_>) -> Result<Arc<dyn Connector>, ConnectorError> + Send + Sync;

/// Registry of connector builders keyed by transport tag.
///
/// The coordinator only ever asks the factory for a connector; it never
/// branches on the transport type itself.
#[derive(Clone, Default)]
pub struct ConnectorFactory {
    builders: HashMap<TransportType, Arc<ConnectorBuilder>>,
}

impl ConnectorFactory {
    /// Create a factory with no transports registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory with the built-in local, memory and net transports.
    pub fn standard(net: NetOptions) -> Self {
        Self::new()
            .with(TransportType::Local, |target| {
                Ok(Arc::new(LocalConnector::new(target.address)) as Arc<dyn Connector>)
            })
            .with(TransportType::Memory, |target| {
                Ok(Arc::new(MemoryConnector::new(target.address)) as Arc<dyn Connector>)
            })
            .with(TransportType::Net, move |target| {
                Ok(Arc::new(NetConnector::new(target.address, net)) as Arc<dyn Connector>)
            })
    }

    /// Register (or replace) the builder for `transport`.
    pub fn register<F>(&mut self, transport: TransportType, builder: F)
    where
        F: Fn(&ConnectorTarget<'_>) -> Result<Arc<dyn Connector>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.builders.insert(transport, Arc::new(builder));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, transport: TransportType, builder: F) -> Self
    where
        F: Fn(&ConnectorTarget<'_>) -> Result<Arc<dyn Connector>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.register(transport, builder);
        self
    }

    /// Whether a builder is registered for `transport`.
    pub fn supports(&self, transport: TransportType) -> bool {
        self.builders.contains_key(&transport)
    }

    /// Build a connector for `target`.
    pub fn build(&self, target: &ConnectorTarget<'_>) -> Result<Arc<dyn Connector>, ConnectorError> {
        let builder = self
            .builders
            .get(&target.transport)
            .ok_or(ConnectorError::UnsupportedTransport(target.transport))?;
        builder(target)
    }
}

impl std::fmt::Debug for ConnectorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut transports: Vec<_> = self.builders.keys().copied().collect();
        transports.sort();
        f.debug_struct("ConnectorFactory")
            .field("transports", &transports)
            .finish()
    }
}
