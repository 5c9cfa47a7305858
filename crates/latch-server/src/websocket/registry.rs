//! Registry of live relay connections.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use latch_core::ConnectionId;
use thiserror::Error;
use tracing::debug;

use super::connection::{ClientConnection, ConnectionInfo, ConnectionState};
use crate::metrics::WS_CONNECTIONS_ACTIVE;

/// Registration failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Another live connection already uses this identifier.
    #[error("connection {0} is already registered")]
    Duplicate(ConnectionId),
}

/// Every connection between acceptance and teardown, keyed by ID.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection`.
    ///
    /// The entry lives as long as the returned [`Registration`].
    pub fn register(
        self: &Arc<Self>,
        connection: Arc<ClientConnection>,
    ) -> Result<Registration, RegistryError> {
        match self.connections.entry(connection.id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(connection.id.clone())),
            Entry::Vacant(slot) => {
                let _ = slot.insert(connection.clone());
                metrics::gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
                debug!(conn_id = %connection.id, "connection registered");
                Ok(Registration {
                    registry: self.clone(),
                    connection,
                })
            }
        }
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Lifecycle state of a registered connection.
    pub fn state_of(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.connections.get(id).map(|entry| entry.value().state())
    }

    /// Snapshot of every connection, oldest first.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut connections: Vec<Arc<ClientConnection>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        connections.sort_by_key(|c| c.connected_at);
        connections.iter().map(|c| c.info()).collect()
    }

    fn remove(&self, connection: &Arc<ClientConnection>) {
        let removed = self
            .connections
            .remove_if(&connection.id, |_, current| Arc::ptr_eq(current, connection));
        if removed.is_some() {
            metrics::gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
            debug!(conn_id = %connection.id, "connection deregistered");
        }
    }
}

/// Keeps a connection registered; dropping it deregisters.
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    connection: Arc<ClientConnection>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.connection);
    }
}
