//! Tracking of live client connections.
//!
//! The registry owns no lifecycle: connections add themselves after a
//! successful connect and are removed on disconnect, from whichever
//! path gets there first. Removal of an unknown id is a no-op, which is
//! what makes double-disconnect safe at this layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::connection::KernelConnection;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<KernelConnection>>>,
    active_count: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, connection: Arc<KernelConnection>) {
        let id = connection.connection_id().to_string();
        let mut conns = self.connections.write().await;
        if conns.insert(id.clone(), connection).is_none() {
            let _ = self.active_count.fetch_add(1, Ordering::SeqCst);
        }
        debug!(connection_id = %id, total = conns.len(), "connection registered");
    }

    /// Remove a connection by id. Unknown ids are tolerated.
    pub async fn remove(&self, connection_id: &str) -> Option<Arc<KernelConnection>> {
        let mut conns = self.connections.write().await;
        let removed = conns.remove(connection_id);
        if removed.is_some() {
            let _ = self.active_count.fetch_sub(1, Ordering::SeqCst);
            debug!(connection_id, total = conns.len(), "connection deregistered");
        }
        removed
    }

    pub async fn get(&self, connection_id: &str) -> Option<Arc<KernelConnection>> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Lock-free count, usable from sync contexts like health reporting.
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    /// All live connections attached to one kernel.
    pub async fn kernel_connections(&self, kernel_id: &str) -> Vec<Arc<KernelConnection>> {
        let conns = self.connections.read().await;
        conns
            .values()
            .filter(|c| c.kernel_id() == kernel_id)
            .cloned()
            .collect()
    }

    /// Disconnect and drop everything, for server shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut conns = self.connections.write().await;
            conns.drain().map(|(_, c)| c).collect()
        };
        for connection in &drained {
            let _ = self.active_count.fetch_sub(1, Ordering::SeqCst);
            connection.disconnect().await;
        }
    }
}
