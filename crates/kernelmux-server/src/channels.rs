//! Per-connection channel registry.
//!
//! Holds the five logical channel sockets for one connection. Population
//! is all-or-nothing: either every channel opened or the registry is
//! empty, and emptiness is what the rest of the bridge reads as
//! "connection not live".

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use kernelmux_protocol::ChannelName;

use crate::errors::BridgeError;
use crate::kernel::{ChannelSocket, KernelManager};

/// The channel socket set for one connection.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelName, Arc<dyn ChannelSocket>>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Open all five channels against the kernel manager's endpoints.
    ///
    /// All-or-nothing: if any open fails, already-opened sockets are
    /// closed, the registry stays empty, and the error names the channel
    /// that failed.
    pub async fn open_all(&self, manager: &dyn KernelManager) -> Result<(), BridgeError> {
        let mut opened: HashMap<ChannelName, Arc<dyn ChannelSocket>> = HashMap::new();
        for channel in ChannelName::ALL {
            match manager.connect_channel(channel).await {
                Ok(socket) => {
                    let _ = opened.insert(channel, socket);
                }
                Err(source) => {
                    for socket in opened.values() {
                        socket.close().await;
                    }
                    return Err(BridgeError::ChannelOpen { channel, source });
                }
            }
        }
        debug!(channels = opened.len(), "channel streams created");
        *self.channels.write() = opened;
        Ok(())
    }

    /// The socket for a channel, if the registry is populated.
    pub fn get(&self, channel: ChannelName) -> Option<Arc<dyn ChannelSocket>> {
        self.channels.read().get(&channel).cloned()
    }

    /// Whether the registry holds no channels (connection not live).
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Number of open channels.
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Close every socket and clear the registry.
    ///
    /// Safe to call repeatedly; after the first call the registry is
    /// empty and later calls do nothing.
    pub async fn close_all(&self) {
        let channels = std::mem::take(&mut *self.channels.write());
        for (channel, socket) in channels {
            debug!(%channel, "closing channel socket");
            socket.close().await;
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
