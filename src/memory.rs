//! In-process transport connecting [`DiscoveryNode`]s through a shared registry.
//!
//! Every node gets its own [`MemoryNetwork`] handle pointing at the same
//! [`NetworkRegistry`]. RPCs are plain method calls on the registered peer, so
//! whole networks can be simulated inside one process. Unregistering a node
//! makes it unreachable, which is how simulations model peers going away.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::LookupConfig;
use crate::core::{Contact, DhtNetwork, DiscoveryNode, NodeId};

#[derive(Default)]
pub struct NetworkRegistry {
    peers: RwLock<HashMap<NodeId, DiscoveryNode<MemoryNetwork>>>,
}

impl NetworkRegistry {
    pub async fn register(&self, node: &DiscoveryNode<MemoryNetwork>) {
        let mut peers = self.peers.write().await;
        peers.insert(node.node_id(), node.clone());
    }

    /// Remove a node; later RPCs to it fail as unreachable.
    pub async fn unregister(&self, id: &NodeId) -> bool {
        let mut peers = self.peers.write().await;
        peers.remove(id).is_some()
    }

    pub async fn get(&self, id: &NodeId) -> Option<DiscoveryNode<MemoryNetwork>> {
        let peers = self.peers.read().await;
        peers.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }
}

/// [`DhtNetwork`] implementation backed by a [`NetworkRegistry`].
#[derive(Clone)]
pub struct MemoryNetwork {
    registry: Arc<NetworkRegistry>,
    /// Contact info for the local node (presented to peers on every RPC).
    self_contact: Contact,
}

impl MemoryNetwork {
    pub fn new(registry: Arc<NetworkRegistry>, self_contact: Contact) -> Self {
        Self {
            registry,
            self_contact,
        }
    }

    async fn peer(&self, to: &Contact) -> Result<DiscoveryNode<MemoryNetwork>> {
        self.registry
            .get(&to.id)
            .await
            .ok_or_else(|| anyhow!("peer {} not reachable", to.addr))
    }
}

#[async_trait]
impl DhtNetwork for MemoryNetwork {
    async fn find_node(&self, to: &Contact, target: NodeId) -> Result<Vec<Contact>> {
        let peer = self.peer(to).await?;
        Ok(peer
            .handle_find_node_request(&self.self_contact, target)
            .await)
    }

    async fn ping(&self, to: &Contact) -> Result<()> {
        self.peer(to).await.map(|_| ())
    }
}

/// Build a node on `registry` and register it so others can reach it.
pub async fn spawn_memory_node(
    registry: &Arc<NetworkRegistry>,
    contact: Contact,
    config: LookupConfig,
) -> DiscoveryNode<MemoryNetwork> {
    let network = MemoryNetwork::new(registry.clone(), contact.clone());
    let node = DiscoveryNode::new(contact.id, contact, network, config);
    registry.register(&node).await;
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ID_LEN;

    fn contact(index: u8) -> Contact {
        let mut id = [0u8; ID_LEN];
        id[0] = index;
        Contact {
            id,
            addr: format!("mem-{index}"),
        }
    }

    #[tokio::test]
    async fn find_node_reaches_registered_peer() {
        let registry = Arc::new(NetworkRegistry::default());
        let a = spawn_memory_node(&registry, contact(1), LookupConfig::default()).await;
        let b = spawn_memory_node(&registry, contact(2), LookupConfig::default()).await;
        b.observe_contact(contact(3)).await;

        let network = MemoryNetwork::new(registry.clone(), a.contact());
        let nodes = network
            .find_node(&b.contact(), contact(3).id)
            .await
            .expect("peer is registered");
        assert!(nodes.iter().any(|c| c.id == contact(3).id));
        assert!(b.knows(&a.node_id()).await, "callee learns the caller");
    }

    #[tokio::test]
    async fn unregistered_peer_is_unreachable() {
        let registry = Arc::new(NetworkRegistry::default());
        let a = spawn_memory_node(&registry, contact(1), LookupConfig::default()).await;
        let b = spawn_memory_node(&registry, contact(2), LookupConfig::default()).await;
        assert_eq!(registry.len().await, 2);
        assert!(registry.unregister(&b.node_id()).await);

        let network = MemoryNetwork::new(registry.clone(), a.contact());
        assert!(network.ping(&b.contact()).await.is_err());
        assert!(network.find_node(&b.contact(), [0u8; ID_LEN]).await.is_err());
    }
}
