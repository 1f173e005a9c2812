#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use sdht_lookup::{
    derive_node_id, spawn_memory_node, Contact, DhtNetwork, DiscoveryNode, LookupConfig,
    MemoryNetwork, NetworkRegistry, NodeId, Routing, ID_LEN,
};

/// Scripted transport: fixed answers per peer, injected failures and latency,
/// and a log of every FIND_NODE call in the order it was issued.
#[derive(Clone, Default)]
pub struct TestNetwork {
    responses: Arc<Mutex<HashMap<NodeId, Vec<Contact>>>>,
    failures: Arc<Mutex<HashSet<NodeId>>>,
    latencies: Arc<Mutex<HashMap<NodeId, Duration>>>,
    calls: Arc<Mutex<Vec<NodeId>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_response(&self, node: NodeId, contacts: Vec<Contact>) {
        let mut responses = self.responses.lock().await;
        responses.insert(node, contacts);
    }

    pub async fn set_latency(&self, node: NodeId, latency: Duration) {
        let mut latencies = self.latencies.lock().await;
        latencies.insert(node, latency);
    }

    pub async fn set_failure(&self, node: NodeId, fail: bool) {
        let mut failures = self.failures.lock().await;
        if fail {
            failures.insert(node);
        } else {
            failures.remove(&node);
        }
    }

    pub async fn find_node_calls(&self) -> Vec<NodeId> {
        let calls = self.calls.lock().await;
        calls.clone()
    }

    /// Highest number of FIND_NODE calls that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn should_fail(&self, node: &NodeId) -> bool {
        let failures = self.failures.lock().await;
        failures.contains(node)
    }

    async fn maybe_sleep(&self, node: &NodeId) {
        let latency = {
            let latencies = self.latencies.lock().await;
            latencies.get(node).copied()
        };
        if let Some(delay) = latency {
            sleep(delay).await;
        }
    }
}

/// Decrements the in-flight gauge even when the call is cancelled mid-sleep.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DhtNetwork for TestNetwork {
    async fn find_node(&self, to: &Contact, _target: NodeId) -> Result<Vec<Contact>> {
        {
            let mut calls = self.calls.lock().await;
            calls.push(to.id);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(self.in_flight.clone());

        if self.should_fail(&to.id).await {
            return Err(anyhow!("injected network failure"));
        }
        self.maybe_sleep(&to.id).await;
        let responses = self.responses.lock().await;
        Ok(responses.get(&to.id).cloned().unwrap_or_default())
    }

    async fn ping(&self, to: &Contact) -> Result<()> {
        if self.should_fail(&to.id).await {
            return Err(anyhow!("injected network failure"));
        }
        Ok(())
    }
}

/// Routing stub returning fixed seeds and recording every `know_nodes` call.
#[derive(Default)]
pub struct TestRouting {
    seeds: Vec<Contact>,
    known: Mutex<Vec<(Contact, bool)>>,
    know_delay: Option<Duration>,
}

impl TestRouting {
    pub fn new(seeds: Vec<Contact>) -> Self {
        Self {
            seeds,
            known: Mutex::new(Vec::new()),
            know_delay: None,
        }
    }

    /// Make every `know_nodes` call take `delay` before it records anything.
    pub fn with_know_delay(mut self, delay: Duration) -> Self {
        self.know_delay = Some(delay);
        self
    }

    pub async fn known(&self) -> Vec<(Contact, bool)> {
        self.known.lock().await.clone()
    }
}

#[async_trait]
impl Routing for TestRouting {
    async fn near_nodes(&self, _target: &NodeId) -> Vec<Contact> {
        self.seeds.clone()
    }

    async fn know_nodes(&self, nodes: &[Contact], authoritative: bool) {
        if let Some(delay) = self.know_delay {
            sleep(delay).await;
        }
        let mut known = self.known.lock().await;
        known.extend(nodes.iter().cloned().map(|node| (node, authoritative)));
    }
}

/// A registered node on a shared [`MemoryNetwork`].
pub struct TestNode {
    pub node: DiscoveryNode<MemoryNetwork>,
}

impl TestNode {
    pub async fn new(registry: Arc<NetworkRegistry>, index: u32, k: usize, alpha: usize) -> Self {
        let config = LookupConfig::new(k, alpha, Duration::from_secs(1));
        let node = spawn_memory_node(&registry, make_contact(index), config).await;
        Self { node }
    }

    /// Like [`TestNode::new`] but with a hashed id, so ids spread over the whole space.
    pub async fn hashed(
        registry: Arc<NetworkRegistry>,
        index: u32,
        k: usize,
        alpha: usize,
    ) -> Self {
        let config = LookupConfig::new(k, alpha, Duration::from_secs(1));
        let contact = Contact {
            id: derive_node_id(&index.to_be_bytes()),
            addr: format!("node-{index}"),
        };
        let node = spawn_memory_node(&registry, contact, config).await;
        Self { node }
    }

    pub fn contact(&self) -> Contact {
        self.node.contact()
    }
}

pub fn make_node_id(index: u32) -> NodeId {
    let mut id = [0u8; ID_LEN];
    id[..4].copy_from_slice(&index.to_be_bytes());
    id
}

pub fn make_contact(index: u32) -> Contact {
    Contact {
        id: make_node_id(index),
        addr: format!("node-{index}"),
    }
}

/// An id whose [`sdht_lookup::distance`] to `target` is exactly `d`.
///
/// For `d > 8` the low byte is perturbed by `salt` so several distinct ids can
/// share one distance.
pub fn id_at_distance(target: &NodeId, d: u32, salt: u8) -> NodeId {
    let mut id = *target;
    if d == 0 {
        return id;
    }
    let bit = (d - 1) as usize;
    id[ID_LEN - 1 - bit / 8] ^= 1 << (bit % 8);
    if d > 8 {
        id[ID_LEN - 1] ^= salt;
    }
    id
}

pub fn contact_at_distance(target: &NodeId, d: u32, salt: u8) -> Contact {
    Contact {
        id: id_at_distance(target, d, salt),
        addr: format!("peer-{d}-{salt}"),
    }
}
