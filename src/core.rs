//! Core DHT logic: identifiers, distance, routing and the node state machine.
//!
//! This module contains the building blocks the lookup engine runs on:
//!
//! - **Identity & Hashing**: [`NodeId`], [`derive_node_id`]
//! - **Distance Metrics**: [`xor_distance`] and [`distance`] for Kademlia-style routing
//! - **Routing**: [`RoutingTable`], [`Contact`] and the [`Routing`] seam consulted by lookups
//! - **Transport**: the [`DhtNetwork`] trait
//! - **Node State Machine**: [`DhtNode`] and [`DiscoveryNode`]

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use iroh_blake3::Hasher;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::LookupConfig;
use crate::lookup;

// ============================================================================
// Type Aliases
// ============================================================================

/// Width of a node identifier in bytes.
pub const ID_LEN: usize = 20;

/// Width of a node identifier in bits.
pub const ID_BITS: usize = ID_LEN * 8;

/// A 160-bit identifier for DHT nodes.
pub type NodeId = [u8; ID_LEN];

/// Minimum distance reported for an empty set of nodes.
///
/// One past the largest real [`distance`], so it always sorts last.
pub const NO_DISTANCE: u32 = ID_BITS as u32 + 1;

// ============================================================================
// Hashing Functions
// ============================================================================

/// Compute a 32-byte BLAKE3 digest of the input data.
fn blake3_digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(data);
    let digest = hasher.finalize();

    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_bytes());
    out
}

/// Derive a stable 160-bit [`NodeId`] from arbitrary input.
///
/// The identifier is the leading [`ID_LEN`] bytes of the BLAKE3 digest:
///
/// ```
/// use sdht_lookup::derive_node_id;
///
/// let node_id = derive_node_id(b"example-public-key-bytes");
/// assert_eq!(node_id.len(), 20);
/// assert_eq!(node_id, derive_node_id(b"example-public-key-bytes"));
/// ```
pub fn derive_node_id(data: &[u8]) -> NodeId {
    let digest = blake3_digest(data);
    let mut id = [0u8; ID_LEN];
    id.copy_from_slice(&digest[..ID_LEN]);
    id
}

// ============================================================================
// Distance Metrics
// ============================================================================

/// Compute the XOR distance between two node IDs.
///
/// # Properties
/// - `xor_distance(a, a) == [0; ID_LEN]`
/// - `xor_distance(a, b) == xor_distance(b, a)`
pub fn xor_distance(a: &NodeId, b: &NodeId) -> NodeId {
    let mut out = [0u8; ID_LEN];
    for (slot, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *slot = x ^ y;
    }
    out
}

/// Compare two XOR distances lexicographically.
pub(crate) fn distance_cmp(a: &NodeId, b: &NodeId) -> Ordering {
    a.cmp(b)
}

/// Kademlia distance between two identifiers: the bit length of `a XOR b`.
///
/// Returns a value in `0..=160`; `0` only for identical identifiers. Nodes that
/// share a longer common prefix are closer.
///
/// ```
/// use sdht_lookup::distance;
///
/// let a = [0u8; 20];
/// let mut b = [0u8; 20];
/// b[19] = 0b0000_0100;
/// assert_eq!(distance(&a, &a), 0);
/// assert_eq!(distance(&a, &b), 3);
/// assert_eq!(distance(&b, &a), 3);
/// ```
pub fn distance(a: &NodeId, b: &NodeId) -> u32 {
    let dist = xor_distance(a, b);
    for (byte_idx, byte) in dist.iter().enumerate() {
        if *byte != 0 {
            let leading = byte.leading_zeros() as usize;
            return (ID_BITS - (byte_idx * 8 + leading)) as u32;
        }
    }
    0
}

/// Index of the first bit where `other` differs from `self_id`.
fn bucket_index(self_id: &NodeId, other: &NodeId) -> usize {
    match distance(self_id, other) {
        // identical ID: put in the "last" bucket
        0 => ID_BITS - 1,
        d => ID_BITS - d as usize,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing Table
// ─────────────────────────────────────────────────────────────────────────────

/// Represents another DHT node with its ID and transport address.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Contact {
    /// The node's unique identifier.
    pub id: NodeId,
    /// Transport-specific address used to reach the node.
    pub addr: String,
}

/// A single Kademlia routing bucket with LRU-like behavior.
///
/// Maintains up to k contacts, preferring long-lived nodes (older contacts)
/// over newly discovered ones to improve routing stability.
#[derive(Debug, Default, Clone)]
struct Bucket {
    /// Contacts in LRU order (oldest first, newest last).
    contacts: Vec<Contact>,
}

/// Outcome of attempting to add or refresh a contact in a bucket.
#[derive(Debug)]
enum BucketTouchOutcome {
    /// Contact was newly inserted (bucket had space).
    Inserted,
    /// Existing contact was refreshed (moved to end of LRU queue).
    Refreshed,
    /// Bucket is full; includes the oldest contact for potential eviction.
    Full {
        new_contact: Contact,
        oldest: Contact,
    },
}

/// Pending bucket update when a bucket is full and oldest contact needs ping check.
#[derive(Clone, Debug)]
struct PendingBucketUpdate {
    bucket_index: usize,
    oldest: Contact,
    new_contact: Contact,
}

impl Bucket {
    fn new() -> Self {
        Self {
            contacts: Vec::new(),
        }
    }

    fn position(&self, id: &NodeId) -> Option<usize> {
        self.contacts.iter().position(|c| &c.id == id)
    }

    /// Attempt to add or refresh a contact in the bucket.
    ///
    /// - If contact exists, moves it to end (most recently seen)
    /// - If bucket has space, inserts the contact
    /// - If bucket is full, returns the oldest contact for potential eviction
    fn touch(&mut self, contact: Contact, k: usize) -> BucketTouchOutcome {
        if self.refresh(&contact.id) {
            return BucketTouchOutcome::Refreshed;
        }

        if self.contacts.len() < k {
            self.contacts.push(contact);
            return BucketTouchOutcome::Inserted;
        }
        match self.contacts.first().cloned() {
            Some(oldest) => BucketTouchOutcome::Full {
                new_contact: contact,
                oldest,
            },
            // k == 0: nothing can ever be stored, report the contact as its own oldest.
            None => BucketTouchOutcome::Full {
                oldest: contact.clone(),
                new_contact: contact,
            },
        }
    }

    /// Insert a contact only if it is unknown and the bucket has room.
    ///
    /// Unlike [`touch`](Self::touch) this never reorders existing entries.
    fn offer(&mut self, contact: Contact, k: usize) -> bool {
        if self.position(&contact.id).is_some() || self.contacts.len() >= k {
            return false;
        }
        self.contacts.push(contact);
        true
    }

    /// Refresh a contact by moving it to the end of the LRU queue.
    ///
    /// Returns true if the contact was found and refreshed.
    fn refresh(&mut self, id: &NodeId) -> bool {
        if let Some(pos) = self.position(id) {
            let existing = self.contacts.remove(pos);
            self.contacts.push(existing);
            true
        } else {
            false
        }
    }

    /// Remove a contact from the bucket.
    ///
    /// Returns true if the contact was found and removed.
    fn remove(&mut self, id: &NodeId) -> bool {
        if let Some(pos) = self.position(id) {
            self.contacts.remove(pos);
            true
        } else {
            false
        }
    }
}

/// Kademlia routing table with one bucket per bit of a 160-bit node ID.
///
/// Each bucket stores up to k contacts at a specific XOR distance from the local node.
/// Buckets use LRU-like behavior, preferring long-lived nodes for stability.
#[derive(Debug)]
pub struct RoutingTable {
    /// This node's ID.
    self_id: NodeId,
    /// Maximum contacts per bucket.
    k: usize,
    /// One bucket for each bit position of the XOR distance.
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    /// Create a new routing table for the given node ID.
    pub fn new(self_id: NodeId, k: usize) -> Self {
        Self {
            self_id,
            k,
            buckets: vec![Bucket::new(); ID_BITS],
        }
    }

    /// Update the k parameter, trimming buckets if they exceed the new limit.
    pub fn set_k(&mut self, k: usize) {
        self.k = k;
        for bucket in &mut self.buckets {
            while bucket.contacts.len() > self.k {
                bucket.contacts.remove(0);
            }
        }
    }

    /// Current bucket capacity.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Add or refresh a contact that was verified first-hand.
    pub fn update(&mut self, contact: Contact) {
        let _ = self.update_with_pending(contact);
    }

    /// Record a contact learned second-hand from another node.
    ///
    /// The contact is only inserted when it is unknown and its bucket has room;
    /// hearsay never refreshes or evicts verified entries. Returns true if the
    /// contact was inserted.
    pub fn offer(&mut self, contact: Contact) -> bool {
        if contact.id == self.self_id {
            return false;
        }
        let idx = bucket_index(&self.self_id, &contact.id);
        self.buckets[idx].offer(contact, self.k)
    }

    /// Add or update a contact, returning pending update info if bucket is full.
    ///
    /// When a bucket is full and a new contact is seen, this returns info
    /// about the oldest contact so the caller can ping it to decide whether
    /// to evict it or discard the new contact.
    fn update_with_pending(&mut self, contact: Contact) -> Option<PendingBucketUpdate> {
        if contact.id == self.self_id || self.k == 0 {
            return None;
        }
        let idx = bucket_index(&self.self_id, &contact.id);
        match self.buckets[idx].touch(contact, self.k) {
            BucketTouchOutcome::Inserted | BucketTouchOutcome::Refreshed => None,
            BucketTouchOutcome::Full {
                new_contact,
                oldest,
            } => Some(PendingBucketUpdate {
                bucket_index: idx,
                oldest,
                new_contact,
            }),
        }
    }

    /// Find the k closest contacts to a target node ID.
    pub fn closest(&self, target: &NodeId, k: usize) -> Vec<Contact> {
        let mut all: Vec<Contact> = self
            .buckets
            .iter()
            .flat_map(|b| b.contacts.iter().cloned())
            .collect();

        all.sort_by(|a, b| {
            let da = xor_distance(&a.id, target);
            let db = xor_distance(&b.id, target);
            distance_cmp(&da, &db)
        });

        all.truncate(k);
        all
    }

    /// Whether the table holds a contact with this ID.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.buckets[bucket_index(&self.self_id, id)]
            .position(id)
            .is_some()
    }

    /// Total number of contacts across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply the result of pinging the oldest contact in a full bucket.
    ///
    /// If the oldest contact is still alive, it is refreshed (moved to end).
    /// If the oldest is dead, it is removed and the new contact is inserted.
    fn apply_ping_result(&mut self, pending: PendingBucketUpdate, oldest_alive: bool) {
        let bucket = &mut self.buckets[pending.bucket_index];
        if oldest_alive {
            bucket.refresh(&pending.oldest.id);
            return;
        }

        let _ = bucket.remove(&pending.oldest.id);
        let _ = bucket.offer(pending.new_contact, self.k);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Collaborator Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Network abstraction for DHT RPC operations.
///
/// This trait abstracts the transport layer, allowing the lookup logic to work
/// with different network implementations (e.g. [`crate::MemoryNetwork`], a
/// scripted mock for testing, or a real socket transport).
#[async_trait]
pub trait DhtNetwork: Send + Sync + 'static {
    /// Send a FIND_NODE RPC asking `to` for the contacts it knows nearest to `target`.
    async fn find_node(&self, to: &Contact, target: NodeId) -> Result<Vec<Contact>>;

    /// Ping a contact to check if it's still responsive.
    ///
    /// Used for the Kademlia "ping-before-evict" rule: when a bucket is full,
    /// the oldest contact is pinged to verify it's still alive before deciding
    /// whether to keep it or replace it with the new contact.
    async fn ping(&self, to: &Contact) -> Result<()>;
}

/// Routing knowledge consulted and fed by iterative lookups.
///
/// Implementations are shared by every worker of a lookup and must not hold
/// callers for long.
#[async_trait]
pub trait Routing: Send + Sync + 'static {
    /// Contacts to seed a lookup for `target` with.
    async fn near_nodes(&self, target: &NodeId) -> Vec<Contact>;

    /// Report contacts seen during a lookup.
    ///
    /// `authoritative` is true when the contacts answered us directly and false
    /// when another node merely mentioned them.
    async fn know_nodes(&self, nodes: &[Contact], authoritative: bool);
}

// ─────────────────────────────────────────────────────────────────────────────
// DHT Node
// ─────────────────────────────────────────────────────────────────────────────

/// DHT node state: a routing table plus the [`DhtNetwork`] used to reach peers.
///
/// The type is generic over the network layer so tests can use a scripted
/// mock while simulations use [`crate::MemoryNetwork`].
///
/// # Key Methods
///
/// * [`observe_contact`](Self::observe_contact) - Update routing table when peers are discovered
/// * [`handle_find_node_request`](Self::handle_find_node_request) - Handle incoming FIND_NODE RPC
///
/// Lookups are driven through [`DiscoveryNode::iterative_find_node`], which
/// hands the node to the lookup engine as its [`Routing`] collaborator.
pub struct DhtNode<N: DhtNetwork> {
    /// This node's unique identifier.
    pub id: NodeId,
    /// Contact info for this node (ID + address).
    pub self_contact: Contact,
    /// Kademlia routing table with one bucket per ID bit.
    routing: Arc<Mutex<RoutingTable>>,
    /// Network transport for sending RPCs.
    network: Arc<N>,
    /// Lookup tuning; `k` doubles as the bucket size.
    config: LookupConfig,
}

impl<N: DhtNetwork> DhtNode<N> {
    /// Create a new DHT node with the given ID, contact info, network and tuning.
    pub fn new(id: NodeId, self_contact: Contact, network: N, config: LookupConfig) -> Self {
        Self {
            id,
            self_contact,
            routing: Arc::new(Mutex::new(RoutingTable::new(id, config.k))),
            network: Arc::new(network),
            config,
        }
    }

    /// Observe a contact and update the routing table.
    ///
    /// If the bucket for this contact is full, spawns a background task to ping
    /// the oldest contact and decide whether to evict it.
    pub async fn observe_contact(&self, contact: Contact) {
        if contact.id == self.id {
            return;
        }
        let pending = {
            let mut rt = self.routing.lock().await;
            rt.update_with_pending(contact)
        };
        if let Some(update) = pending {
            self.spawn_bucket_refresh(update);
        }
    }

    /// Record a contact another node told us about.
    pub async fn offer_contact(&self, contact: Contact) -> bool {
        let mut rt = self.routing.lock().await;
        rt.offer(contact)
    }

    /// Spawn a background task to ping the oldest contact in a full bucket.
    ///
    /// This implements the Kademlia "ping-before-evict" rule.
    fn spawn_bucket_refresh(&self, pending: PendingBucketUpdate) {
        let network = self.network.clone();
        let routing = self.routing.clone();
        tokio::spawn(async move {
            let alive = match network.ping(&pending.oldest).await {
                Ok(_) => true,
                Err(err) => {
                    debug!(
                        peer = %hex::encode(pending.oldest.id),
                        addr = %pending.oldest.addr,
                        "ping failed: {err:?}"
                    );
                    false
                }
            };
            let mut rt = routing.lock().await;
            rt.apply_ping_result(pending, alive);
        });
    }

    /// Handle an incoming FIND_NODE RPC request.
    ///
    /// Returns the k closest contacts to the target ID from our routing table.
    pub async fn handle_find_node_request(&self, from: &Contact, target: NodeId) -> Vec<Contact> {
        self.observe_contact(from.clone()).await;
        let rt = self.routing.lock().await;
        rt.closest(&target, self.config.k)
    }

    /// Number of contacts currently in the routing table.
    pub async fn routing_len(&self) -> usize {
        self.routing.lock().await.len()
    }

    /// Whether the routing table currently holds `id`.
    pub async fn knows(&self, id: &NodeId) -> bool {
        self.routing.lock().await.contains(id)
    }
}

#[async_trait]
impl<N: DhtNetwork> Routing for DhtNode<N> {
    async fn near_nodes(&self, target: &NodeId) -> Vec<Contact> {
        let rt = self.routing.lock().await;
        rt.closest(target, self.config.k)
    }

    async fn know_nodes(&self, nodes: &[Contact], authoritative: bool) {
        for contact in nodes {
            if authoritative {
                self.observe_contact(contact.clone()).await;
            } else {
                self.offer_contact(contact.clone()).await;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery Node (Public API)
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable public handle on a [`DhtNode`] for peer discovery workflows.
///
/// # Example
///
/// ```ignore
/// let node = DiscoveryNode::new(id, contact, network, LookupConfig::default());
/// node.observe_contact(peer_contact).await;
/// let closest = node.iterative_find_node(target_id).await;
/// ```
pub struct DiscoveryNode<N: DhtNetwork> {
    inner: Arc<DhtNode<N>>,
}

impl<N: DhtNetwork> Clone for DiscoveryNode<N> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<N: DhtNetwork> DiscoveryNode<N> {
    /// Create a new discovery node with the given parameters.
    pub fn new(id: NodeId, self_contact: Contact, network: N, config: LookupConfig) -> Self {
        Self {
            inner: Arc::new(DhtNode::new(id, self_contact, network, config)),
        }
    }

    /// Get this node's contact information.
    pub fn contact(&self) -> Contact {
        self.inner.self_contact.clone()
    }

    /// Get this node's unique identifier.
    pub fn node_id(&self) -> NodeId {
        self.inner.id
    }

    /// Lookup tuning this node was built with.
    pub fn config(&self) -> &LookupConfig {
        &self.inner.config
    }

    /// Observe a contact and update the routing table.
    pub async fn observe_contact(&self, contact: Contact) {
        self.inner.observe_contact(contact).await;
    }

    /// Perform an iterative lookup to find the k closest nodes to a target.
    ///
    /// Never fails: unreachable peers are skipped and an empty network yields
    /// an empty list.
    pub async fn iterative_find_node(&self, target: NodeId) -> Vec<Contact> {
        lookup::find_node(
            self.inner.id,
            target,
            &self.inner.config,
            self.inner.clone(),
            self.inner.network.clone(),
        )
        .await
    }

    /// Handle an incoming FIND_NODE RPC request.
    pub async fn handle_find_node_request(&self, from: &Contact, target: NodeId) -> Vec<Contact> {
        self.inner.handle_find_node_request(from, target).await
    }

    /// Number of contacts currently in the routing table.
    pub async fn routing_len(&self) -> usize {
        self.inner.routing_len().await
    }

    /// Whether the routing table currently holds `id`.
    pub async fn knows(&self, id: &NodeId) -> bool {
        self.inner.knows(id).await
    }
}
