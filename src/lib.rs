//! # sDHT lookup
//!
//! This crate implements the iterative `FIND_NODE` lookup of a Kademlia-style
//! distributed hash table. Given a target identifier it repeatedly queries the
//! closest known peers, merges the peers they return and stops once nobody is
//! left to ask, returning the `k` contacts closest to the target.
//!
//! The lookup itself is transport-agnostic. It talks to the outside world
//! through two traits:
//!
//! - [`Routing`] supplies the seed contacts and is told about every peer that
//!   was heard from or merely mentioned.
//! - [`DhtNetwork`] performs the remote `FIND_NODE` and `PING` calls.
//!
//! The crate is split into a handful of modules:
//!
//! - [`core`]: identifiers, XOR distance, the routing table and the
//!   [`DhtNode`]/[`DiscoveryNode`] wrappers that own one.
//! - [`lookup`]: the [`FindNode`] coordinator and the ranking helpers.
//! - [`candidates`]: the shared candidate pool and its partitioning rules.
//! - [`overlay`]: per-lookup annotations attached to contacts.
//! - [`signal`]: the wake-up channel between workers and the coordinator.
//! - [`pool`]: the bounded task pool that runs queries.
//! - [`memory`]: an in-process [`DhtNetwork`] for simulations and tests.
//! - [`config`] and [`identity`]: tunables and the persisted local identifier.
//!
//! ## Getting started
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sdht_lookup::{spawn_memory_node, Contact, LookupConfig, NetworkRegistry};
//!
//! # async fn run(peers: Vec<Contact>, me: Contact) {
//! let registry = Arc::new(NetworkRegistry::default());
//! let node = spawn_memory_node(&registry, me, LookupConfig::default()).await;
//! for peer in peers {
//!     node.observe_contact(peer).await;
//! }
//! let closest = node.iterative_find_node([0u8; 20]).await;
//! println!("found {} contacts", closest.len());
//! # }
//! ```
//!
//! The binary in `src/main.rs` builds a simulated network this way and prints
//! the result of one lookup.

pub mod candidates;
pub mod config;
pub mod core;
pub mod identity;
pub mod lookup;
pub mod memory;
pub mod overlay;
pub mod pool;
pub mod signal;

pub use config::LookupConfig;
pub use core::{
    derive_node_id, distance, xor_distance, Contact, DhtNetwork, DhtNode, DiscoveryNode, NodeId,
    Routing, RoutingTable, ID_LEN, NO_DISTANCE,
};
pub use identity::IdentityStore;
pub use lookup::{find_node, FindNode};
pub use memory::{spawn_memory_node, MemoryNetwork, NetworkRegistry};
pub use overlay::Decorated;
pub use pool::WorkerPool;
pub use signal::CompletionSignal;
