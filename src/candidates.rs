//! The working set of one lookup: every contact seeded or discovered so far.
//!
//! Workers insert concurrently while the coordinator reads. All decisions are
//! made over [`CandidatePool::snapshot`] copies, never a live view.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::core::{distance, Contact, NodeId, NO_DISTANCE};
use crate::overlay::Decorated;

/// Set by the coordinator when a query for the contact is submitted.
pub const DISPATCHED: &str = "dispatched";
/// Set by the worker, as an [`Instant`], when the request actually starts.
pub const REQUESTED: &str = "requested";
/// Set to `true` by the worker once the contact answered.
pub const RESPONSE: &str = "response";

pub type Candidate = Arc<Decorated<Contact>>;

#[derive(Debug, Default)]
pub struct CandidatePool {
    nodes: Mutex<HashMap<NodeId, Candidate>>,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add contacts that are not yet in the pool.
    ///
    /// Known contacts keep their existing entry and annotations. Returns how
    /// many contacts were new.
    pub fn insert_all<I>(&self, contacts: I) -> usize
    where
        I: IntoIterator<Item = Contact>,
    {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        let before = nodes.len();
        for contact in contacts {
            nodes
                .entry(contact.id)
                .or_insert_with(|| Arc::new(Decorated::new(contact)));
        }
        nodes.len() - before
    }

    /// Point-in-time copy of the pool's members.
    pub fn snapshot(&self) -> Vec<Candidate> {
        let nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        nodes.values().cloned().collect()
    }

    pub fn get(&self, id: &NodeId) -> Option<Candidate> {
        let nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        nodes.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn has_responded(candidate: &Decorated<Contact>) -> bool {
    candidate.get_or(RESPONSE, false)
}

/// Smallest [`distance`] from any candidate to `target`, or [`NO_DISTANCE`] if
/// there are none.
pub fn min_distance(candidates: &[Candidate], target: &NodeId) -> u32 {
    candidates
        .iter()
        .map(|candidate| distance(&candidate.data().id, target))
        .min()
        .unwrap_or(NO_DISTANCE)
}

/// Candidates that still need attention from the coordinator.
#[derive(Debug, Default)]
pub struct Partition {
    /// Never dispatched.
    pub unqueried: Vec<Candidate>,
    /// Dispatched and unanswered, and either still queued or requested
    /// within the timeout.
    pub awaiting: Vec<Candidate>,
}

impl Partition {
    /// True when nothing is left to query or wait for.
    pub fn is_settled(&self) -> bool {
        self.unqueried.is_empty() && self.awaiting.is_empty()
    }
}

/// Split a snapshot into unqueried and awaiting candidates as of `now`.
///
/// The local node is never placed in either set. Candidates that answered, or
/// whose request is older than `timeout`, are settled and left out.
pub fn partition(
    candidates: &[Candidate],
    local_id: &NodeId,
    timeout: Duration,
    now: Instant,
) -> Partition {
    let mut split = Partition::default();
    for candidate in candidates {
        if &candidate.data().id == local_id {
            continue;
        }
        if !candidate.get_or(DISPATCHED, false) {
            split.unqueried.push(candidate.clone());
            continue;
        }
        if has_responded(candidate) {
            continue;
        }
        let pending = match candidate.get::<Instant>(REQUESTED) {
            None => true,
            Some(requested) => now.saturating_duration_since(requested) <= timeout,
        };
        if pending {
            split.awaiting.push(candidate.clone());
        }
    }
    split
}
