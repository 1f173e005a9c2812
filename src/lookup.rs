//! Iterative FIND_NODE lookup.
//!
//! One [`FindNode`] drives one lookup:
//!
//! 1. Seed the [`CandidatePool`] from [`Routing::near_nodes`].
//! 2. Each round, snapshot the pool, record the smallest distance seen so far
//!    (`last_min`) and split the snapshot into unqueried and awaiting
//!    candidates. Stop when both are empty.
//! 3. Submit a query for every unqueried candidate to the [`WorkerPool`], then
//!    sleep on the [`CompletionSignal`] until any query finishes or the request
//!    timeout elapses.
//! 4. Abort whatever is still running and return the `k` best candidates:
//!    closest first, and among equally distant ones those that answered first.
//!
//! A worker that gets an answer merges the contacts strictly closer than the
//! `last_min` of the round it was dispatched in; that filter is what makes the
//! pool converge. It then reports the responder and everything it returned to
//! [`Routing::know_nodes`], and only after both steps marks the candidate as
//! answered, so the coordinator cannot settle while a merge is pending.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::candidates::{
    has_responded, min_distance, partition, Candidate, CandidatePool, DISPATCHED, REQUESTED,
    RESPONSE,
};
use crate::config::LookupConfig;
use crate::core::{distance, distance_cmp, xor_distance, Contact, DhtNetwork, NodeId, Routing};
use crate::overlay::undecorate;
use crate::pool::WorkerPool;
use crate::signal::{CompletionSignal, SignalGuard};

/// Run one iterative lookup for `target` and return up to `k` closest contacts.
///
/// Never fails: unreachable peers only shrink the answer, and an empty routing
/// table yields an empty list.
pub async fn find_node<R, N>(
    local_id: NodeId,
    target: NodeId,
    config: &LookupConfig,
    routing: Arc<R>,
    network: Arc<N>,
) -> Vec<Contact>
where
    R: Routing,
    N: DhtNetwork,
{
    FindNode::new(local_id, target, config, routing, network)
        .execute()
        .await
}

/// State of a single lookup. Consumed by [`execute`](Self::execute).
pub struct FindNode<R: Routing, N: DhtNetwork> {
    local_id: NodeId,
    target: NodeId,
    k: usize,
    request_timeout: Duration,
    routing: Arc<R>,
    network: Arc<N>,
    candidates: Arc<CandidatePool>,
    signal: Arc<CompletionSignal>,
    workers: WorkerPool,
}

impl<R: Routing, N: DhtNetwork> FindNode<R, N> {
    pub fn new(
        local_id: NodeId,
        target: NodeId,
        config: &LookupConfig,
        routing: Arc<R>,
        network: Arc<N>,
    ) -> Self {
        Self {
            local_id,
            target,
            k: config.k,
            request_timeout: config.request_timeout(),
            routing,
            network,
            candidates: Arc::new(CandidatePool::new()),
            signal: Arc::new(CompletionSignal::new()),
            workers: WorkerPool::new(config.alpha, config.max_workers()),
        }
    }

    pub async fn execute(mut self) -> Vec<Contact> {
        let seeds = self.routing.near_nodes(&self.target).await;
        self.candidates.insert_all(seeds);

        let mut rounds = 0usize;
        loop {
            // Reset before the snapshot so a query finishing from here on wakes the wait below.
            self.signal.reset();
            let snapshot = self.candidates.snapshot();
            let last_min = min_distance(&snapshot, &self.target);
            let split = partition(
                &snapshot,
                &self.local_id,
                self.request_timeout,
                Instant::now(),
            );
            if split.is_settled() {
                break;
            }

            rounds += 1;
            debug!(
                target_id = %hex::encode(self.target),
                round = rounds,
                candidates = snapshot.len(),
                unqueried = split.unqueried.len(),
                awaiting = split.awaiting.len(),
                last_min,
                "lookup round"
            );

            for candidate in split.unqueried {
                self.dispatch(candidate, last_min);
            }
            self.signal.wait(self.request_timeout).await;
        }

        // Anything still outstanding is treated as dead; late answers are dropped.
        self.workers.shutdown_now();

        let closest = find_k_nearest(&self.candidates.snapshot(), &self.target, self.k);
        debug!(
            target_id = %hex::encode(self.target),
            rounds,
            candidates = self.candidates.len(),
            found = closest.len(),
            "lookup finished"
        );
        closest
    }

    fn dispatch(&mut self, candidate: Candidate, last_min: u32) {
        candidate.put(DISPATCHED, true);
        let guard = SignalGuard::new(self.signal.clone());
        let query = Query {
            local_id: self.local_id,
            target: self.target,
            last_min,
            timeout: self.request_timeout,
            routing: self.routing.clone(),
            network: self.network.clone(),
            candidates: self.candidates.clone(),
        };
        self.workers.submit(async move {
            let _guard = guard;
            query.run(candidate).await;
        });
    }
}

/// Everything one worker needs to query a single candidate.
struct Query<R, N> {
    local_id: NodeId,
    target: NodeId,
    /// Pool minimum at dispatch time; only strictly closer contacts are merged.
    last_min: u32,
    timeout: Duration,
    routing: Arc<R>,
    network: Arc<N>,
    candidates: Arc<CandidatePool>,
}

impl<R: Routing, N: DhtNetwork> Query<R, N> {
    async fn run(self, candidate: Candidate) {
        let contact = candidate.data();
        if contact.id == self.local_id {
            return;
        }
        candidate.put(REQUESTED, Instant::now());

        let nodes = match time::timeout(self.timeout, self.network.find_node(contact, self.target))
            .await
        {
            Ok(Ok(nodes)) => nodes,
            Ok(Err(err)) => {
                debug!(
                    peer = %hex::encode(contact.id),
                    addr = %contact.addr,
                    "find_node failed: {err:?}"
                );
                return;
            }
            Err(_) => {
                debug!(
                    peer = %hex::encode(contact.id),
                    addr = %contact.addr,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "find_node timed out"
                );
                return;
            }
        };
        // Until RESPONSE is stamped the coordinator keeps waiting on this
        // candidate, so the merge and the routing report must both come first.
        let returned = nodes.len();
        let nearer = filter_nearer(nodes.clone(), &self.target, self.last_min);
        let added = self.candidates.insert_all(nearer);
        trace!(
            peer = %hex::encode(contact.id),
            returned,
            added,
            last_min = self.last_min,
            "merged find_node response"
        );

        self.routing
            .know_nodes(std::slice::from_ref(contact), true)
            .await;
        self.routing.know_nodes(&nodes, false).await;

        candidate.put(RESPONSE, true);
    }
}

/// Keep only contacts strictly closer to `target` than `last_min`.
pub fn filter_nearer(nodes: Vec<Contact>, target: &NodeId, last_min: u32) -> Vec<Contact> {
    nodes
        .into_iter()
        .filter(|node| distance(&node.id, target) < last_min)
        .collect()
}

/// Rank candidates and return the first `k` contacts.
///
/// Ordered by [`distance`] ascending; at equal distance, candidates that
/// answered come before those that did not, then the finer XOR distance
/// decides.
pub fn find_k_nearest(candidates: &[Candidate], target: &NodeId, k: usize) -> Vec<Contact> {
    // Read each response flag once so the ordering stays consistent while workers write.
    let mut ranked: Vec<(u32, bool, NodeId, &Candidate)> = candidates
        .iter()
        .map(|candidate| {
            let id = &candidate.data().id;
            (
                distance(id, target),
                has_responded(candidate),
                xor_distance(id, target),
                candidate,
            )
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| distance_cmp(&a.2, &b.2))
    });

    undecorate(ranked.into_iter().take(k).map(|(_, _, _, candidate)| &**candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ID_LEN;

    fn id_at(d: u32, salt: u8) -> NodeId {
        let mut id = [0u8; ID_LEN];
        if d > 0 {
            let bit = (d - 1) as usize;
            id[ID_LEN - 1 - bit / 8] |= 1 << (bit % 8);
        }
        if d > 8 {
            id[ID_LEN - 1] = salt;
        }
        id
    }

    fn contact(d: u32, salt: u8) -> Contact {
        Contact {
            id: id_at(d, salt),
            addr: format!("node-{d}-{salt}"),
        }
    }

    fn candidate(d: u32, salt: u8, responded: bool) -> Candidate {
        let entry = Arc::new(crate::overlay::Decorated::new(contact(d, salt)));
        if responded {
            entry.put(RESPONSE, true);
        }
        entry
    }

    #[test]
    fn filter_keeps_only_strictly_closer() {
        let target = [0u8; ID_LEN];
        let nodes = vec![contact(10, 0), contact(40, 0), contact(70, 0)];
        let kept = filter_nearer(nodes, &target, 40);
        assert_eq!(kept, vec![contact(10, 0)]);
    }

    #[test]
    fn nearest_prefers_distance_then_response() {
        let target = [0u8; ID_LEN];
        let candidates = vec![
            candidate(60, 1, true),
            candidate(20, 1, false),
            candidate(20, 2, true),
            candidate(5, 0, false),
            candidate(90, 1, true),
        ];

        let nearest = find_k_nearest(&candidates, &target, 3);
        assert_eq!(
            nearest,
            vec![contact(5, 0), contact(20, 2), contact(20, 1)],
            "responded node should win the tie at distance 20"
        );
    }

    #[test]
    fn nearest_returns_everything_when_pool_is_small() {
        let target = [0u8; ID_LEN];
        let candidates = vec![candidate(30, 1, false), candidate(12, 1, true)];
        let nearest = find_k_nearest(&candidates, &target, 20);
        assert_eq!(nearest, vec![contact(12, 1), contact(30, 1)]);
        assert!(find_k_nearest(&[], &target, 20).is_empty());
    }
}
