//! Lemma exchange between workers.
//!
//! A distributor accepts lemmas matching its policy from any worker and hands them to the other
//! workers according to a receiver topology. Two implementations are provided: a global
//! multicast ring shared by all workers and a per-worker fan-out built from channels. Both move
//! [`SharedLits`] handles, so a lemma's literal array exists once regardless of how many workers
//! hold it.
use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::clause::{ClauseKind, SharedLits};
use crate::config::{IntegrationConfig, Topology};

/// Index of a worker within the pool.
pub type WorkerId = usize;

/// Cross-worker lemma exchange.
pub trait Distribute: Send + Sync {
    /// Whether a lemma with the given shape should be published.
    fn is_candidate(&self, size: usize, glue: u32, kind: ClauseKind) -> bool;

    /// Offer a lemma to the other workers.
    fn publish(&self, source: WorkerId, lits: SharedLits);

    /// Fetch up to `max_n` lemmas for a worker. Returns the number of received lemmas.
    fn receive(&self, receiver: WorkerId, out: &mut Vec<SharedLits>, max_n: usize) -> usize;
}

/// Publication filter shared by both distributor implementations.
#[derive(Copy, Clone)]
struct Policy {
    max_size: usize,
    max_glue: u32,
}

impl Policy {
    fn new(config: &IntegrationConfig) -> Policy {
        Policy {
            max_size: config.max_size,
            max_glue: config.max_glue,
        }
    }

    fn accepts(&self, size: usize, glue: u32, kind: ClauseKind) -> bool {
        // Units are always worth sharing.
        size == 1 || (kind.is_learnt() && size <= self.max_size && glue <= self.max_glue)
    }
}

fn mask(id: WorkerId) -> u64 {
    1u64 << id
}

fn init_set(n: usize) -> u64 {
    if n >= 64 {
        u64::max_value()
    } else {
        (1u64 << n) - 1
    }
}

fn in_set(set: u64, id: WorkerId) -> bool {
    set & mask(id) != 0
}

/// Compute the peer set of a worker for the given topology.
///
/// A worker only accepts lemmas whose sender is in its peer set; units pass regardless. The
/// hypercube topologies connect workers whose ids differ in one bit, the extended variant adds
/// links that make the cube regular when the worker count is not a power of two.
pub fn peer_mask(id: WorkerId, topology: Topology, n: usize) -> u64 {
    debug_assert!(id < n && n <= 64);

    match topology {
        Topology::All => init_set(n) ^ mask(id),
        Topology::Ring => {
            let prev = if id > 0 { id - 1 } else { n - 1 };
            let next = (id + 1) % n;
            mask(prev) | mask(next)
        }
        Topology::Cube | Topology::CubeX => {
            let ext = topology == Topology::CubeX;

            // Smallest power of two at least n / 2, the dimension of the cube.
            let mut k = 1usize;
            {
                let mut i = n / 2;
                while i > 0 {
                    i /= 2;
                    k *= 2;
                }
            }

            let mut res = 0u64;
            let mut m = 1usize;
            while m <= k {
                let i = m ^ id;
                if i < n {
                    res |= mask(i);
                } else if ext && k != m {
                    res |= mask(i ^ k);
                }
                m *= 2;
            }

            if ext {
                let s = k ^ id;
                let mut m = 1usize;
                while m < k && s >= n {
                    let i = m ^ s;
                    if i < n {
                        res |= mask(i);
                    }
                    m *= 2;
                }
            }

            debug_assert!(!in_set(res, id));
            res
        }
    }
}

/// Upper bound on buffered lemmas in the global queue.
const GLOBAL_QUEUE_CAP: usize = 4096;

struct GlobalQueueInner {
    /// Sequence number of the first buffered entry.
    base: u64,
    entries: VecDeque<(WorkerId, SharedLits)>,
    /// Next sequence number each worker will read.
    tails: Vec<u64>,
}

/// A global multicast queue.
///
/// Every published lemma is visible to every worker; receivers track their position with a
/// sequence number and filter by their peer mask. Slow receivers lose the oldest entries when
/// the buffer overflows.
pub struct GlobalQueue {
    policy: Policy,
    masks: Vec<u64>,
    inner: Mutex<GlobalQueueInner>,
}

impl GlobalQueue {
    pub fn new(config: &IntegrationConfig, workers: usize) -> Arc<GlobalQueue> {
        Arc::new(GlobalQueue {
            policy: Policy::new(config),
            masks: (0..workers)
                .map(|id| peer_mask(id, config.topology, workers))
                .collect(),
            inner: Mutex::new(GlobalQueueInner {
                base: 0,
                entries: VecDeque::new(),
                tails: vec![0; workers],
            }),
        })
    }
}

impl Distribute for GlobalQueue {
    fn is_candidate(&self, size: usize, glue: u32, kind: ClauseKind) -> bool {
        self.policy.accepts(size, glue, kind)
    }

    fn publish(&self, source: WorkerId, lits: SharedLits) {
        let mut inner = self.inner.lock();
        inner.entries.push_back((source, lits));
        while inner.entries.len() > GLOBAL_QUEUE_CAP {
            inner.entries.pop_front();
            inner.base += 1;
        }
        let base = inner.base;
        for tail in inner.tails.iter_mut() {
            if *tail < base {
                *tail = base;
            }
        }
    }

    fn receive(&self, receiver: WorkerId, out: &mut Vec<SharedLits>, max_n: usize) -> usize {
        let mut inner = self.inner.lock();
        let base = inner.base;
        let head = base + inner.entries.len() as u64;
        let mut pos = inner.tails[receiver].max(base);
        let mask = self.masks[receiver];

        let mut count = 0;
        while pos < head && count < max_n {
            let (source, ref lits) = inner.entries[(pos - base) as usize];
            pos += 1;
            if source != receiver && (in_set(mask, source) || lits.len() == 1) {
                out.push(lits.clone());
                count += 1;
            }
        }
        inner.tails[receiver] = pos;
        count
    }
}

/// A per-worker fan-out built from unbounded channels.
///
/// The publisher clones the lemma handle into the inbox of every worker that accepts its
/// lemmas, so each receiver drains only its own channel.
pub struct Fanout {
    policy: Policy,
    masks: Vec<u64>,
    inboxes: Vec<(Sender<(WorkerId, SharedLits)>, Receiver<(WorkerId, SharedLits)>)>,
}

impl Fanout {
    pub fn new(config: &IntegrationConfig, workers: usize) -> Arc<Fanout> {
        Arc::new(Fanout {
            policy: Policy::new(config),
            masks: (0..workers)
                .map(|id| peer_mask(id, config.topology, workers))
                .collect(),
            inboxes: (0..workers).map(|_| unbounded()).collect(),
        })
    }
}

impl Distribute for Fanout {
    fn is_candidate(&self, size: usize, glue: u32, kind: ClauseKind) -> bool {
        self.policy.accepts(size, glue, kind)
    }

    fn publish(&self, source: WorkerId, lits: SharedLits) {
        for (id, (sender, _)) in self.inboxes.iter().enumerate() {
            if id != source && (in_set(self.masks[id], source) || lits.len() == 1) {
                let _ = sender.send((source, lits.clone()));
            }
        }
    }

    fn receive(&self, receiver: WorkerId, out: &mut Vec<SharedLits>, max_n: usize) -> usize {
        let mut count = 0;
        while count < max_n {
            match self.inboxes[receiver].1.try_recv() {
                Ok((_, lits)) => {
                    out.push(lits);
                    count += 1;
                }
                Err(_) => break,
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parasat_formula::Lit;

    fn lemma(dimacs: &[isize]) -> SharedLits {
        let lits: Vec<Lit> = dimacs.iter().map(|&l| Lit::from_dimacs(l)).collect();
        SharedLits::new(&lits, ClauseKind::Conflict, 2)
    }

    #[test]
    fn topology_masks() {
        // Full topology: everyone but self.
        assert_eq!(peer_mask(0, Topology::All, 4), 0b1110);
        assert_eq!(peer_mask(2, Topology::All, 4), 0b1011);

        // Ring of four.
        assert_eq!(peer_mask(0, Topology::Ring, 4), 0b1010);
        assert_eq!(peer_mask(1, Topology::Ring, 4), 0b0101);

        // Hypercube of four: neighbors differ in one bit.
        assert_eq!(peer_mask(0, Topology::Cube, 4), 0b0110);
        assert_eq!(peer_mask(3, Topology::Cube, 4), 0b0110);

        // No self loops for any topology and count.
        for &topology in &[Topology::All, Topology::Ring, Topology::Cube, Topology::CubeX] {
            for n in 2..10 {
                for id in 0..n {
                    assert!(!in_set(peer_mask(id, topology, n), id));
                }
            }
        }
    }

    #[test]
    fn global_queue_multicasts() {
        let config = IntegrationConfig::default();
        let queue = GlobalQueue::new(&config, 3);

        assert!(queue.is_candidate(3, 2, ClauseKind::Conflict));
        assert!(!queue.is_candidate(3, 200, ClauseKind::Conflict));
        assert!(!queue.is_candidate(100, 2, ClauseKind::Conflict));
        assert!(queue.is_candidate(1, 200, ClauseKind::Conflict));

        queue.publish(0, lemma(&[1, 2, 3]));
        queue.publish(1, lemma(&[2, 3, 4]));

        let mut out = vec![];
        assert_eq!(queue.receive(2, &mut out, 10), 2);
        assert_eq!(out.len(), 2);

        // Own lemmas are not returned, and the position advances.
        out.clear();
        assert_eq!(queue.receive(2, &mut out, 10), 0);
        assert_eq!(queue.receive(0, &mut out, 10), 1);
        assert_eq!(out[0].lits(), lemma(&[2, 3, 4]).lits());
    }

    #[test]
    fn fanout_respects_topology() {
        let config = IntegrationConfig {
            topology: Topology::Ring,
            ..IntegrationConfig::default()
        };
        let fanout = Fanout::new(&config, 4);

        fanout.publish(0, lemma(&[1, 2, 3]));

        let mut out = vec![];
        // Workers 1 and 3 are ring neighbors of 0, worker 2 is not.
        assert_eq!(fanout.receive(1, &mut out, 10), 1);
        assert_eq!(fanout.receive(2, &mut out, 10), 0);
        assert_eq!(fanout.receive(3, &mut out, 10), 1);
        assert_eq!(fanout.receive(0, &mut out, 10), 0);

        // Units cross the topology.
        fanout.publish(0, lemma(&[5]));
        assert_eq!(fanout.receive(2, &mut out, 10), 1);
    }
}
