//! Model enumeration.
//!
//! The enumerator records every committed model by a blocking clause over its decision literals.
//! Workers integrate pending blocking clauses whenever their model counter lags behind, which
//! both excludes already reported models and re-validates a candidate model found concurrently.
//!
//! Models are delivered either into a vector (single-shot solving) or through a rendezvous that
//! hands them to the driver one at a time (iterator-style solving). The rendezvous is a pair of
//! condition variables around a small state machine, taking the role of a coroutine.
use parking_lot::{Condvar, Mutex};

use parasat_formula::Lit;

use crate::clause::{ClauseKind, SharedLits};

/// A satisfying assignment as a set of literals.
pub type Model = Vec<Lit>;

/// Result of committing a model.
#[derive(Copy, Clone, Debug)]
pub struct ModelCommit {
    /// Whether the search should continue for more models.
    pub more: bool,
    /// Whether this was the first model of the run.
    pub first: bool,
}

enum RendezvousState {
    /// The driver has not asked for a model yet.
    Start,
    /// The driver waits for the next model.
    Search,
    /// A model waits to be picked up by the driver.
    Model(Model),
    /// No more models will be produced or consumed.
    Done,
}

/// Rendezvous between the searching workers and a driver iterating models.
struct Rendezvous {
    state: Mutex<RendezvousState>,
    producer: Condvar,
    consumer: Condvar,
}

impl Rendezvous {
    fn new() -> Rendezvous {
        Rendezvous {
            state: Mutex::new(RendezvousState::Start),
            producer: Condvar::new(),
            consumer: Condvar::new(),
        }
    }

    /// Hand a model to the driver, blocking until it is consumed.
    ///
    /// Returns `false` when the driver is gone and no more models are wanted.
    fn offer(&self, model: Model) -> bool {
        let mut state = self.state.lock();

        loop {
            match &*state {
                RendezvousState::Done => return false,
                RendezvousState::Search => break,
                _ => self.producer.wait(&mut state),
            }
        }

        *state = RendezvousState::Model(model);
        self.consumer.notify_one();

        // Wait until the driver picked the model up, so the model count stays exact.
        loop {
            match &*state {
                RendezvousState::Done => return false,
                RendezvousState::Model(_) => {
                    self.consumer.notify_one();
                }
                _ => return true,
            }
            self.producer.wait(&mut state);
        }
    }

    /// Driver side: wait for the next model.
    fn next(&self) -> Option<Model> {
        let mut state = self.state.lock();

        loop {
            match std::mem::replace(&mut *state, RendezvousState::Search) {
                RendezvousState::Model(model) => {
                    self.producer.notify_all();
                    return Some(model);
                }
                RendezvousState::Done => {
                    *state = RendezvousState::Done;
                    return None;
                }
                _ => {
                    // Now in the search state, let a waiting producer proceed.
                    self.producer.notify_all();
                    self.consumer.wait(&mut state);
                }
            }
        }
    }

    /// Stop the exchange from either side.
    fn close(&self) {
        let mut state = self.state.lock();
        *state = RendezvousState::Done;
        self.producer.notify_all();
        self.consumer.notify_all();
    }
}

enum Sink {
    /// Collect models into a vector.
    Collect(Mutex<Vec<Model>>),
    /// Hand models to a driver one at a time.
    Stream(Rendezvous),
}

struct EnumState {
    count: u64,
    blocking: Vec<SharedLits>,
    complete: bool,
}

/// Records models and produces blocking clauses.
pub struct Enumerator {
    max_models: Option<u64>,
    state: Mutex<EnumState>,
    sink: Sink,
}

impl Enumerator {
    /// Enumerator collecting up to `max_models` models into a vector.
    pub fn collecting(max_models: Option<u64>) -> Enumerator {
        Enumerator {
            max_models,
            state: Mutex::new(EnumState {
                count: 0,
                blocking: vec![],
                complete: false,
            }),
            sink: Sink::Collect(Mutex::new(vec![])),
        }
    }

    /// Enumerator streaming models through a rendezvous.
    pub fn streaming(max_models: Option<u64>) -> Enumerator {
        Enumerator {
            max_models,
            state: Mutex::new(EnumState {
                count: 0,
                blocking: vec![],
                complete: false,
            }),
            sink: Sink::Stream(Rendezvous::new()),
        }
    }

    /// Whether restarting is still sound after a model was committed.
    ///
    /// Recording enumeration blocks models globally, so restarts stay safe.
    pub fn supports_restarts(&self) -> bool {
        true
    }

    /// Number of committed models.
    pub fn model_count(&self) -> u64 {
        self.state.lock().count
    }

    /// Whether enumeration finished early, e.g. by a model without decisions.
    pub fn complete(&self) -> bool {
        self.state.lock().complete
    }

    /// Commit a model found by a worker.
    ///
    /// `decisions` are the worker's decision literals beyond its guiding path together with the
    /// path literals themselves; their negation becomes the blocking clause. Must be called with
    /// the model mutex held.
    pub fn commit_model(&self, decisions: &[Lit], model: Model) -> ModelCommit {
        let (first, mut more) = {
            let mut state = self.state.lock();
            state.count += 1;
            let first = state.count == 1;

            if decisions.is_empty() {
                // A fully forced model leaves nothing to block, the model is unique.
                state.complete = true;
            } else {
                let blocking: Vec<Lit> = decisions.iter().map(|&lit| !lit).collect();
                state
                    .blocking
                    .push(SharedLits::new(&blocking, ClauseKind::Other, 0));
            }

            let more = !state.complete
                && self.max_models.map_or(true, |max| state.count < max);
            (first, more)
        };

        let delivered = match &self.sink {
            Sink::Collect(models) => {
                models.lock().push(model);
                true
            }
            Sink::Stream(rendezvous) => rendezvous.offer(model),
        };

        more &= delivered;

        ModelCommit { more, first }
    }

    /// Blocking clauses added since the worker's last update.
    ///
    /// Returns the pending clauses and the new seen count.
    pub fn blocking_since(&self, seen: usize) -> (Vec<SharedLits>, usize) {
        let state = self.state.lock();
        let pending = state.blocking[seen.min(state.blocking.len())..].to_vec();
        (pending, state.blocking.len())
    }

    /// Driver side of the stream, `None` for a collecting enumerator that never blocks.
    pub fn next_model(&self) -> Option<Model> {
        match &self.sink {
            Sink::Collect(_) => None,
            Sink::Stream(rendezvous) => rendezvous.next(),
        }
    }

    /// The collected models of a single-shot run.
    pub fn models(&self) -> Vec<Model> {
        match &self.sink {
            Sink::Collect(models) => models.lock().clone(),
            Sink::Stream(_) => vec![],
        }
    }

    /// Shut down the exchange, unblocking all parties.
    pub fn close(&self) {
        if let Sink::Stream(rendezvous) = &self.sink {
            rendezvous.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lits(dimacs: &[isize]) -> Vec<Lit> {
        dimacs.iter().map(|&l| Lit::from_dimacs(l)).collect()
    }

    #[test]
    fn commit_records_blocking_clauses() {
        let enumerator = Enumerator::collecting(Some(3));

        let commit = enumerator.commit_model(&lits(&[1, -2]), lits(&[1, -2, 3]));
        assert!(commit.more);
        assert!(commit.first);

        let (pending, seen) = enumerator.blocking_since(0);
        assert_eq!(seen, 1);
        assert_eq!(pending[0].lits(), &lits(&[-1, 2])[..]);

        let commit = enumerator.commit_model(&lits(&[2]), lits(&[1, 2, 3]));
        assert!(commit.more);
        assert!(!commit.first);

        let commit = enumerator.commit_model(&lits(&[3]), lits(&[1, 2, -3]));
        assert!(!commit.more);

        assert_eq!(enumerator.model_count(), 3);
        assert_eq!(enumerator.models().len(), 3);
    }

    #[test]
    fn forced_model_completes_enumeration() {
        let enumerator = Enumerator::collecting(None);
        let commit = enumerator.commit_model(&[], lits(&[1, 2]));
        assert!(!commit.more);
        assert!(enumerator.complete());
    }

    #[test]
    fn stream_rendezvous_hands_over_models() {
        use std::sync::Arc;

        let enumerator = Arc::new(Enumerator::streaming(None));

        let producer = {
            let enumerator = Arc::clone(&enumerator);
            std::thread::spawn(move || {
                let commit = enumerator.commit_model(&lits(&[1]), lits(&[1, 2]));
                assert!(commit.more);
                let commit = enumerator.commit_model(&lits(&[-2]), lits(&[1, -2]));
                commit.more
            })
        };

        assert_eq!(enumerator.next_model(), Some(lits(&[1, 2])));
        assert_eq!(enumerator.next_model(), Some(lits(&[1, -2])));

        enumerator.close();
        assert_eq!(enumerator.next_model(), None);

        // The producer observed the close through the second commit or a later one.
        let _ = producer.join().unwrap();
    }
}
