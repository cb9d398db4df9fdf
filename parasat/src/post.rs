//! The post-propagator chain.
//!
//! Post-propagators extend unit propagation with more expensive reasoning: theory propagation,
//! the unfounded-set check for recursive programs, acyclicity checks or, in parallel mode, the
//! message handler of a worker. After every unit-propagation fixpoint the chain is invoked in
//! priority order until no propagator produces new assignments or one of them fails.
use crate::solver::SolverCore;

/// Priority class of a post-propagator, invoked in ascending order.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum PostPriority {
    /// Cheap propagators that run on every fixpoint, e.g. message handlers.
    General = 1,
    /// Reserved for the unfounded-set checker.
    ReservedUfs = 2,
    /// Expensive propagators that only need to run once the cheap ones are stable.
    Simple = 3,
}

/// A pluggable propagator invoked after each unit-propagation fixpoint.
pub trait PostPropagator: Send {
    /// The priority class deciding the position in the chain.
    fn priority(&self) -> PostPriority;

    /// One-time initialization when the owning solver attaches to the problem.
    fn init(&mut self, core: &mut SolverCore<'_>) -> bool {
        let _ = core;
        true
    }

    /// Propagate to a fixpoint.
    ///
    /// `recursive` is true when the chain was re-entered from a higher-priority propagator.
    /// Returning `false` signals a conflict (recorded via [`SolverCore::raise_conflict`]) or a
    /// stop condition.
    fn propagate_fixpoint(&mut self, core: &mut SolverCore<'_>, recursive: bool) -> bool;

    /// Final check once all variables are assigned.
    ///
    /// Returning `false` rejects the candidate model; the propagator must have enqueued an
    /// assignment or raised a conflict to make progress.
    fn is_model(&mut self, core: &mut SolverCore<'_>) -> bool {
        let _ = core;
        true
    }

    /// Invoked when propagation is cancelled due to a backjump.
    fn reset(&mut self) {}

    /// Invoked after the trail was undone to a lower decision level.
    fn undo_level(&mut self) {}

    /// Idempotent propagators are skipped when re-entered from a higher-priority propagator.
    fn is_idempotent(&self) -> bool {
        false
    }
}

/// The ordered chain of post-propagators of one worker.
#[derive(Default)]
pub struct PostChain {
    items: Vec<Box<dyn PostPropagator>>,
}

impl PostChain {
    /// Insert a propagator at the position given by its priority.
    pub fn add(&mut self, post: Box<dyn PostPropagator>) {
        let priority = post.priority();
        let pos = self
            .items
            .iter()
            .position(|other| other.priority() > priority)
            .unwrap_or(self.items.len());
        self.items.insert(pos, post);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn PostPropagator>> {
        self.items.iter_mut()
    }

    /// Notify all propagators of a cancelled propagation.
    pub fn reset_all(&mut self) {
        for item in self.items.iter_mut() {
            item.reset();
        }
    }

    /// Notify all propagators of an undone decision level.
    pub fn undo_all(&mut self) {
        for item in self.items.iter_mut() {
            item.undo_level();
        }
    }
}
