//! Low-level coordination primitives of the parallel solver.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use parasat_formula::Lit;

use crate::config::{SolveMode, SolverConfig};
use crate::dist::WorkerId;
use crate::enumerate::Enumerator;
use crate::errors::CoreError;
use crate::restart::RestartSchedule;

/// Control flags encoded in the shared control word.
pub mod flags {
    /// Stop all workers.
    pub const TERMINATE: u32 = 1;
    /// A synchronization barrier cycle is active.
    pub const SYNC: u32 = 2;
    /// Some worker waits for a guiding path.
    pub const SPLIT: u32 = 4;
    /// The active sync cycle performs a restart.
    pub const RESTART: u32 = 8;
    /// The search space is exhausted.
    pub const COMPLETE: u32 = 16;
    /// Termination was requested from the outside.
    pub const INTERRUPT: u32 = 32;
    /// Splitting mode is active.
    pub const ALLOW_SPLIT: u32 = 64;
    /// Restarts are no longer allowed.
    pub const FORBID_RESTART: u32 = 128;
    /// The current restart request was cancelled by some worker.
    pub const CANCEL_RESTART: u32 = 256;
    /// Workers must not give up their guiding path.
    pub const RESTART_ABANDONED: u32 = 512;

    /// Flags that workers must react to at a message check.
    pub const MESSAGES: u32 = TERMINATE | SYNC | SPLIT;
}

/// The shared atomic control word.
///
/// The only inter-thread coordination channel besides the work semaphore, the distributor and
/// the model mutex. Setting and clearing flags reports whether the caller was the first to do
/// so, which elects the worker responsible for follow-up actions.
#[derive(Default)]
pub struct Control {
    control: AtomicU32,
}

impl Control {
    /// Set flags, returning `true` if at least one of them was not set before.
    pub fn set(&self, flags: u32) -> bool {
        self.control.fetch_or(flags, Ordering::SeqCst) & flags != flags
    }

    /// Clear flags, returning `true` if all of them were set before.
    pub fn clear(&self, flags: u32) -> bool {
        self.control.fetch_and(!flags, Ordering::SeqCst) & flags == flags
    }

    pub fn has(&self, flags: u32) -> bool {
        self.control.load(Ordering::SeqCst) & flags != 0
    }

    /// Whether any flag requiring a worker reaction is set.
    pub fn has_message(&self) -> bool {
        self.has(flags::MESSAGES)
    }

    pub fn allow_restart(&self) -> bool {
        !self.has(flags::FORBID_RESTART)
    }
}

struct SemState {
    /// Semaphore counter; negative values count blocked or syncing workers.
    counter: i64,
    /// Number of parties required to trip the barrier.
    active: i64,
}

/// A combination of a barrier and a semaphore.
///
/// Workers waiting for a guiding path block on the semaphore side (`down`/`up`). During a
/// synchronization cycle all running workers arrive at the barrier side (`wait`); blocked
/// workers already count as waiting, so they never hold up a sync. The last arriver becomes the
/// leader and is responsible for resetting the barrier after updating shared state.
pub struct BarrierSemaphore {
    state: Mutex<SemState>,
    cond: Condvar,
}

impl BarrierSemaphore {
    pub fn new(counter: i64, parties: i64) -> BarrierSemaphore {
        BarrierSemaphore {
            state: Mutex::new(SemState {
                counter,
                active: parties,
            }),
            cond: Condvar::new(),
        }
    }

    fn is_active(state: &SemState) -> bool {
        -state.counter >= state.active
    }

    /// Number of parties required to trip the barrier.
    pub fn parties(&self) -> i64 {
        self.state.lock().active
    }

    /// Whether all parties are waiting.
    pub fn active(&self) -> bool {
        Self::is_active(&self.state.lock())
    }

    /// Remove a party, optionally resetting the barrier.
    ///
    /// The calling thread must not itself wait on the barrier.
    pub fn remove_party(&self, reset: bool) {
        let mut state = self.state.lock();
        debug_assert!(state.active > 0);
        state.active -= 1;
        if reset {
            state.counter = 0;
            self.cond.notify_all();
        } else if Self::is_active(&state) {
            // The remaining workers are all blocked; wake one to notice.
            state.counter = -state.active;
            drop(state);
            self.cond.notify_one();
        }
    }

    /// Wait until all parties have arrived.
    ///
    /// Exactly one of the parties receives `true` and acts as the leader that must eventually
    /// [`reset`](BarrierSemaphore::reset) the barrier, unblocking the others.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        state.counter -= 1;
        if state.counter >= 0 {
            state.counter = -1;
        }
        self.wait_inner(state)
    }

    /// Reset the barrier and unblock all waiting threads.
    pub fn reset(&self, counter: i64) {
        let mut state = self.state.lock();
        let prev = state.counter;
        state.counter = counter;
        if prev < 0 {
            self.cond.notify_all();
        }
    }

    /// Decrement the semaphore, blocking while it is zero or less.
    ///
    /// Returns `false` to signal that all other parties are currently blocked, making the caller
    /// the last one standing.
    pub fn down(&self) -> bool {
        let mut state = self.state.lock();
        state.counter -= 1;
        if state.counter >= 0 {
            return true;
        }
        !self.wait_inner(state)
    }

    /// Increment the semaphore, resuming one blocked `down` caller.
    pub fn up(&self) {
        let notify = {
            let mut state = self.state.lock();
            state.counter += 1;
            state.counter < 1
        };
        if notify {
            self.cond.notify_one();
        }
    }

    /// Returns `true` for the leader, `false` otherwise.
    fn wait_inner(&self, mut state: parking_lot::MutexGuard<SemState>) -> bool {
        debug_assert!(state.counter < 0);
        // Don't put the last thread to sleep!
        if !Self::is_active(&state) {
            self.cond.wait(&mut state);
        }
        Self::is_active(&state)
    }
}

/// Outcome of a synchronization cycle, written by the leader before it releases the barrier.
pub mod sync_outcome {
    /// Continue on the current guiding path.
    pub const KEEP_PATH: u32 = 0;
    /// Unwind to the path root and restart with the new global conflict budget.
    pub const RESTART: u32 = 1;
}

/// State shared between the coordinator and all workers.
pub struct SharedData {
    pub control: Control,
    pub work_sem: BarrierSemaphore,
    work_queue: Mutex<VecDeque<Arc<Vec<Lit>>>>,
    initial_path: Vec<Lit>,
    /// Bitmask of workers that must still consume the initial path.
    init_mask: AtomicU64,
    /// Positive while some worker needs work.
    work_req: AtomicI32,
    /// Workers whose local schedule requested a synchronized restart.
    restart_req: AtomicU32,
    /// Conflict budget until the next synchronized restart.
    max_conflicts: AtomicU64,
    /// The global restart schedule, advanced by sync leaders.
    global_restart: Mutex<RestartSchedule>,
    /// Decision of the last sync leader.
    pub sync_result: AtomicU32,
    /// Serializes model and unsat commits.
    pub model_mutex: Mutex<()>,
    pub enumerator: Enumerator,
    /// Per-worker error slots.
    pub errors: Mutex<Vec<Option<CoreError>>>,
    /// Lowest worker id whose termination drove the result.
    pub winner: AtomicUsize,
    /// Some worker ran into its conflict or memory budget.
    pub exhausted: Control,
    pub threads: usize,
    /// Workers that have not exited yet.
    alive: AtomicUsize,
}

/// Pseudo-flag for [`SharedData::exhausted`].
pub const EXHAUSTED: u32 = 1;

impl SharedData {
    pub fn new(config: &SolverConfig, initial_path: Vec<Lit>, enumerator: Enumerator) -> SharedData {
        let threads = config.thread_count();
        let global_restart = RestartSchedule::new(config.restart);
        let max_conflicts = global_restart.current();

        let data = SharedData {
            control: Control::default(),
            work_sem: BarrierSemaphore::new(0, threads as i64),
            work_queue: Mutex::new(VecDeque::new()),
            initial_path,
            init_mask: AtomicU64::new(0),
            work_req: AtomicI32::new(0),
            restart_req: AtomicU32::new(0),
            max_conflicts: AtomicU64::new(max_conflicts),
            global_restart: Mutex::new(global_restart),
            sync_result: AtomicU32::new(sync_outcome::KEEP_PATH),
            model_mutex: Mutex::new(()),
            enumerator,
            errors: Mutex::new(vec![None; threads]),
            winner: AtomicUsize::new(usize::max_value()),
            exhausted: Control::default(),
            threads,
            alive: AtomicUsize::new(threads),
        };

        if config.mode == SolveMode::Split {
            data.control.set(flags::ALLOW_SPLIT);
        } else {
            data.control.set(flags::FORBID_RESTART);
        }
        data.init_queue();

        data
    }

    /// Current conflict budget per guiding path.
    pub fn max_conflicts(&self) -> u64 {
        self.max_conflicts.load(Ordering::Relaxed)
    }

    /// Rebuild the initial-path dispatch for a new round.
    ///
    /// In split mode exactly one worker starts from the initial path and splitting supplies the
    /// rest; otherwise all workers compete on the initial path.
    pub fn init_queue(&self) {
        let mut queue = self.work_queue.lock();
        queue.clear();
        if self.control.has(flags::ALLOW_SPLIT) {
            self.init_mask.store(0, Ordering::SeqCst);
            queue.push_back(Arc::new(self.initial_path.clone()));
        } else {
            let all = if self.threads >= 64 {
                u64::max_value()
            } else {
                (1u64 << self.threads) - 1
            };
            self.init_mask.store(all, Ordering::SeqCst);
        }
    }

    /// Try to get work for a worker.
    ///
    /// Returns the path and whether it is disjoint from all other workers' paths.
    pub fn request_work(&self, id: WorkerId) -> Option<(Arc<Vec<Lit>>, bool)> {
        let bit = 1u64 << id;
        if self.init_mask.fetch_and(!bit, Ordering::SeqCst) & bit != 0 {
            let disjoint = self.control.has(flags::ALLOW_SPLIT);
            return Some((Arc::new(self.initial_path.clone()), disjoint));
        }
        self.work_queue.lock().pop_front().map(|path| (path, true))
    }

    /// Add a split-off guiding path and wake a waiting worker.
    pub fn push_work(&self, path: Vec<Lit>) {
        self.work_queue.lock().push_back(Arc::new(path));
        self.work_sem.up();
    }

    /// Register a split request. The split flag follows `work_req > 0`.
    pub fn post_split_request(&self) {
        if self.work_req.fetch_add(1, Ordering::SeqCst) + 1 == 1 {
            self.update_split_flag();
        }
    }

    /// Declare a split request as handled.
    pub fn about_to_split(&self) {
        if self.work_req.fetch_sub(1, Ordering::SeqCst) - 1 == 0 {
            self.update_split_flag();
        }
    }

    pub fn split_requested(&self) -> bool {
        self.work_req.load(Ordering::SeqCst) > 0
    }

    fn update_split_flag(&self) {
        loop {
            let want = self.work_req.load(Ordering::SeqCst) > 0;
            if self.control.has(flags::SPLIT) == want {
                return;
            }
            if want {
                self.control.set(flags::SPLIT);
            } else {
                self.control.clear(flags::SPLIT);
            }
        }
    }

    /// A worker's local schedule fired; when all workers agree a sync restart is posted.
    pub fn request_restart(&self) {
        if self.control.allow_restart()
            && self.restart_req.fetch_add(1, Ordering::SeqCst) + 1 == self.threads as u32
        {
            if self.control.set(flags::SYNC | flags::RESTART) {
                self.work_sem.reset(0);
            }
        }
    }

    /// Request termination.
    ///
    /// `complete` marks an exhausted search space, `interrupt` an external signal. Blocked
    /// workers are only woken for internal termination; an interrupt lets them notice on their
    /// next barrier exit to avoid deadlocks on the work semaphore.
    pub fn terminate(&self, complete: bool, interrupt: bool) {
        let mut set = flags::TERMINATE;
        if complete {
            set |= flags::COMPLETE;
        }
        if interrupt {
            set |= flags::INTERRUPT;
        }
        if self.control.set(set) && !interrupt {
            self.work_sem.reset(0);
        }
    }

    /// Leader-side completion of a synchronization cycle.
    pub fn leader_update(&self) {
        self.work_req.store(0, Ordering::SeqCst);
        self.restart_req.store(0, Ordering::SeqCst);

        let restart = self.control.has(flags::RESTART);
        let mut init = true;

        if restart {
            init = self.control.allow_restart() && !self.control.has(flags::CANCEL_RESTART);
            if init {
                let mut global = self.global_restart.lock();
                global.next();
                self.max_conflicts.store(
                    if self.control.allow_restart() {
                        global.current()
                    } else {
                        u64::max_value()
                    },
                    Ordering::SeqCst,
                );
            }
        } else if !self.control.allow_restart() {
            self.max_conflicts.store(u64::max_value(), Ordering::SeqCst);
        }

        self.sync_result.store(
            if init {
                sync_outcome::RESTART
            } else {
                sync_outcome::KEEP_PATH
            },
            Ordering::SeqCst,
        );

        if init {
            self.init_queue();
        } else {
            self.control.set(flags::RESTART_ABANDONED);
        }

        self.control.clear(
            flags::SPLIT
                | flags::SYNC
                | flags::RESTART
                | flags::RESTART_ABANDONED
                | flags::CANCEL_RESTART,
        );

        // Wake up all blocked workers.
        self.work_sem.reset(0);
    }

    /// Record a worker error.
    pub fn record_error(&self, id: WorkerId, error: CoreError) {
        self.errors.lock()[id] = Some(error);
    }

    /// A worker is leaving the pool.
    ///
    /// The last one out closes the model stream, so a driver blocked on the next model observes
    /// the end of the run.
    pub fn worker_exit(&self) {
        self.work_sem
            .remove_party(self.control.has(flags::TERMINATE));
        if self.alive.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.enumerator.close();
        }
    }

    /// Mark the winning worker, keeping the lowest id.
    pub fn set_winner(&self, id: WorkerId) {
        let mut current = self.winner.load(Ordering::SeqCst);
        while id < current {
            match self.winner.compare_exchange(
                current,
                id,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn barrier_elects_exactly_one_leader_per_cycle() {
        const PARTIES: usize = 4;
        const CYCLES: usize = 25;

        let sem = Arc::new(BarrierSemaphore::new(0, PARTIES as i64));
        let leaders = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..PARTIES)
            .map(|_| {
                let sem = Arc::clone(&sem);
                let leaders = Arc::clone(&leaders);
                thread::spawn(move || {
                    for _ in 0..CYCLES {
                        if sem.wait() {
                            // The leader publishes its update before releasing the others.
                            leaders.fetch_add(1, Ordering::SeqCst);
                            sem.reset(0);
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(leaders.load(Ordering::SeqCst), CYCLES);
    }

    #[test]
    fn up_wakes_a_blocked_down() {
        let sem = Arc::new(BarrierSemaphore::new(0, 2));

        let blocked = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.down())
        };

        // Give the worker time to block, then hand it work.
        thread::sleep(Duration::from_millis(10));
        sem.up();

        assert!(blocked.join().unwrap(), "the woken worker got work");
    }

    #[test]
    fn down_detects_the_last_worker_standing() {
        let sem = Arc::new(BarrierSemaphore::new(0, 2));

        let syncing = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.wait())
        };

        // Wait until the syncing worker has entered the barrier.
        loop {
            if sem.state.lock().counter <= -1 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        // Entering down() while everyone else waits reports last-man-standing, the real worker
        // loop reacts by terminating or syncing.
        assert!(!sem.down());

        // The release wakes the parked worker; it is not the leader of anything.
        sem.reset(0);
        assert!(!syncing.join().unwrap());
    }
}
