//! Restart strategies and search limits.
//!
//! A restart schedule yields the conflict budget between restarts via `current`, advances with
//! `next` and starts over on `reset`. The static schedules are geometric, Luby and arithmetic.
//! The dynamic strategy restarts when the short-term average glue of learnt clauses exceeds the
//! long-term average, signalling that search produces mostly poor lemmas. A blocking filter
//! suppresses restarts while the trail is unusually long, a strong sign that the current branch
//! is close to a model.
//!
//! All limits are soft and only checked at conflict boundaries.
use crate::config::{BlockConfig, RestartConfig, SolverConfig};

/// The Luby restart sequence 1, 1, 2, 1, 1, 2, 4, ... at a given index.
///
/// Works out which finite prefix of the sequence the index falls into and recurses into it by
/// arithmetic: prefix `k` has length `2^k - 1` and ends with the value `2^(k-1)`.
pub fn luby(mut index: u64) -> u64 {
    let mut length = 1u64;
    let mut exponent = 0u32;

    while length < index + 1 {
        exponent += 1;
        length = 2 * length + 1;
    }

    while length - 1 != index {
        length /= 2;
        exponent -= 1;
        index %= length;
    }

    1u64 << exponent
}

/// A restart schedule with `current`/`next`/`reset`.
pub struct RestartSchedule {
    config: RestartConfig,
    /// Restarts performed under this schedule.
    idx: u64,
    dynamic: Option<DynamicLimit>,
}

impl RestartSchedule {
    pub fn new(config: RestartConfig) -> RestartSchedule {
        RestartSchedule {
            config,
            idx: 0,
            dynamic: match config {
                RestartConfig::Dynamic {
                    window,
                    k,
                    adjust_limit,
                } => Some(DynamicLimit::new(window, k, adjust_limit)),
                _ => None,
            },
        }
    }

    /// Conflict budget of the current restart interval.
    ///
    /// For the dynamic strategy this is a backstop; the real trigger is [`DynamicLimit`].
    pub fn current(&self) -> u64 {
        match self.config {
            RestartConfig::Geometric { base, factor } => {
                (base as f64 * factor.powi(self.idx as i32)) as u64
            }
            RestartConfig::Luby { scale } => scale * luby(self.idx),
            RestartConfig::Arithmetic { base, step } => base + step * self.idx,
            // The dynamic limit decides by itself, keep a generous backstop.
            RestartConfig::Dynamic { .. } => u64::max_value(),
        }
    }

    /// Advance to the next restart interval.
    pub fn next(&mut self) {
        self.idx += 1;
        if let Some(dynamic) = &mut self.dynamic {
            dynamic.on_restart();
        }
    }

    /// Start the schedule over.
    pub fn reset(&mut self) {
        self.idx = 0;
        if let Some(dynamic) = &mut self.dynamic {
            dynamic.reset();
        }
    }

    pub fn dynamic_mut(&mut self) -> Option<&mut DynamicLimit> {
        self.dynamic.as_mut()
    }
}

/// Glue-based dynamic restart trigger.
///
/// Keeps the glue values of the last `window` conflicts in a ring buffer and global sums over the
/// whole run. A restart is indicated when the short-term average scaled by `k` exceeds the global
/// average. `k` adjusts itself every `adjust_limit` conflicts by comparing the observed restart
/// length against the window, the shortest length the trigger can produce.
pub struct DynamicLimit {
    buffer: Vec<u32>,
    pos: usize,
    num: usize,
    sum: u64,
    global_sum: u64,
    global_samples: u64,
    k: f32,
    adjust_limit: u32,
    adjust_samples: u32,
    adjust_restarts: u32,
}

impl DynamicLimit {
    pub fn new(window: u32, k: f32, adjust_limit: u32) -> DynamicLimit {
        DynamicLimit {
            buffer: vec![0; window.max(1) as usize],
            pos: 0,
            num: 0,
            sum: 0,
            global_sum: 0,
            global_samples: 0,
            k,
            adjust_limit,
            adjust_samples: 0,
            adjust_restarts: 0,
        }
    }

    /// Record the glue of a new conflict.
    pub fn update(&mut self, glue: u32) {
        if self.num >= self.buffer.len() {
            self.sum -= self.buffer[self.pos] as u64;
        }
        self.sum += glue as u64;
        self.buffer[self.pos] = glue;
        self.pos = (self.pos + 1) % self.buffer.len();
        self.num = (self.num + 1).min(self.buffer.len());

        self.global_sum += glue as u64;
        self.global_samples += 1;

        self.adjust_samples += 1;
        if self.adjust_samples >= self.adjust_limit {
            self.adjust();
        }
    }

    /// Whether the short-term glue average indicates a restart.
    pub fn reached(&self) -> bool {
        self.num >= self.buffer.len() && {
            let sma = self.sum as f64 / self.buffer.len() as f64;
            let global = self.global_sum as f64 / self.global_samples.max(1) as f64;
            sma * self.k as f64 > global
        }
    }

    /// Forget the short-term window, e.g. after a restart.
    pub fn reset_run(&mut self) {
        self.pos = 0;
        self.num = 0;
        self.sum = 0;
    }

    /// Forget short-term and global statistics.
    pub fn reset(&mut self) {
        self.reset_run();
        self.global_sum = 0;
        self.global_samples = 0;
        self.adjust_samples = 0;
        self.adjust_restarts = 0;
    }

    fn on_restart(&mut self) {
        self.adjust_restarts += 1;
        self.reset_run();
    }

    /// Self-adjust `k` from observed vs expected restart length.
    fn adjust(&mut self) {
        let window = self.buffer.len() as f32;
        if self.adjust_restarts > 0 {
            let actual = self.adjust_samples as f32 / self.adjust_restarts as f32;
            if actual <= window * 1.1 {
                // Restarting as fast as the window allows, make the trigger less eager.
                self.k = (self.k + 0.05).min(1.0);
            } else if actual > window * 16.0 {
                self.k = (self.k - 0.05).max(0.5);
            }
        }
        self.adjust_samples = 0;
        self.adjust_restarts = 0;
    }
}

/// Restart blocking filter.
///
/// Tracks an exponential moving average of trail sizes at conflicts. Once enough samples were
/// seen, a pending restart is suppressed while the current trail exceeds the average by the
/// configured scale, as the current branch is then likely close to a model.
pub struct BlockLimit {
    ema: f64,
    alpha: f64,
    n: u64,
    min_span: u64,
    scale: f64,
}

impl BlockLimit {
    pub fn new(config: BlockConfig) -> BlockLimit {
        BlockLimit {
            ema: 0.0,
            // Standard smoothing factor for a span of `window` samples.
            alpha: 2.0 / (config.window as f64 + 1.0),
            n: 0,
            min_span: config.min_span,
            scale: config.scale,
        }
    }

    /// Record the trail size of a new conflict.
    pub fn push(&mut self, trail_size: usize) {
        self.n += 1;
        if self.n < self.min_span {
            // Cumulative average while warming up.
            self.ema += (trail_size as f64 - self.ema) / self.n as f64;
        } else {
            self.ema += (trail_size as f64 - self.ema) * self.alpha;
        }
    }

    /// Whether a pending restart should be blocked.
    pub fn blocks(&self, trail_size: usize) -> bool {
        self.n >= self.min_span && trail_size as f64 > self.ema * self.scale
    }
}

/// Outcome of a restart check.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RestartCheck {
    None,
    Restart,
    Blocked,
}

/// Scheduling state of one worker.
///
/// Combines the local restart schedule, the blocking filter, learnt-db reduction scheduling and
/// the soft search limits. All checks happen at conflict boundaries.
pub struct Schedule {
    /// Conflicts of this worker.
    pub conflicts: u64,
    conflicts_at_restart: u64,
    restart: RestartSchedule,
    block: Option<BlockLimit>,
    next_reduce: u64,
    reduce_interval: u64,
    reduce_inc: u64,
    /// Conflict budget for the current guiding path, set by the parallel coordinator.
    pub path_budget: u64,
    /// Overall conflict budget.
    conflict_limit: u64,
    /// Learnt clause count budget.
    learnt_limit: u64,
    /// Learnt allocator budget in buffer words.
    memory_limit: u64,
    /// Set when a synchronized restart abandoned the local schedule.
    pub restart_abandoned: bool,
    /// Set once restarts are no longer allowed, e.g. after the first model in split mode.
    pub restarts_forbidden: bool,
}

impl Default for Schedule {
    fn default() -> Schedule {
        let mut schedule = Schedule {
            conflicts: 0,
            conflicts_at_restart: 0,
            restart: RestartSchedule::new(RestartConfig::default()),
            block: None,
            next_reduce: 0,
            reduce_interval: 0,
            reduce_inc: 0,
            path_budget: u64::max_value(),
            conflict_limit: u64::max_value(),
            learnt_limit: u64::max_value(),
            memory_limit: u64::max_value(),
            restart_abandoned: false,
            restarts_forbidden: false,
        };
        schedule.configure(&SolverConfig::default());
        schedule
    }
}

impl Schedule {
    /// Apply the configuration.
    pub fn configure(&mut self, config: &SolverConfig) {
        self.restart = RestartSchedule::new(config.restart);
        self.block = config.block_restart.map(BlockLimit::new);
        self.next_reduce = config.reduce_base;
        self.reduce_interval = config.reduce_base;
        self.reduce_inc = config.reduce_inc;
        self.conflict_limit = config.conflict_limit.unwrap_or(u64::max_value());
        self.learnt_limit = config.learnt_limit.unwrap_or(u64::max_value());
        self.memory_limit = config
            .memory_limit
            .map(|bytes| bytes / std::mem::size_of::<u32>() as u64)
            .unwrap_or(u64::max_value());
    }

    /// Record a new conflict with its glue and the trail size at conflict time.
    pub fn new_conflict(&mut self, glue: u32, trail_size: usize) {
        self.conflicts += 1;
        if let Some(dynamic) = self.restart.dynamic_mut() {
            dynamic.update(glue);
        }
        if let Some(block) = &mut self.block {
            block.push(trail_size);
        }
    }

    /// Check whether a restart is due.
    pub fn check_restart(&mut self, trail_size: usize) -> RestartCheck {
        if self.restarts_forbidden {
            return RestartCheck::None;
        }

        let due = match self.restart.dynamic_mut() {
            Some(dynamic) => dynamic.reached(),
            None => self.conflicts - self.conflicts_at_restart >= self.restart.current(),
        };

        if !due {
            return RestartCheck::None;
        }

        if let Some(block) = &self.block {
            if block.blocks(trail_size) {
                // Forget the window so the trigger has to re-arm.
                if let Some(dynamic) = self.restart.dynamic_mut() {
                    dynamic.reset_run();
                }
                return RestartCheck::Blocked;
            }
        }

        RestartCheck::Restart
    }

    /// Advance the schedule after a restart was performed.
    pub fn on_restart(&mut self) {
        self.conflicts_at_restart = self.conflicts;
        self.restart.next();
    }

    /// Abandon the local schedule, keeping the guiding path.
    pub fn abandon_restart(&mut self) {
        self.restart_abandoned = true;
        self.conflicts_at_restart = self.conflicts;
        self.restart.reset();
    }

    /// Whether a learnt-db reduction is due.
    pub fn check_reduce(&mut self, learnt_count: u64, learnt_words: u64) -> bool {
        self.conflicts >= self.next_reduce
            || learnt_count > self.learnt_limit
            || learnt_words > self.memory_limit
    }

    /// Reschedule after a reduction.
    pub fn on_reduce(&mut self) {
        self.reduce_interval += self.reduce_inc;
        self.next_reduce = self.conflicts + self.reduce_interval;
    }

    /// Whether the overall conflict budget or the path budget is exhausted.
    pub fn budget_exhausted(&self) -> bool {
        self.conflicts >= self.conflict_limit
    }

    /// Whether the conflict budget of the current guiding path is used up.
    pub fn path_budget_exhausted(&self) -> bool {
        self.conflicts >= self.path_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luby_indices() {
        // A full prefix ends in its largest power of two...
        assert_eq!(luby(0), 1);
        assert_eq!(luby(2), 2);
        assert_eq!(luby(6), 4);
        assert_eq!(luby(14), 8);
        assert_eq!(luby(62), 32);

        // ...and each prefix repeats the one before it.
        for index in 0..31 {
            assert_eq!(luby(index + 31), luby(index));
        }

        // Every power of two appears for the first time right after two copies of the previous
        // prefix.
        let mut seen_max = 0;
        for index in 0..127 {
            let value = luby(index);
            assert!(value <= seen_max * 2 || seen_max == 0);
            seen_max = seen_max.max(value);
        }
        assert_eq!(seen_max, 64);
    }

    #[test]
    fn luby_schedule_scales() {
        let mut schedule = RestartSchedule::new(RestartConfig::Luby { scale: 100 });
        assert_eq!(schedule.current(), 100);
        schedule.next();
        assert_eq!(schedule.current(), 100);
        schedule.next();
        assert_eq!(schedule.current(), 200);
        schedule.reset();
        assert_eq!(schedule.current(), 100);
    }

    #[test]
    fn geometric_schedule() {
        let mut schedule = RestartSchedule::new(RestartConfig::Geometric {
            base: 100,
            factor: 2.0,
        });
        assert_eq!(schedule.current(), 100);
        schedule.next();
        assert_eq!(schedule.current(), 200);
        schedule.next();
        assert_eq!(schedule.current(), 400);
        schedule.reset();
        assert_eq!(schedule.current(), 100);
    }

    #[test]
    fn arithmetic_schedule() {
        let mut schedule = RestartSchedule::new(RestartConfig::Arithmetic { base: 10, step: 5 });
        assert_eq!(schedule.current(), 10);
        schedule.next();
        assert_eq!(schedule.current(), 15);
        schedule.next();
        assert_eq!(schedule.current(), 20);
    }

    #[test]
    fn dynamic_limit_fires_on_bad_glue() {
        let mut limit = DynamicLimit::new(10, 0.8, 1000);

        // A long stream of excellent glues establishes a low global average.
        for _ in 0..100 {
            limit.update(1);
        }
        assert!(!limit.reached());

        // A window of terrible glues exceeds it.
        for _ in 0..10 {
            limit.update(20);
        }
        assert!(limit.reached());

        limit.reset_run();
        assert!(!limit.reached());
    }

    #[test]
    fn block_limit_blocks_long_trails() {
        let config = BlockConfig {
            window: 10,
            scale: 1.4,
            min_span: 20,
        };
        let mut block = BlockLimit::new(config);

        for _ in 0..30 {
            block.push(100);
        }

        assert!(!block.blocks(100));
        assert!(!block.blocks(130));
        assert!(block.blocks(200));
    }

    #[test]
    fn schedule_static_restart_cadence() {
        let mut schedule = Schedule::default();
        schedule.configure(&SolverConfig {
            restart: RestartConfig::Arithmetic { base: 2, step: 0 },
            block_restart: None,
            ..SolverConfig::default()
        });

        schedule.new_conflict(2, 10);
        assert_eq!(schedule.check_restart(10), RestartCheck::None);
        schedule.new_conflict(2, 10);
        assert_eq!(schedule.check_restart(10), RestartCheck::Restart);
        schedule.on_restart();
        assert_eq!(schedule.check_restart(10), RestartCheck::None);
    }
}
