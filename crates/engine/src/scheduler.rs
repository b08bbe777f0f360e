//! Cycle cadence for the periodic lifecycle jobs.

use std::sync::atomic::{AtomicU64, Ordering};

/// How often each periodic job runs, in cycles. Zero disables a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSchedule {
    /// Batch merge pass
    pub merge_every: u64,
    /// Cross-domain synthesis
    pub cross_domain_every: u64,
}

impl Default for CycleSchedule {
    fn default() -> Self {
        Self {
            merge_every: 5,
            cross_domain_every: 10,
        }
    }
}

impl CycleSchedule {
    /// Set the merge cadence.
    pub fn with_merge_every(mut self, cycles: u64) -> Self {
        self.merge_every = cycles;
        self
    }

    /// Set the cross-domain cadence.
    pub fn with_cross_domain_every(mut self, cycles: u64) -> Self {
        self.cross_domain_every = cycles;
        self
    }
}

/// Jobs due on one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTick {
    /// 1-based cycle number
    pub cycle: u64,
    /// Run the batch merge pass
    pub run_merge: bool,
    /// Run cross-domain synthesis
    pub run_cross_domain: bool,
}

fn due(cycle: u64, every: u64) -> bool {
    every > 0 && cycle % every == 0
}

/// Counts cycles and says which jobs are due.
///
/// Shared between callers; each `next_cycle` claims a distinct cycle number.
#[derive(Debug, Default)]
pub struct CycleScheduler {
    schedule: CycleSchedule,
    cycles_run: AtomicU64,
}

impl CycleScheduler {
    /// Create a scheduler.
    pub fn new(schedule: CycleSchedule) -> Self {
        Self {
            schedule,
            cycles_run: AtomicU64::new(0),
        }
    }

    /// Claim the next cycle.
    pub fn next_cycle(&self) -> CycleTick {
        let cycle = self.cycles_run.fetch_add(1, Ordering::SeqCst) + 1;
        CycleTick {
            cycle,
            run_merge: due(cycle, self.schedule.merge_every),
            run_cross_domain: due(cycle, self.schedule.cross_domain_every),
        }
    }

    /// Cycles claimed so far.
    pub fn cycles(&self) -> u64 {
        self.cycles_run.load(Ordering::SeqCst)
    }

    /// The cadence.
    pub fn schedule(&self) -> CycleSchedule {
        self.schedule
    }
}
