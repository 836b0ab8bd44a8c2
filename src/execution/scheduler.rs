//! Execution scheduler - determines which jobs to run next

use std::collections::VecDeque;

/// Strategy for scheduling job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute jobs in plan order, one at a time
    #[default]
    Sequential,

    /// Execute all jobs in parallel
    Parallel,

    /// Limited parallelism (max N concurrent jobs)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Apply a workflow's `max-parallel` limit
    pub fn limited_to(self, max_parallel: Option<usize>) -> Self {
        match (self, max_parallel) {
            (strategy, None) => strategy,
            (SchedulingStrategy::Sequential, Some(_)) => SchedulingStrategy::Sequential,
            (SchedulingStrategy::Parallel, Some(n)) => SchedulingStrategy::LimitedParallel(n),
            (SchedulingStrategy::LimitedParallel(m), Some(n)) => {
                SchedulingStrategy::LimitedParallel(m.min(n))
            }
        }
    }

    /// Maximum number of jobs running at once
    pub fn capacity(&self) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => usize::MAX,
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }
}

/// Scheduler for determining which jobs to run
#[derive(Debug)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
    queue: VecDeque<usize>,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self {
            strategy,
            queue: VecDeque::new(),
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Add a job, by its position in the run, to the queue
    pub fn enqueue(&mut self, job: usize) {
        self.queue.push_back(job);
    }

    /// Take the next jobs to start given how many are running
    pub fn next_jobs(&mut self, running: usize) -> Vec<usize> {
        let available = self.strategy.capacity().saturating_sub(running);
        let take = available.min(self.queue.len());
        self.queue.drain(..take).collect()
    }

    /// Check if there are more jobs to start
    pub fn has_more(&self) -> bool {
        !self.queue.is_empty()
    }
}
