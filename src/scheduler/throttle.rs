use std::thread;

use crate::config::ThrottleConfig;
use crate::scheduler::adapter::SchedulerAdapter;

/// Process-local admission valve.
///
/// Counts submissions made by this process and, every `check_every` of them,
/// blocks until the scheduler reports fewer than `ceiling` outstanding jobs.
/// This bounds how fast one process enqueues work; it is not a cross-process
/// semaphore.
#[derive(Debug)]
pub struct SubmissionThrottle {
    config: ThrottleConfig,
    submitted: u64,
}

impl SubmissionThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            submitted: 0,
        }
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Call before each submission. Returns how many times it slept.
    pub fn admit(&mut self, scheduler: &dyn SchedulerAdapter) -> u32 {
        self.submitted += 1;
        if self.config.check_every == 0 || self.submitted % self.config.check_every != 0 {
            return 0;
        }

        let mut waits = 0;
        loop {
            match scheduler.outstanding_count() {
                Ok(count) if count < self.config.ceiling => return waits,
                Ok(count) => {
                    tracing::info!(
                        outstanding = count,
                        ceiling = self.config.ceiling,
                        "Too many outstanding jobs, pausing submissions"
                    );
                }
                Err(e) => {
                    // Without a count there is nothing to wait on.
                    tracing::warn!(error = %e, "Outstanding job count unavailable, not throttling");
                    return waits;
                }
            }
            waits += 1;
            thread::sleep(self.config.interval);
        }
    }
}
