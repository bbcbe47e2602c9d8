//! Blocking completion loops.
//!
//! Both waits suspend the calling thread with plain sleeps between passes.
//! A timeout only stops polling: jobs already on the farm keep running.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::classifier::{Classification, Classifier};
use crate::error::Result;
use crate::markers::{MarkerState, MarkerStore};
use crate::registry::{JobStatus, Registry};

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Lost jobs are resubmitted while `submission_count <= max_lost_retries`.
    pub max_lost_retries: u32,
    /// Failed jobs are resubmitted while `submission_count <= max_fail_retries`.
    pub max_fail_retries: u32,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(3600),
            max_lost_retries: 3,
            max_fail_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Nothing queuing or running and the last pass resubmitted nothing.
    Completed,
    TimedOut,
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct WaitReport {
    pub outcome: WaitOutcome,
    pub buckets: Classification,
    pub resubmitted: usize,
    pub passes: u32,
}

/// Marker state of each id at the end of [`wait_for_ids`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdWaitReport {
    pub states: BTreeMap<String, MarkerState>,
    pub timed_out: bool,
}

impl IdWaitReport {
    pub fn all_passed(&self) -> bool {
        !self.timed_out && self.states.values().all(|s| *s == MarkerState::Passed)
    }

    pub fn not_passed(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, s)| **s != MarkerState::Passed)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Poll only the marker files of `ids` until each has a pass/fail result or
/// `timeout` elapses. Never touches the registry or the scheduler, so many
/// processes can wait on small dependency sets cheaply.
pub fn wait_for_ids(
    markers: &MarkerStore,
    ids: &[String],
    poll_interval: Duration,
    timeout: Duration,
) -> IdWaitReport {
    let start = Instant::now();
    loop {
        let states: BTreeMap<String, MarkerState> =
            ids.iter().map(|id| (id.clone(), markers.state(id))).collect();

        if states.values().all(|s| s.is_finished()) {
            return IdWaitReport {
                states,
                timed_out: false,
            };
        }

        let waited = start.elapsed();
        if waited >= timeout {
            tracing::warn!(
                pending = states.values().filter(|s| !s.is_finished()).count(),
                "Timed out waiting for jobs"
            );
            return IdWaitReport {
                states,
                timed_out: true,
            };
        }

        thread::sleep(poll_interval.min(timeout - waited));
    }
}

/// Drives classification passes and automatic retries until the registry
/// settles.
pub struct CompletionWaiter<'a> {
    registry: &'a mut Registry,
    classifier: Classifier,
    interrupt: Option<Arc<AtomicBool>>,
    on_pass: Option<Box<dyn FnMut(&Classification) + 'a>>,
}

impl<'a> CompletionWaiter<'a> {
    pub fn new(registry: &'a mut Registry, classifier: Classifier) -> Self {
        Self {
            registry,
            classifier,
            interrupt: None,
            on_pass: None,
        }
    }

    /// Stop waiting (with [`WaitOutcome::Interrupted`]) once `flag` is set.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Call `f` with the bucket summary after every classification pass.
    pub fn on_pass(mut self, f: impl FnMut(&Classification) + 'a) -> Self {
        self.on_pass = Some(Box::new(f));
        self
    }

    pub fn wait_for_ids(
        &self,
        ids: &[String],
        poll_interval: Duration,
        timeout: Duration,
    ) -> IdWaitReport {
        wait_for_ids(self.registry.markers(), ids, poll_interval, timeout)
    }

    pub fn wait_for_all(&mut self, options: &WaitOptions) -> Result<WaitReport> {
        let start = Instant::now();
        let mut resubmitted = 0;
        let mut passes = 1;

        let mut buckets = self.classifier.classify_now(self.registry)?;
        self.report_pass(&buckets);

        if buckets.outstanding() == 0 && self.retriable(&buckets, options).is_empty() {
            return Ok(report(WaitOutcome::Completed, buckets, resubmitted, passes));
        }

        loop {
            let waited = start.elapsed();
            if waited >= options.timeout {
                tracing::warn!(outstanding = buckets.outstanding(), "Timed out waiting for jobs");
                return Ok(report(WaitOutcome::TimedOut, buckets, resubmitted, passes));
            }
            if self.interrupted() {
                tracing::info!("Wait interrupted");
                return Ok(report(WaitOutcome::Interrupted, buckets, resubmitted, passes));
            }

            thread::sleep(options.poll_interval.min(options.timeout - waited));

            buckets = self.classifier.classify_now(self.registry)?;
            let retry = self.retriable(&buckets, options);
            for id in &retry {
                self.registry.resubmit_job(id)?;
            }
            resubmitted += retry.len();

            buckets = self.classifier.classify_now(self.registry)?;
            passes += 1;
            self.report_pass(&buckets);

            if buckets.outstanding() == 0 && retry.is_empty() {
                return Ok(report(WaitOutcome::Completed, buckets, resubmitted, passes));
            }
        }
    }

    /// Lost and failed ids still within their retry allowance. Submission
    /// errors are never retried automatically.
    fn retriable(&self, buckets: &Classification, options: &WaitOptions) -> Vec<String> {
        let lost = buckets.ids(JobStatus::Lost).iter().filter(|id| {
            self.registry
                .get(id)
                .map(|r| {
                    !r.external_id.is_failed() && r.submission_count <= options.max_lost_retries
                })
                .unwrap_or(false)
        });
        let failed = buckets.ids(JobStatus::Failed).iter().filter(|id| {
            self.registry
                .get(id)
                .map(|r| r.submission_count <= options.max_fail_retries)
                .unwrap_or(false)
        });
        lost.chain(failed).cloned().collect()
    }

    fn report_pass(&mut self, buckets: &Classification) {
        tracing::info!(summary = %buckets, "Wait pass");
        if let Some(f) = self.on_pass.as_mut() {
            f(buckets);
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

fn report(
    outcome: WaitOutcome,
    buckets: Classification,
    resubmitted: usize,
    passes: u32,
) -> WaitReport {
    WaitReport {
        outcome,
        buckets,
        resubmitted,
        passes,
    }
}
