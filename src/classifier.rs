//! Per-pass lifecycle classification.
//!
//! Every record is re-evaluated on each pass except those with a cached
//! (sticky) status: `Passed`, `Failed`, or `Lost` caused by a submission
//! error. Decision order for everything else:
//!
//! 1. both `started` and a `passed`/`failed` marker exist: terminal, cached
//! 2. a dependent is still queuing or running this pass: `Queuing`
//! 3. the probe lists the job as running: `Running` (started marker rewritten)
//! 4. the probe lists the job as queued: `Queuing`
//! 5. `started` exists but the job left the queue: `Running` for a grace
//!    window, then `Lost`
//! 6. recently submitted: `Queuing`
//! 7. otherwise `Lost`
//!
//! Steps 3 and 4 reset any grace-window timestamp, so a job the scheduler
//! reruns gets a fresh window the next time it drops out of the queue.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::TimingConfig;
use crate::error::Result;
use crate::markers::{Marker, MarkerState, MarkerStore};
use crate::registry::{JobRecord, JobStatus, Registry};
use crate::scheduler::QueueSnapshot;

/// Result of one classification pass: ids grouped by bucket, each bucket in
/// submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    buckets: HashMap<JobStatus, Vec<String>>,
    by_id: HashMap<String, JobStatus>,
}

impl Classification {
    fn insert(&mut self, id: &str, status: JobStatus) {
        self.buckets.entry(status).or_default().push(id.to_string());
        self.by_id.insert(id.to_string(), status);
    }

    pub fn ids(&self, status: JobStatus) -> &[String] {
        self.buckets.get(&status).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.ids(status).len()
    }

    pub fn bucket_of(&self, id: &str) -> Option<JobStatus> {
        self.by_id.get(id).copied()
    }

    /// Jobs still queuing or running.
    pub fn outstanding(&self) -> usize {
        self.count(JobStatus::Queuing) + self.count(JobStatus::Running)
    }

    pub fn total(&self) -> usize {
        self.by_id.len()
    }

    /// Per-bucket counts in display order.
    pub fn counts(&self) -> Vec<(JobStatus, usize)> {
        JobStatus::ALL.iter().map(|s| (*s, self.count(*s))).collect()
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .counts()
            .into_iter()
            .map(|(status, n)| format!("{}: {}", status, n))
            .collect();
        write!(f, "{}", parts.join("  "))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    timing: TimingConfig,
}

impl Classifier {
    pub fn new(timing: TimingConfig) -> Self {
        Self { timing }
    }

    /// Query the scheduler once and classify every record as of now.
    pub fn classify_now(&self, registry: &mut Registry) -> Result<Classification> {
        let probe = registry.scheduler().snapshot()?;
        Ok(self.classify(registry, &probe, Utc::now()))
    }

    /// Classify every record against `probe` and the marker files as of
    /// `now`. Caches sticky statuses and grace-window timestamps on the
    /// records.
    pub fn classify(
        &self,
        registry: &mut Registry,
        probe: &QueueSnapshot,
        now: DateTime<Utc>,
    ) -> Classification {
        let markers = registry.markers().clone();
        let mut result = Classification::default();

        for record in registry.records_mut() {
            let waiting_on_dependent = record.dependent_ids.iter().any(|dep| {
                result
                    .bucket_of(dep)
                    .map(JobStatus::is_outstanding)
                    .unwrap_or(false)
            });
            let status = self.decide(record, &markers, probe, now, waiting_on_dependent);
            result.insert(&record.id, status);
        }

        tracing::debug!(summary = %result, "Classification pass");
        result
    }

    fn decide(
        &self,
        record: &mut JobRecord,
        markers: &MarkerStore,
        probe: &QueueSnapshot,
        now: DateTime<Utc>,
        waiting_on_dependent: bool,
    ) -> JobStatus {
        if let Some(status) = record.status {
            return status;
        }

        let Some(external) = record.external_id.number() else {
            return cache(record, JobStatus::Lost, now);
        };

        let state = markers.state(&record.id);
        match state {
            MarkerState::Passed => return cache(record, JobStatus::Passed, now),
            MarkerState::Failed => return cache(record, JobStatus::Failed, now),
            MarkerState::Started | MarkerState::NotStarted => {}
        }

        // The worker-side dependency check decides whether this job really
        // runs; until its dependents settle it is still waiting.
        if waiting_on_dependent {
            return JobStatus::Queuing;
        }

        if probe.running.contains(&external) {
            // The remote write of the started marker may still be in flight.
            if let Err(e) = markers.touch(&record.id, Marker::Started) {
                tracing::warn!(job_id = %record.id, error = %e, "Could not write started marker");
            }
            record.completed_at = None;
            return JobStatus::Running;
        }

        if probe.queued.contains(&external) {
            record.completed_at = None;
            return JobStatus::Queuing;
        }

        if state == MarkerState::Started {
            return match record.completed_at {
                Some(seen) if elapsed(seen, now) > self.timing.lost_after => JobStatus::Lost,
                Some(_) => JobStatus::Running,
                None => {
                    record.completed_at = Some(now);
                    JobStatus::Running
                }
            };
        }

        if elapsed(record.submitted_at, now) < self.timing.queue_grace {
            JobStatus::Queuing
        } else {
            JobStatus::Lost
        }
    }
}

fn cache(record: &mut JobRecord, status: JobStatus, now: DateTime<Utc>) -> JobStatus {
    record.status = Some(status);
    if record.completed_at.is_none() {
        record.completed_at = Some(now);
    }
    tracing::debug!(job_id = %record.id, status = %status, "Status cached");
    status
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
