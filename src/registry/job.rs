use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler::ExternalId;

/// Lifecycle bucket a job lands in on a classification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queuing,
    Running,
    Lost,
    Passed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queuing,
        JobStatus::Running,
        JobStatus::Lost,
        JobStatus::Passed,
        JobStatus::Failed,
    ];

    pub fn is_outstanding(self) -> bool {
        matches!(self, JobStatus::Queuing | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queuing => write!(f, "queuing"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Lost => write!(f, "lost"),
            JobStatus::Passed => write!(f, "passed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Time-ordered unique id; lexical order matches creation order.
pub fn new_job_id() -> String {
    Uuid::now_v7().simple().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub external_id: ExternalId,
    pub command: String,
    #[serde(default)]
    pub switches: String,
    #[serde(default)]
    pub dependent_ids: Vec<String>,
    #[serde(default)]
    pub dependent_external_ids: Vec<u64>,
    pub submitted_at: DateTime<Utc>,
    /// Set when a terminal status is cached, and also when a started job
    /// first goes missing from the queue (start of the grace window).
    pub completed_at: Option<DateTime<Utc>>,
    pub submission_count: u32,
    /// Cached terminal status. Only `Passed`, `Failed` and submission-error
    /// `Lost` are ever stored here.
    pub status: Option<JobStatus>,
}

impl JobRecord {
    pub fn new(id: String, external_id: ExternalId, command: String, switches: String) -> Self {
        Self {
            id,
            external_id,
            command,
            switches,
            dependent_ids: Vec::new(),
            dependent_external_ids: Vec::new(),
            submitted_at: Utc::now(),
            completed_at: None,
            submission_count: 1,
            status: None,
        }
    }

    pub fn with_dependents(mut self, ids: Vec<String>, external_ids: Vec<u64>) -> Self {
        self.dependent_ids = ids;
        self.dependent_external_ids = external_ids;
        self
    }

    pub fn is_sticky(&self) -> bool {
        self.status.is_some()
    }
}
