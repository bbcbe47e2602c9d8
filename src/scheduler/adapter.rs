use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identity the external scheduler assigned to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalId {
    Assigned(u64),
    /// The submission was rejected or its response could not be parsed.
    SubmitFailed,
}

impl ExternalId {
    pub fn number(&self) -> Option<u64> {
        match self {
            ExternalId::Assigned(n) => Some(*n),
            ExternalId::SubmitFailed => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ExternalId::SubmitFailed)
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalId::Assigned(n) => write!(f, "{}", n),
            ExternalId::SubmitFailed => write!(f, "error"),
        }
    }
}

/// One status query worth of queue state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub queued: HashSet<u64>,
    pub running: HashSet<u64>,
}

impl QueueSnapshot {
    pub fn outstanding(&self) -> usize {
        self.queued.len() + self.running.len()
    }
}

/// The only seam between the orchestrator and a scheduler's command-line
/// tools. Anything that scrapes scheduler output lives behind this trait.
pub trait SchedulerAdapter {
    /// Submit `command`, gated on every id in `after` having ended.
    ///
    /// Rejections are not errors: they come back as
    /// [`ExternalId::SubmitFailed`].
    fn submit(&self, command: &str, after: &[u64]) -> ExternalId;

    /// Query the scheduler once and split the caller's jobs by state.
    fn snapshot(&self) -> Result<QueueSnapshot>;

    fn queued_ids(&self) -> Result<HashSet<u64>> {
        Ok(self.snapshot()?.queued)
    }

    fn running_ids(&self) -> Result<HashSet<u64>> {
        Ok(self.snapshot()?.running)
    }

    fn outstanding_count(&self) -> Result<usize> {
        Ok(self.snapshot()?.outstanding())
    }
}

/// Scheduler-level clause that holds a job until all of `after` have ended.
pub fn wait_expression(after: &[u64]) -> Option<String> {
    if after.is_empty() {
        return None;
    }
    Some(
        after
            .iter()
            .map(|id| format!("ended({})", id))
            .collect::<Vec<_>>()
            .join(" && "),
    )
}
