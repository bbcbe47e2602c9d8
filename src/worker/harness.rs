use std::fs::{File, OpenOptions};
use std::io::Write;
use std::process::{Command, Stdio};

use crate::config::DependentWaitConfig;
use crate::error::Result;
use crate::markers::{Marker, MarkerState, MarkerStore};
use crate::registry::JobStatus;
use crate::waiter::{wait_for_ids, IdWaitReport};

/// Result of running one job on a worker
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_id: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
}

/// Runs a payload on the worker side and reports through marker files.
///
/// The started marker is written first. Dependents are re-checked before the
/// payload runs even though the scheduler's wait clause should already have
/// ordered them. Every failure path ends in a failed marker; nothing is
/// propagated to the caller.
#[derive(Debug, Clone)]
pub struct RemoteHarness {
    markers: MarkerStore,
    dependent_wait: DependentWaitConfig,
}

impl RemoteHarness {
    pub fn new(markers: MarkerStore, dependent_wait: DependentWaitConfig) -> Self {
        Self {
            markers,
            dependent_wait,
        }
    }

    pub fn execute_remotely(
        &self,
        id: &str,
        command: &str,
        dependent_ids: &[String],
    ) -> ExecutionResult {
        tracing::info!(job_id = %id, command, dependents = dependent_ids.len(), "Executing job");

        if let Err(e) = self.markers.touch(id, Marker::Started) {
            tracing::error!(job_id = %id, error = %e, "Could not write started marker");
        }

        if !dependent_ids.is_empty() {
            let report = wait_for_ids(
                &self.markers,
                dependent_ids,
                self.dependent_wait.poll_interval,
                self.dependent_wait.timeout,
            );
            if !report.all_passed() {
                let reason = dependency_failure(&report);
                tracing::warn!(job_id = %id, reason = %reason, "Skipping job, dependency failed");
                self.write_log(id, &reason);
                return self.finish(id, JobStatus::Failed, None);
            }
        }

        match self.run(id, command) {
            Ok(exit_code) => {
                let status = if exit_code == Some(0) {
                    JobStatus::Passed
                } else {
                    JobStatus::Failed
                };
                self.finish(id, status, exit_code)
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Job execution failed");
                self.write_log(id, &format!("Job execution failed: {}", e));
                self.finish(id, JobStatus::Failed, None)
            }
        }
    }

    /// Run `sh -c command` with stdout and stderr both captured to the log.
    fn run(&self, id: &str, command: &str) -> Result<Option<i32>> {
        self.markers.ensure_dir()?;
        let stdout = File::create(self.markers.log_path(id))?;
        let stderr = stdout.try_clone()?;

        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()?;

        Ok(status.code())
    }

    fn write_log(&self, id: &str, message: &str) {
        let written = self.markers.ensure_dir().and_then(|_| {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.markers.log_path(id))?;
            writeln!(file, "{}", message)?;
            Ok(())
        });
        if let Err(e) = written {
            tracing::error!(job_id = %id, error = %e, "Could not write job log");
        }
    }

    fn finish(&self, id: &str, status: JobStatus, exit_code: Option<i32>) -> ExecutionResult {
        let marker = match status {
            JobStatus::Passed => Marker::Passed,
            _ => Marker::Failed,
        };
        if let Err(e) = self.markers.touch(id, marker) {
            tracing::error!(job_id = %id, error = %e, "Could not write result marker");
        }

        tracing::info!(job_id = %id, status = %status, exit_code = ?exit_code, "Job completed");

        ExecutionResult {
            job_id: id.to_string(),
            status,
            exit_code,
        }
    }
}

fn dependency_failure(report: &IdWaitReport) -> String {
    let detail: Vec<String> = report
        .not_passed()
        .into_iter()
        .map(|dep| format!("{} ({})", dep, describe(report, dep)))
        .collect();
    if report.timed_out {
        format!("Timed out waiting for dependent jobs: {}", detail.join(", "))
    } else {
        format!("Dependent jobs did not pass: {}", detail.join(", "))
    }
}

fn describe(report: &IdWaitReport, id: &str) -> &'static str {
    match report.states.get(id) {
        Some(MarkerState::Passed) => "passed",
        Some(MarkerState::Failed) => "failed",
        Some(MarkerState::Started) => "started, no result",
        Some(MarkerState::NotStarted) | None => "not started",
    }
}
