use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::command::shell_quote;
use crate::config::SchedulerConfig;
use crate::error::{FarmError, Result};
use crate::scheduler::adapter::{wait_expression, ExternalId, QueueSnapshot, SchedulerAdapter};

/// Id handed back in debug mode, where nothing is really submitted.
pub const DEBUG_EXTERNAL_ID: u64 = 496212;

static SUBMITTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Job <(\d+)> is submitted").expect("valid submit regex"));
static STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s+\S+\s+(PEND|RUN)\b").expect("valid status regex"));

/// LSF-style scheduler driven through `bsub` and `bjobs`.
#[derive(Debug, Clone)]
pub struct LsfAdapter {
    config: SchedulerConfig,
}

impl LsfAdapter {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to the submit program, command last.
    pub fn submit_args(&self, command: &str, after: &[u64]) -> Vec<String> {
        let mut args = vec!["-oo".to_string(), "/dev/null".to_string()];

        if let Some(ref group) = self.config.group {
            args.push("-G".to_string());
            args.push(group.clone());
        }
        if let Some(ref project) = self.config.project {
            args.push("-P".to_string());
            args.push(project.clone());
        }
        if let Some(ref resource) = self.config.resource {
            args.push("-R".to_string());
            args.push(resource.clone());
        }
        if let Some(ref queue) = self.config.queue {
            args.push("-q".to_string());
            args.push(queue.clone());
        }

        args.push(if self.config.rerunnable { "-r" } else { "-rn" }.to_string());

        if let Some(expr) = wait_expression(after) {
            args.push("-w".to_string());
            args.push(expr);
        }

        args.push(command.to_string());
        args
    }
}

impl SchedulerAdapter for LsfAdapter {
    fn submit(&self, command: &str, after: &[u64]) -> ExternalId {
        let args = self.submit_args(command, after);

        if self.config.debug {
            println!("{} {}", self.config.submit_program, display_args(&args));
            return ExternalId::Assigned(DEBUG_EXTERNAL_ID);
        }

        let output = Command::new(&self.config.submit_program)
            .args(&args)
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                match parse_submit_response(&stdout) {
                    Some(id) => {
                        tracing::debug!(external_id = id, "Submission accepted");
                        ExternalId::Assigned(id)
                    }
                    None => {
                        tracing::error!(
                            stdout = %stdout.trim(),
                            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                            "Submission rejected or response not recognised"
                        );
                        ExternalId::SubmitFailed
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    program = %self.config.submit_program,
                    error = %e,
                    "Failed to run submit program"
                );
                ExternalId::SubmitFailed
            }
        }
    }

    fn snapshot(&self) -> Result<QueueSnapshot> {
        // A non-zero exit with "No unfinished job found" is normal, so only
        // a failure to spawn is an error.
        let output = Command::new(&self.config.status_program)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| FarmError::Scheduler {
                program: self.config.status_program.clone(),
                message: e.to_string(),
            })?;

        Ok(parse_status_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extract the numeric id from a submit confirmation.
pub fn parse_submit_response(text: &str) -> Option<u64> {
    SUBMITTED
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Split status output into queued and running ids. Lines that do not start
/// with a numeric id followed by a known state token are ignored.
pub fn parse_status_output(text: &str) -> QueueSnapshot {
    let mut snapshot = QueueSnapshot::default();
    for line in text.lines() {
        let Some(caps) = STATUS_LINE.captures(line) else {
            continue;
        };
        let Ok(id) = caps[1].parse::<u64>() else {
            continue;
        };
        match &caps[2] {
            "PEND" => {
                snapshot.queued.insert(id);
            }
            "RUN" => {
                snapshot.running.insert(id);
            }
            _ => {}
        }
    }
    snapshot
}

fn display_args(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}
