//! Consolidated report over the captured output of finished jobs.
//!
//! Metric lines (`Total items: 5`, ...) are summed into [`Totals`]; all other
//! lines are copied into the combined body after colour codes are stripped,
//! known noise is dropped and runs of blank lines are squeezed to one. A bad
//! line is recorded as an error and skipped; it never stops the rest of the
//! log or the logs after it.

pub mod metrics;

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::classifier::Classification;
use crate::error::Result;
use crate::markers::MarkerStore;
use crate::registry::JobStatus;

pub use metrics::{parse_metric, Metric, MetricValue, Totals};

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid escape regex"));

static NOISE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\s*Job <\d+> is submitted",
        r"(?i)warning: insecure world writable dir",
        r"^\s*Sender: LSF System",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid noise regex"))
    .collect()
});

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogReport {
    pub totals: Totals,
    pub jobs: usize,
    pub body: Vec<String>,
    pub errors: Vec<String>,
}

impl LogReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.totals.to_string());
        out.push('\n');
        for line in &self.body {
            out.push_str(line);
            out.push('\n');
        }
        if !self.errors.is_empty() {
            out.push_str("\nLog aggregation errors:\n");
            for err in &self.errors {
                out.push_str("  ");
                out.push_str(err);
                out.push('\n');
            }
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())?;
        Ok(())
    }
}

/// Build the report from every passed and failed job in `buckets`, in
/// submission order.
pub fn build_log(markers: &MarkerStore, buckets: &Classification) -> LogReport {
    let mut finished: Vec<(&String, JobStatus)> = buckets
        .ids(JobStatus::Passed)
        .iter()
        .map(|id| (id, JobStatus::Passed))
        .chain(buckets.ids(JobStatus::Failed).iter().map(|id| (id, JobStatus::Failed)))
        .collect();
    finished.sort_by(|a, b| a.0.cmp(b.0));

    let mut builder = Builder::default();
    for (id, status) in finished {
        builder.add_job(markers, id, status);
    }

    tracing::info!(
        jobs = builder.report.jobs,
        errors = builder.report.errors.len(),
        "Log report built"
    );
    builder.report
}

#[derive(Default)]
struct Builder {
    report: LogReport,
    last_blank: bool,
}

impl Builder {
    fn add_job(&mut self, markers: &MarkerStore, id: &str, status: JobStatus) {
        let path = markers.log_path(id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                self.error(format!("{}: cannot open {}: {}", id, path.display(), e));
                return;
            }
        };

        self.report.jobs += 1;
        self.push(format!("---- job {} ({}) ----", id, status));
        self.last_blank = false;

        for (lineno, chunk) in BufReader::new(file).split(b'\n').enumerate() {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.error(format!("{} line {}: read failed: {}", id, lineno + 1, e));
                    break;
                }
            };
            if let Err(msg) = self.add_line(&bytes) {
                self.error(format!("{} line {}: {}", id, lineno + 1, msg));
            }
        }
    }

    fn add_line(&mut self, bytes: &[u8]) -> std::result::Result<(), String> {
        let text = std::str::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string())?;
        let text = text.strip_suffix('\r').unwrap_or(text);
        if text.contains('\0') {
            return Err("binary content".to_string());
        }
        let line = ANSI_ESCAPE.replace_all(text, "");

        if let Some((metric, value)) = parse_metric(&line)? {
            self.report.totals.record(metric, value);
            return Ok(());
        }

        if NOISE.iter().any(|re| re.is_match(&line)) {
            return Ok(());
        }

        let blank = line.trim().is_empty();
        if blank && self.last_blank {
            return Ok(());
        }
        self.last_blank = blank;
        self.push(line.into_owned());
        Ok(())
    }

    fn push(&mut self, line: String) {
        self.report.body.push(line);
    }

    fn error(&mut self, message: String) {
        tracing::error!(error = %message, "Skipping unreadable log content");
        self.report.errors.push(message);
    }
}
