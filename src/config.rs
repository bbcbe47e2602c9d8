use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FarmError, Result};

const STATE_DIR_NAME: &str = ".farm";
const REGISTRY_FILE_NAME: &str = "registry.jsonl";
const LOGS_DIR_NAME: &str = "logs";

/// Resource parameters and tool names for the external scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// User group (`-G`)
    pub group: Option<String>,
    /// Project name (`-P`)
    pub project: Option<String>,
    /// Resource requirement string (`-R`)
    pub resource: Option<String>,
    /// Target queue (`-q`)
    pub queue: Option<String>,
    /// Whether the scheduler may rerun a job after a host failure
    pub rerunnable: bool,
    /// Print the would-be submit command instead of running it
    pub debug: bool,
    /// Program used to submit jobs
    pub submit_program: String,
    /// Program used to query job state
    pub status_program: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            group: None,
            project: None,
            resource: None,
            queue: None,
            rerunnable: true,
            debug: false,
            submit_program: "bsub".to_string(),
            status_program: "bjobs".to_string(),
        }
    }
}

/// Local admission control for submissions.
///
/// Every `check_every` submissions the submitting process blocks until the
/// number of outstanding jobs it owns drops below `ceiling`.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub check_every: u64,
    pub ceiling: usize,
    pub interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            check_every: 100,
            ceiling: 400,
            interval: Duration::from_secs(60),
        }
    }
}

/// Windows used by the classifier to absorb probe lag and shared
/// filesystem propagation delay.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// A job unknown to the queue probe is still treated as queuing for this
    /// long after submission.
    pub queue_grace: Duration,
    /// A started job with no result marker is declared lost this long after
    /// it was first seen missing from the queue.
    pub lost_after: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            queue_grace: Duration::from_secs(60),
            lost_after: Duration::from_secs(60),
        }
    }
}

/// Inputs for building the command string a remote job runs.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// Site-wide prefix run before anything else (e.g. sourcing a setup file)
    pub prefix: Option<String>,
    /// Program that provides the `exec` harness on the worker
    pub harness_program: String,
    /// Directory the remote job changes into before running
    pub working_dir: PathBuf,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            harness_program: "farm-dispatch".to_string(),
            working_dir: PathBuf::from("."),
        }
    }
}

/// Bounded wait the remote harness performs on dependents' markers.
#[derive(Debug, Clone)]
pub struct DependentWaitConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for DependentWaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FarmConfig {
    pub workspace: PathBuf,
    pub scheduler: SchedulerConfig,
    pub throttle: ThrottleConfig,
    pub timing: TimingConfig,
    pub template: TemplateConfig,
    pub dependent_wait: DependentWaitConfig,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("."))
    }
}

impl FarmConfig {
    pub fn new(workspace: PathBuf) -> Self {
        let template = TemplateConfig {
            working_dir: workspace.clone(),
            ..TemplateConfig::default()
        };
        Self {
            workspace,
            scheduler: SchedulerConfig::default(),
            throttle: ThrottleConfig::default(),
            timing: TimingConfig::default(),
            template,
            dependent_wait: DependentWaitConfig::default(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn state_dir(&self) -> PathBuf {
        self.workspace.join(STATE_DIR_NAME)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir().join(REGISTRY_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir().join(LOGS_DIR_NAME)
    }

    /// Fail fast when the workspace is missing. Nothing is retried.
    pub fn validate(&self) -> Result<()> {
        if !is_dir(&self.workspace) {
            return Err(FarmError::MissingWorkspace(self.workspace.clone()));
        }
        Ok(())
    }
}

fn is_dir(path: &Path) -> bool {
    path.metadata().map(|m| m.is_dir()).unwrap_or(false)
}
