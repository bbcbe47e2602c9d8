use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use farm_dispatch::classifier::{Classification, Classifier};
use farm_dispatch::command::forwardable_options;
use farm_dispatch::config::{DependentWaitConfig, FarmConfig, SchedulerConfig, TimingConfig};
use farm_dispatch::logs::build_log;
use farm_dispatch::markers::MarkerStore;
use farm_dispatch::registry::{JobStatus, Registry, Selection, SubmitOptions};
use farm_dispatch::scheduler::LsfAdapter;
use farm_dispatch::shutdown;
use farm_dispatch::waiter::{CompletionWaiter, WaitOptions, WaitOutcome};
use farm_dispatch::worker::RemoteHarness;

#[derive(Parser, Debug)]
#[command(name = "farm-dispatch")]
#[command(version)]
#[command(about = "Dispatch shell jobs to a batch-queuing compute farm and track them")]
#[command(propagate_version = true)]
struct Args {
    #[command(flatten)]
    farm: FarmArgs,

    #[command(subcommand)]
    command: Commands,
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct FarmArgs {
    /// Workspace directory holding the registry and job logs
    #[arg(long, short = 'C', global = true, default_value = ".")]
    workspace: PathBuf,

    /// Scheduler user group
    #[arg(long, global = true)]
    group: Option<String>,

    /// Scheduler project
    #[arg(long, global = true)]
    project: Option<String>,

    /// Scheduler resource requirement string
    #[arg(long, global = true)]
    resource: Option<String>,

    /// Scheduler queue
    #[arg(long, global = true)]
    queue: Option<String>,

    /// Do not let the scheduler rerun jobs after a host failure
    #[arg(long, global = true)]
    no_rerun: bool,

    /// Print submit commands instead of running them
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    /// Site-wide command run before every remote job
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Seconds a job unknown to the scheduler is still considered queuing
    #[arg(long, global = true, default_value = "60")]
    queue_grace_secs: u64,

    /// Seconds a started job may be missing from the queue before it is lost
    #[arg(long, global = true, default_value = "60")]
    lost_after_secs: u64,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BucketArg {
    Queuing,
    Running,
    Lost,
    Passed,
    Failed,
    All,
}

impl BucketArg {
    fn status(self) -> Option<JobStatus> {
        match self {
            BucketArg::Queuing => Some(JobStatus::Queuing),
            BucketArg::Running => Some(JobStatus::Running),
            BucketArg::Lost => Some(JobStatus::Lost),
            BucketArg::Passed => Some(JobStatus::Passed),
            BucketArg::Failed => Some(JobStatus::Failed),
            BucketArg::All => None,
        }
    }
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct TargetArgs {
    /// Apply to every job in a bucket
    #[arg(long)]
    bucket: Option<BucketArg>,

    /// Apply to a single job id
    #[arg(long)]
    id: Option<String>,
}

impl TargetArgs {
    fn selection(&self) -> Selection {
        match (&self.id, self.bucket) {
            (Some(id), _) => Selection::Id(id.clone()),
            (None, Some(bucket)) => match bucket.status() {
                Some(status) => Selection::Bucket(status),
                None => Selection::All,
            },
            (None, None) => Selection::All,
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Submit a command to the farm
    Submit {
        /// Job id that must finish first (repeatable)
        #[arg(long)]
        after: Vec<String>,

        /// Extra switches appended to the command
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        switches: String,

        /// Options of the parent invocation to forward after filtering
        #[arg(long, allow_hyphen_values = true)]
        forward: Option<String>,

        /// The command to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Show job status by bucket
    Status {
        /// List individual jobs
        #[arg(short, long)]
        verbose: bool,

        /// Restrict the job list to one bucket
        #[arg(long, default_value = "all")]
        bucket: BucketArg,
    },
    /// Remove jobs from the registry
    Clear {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Resubmit jobs with their original command
    Resubmit {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Block until all jobs finish or the timeout expires
    Wait {
        /// Seconds between classification passes
        #[arg(long, default_value = "10")]
        poll_interval: u64,

        /// Seconds before giving up
        #[arg(long, default_value = "3600")]
        timeout: u64,

        /// Resubmit lost jobs while submitted at most this many times
        #[arg(long, default_value = "3")]
        max_lost_retries: u32,

        /// Resubmit failed jobs while submitted at most this many times
        #[arg(long, default_value = "0")]
        max_fail_retries: u32,
    },
    /// Build the consolidated log of finished jobs
    Log {
        /// Write the report to this file instead of stdout
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Run a job on a farm host (invoked by the scheduler)
    #[command(hide = true)]
    Exec {
        #[arg(long)]
        id: String,

        #[arg(long, value_delimiter = ',')]
        dependents: Vec<String>,

        /// Seconds to wait for dependents' results
        #[arg(long, default_value = "120")]
        dependent_timeout: u64,

        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobSubmitOutput {
    job_id: String,
    external_id: String,
}

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    external_id: String,
    status: String,
    submissions: u32,
    submitted_at: String,
    command: String,
}

#[derive(Serialize)]
struct StatusOutput {
    counts: BTreeMap<String, usize>,
    jobs: Vec<JobListItem>,
}

#[derive(Serialize)]
struct WaitOutput {
    outcome: String,
    passes: u32,
    resubmitted: usize,
    counts: BTreeMap<String, usize>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn build_config(args: &FarmArgs) -> Result<FarmConfig, Box<dyn std::error::Error>> {
    let scheduler = SchedulerConfig {
        group: args.group.clone(),
        project: args.project.clone(),
        resource: args.resource.clone(),
        queue: args.queue.clone(),
        rerunnable: !args.no_rerun,
        debug: args.debug,
        ..SchedulerConfig::default()
    };
    let timing = TimingConfig {
        queue_grace: Duration::from_secs(args.queue_grace_secs),
        lost_after: Duration::from_secs(args.lost_after_secs),
    };

    let workspace = args.workspace.canonicalize().unwrap_or_else(|_| args.workspace.clone());
    let mut config = FarmConfig::new(workspace)
        .with_scheduler(scheduler)
        .with_timing(timing);
    config.template.prefix = args.prefix.clone();
    if let Ok(exe) = std::env::current_exe() {
        config.template.harness_program = exe.to_string_lossy().into_owned();
    }
    Ok(config)
}

fn counts(buckets: &Classification) -> BTreeMap<String, usize> {
    buckets
        .counts()
        .into_iter()
        .map(|(status, n)| (status.to_string(), n))
        .collect()
}

fn job_rows(
    registry: &Registry,
    buckets: &Classification,
    filter: Option<JobStatus>,
) -> Vec<JobListItem> {
    registry
        .jobs()
        .filter_map(|job| {
            let status = buckets.bucket_of(&job.id)?;
            if filter.is_some_and(|f| f != status) {
                return None;
            }
            Some(JobListItem {
                job_id: job.id.clone(),
                external_id: job.external_id.to_string(),
                status: status.to_string(),
                submissions: job.submission_count,
                submitted_at: job.submitted_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                command: job.command.clone(),
            })
        })
        .collect()
}

// =============================================================================
// Command Handlers
// =============================================================================

fn handle_submit(
    registry: &mut Registry,
    after: Vec<String>,
    switches: String,
    forward: Option<String>,
    command: Vec<String>,
    output_format: &OutputFormat,
) -> Result<i32, Box<dyn std::error::Error>> {
    let mut switches = switches;
    if let Some(parent) = forward {
        let forwarded = forwardable_options(&parent);
        if !forwarded.is_empty() {
            if !switches.is_empty() {
                switches.push(' ');
            }
            switches.push_str(&forwarded);
        }
    }

    let mut options = SubmitOptions::default().with_switches(switches);
    for dep in after {
        options = options.after(dep);
    }

    let id = registry.submit_job(&command.join(" "), options)?;
    let external_id = registry
        .get(&id)
        .map(|job| job.external_id.to_string())
        .unwrap_or_default();

    match output_format {
        OutputFormat::Json => {
            let output = JobSubmitOutput {
                job_id: id,
                external_id,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job submitted");
            println!("Job ID:      {}", id);
            println!("External ID: {}", external_id);
        }
    }
    Ok(0)
}

fn handle_status(
    registry: &mut Registry,
    classifier: &Classifier,
    verbose: bool,
    bucket: BucketArg,
    output_format: &OutputFormat,
) -> Result<i32, Box<dyn std::error::Error>> {
    let buckets = classifier.classify_now(registry)?;
    let rows = if verbose {
        job_rows(registry, &buckets, bucket.status())
    } else {
        Vec::new()
    };

    match output_format {
        OutputFormat::Json => {
            let output = StatusOutput {
                counts: counts(&buckets),
                jobs: rows,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{}", buckets);
            if verbose {
                if rows.is_empty() {
                    println!("No jobs found.");
                } else {
                    println!();
                    println!(
                        "{:<34} {:<10} {:<8} {:<5} {:<19} COMMAND",
                        "JOB ID", "EXTERNAL", "STATUS", "SUBS", "SUBMITTED"
                    );
                    println!("{}", "-".repeat(100));
                    for row in &rows {
                        let cmd_display = if row.command.chars().count() > 30 {
                            format!("{}...", row.command.chars().take(27).collect::<String>())
                        } else {
                            row.command.clone()
                        };
                        println!(
                            "{:<34} {:<10} {:<8} {:<5} {:<19} {}",
                            row.job_id,
                            row.external_id,
                            row.status,
                            row.submissions,
                            row.submitted_at,
                            cmd_display
                        );
                    }
                }
            }
        }
    }
    Ok(0)
}

fn handle_clear(
    registry: &mut Registry,
    classifier: &Classifier,
    target: &TargetArgs,
) -> Result<i32, Box<dyn std::error::Error>> {
    let selection = target.selection();
    let buckets = match selection {
        Selection::Bucket(_) => classifier.classify_now(registry)?,
        _ => Classification::default(),
    };
    let removed = registry.clear(&selection, &buckets)?;
    println!("Cleared {} job(s)", removed);
    Ok(0)
}

fn handle_resubmit(
    registry: &mut Registry,
    classifier: &Classifier,
    target: &TargetArgs,
) -> Result<i32, Box<dyn std::error::Error>> {
    let selection = target.selection();
    let buckets = match selection {
        Selection::Bucket(_) => classifier.classify_now(registry)?,
        _ => Classification::default(),
    };
    let resubmitted = registry.resubmit(&selection, &buckets)?;
    println!("Resubmitted {} job(s)", resubmitted);
    Ok(0)
}

fn handle_wait(
    registry: &mut Registry,
    classifier: Classifier,
    options: WaitOptions,
    output_format: &OutputFormat,
) -> Result<i32, Box<dyn std::error::Error>> {
    let interrupt = shutdown::install_shutdown_handler()?;
    let mut waiter = CompletionWaiter::new(registry, classifier).with_interrupt(interrupt);
    if let OutputFormat::Table = output_format {
        waiter = waiter.on_pass(|buckets| println!("{}", buckets));
    }
    let report = waiter.wait_for_all(&options)?;

    let outcome = match report.outcome {
        WaitOutcome::Completed => "completed",
        WaitOutcome::TimedOut => "timed_out",
        WaitOutcome::Interrupted => "interrupted",
    };

    match output_format {
        OutputFormat::Json => {
            let output = WaitOutput {
                outcome: outcome.to_string(),
                passes: report.passes,
                resubmitted: report.resubmitted,
                counts: counts(&report.buckets),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!(
                "Wait {} after {} pass(es), {} resubmission(s)",
                outcome, report.passes, report.resubmitted
            );
        }
    }

    let unhealthy = report.buckets.count(JobStatus::Failed) + report.buckets.count(JobStatus::Lost);
    Ok(if report.outcome == WaitOutcome::Completed && unhealthy == 0 {
        0
    } else {
        1
    })
}

fn handle_log(
    registry: &mut Registry,
    classifier: &Classifier,
    file: Option<PathBuf>,
    output_format: &OutputFormat,
) -> Result<i32, Box<dyn std::error::Error>> {
    let buckets = classifier.classify_now(registry)?;
    let report = build_log(registry.markers(), &buckets);

    match (file, output_format) {
        (Some(path), _) => {
            report.write_to(&path)?;
            println!("Log written to {}", path.display());
        }
        (None, OutputFormat::Json) => println!("{}", serde_json::to_string_pretty(&report)?),
        (None, OutputFormat::Table) => print!("{}", report.render()),
    }
    Ok(if report.errors.is_empty() { 0 } else { 1 })
}

fn handle_exec(
    config: &FarmConfig,
    id: &str,
    dependents: &[String],
    dependent_timeout: u64,
    command: &[String],
) -> i32 {
    let harness = RemoteHarness::new(
        MarkerStore::new(config.logs_dir()),
        DependentWaitConfig {
            timeout: Duration::from_secs(dependent_timeout),
            ..config.dependent_wait.clone()
        },
    );
    let result = harness.execute_remotely(id, &command.join(" "), dependents);
    if result.status == JobStatus::Passed {
        0
    } else {
        1
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&args.farm)?;

    if let Commands::Exec {
        id,
        dependents,
        dependent_timeout,
        command,
    } = &args.command
    {
        let code = handle_exec(&config, id, dependents, *dependent_timeout, command);
        std::process::exit(code);
    }

    let scheduler = Box::new(LsfAdapter::new(config.scheduler.clone()));
    let mut registry = match Registry::open(&config, scheduler) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let classifier = Classifier::new(config.timing.clone());
    let output = &args.farm.output;

    let result = match args.command {
        Commands::Submit {
            after,
            switches,
            forward,
            command,
        } => handle_submit(&mut registry, after, switches, forward, command, output),
        Commands::Status { verbose, bucket } => {
            handle_status(&mut registry, &classifier, verbose, bucket, output)
        }
        Commands::Clear { target } => handle_clear(&mut registry, &classifier, &target),
        Commands::Resubmit { target } => handle_resubmit(&mut registry, &classifier, &target),
        Commands::Wait {
            poll_interval,
            timeout,
            max_lost_retries,
            max_fail_retries,
        } => handle_wait(
            &mut registry,
            classifier,
            WaitOptions {
                poll_interval: Duration::from_secs(poll_interval),
                timeout: Duration::from_secs(timeout),
                max_lost_retries,
                max_fail_retries,
            },
            output,
        ),
        Commands::Log { file } => handle_log(&mut registry, &classifier, file, output),
        Commands::Exec { .. } => Ok(0),
    };

    // Mutations made before a failure still need to reach disk.
    shutdown::save_before_exit(&registry)?;

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
