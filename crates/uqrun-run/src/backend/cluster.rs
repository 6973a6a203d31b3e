use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uqrun_core::{ErrorInfo, UqError};

use super::{no_run_dir, PollStatus, RunHandle};
use crate::slot::{CancelCause, RunFailure, RunPayload, RunSlot};

/// Scheduler-side state of a batch job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    /// Any other terminal scheduler state, with its label.
    Failed(String),
}

/// Seam to an external batch scheduler.
pub trait BatchScheduler: Send {
    /// Submits `script` and returns the scheduler's job id.
    fn submit(&mut self, script: &Path, run_dir: &Path) -> Result<String, UqError>;
    /// Current job state, `None` when the scheduler no longer knows the job.
    fn state(&mut self, job_id: &str) -> Result<Option<JobState>, UqError>;
    fn cancel(&mut self, job_id: &str) -> Result<(), UqError>;
    /// Checks that the scheduler answers at all.
    fn ping(&mut self) -> Result<(), UqError>;
}

/// How status query errors are handled while a job is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PollRetry {
    /// The first query error fails the run.
    FailFast,
    /// Up to `attempts` consecutive query errors are tolerated.
    Retry { attempts: u32 },
}

impl Default for PollRetry {
    fn default() -> Self {
        PollRetry::Retry { attempts: 3 }
    }
}

/// Job script settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterOptions {
    /// Shell command line executed inside the run directory.
    pub command: String,
    #[serde(default = "default_job_name")]
    pub job_name: String,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub cpus: Option<u32>,
    /// Additional `#SBATCH --key=value` directives.
    #[serde(default)]
    pub options: IndexMap<String, String>,
    /// Launcher placed in front of the command, e.g. `srun`.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub openmp: bool,
    #[serde(default)]
    pub retry: PollRetry,
}

fn default_job_name() -> String {
    "uqrun".to_string()
}

impl ClusterOptions {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            job_name: default_job_name(),
            queue: None,
            cpus: None,
            options: IndexMap::new(),
            prefix: None,
            openmp: false,
            retry: PollRetry::default(),
        }
    }
}

/// Renders the batch script for the run with `index` in `run_dir`.
pub fn render_job_script(options: &ClusterOptions, index: usize, run_dir: &Path) -> String {
    let dir = run_dir.display();
    let mut script = String::from("#!/bin/bash\n");
    let _ = writeln!(script, "#SBATCH --job-name={}-{index:03}", options.job_name);
    let _ = writeln!(script, "#SBATCH --chdir={dir}");
    let _ = writeln!(script, "#SBATCH --output={dir}/stdout");
    let _ = writeln!(script, "#SBATCH --error={dir}/stderr");
    if let Some(queue) = &options.queue {
        let _ = writeln!(script, "#SBATCH --partition={queue}");
    }
    if let Some(cpus) = options.cpus {
        let _ = writeln!(script, "#SBATCH --cpus-per-task={cpus}");
    }
    for (key, value) in &options.options {
        let _ = writeln!(script, "#SBATCH --{key}={value}");
    }
    script.push('\n');
    let _ = writeln!(script, "export UQRUN_RUN_ID={index}");
    let _ = writeln!(script, "export UQRUN_RUN_DIR={dir}");
    if options.openmp {
        script.push_str("export OMP_NUM_THREADS=${SLURM_CPUS_PER_TASK:-1}\n");
        script.push_str("export OMP_PLACES=threads\n");
        script.push_str("export OMP_PROC_BIND=true\n");
    }
    script.push('\n');
    match &options.prefix {
        Some(prefix) => {
            let _ = writeln!(script, "{prefix} {}", options.command);
        }
        None => {
            let _ = writeln!(script, "{}", options.command);
        }
    }
    script
}

struct ClusterJob {
    job_id: String,
    run_dir: PathBuf,
    query_errors: u32,
}

/// Submits one batch job per run and polls the scheduler for its state.
pub struct ClusterBackend {
    options: ClusterOptions,
    scheduler: Box<dyn BatchScheduler>,
    jobs: HashMap<usize, ClusterJob>,
    outcomes: HashMap<usize, PollStatus>,
}

impl ClusterBackend {
    pub fn new(options: ClusterOptions, scheduler: Box<dyn BatchScheduler>) -> Self {
        Self {
            options,
            scheduler,
            jobs: HashMap::new(),
            outcomes: HashMap::new(),
        }
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    pub(crate) fn preflight(&mut self) -> Result<(), UqError> {
        self.scheduler.ping().map_err(|err| {
            UqError::Backend(
                ErrorInfo::new("backend.scheduler_unreachable", "batch scheduler did not answer")
                    .with_context("cause", err.to_string())
                    .with_hint("check that the scheduler client tools are installed and reachable"),
            )
        })?;
        info!("batch scheduler reachable");
        Ok(())
    }

    pub(crate) fn submit(&mut self, slot: &RunSlot) -> Result<RunHandle, UqError> {
        let index = slot.index();
        let run_dir = slot.run_dir().ok_or_else(|| no_run_dir(index))?.to_path_buf();
        let script_path = run_dir.join("job.sh");
        fs::write(&script_path, render_job_script(&self.options, index, &run_dir))
            .map_err(|err| {
                UqError::Backend(
                    ErrorInfo::new("backend.job_script", err.to_string())
                        .with_context("path", script_path.display().to_string()),
                )
            })?;
        let job_id = self.scheduler.submit(&script_path, &run_dir).map_err(|err| {
            UqError::Backend(err.info().clone().with_context("index", index.to_string()))
        })?;
        debug!(index, job_id = %job_id, "batch job submitted");
        self.jobs.insert(
            index,
            ClusterJob {
                job_id: job_id.clone(),
                run_dir,
                query_errors: 0,
            },
        );
        Ok(RunHandle { index, id: job_id })
    }

    pub(crate) fn poll(&mut self, handle: &RunHandle) -> PollStatus {
        if let Some(done) = self.outcomes.get(&handle.index) {
            return done.clone();
        }
        let Some(job) = self.jobs.get_mut(&handle.index) else {
            return PollStatus::Failed(RunFailure::LostJob(handle.id.clone()));
        };
        let status = match self.scheduler.state(&job.job_id) {
            Ok(Some(JobState::Queued | JobState::Running)) => {
                job.query_errors = 0;
                return PollStatus::Pending;
            }
            Ok(Some(JobState::Completed)) => {
                PollStatus::Succeeded(RunPayload::Directory(job.run_dir.clone()))
            }
            Ok(Some(JobState::Failed(state))) => PollStatus::Failed(RunFailure::JobFailed(state)),
            Ok(None) => PollStatus::Failed(RunFailure::LostJob(job.job_id.clone())),
            Err(err) => {
                job.query_errors += 1;
                let tolerated = match self.options.retry {
                    PollRetry::FailFast => false,
                    PollRetry::Retry { attempts } => job.query_errors <= attempts,
                };
                if tolerated {
                    warn!(
                        index = handle.index,
                        job_id = %job.job_id,
                        errors = job.query_errors,
                        %err,
                        "status query failed, retrying"
                    );
                    return PollStatus::Pending;
                }
                PollStatus::Failed(RunFailure::PollError(err.to_string()))
            }
        };
        self.jobs.remove(&handle.index);
        self.outcomes.insert(handle.index, status.clone());
        status
    }

    pub(crate) fn cancel(&mut self, handle: &RunHandle, cause: CancelCause) {
        if self.outcomes.contains_key(&handle.index) {
            return;
        }
        if let Some(job) = self.jobs.remove(&handle.index) {
            if let Err(err) = self.scheduler.cancel(&job.job_id) {
                warn!(index = handle.index, job_id = %job.job_id, %err, "job cancel failed");
            }
        }
        self.outcomes
            .insert(handle.index, PollStatus::Failed(cause.into()));
    }

    pub(crate) fn forget(&mut self, handle: &RunHandle) {
        self.outcomes.remove(&handle.index);
    }
}
