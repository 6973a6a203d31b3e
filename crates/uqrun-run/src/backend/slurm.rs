use std::path::Path;
use std::process::{Command, Output};

use uqrun_core::{ErrorInfo, UqError};

use super::cluster::{BatchScheduler, JobState};

/// [`BatchScheduler`] backed by the Slurm command line tools.
#[derive(Debug, Clone, Default)]
pub struct SlurmScheduler {
    /// Extra arguments passed to every `sbatch` call.
    pub sbatch_args: Vec<String>,
}

impl SlurmScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchScheduler for SlurmScheduler {
    fn submit(&mut self, script: &Path, run_dir: &Path) -> Result<String, UqError> {
        let output = run_tool(
            Command::new("sbatch")
                .arg("--parsable")
                .args(&self.sbatch_args)
                .arg(script)
                .current_dir(run_dir),
            "sbatch",
        )?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        // `--parsable` prints `jobid` or `jobid;cluster`.
        let job_id = stdout.trim().split(';').next().unwrap_or("").trim().to_string();
        if job_id.is_empty() {
            return Err(UqError::Backend(
                ErrorInfo::new("backend.sbatch", "sbatch returned no job id")
                    .with_context("script", script.display().to_string()),
            ));
        }
        Ok(job_id)
    }

    fn state(&mut self, job_id: &str) -> Result<Option<JobState>, UqError> {
        let queued = Command::new("squeue")
            .args(["-h", "-j", job_id, "-o", "%T"])
            .output()
            .map_err(|err| query_error("squeue", err))?;
        if queued.status.success() {
            if let Some(state) = first_line(&queued.stdout) {
                return Ok(Some(parse_slurm_state(&state)));
            }
        }
        // Finished jobs drop out of squeue; the accounting database keeps them.
        let accounted = Command::new("sacct")
            .args(["-n", "-X", "-P", "-j", job_id, "-o", "State"])
            .output()
            .map_err(|err| query_error("sacct", err))?;
        if !accounted.status.success() {
            return Err(UqError::Backend(
                ErrorInfo::new("backend.scheduler_query", "sacct failed")
                    .with_context("job_id", job_id)
                    .with_context("stderr", String::from_utf8_lossy(&accounted.stderr).trim()),
            ));
        }
        Ok(first_line(&accounted.stdout).map(|state| parse_slurm_state(&state)))
    }

    fn cancel(&mut self, job_id: &str) -> Result<(), UqError> {
        run_tool(Command::new("scancel").arg(job_id), "scancel")?;
        Ok(())
    }

    fn ping(&mut self) -> Result<(), UqError> {
        run_tool(Command::new("sinfo").args(["-h", "-o", "%P"]), "sinfo")?;
        Ok(())
    }
}

/// Maps a Slurm state label (`squeue %T` or `sacct State`) to a [`JobState`].
pub fn parse_slurm_state(label: &str) -> JobState {
    let state = label
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches('+')
        .to_ascii_uppercase();
    match state.as_str() {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "RESIZING" | "SUSPENDED" => {
            JobState::Queued
        }
        "RUNNING" | "COMPLETING" | "STAGE_OUT" => JobState::Running,
        "COMPLETED" => JobState::Completed,
        _ => JobState::Failed(state),
    }
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn run_tool(cmd: &mut Command, tool: &str) -> Result<Output, UqError> {
    let output = cmd.output().map_err(|err| query_error(tool, err))?;
    if !output.status.success() {
        return Err(UqError::Backend(
            ErrorInfo::new(format!("backend.{tool}"), format!("{tool} exited unsuccessfully"))
                .with_context("status", output.status.to_string())
                .with_context("stderr", String::from_utf8_lossy(&output.stderr).trim()),
        ));
    }
    Ok(output)
}

fn query_error(tool: &str, err: std::io::Error) -> UqError {
    UqError::Backend(
        ErrorInfo::new("backend.scheduler_query", err.to_string()).with_context("tool", tool),
    )
}
