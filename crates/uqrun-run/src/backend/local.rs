use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::{debug, warn};
use uqrun_core::{ErrorInfo, UqError};

use super::{no_run_dir, PollStatus, RunHandle};
use crate::slot::{CancelCause, RunFailure, RunPayload, RunSlot};

struct LiveRun {
    child: Child,
    run_dir: PathBuf,
}

/// Runs the model as a child process inside each run directory.
///
/// At most `max_processes` children are alive at once; the scheduler reads
/// the ceiling through `capacity` and never submits past it.
pub struct LocalPoolBackend {
    command: Vec<String>,
    max_processes: usize,
    live: HashMap<usize, LiveRun>,
    outcomes: HashMap<usize, PollStatus>,
}

impl LocalPoolBackend {
    pub fn new(command: Vec<String>, max_processes: usize) -> Self {
        Self {
            command,
            max_processes: max_processes.max(1),
            live: HashMap::new(),
            outcomes: HashMap::new(),
        }
    }

    pub fn max_processes(&self) -> usize {
        self.max_processes
    }

    pub fn live_processes(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn preflight(&self) -> Result<(), UqError> {
        if self.command.is_empty() {
            return Err(UqError::Config(ErrorInfo::new(
                "backend.empty_command",
                "local backend requires a command",
            )));
        }
        Ok(())
    }

    pub(crate) fn submit(&mut self, slot: &RunSlot) -> Result<RunHandle, UqError> {
        let index = slot.index();
        if self.live.len() >= self.max_processes {
            return Err(UqError::Backend(
                ErrorInfo::new("backend.pool_saturated", "process pool is full")
                    .with_context("index", index.to_string())
                    .with_context("max_processes", self.max_processes.to_string()),
            ));
        }
        let run_dir = slot.run_dir().ok_or_else(|| no_run_dir(index))?.to_path_buf();
        let Some((program, args)) = self.command.split_first() else {
            return Err(UqError::Backend(
                ErrorInfo::new("backend.empty_command", "local backend requires a command")
                    .with_context("index", index.to_string()),
            ));
        };
        let stdout = File::create(run_dir.join("stdout"))
            .map_err(|err| spawn_error(index, "backend.log_file", err))?;
        let stderr = File::create(run_dir.join("stderr"))
            .map_err(|err| spawn_error(index, "backend.log_file", err))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.current_dir(&run_dir);
        cmd.env("UQRUN_RUN_ID", index.to_string());
        cmd.env("UQRUN_RUN_DIR", &run_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(stdout));
        cmd.stderr(Stdio::from(stderr));
        let child = cmd.spawn().map_err(|err| {
            UqError::Backend(
                ErrorInfo::new("backend.spawn", err.to_string())
                    .with_context("index", index.to_string())
                    .with_context("program", program.clone()),
            )
        })?;
        let pid = child.id();
        debug!(index, pid, "process spawned");
        self.live.insert(index, LiveRun { child, run_dir });
        Ok(RunHandle {
            index,
            id: pid.to_string(),
        })
    }

    pub(crate) fn poll(&mut self, handle: &RunHandle) -> PollStatus {
        if let Some(done) = self.outcomes.get(&handle.index) {
            return done.clone();
        }
        let Some(run) = self.live.get_mut(&handle.index) else {
            return PollStatus::Failed(RunFailure::LostJob(handle.id.clone()));
        };
        let status = match run.child.try_wait() {
            Ok(None) => return PollStatus::Pending,
            Ok(Some(exit)) => exit_status(exit, run.run_dir.clone()),
            Err(err) => {
                let _ = run.child.kill();
                let _ = run.child.wait();
                PollStatus::Failed(RunFailure::PollError(err.to_string()))
            }
        };
        self.live.remove(&handle.index);
        self.outcomes.insert(handle.index, status.clone());
        status
    }

    pub(crate) fn cancel(&mut self, handle: &RunHandle, cause: CancelCause) {
        if self.outcomes.contains_key(&handle.index) {
            return;
        }
        if let Some(mut run) = self.live.remove(&handle.index) {
            if let Err(err) = run.child.kill() {
                warn!(index = handle.index, %err, "kill failed");
            }
            let _ = run.child.wait();
        }
        self.outcomes
            .insert(handle.index, PollStatus::Failed(cause.into()));
    }

    pub(crate) fn forget(&mut self, handle: &RunHandle) {
        self.outcomes.remove(&handle.index);
    }
}

fn exit_status(exit: ExitStatus, run_dir: PathBuf) -> PollStatus {
    match exit.code() {
        Some(0) => PollStatus::Succeeded(RunPayload::Directory(run_dir)),
        Some(code) => PollStatus::Failed(RunFailure::NonZeroExit(code)),
        None => PollStatus::Failed(RunFailure::Signal(signal_of(exit))),
    }
}

#[cfg(unix)]
fn signal_of(exit: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    exit.signal().unwrap_or(-1)
}

#[cfg(not(unix))]
fn signal_of(_exit: ExitStatus) -> i32 {
    -1
}

fn spawn_error(index: usize, code: &str, err: std::io::Error) -> UqError {
    UqError::Backend(
        ErrorInfo::new(code, err.to_string()).with_context("index", index.to_string()),
    )
}
