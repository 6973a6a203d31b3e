//! Execution backends.
//!
//! [`Backend`] is a closed set of variants sharing one non-blocking contract:
//! `submit` starts a run, `poll` reports its state without waiting, `cancel`
//! terminates it. Terminal outcomes are memoised per handle, so polling a
//! finished run keeps returning the same answer until it is forgotten.

mod cluster;
mod direct;
mod local;
mod slurm;

use std::fmt;

use serde::{Deserialize, Serialize};
use uqrun_core::{ErrorInfo, UqError};

use crate::slot::{CancelCause, RunFailure, RunPayload, RunSlot};

pub use cluster::{render_job_script, BatchScheduler, ClusterBackend, ClusterOptions, JobState, PollRetry};
pub use direct::DirectBackend;
pub use local::LocalPoolBackend;
pub use slurm::{parse_slurm_state, SlurmScheduler};

/// Identifies a submitted run within the backend that accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunHandle {
    pub index: usize,
    /// Backend specific identifier: process id, batch job id, or the point index.
    pub id: String,
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending,
    Succeeded(RunPayload),
    Failed(RunFailure),
}

impl PollStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Direct,
    Local,
    Cluster,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BackendKind::Direct => "direct",
            BackendKind::Local => "local",
            BackendKind::Cluster => "cluster",
        };
        f.write_str(label)
    }
}

pub enum Backend {
    Direct(DirectBackend),
    LocalPool(LocalPoolBackend),
    Cluster(ClusterBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Direct(_) => BackendKind::Direct,
            Backend::LocalPool(_) => BackendKind::Local,
            Backend::Cluster(_) => BackendKind::Cluster,
        }
    }

    /// Whether runs need a materialized run directory.
    pub fn needs_run_dir(&self) -> bool {
        !matches!(self, Backend::Direct(_))
    }

    /// Concurrency ceiling imposed by the backend itself.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            Backend::Direct(_) => None,
            Backend::LocalPool(pool) => Some(pool.max_processes()),
            Backend::Cluster(_) => None,
        }
    }

    /// Study-level reachability check, run once before dispatch.
    pub fn preflight(&mut self) -> Result<(), UqError> {
        match self {
            Backend::Direct(_) => Ok(()),
            Backend::LocalPool(pool) => pool.preflight(),
            Backend::Cluster(cluster) => cluster.preflight(),
        }
    }

    pub fn submit(&mut self, slot: &RunSlot) -> Result<RunHandle, UqError> {
        match self {
            Backend::Direct(direct) => direct.submit(slot),
            Backend::LocalPool(pool) => pool.submit(slot),
            Backend::Cluster(cluster) => cluster.submit(slot),
        }
    }

    pub fn poll(&mut self, handle: &RunHandle) -> PollStatus {
        match self {
            Backend::Direct(direct) => direct.poll(handle),
            Backend::LocalPool(pool) => pool.poll(handle),
            Backend::Cluster(cluster) => cluster.poll(handle),
        }
    }

    /// Best-effort termination. A no-op on runs that already finished.
    pub fn cancel(&mut self, handle: &RunHandle, cause: CancelCause) {
        match self {
            Backend::Direct(direct) => direct.cancel(handle, cause),
            Backend::LocalPool(pool) => pool.cancel(handle, cause),
            Backend::Cluster(cluster) => cluster.cancel(handle, cause),
        }
    }

    /// Drops the memoised terminal outcome of a run the caller is done with.
    ///
    /// Outcomes are kept until forgotten, so a caller that never forgets holds
    /// every payload of the study. Polling a forgotten handle reports a lost
    /// run. Pending runs are unaffected.
    pub fn forget(&mut self, handle: &RunHandle) {
        match self {
            Backend::Direct(direct) => direct.forget(handle),
            Backend::LocalPool(pool) => pool.forget(handle),
            Backend::Cluster(cluster) => cluster.forget(handle),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Backend").field(&self.kind()).finish()
    }
}

pub(crate) fn no_run_dir(index: usize) -> UqError {
    UqError::Backend(
        ErrorInfo::new("backend.no_run_dir", "run has no materialized directory")
            .with_context("index", index.to_string())
            .with_hint("configure a template for process based backends"),
    )
}
