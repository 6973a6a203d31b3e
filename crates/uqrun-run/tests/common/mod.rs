#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use uqrun_core::{ErrorInfo, ParameterPoint, ParameterSpec, PointSet, Scalar, UqError};
use uqrun_run::{BatchScheduler, JobState};

/// Point set `[{x: 0}, {x: 1}, ...]` with an integer `x`.
pub fn int_points(count: i64) -> PointSet {
    PointSet::from_rows(
        vec![ParameterSpec::int("x")],
        (0..count).map(|x| vec![Scalar::Int(x)]).collect(),
    )
    .expect("point set")
}

pub fn point(index: usize, values: &[(&str, Scalar)]) -> ParameterPoint {
    let mut map = IndexMap::new();
    for (name, value) in values {
        map.insert(name.to_string(), value.clone());
    }
    ParameterPoint::new(index, map)
}

/// Template directory holding `x.txt` with the `{x}` placeholder.
pub fn x_template(root: &Path) -> PathBuf {
    let dir = root.join("template");
    fs::create_dir_all(&dir).expect("template dir");
    fs::write(dir.join("x.txt"), "{x}\n").expect("template file");
    dir
}

struct FakeJob {
    run_dir: PathBuf,
    polls_left: u32,
    outcome: Option<JobState>,
}

/// Observations shared between a test and the scheduler it handed away.
#[derive(Default)]
pub struct Ledger {
    jobs: HashMap<String, FakeJob>,
    next_id: u64,
    pub active: usize,
    pub peak_active: usize,
    pub submitted: Vec<PathBuf>,
    pub cancelled: Vec<String>,
    pub queries: usize,
}

/// In-memory batch scheduler. Jobs finish after `polls_to_finish` state
/// queries; finishing writes `{"y": x*x}` to the run directory's `stdout`,
/// with `x` read from `x.txt`.
pub struct FakeScheduler {
    pub ledger: Arc<Mutex<Ledger>>,
    pub polls_to_finish: u32,
    /// Run directory names whose submission is refused.
    pub refuse: Vec<String>,
    /// Run directory names whose job ends in `FAILED`.
    pub fail: Vec<String>,
    /// Number of initial state queries that error.
    pub query_errors: u32,
    pub forget_jobs: bool,
    pub reachable: bool,
}

impl FakeScheduler {
    pub fn new(ledger: Arc<Mutex<Ledger>>) -> Self {
        Self {
            ledger,
            polls_to_finish: 1,
            refuse: Vec::new(),
            fail: Vec::new(),
            query_errors: 0,
            forget_jobs: false,
            reachable: true,
        }
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn unreachable() -> UqError {
    UqError::Backend(ErrorInfo::new("fake.unreachable", "scheduler unreachable"))
}

impl BatchScheduler for FakeScheduler {
    fn submit(&mut self, script: &Path, run_dir: &Path) -> Result<String, UqError> {
        if !self.reachable || self.refuse.contains(&dir_name(run_dir)) {
            return Err(unreachable());
        }
        let mut ledger = self.ledger.lock().expect("ledger");
        ledger.next_id += 1;
        let id = format!("{}", 1000 + ledger.next_id);
        ledger.jobs.insert(
            id.clone(),
            FakeJob {
                run_dir: run_dir.to_path_buf(),
                polls_left: self.polls_to_finish,
                outcome: None,
            },
        );
        ledger.active += 1;
        ledger.peak_active = ledger.peak_active.max(ledger.active);
        ledger.submitted.push(script.to_path_buf());
        Ok(id)
    }

    fn state(&mut self, job_id: &str) -> Result<Option<JobState>, UqError> {
        if self.query_errors > 0 {
            self.query_errors -= 1;
            return Err(unreachable());
        }
        if self.forget_jobs {
            return Ok(None);
        }
        let mut ledger = self.ledger.lock().expect("ledger");
        ledger.queries += 1;
        let Some(job) = ledger.jobs.get_mut(job_id) else {
            return Ok(None);
        };
        if let Some(outcome) = &job.outcome {
            return Ok(Some(outcome.clone()));
        }
        if job.polls_left > 1 {
            job.polls_left -= 1;
            return Ok(Some(JobState::Running));
        }
        let outcome = if self.fail.contains(&dir_name(&job.run_dir)) {
            JobState::Failed("FAILED".to_string())
        } else {
            let x: i64 = fs::read_to_string(job.run_dir.join("x.txt"))
                .expect("x.txt")
                .trim()
                .parse()
                .expect("integer x");
            fs::write(job.run_dir.join("stdout"), format!("{{\"y\": {}}}\n", x * x))
                .expect("stdout");
            JobState::Completed
        };
        job.outcome = Some(outcome.clone());
        ledger.active -= 1;
        Ok(Some(outcome))
    }

    fn cancel(&mut self, job_id: &str) -> Result<(), UqError> {
        let mut ledger = self.ledger.lock().expect("ledger");
        if let Some(job) = ledger.jobs.get_mut(job_id) {
            if job.outcome.is_none() {
                job.outcome = Some(JobState::Failed("CANCELLED".to_string()));
                ledger.active -= 1;
            }
        }
        ledger.cancelled.push(job_id.to_string());
        Ok(())
    }

    fn ping(&mut self) -> Result<(), UqError> {
        if self.reachable {
            Ok(())
        } else {
            Err(unreachable())
        }
    }
}
