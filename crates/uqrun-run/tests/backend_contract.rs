mod common;

use std::fs;
use std::sync::{Arc, Mutex};

use tempfile::tempdir;
use uqrun_core::{OutputMap, OutputValue, Scalar};
use uqrun_run::{
    parse_slurm_state, render_job_script, Backend, CancelCause, ClusterBackend, ClusterOptions,
    DirectBackend, JobState, PollRetry, PollStatus, RunFailure, RunPayload, RunSlot,
};

use common::{point, FakeScheduler, Ledger};

fn square_backend() -> Backend {
    Backend::Direct(DirectBackend::new(Arc::new(
        |point: &uqrun_core::ParameterPoint| -> Result<OutputMap, String> {
            let x = point.get("x").and_then(Scalar::as_f64).ok_or("x missing")?;
            if x < 0.0 {
                return Err("negative input".to_string());
            }
            let mut out = OutputMap::new();
            out.insert("y".to_string(), OutputValue::Scalar(x * x));
            Ok(out)
        },
    )))
}

fn slot_at(index: usize, x: i64) -> RunSlot {
    RunSlot::new(Arc::new(point(index, &[("x", Scalar::Int(x))])))
}

fn poll_until_terminal(backend: &mut Backend, handle: &uqrun_run::RunHandle) -> PollStatus {
    for _ in 0..2000 {
        let status = backend.poll(handle);
        if status.is_terminal() {
            return status;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    panic!("run did not finish");
}

#[test]
fn direct_poll_is_terminal_and_stable() {
    let mut backend = square_backend();
    let handle = backend.submit(&slot_at(0, 3)).expect("submit");
    let first = backend.poll(&handle);
    match &first {
        PollStatus::Succeeded(RunPayload::InProcess(out)) => {
            assert_eq!(out.get("y"), Some(&OutputValue::Scalar(9.0)));
        }
        other => panic!("unexpected status {other:?}"),
    }
    for _ in 0..5 {
        assert_eq!(backend.poll(&handle), first);
    }
    backend.cancel(&handle, CancelCause::Stopped);
    assert_eq!(backend.poll(&handle), first);
}

#[test]
fn direct_model_errors_are_run_failures() {
    let mut backend = square_backend();
    let handle = backend.submit(&slot_at(1, -2)).expect("submit");
    assert_eq!(
        backend.poll(&handle),
        PollStatus::Failed(RunFailure::Model("negative input".to_string()))
    );
}

fn cluster(scheduler: FakeScheduler, retry: PollRetry) -> Backend {
    let mut options = ClusterOptions::new("./model");
    options.retry = retry;
    Backend::Cluster(ClusterBackend::new(options, Box::new(scheduler)))
}

fn cluster_slot(root: &std::path::Path, index: usize, x: i64) -> RunSlot {
    let dir = root.join(format!("run_{index:03}"));
    fs::create_dir_all(&dir).expect("run dir");
    fs::write(dir.join("x.txt"), format!("{x}\n")).expect("x.txt");
    let mut slot = slot_at(index, x);
    slot.set_run_dir(dir).expect("run dir");
    slot
}

#[test]
fn cluster_completion_is_stable_and_writes_job_script() {
    let dir = tempdir().expect("tempdir");
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    let mut scheduler = FakeScheduler::new(ledger.clone());
    scheduler.polls_to_finish = 3;
    let mut backend = cluster(scheduler, PollRetry::default());

    let slot = cluster_slot(dir.path(), 0, 4);
    let handle = backend.submit(&slot).expect("submit");
    assert_eq!(handle.id, "1001");
    let script = fs::read_to_string(dir.path().join("run_000").join("job.sh")).expect("job.sh");
    assert!(script.starts_with("#!/bin/bash\n"));
    assert!(script.contains("#SBATCH --job-name=uqrun-000\n"));

    assert_eq!(backend.poll(&handle), PollStatus::Pending);
    assert_eq!(backend.poll(&handle), PollStatus::Pending);
    let done = backend.poll(&handle);
    assert_eq!(
        done,
        PollStatus::Succeeded(RunPayload::Directory(dir.path().join("run_000")))
    );
    let queries = ledger.lock().expect("ledger").queries;
    for _ in 0..4 {
        assert_eq!(backend.poll(&handle), done);
    }
    assert_eq!(ledger.lock().expect("ledger").queries, queries);
    backend.cancel(&handle, CancelCause::Timeout);
    assert_eq!(backend.poll(&handle), done);
    assert!(ledger.lock().expect("ledger").cancelled.is_empty());
}

#[test]
fn unknown_job_is_lost() {
    let dir = tempdir().expect("tempdir");
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    let mut scheduler = FakeScheduler::new(ledger);
    scheduler.forget_jobs = true;
    let mut backend = cluster(scheduler, PollRetry::default());
    let handle = backend.submit(&cluster_slot(dir.path(), 2, 1)).expect("submit");
    let status = backend.poll(&handle);
    assert_eq!(status, PollStatus::Failed(RunFailure::LostJob(handle.id.clone())));
    assert_eq!(backend.poll(&handle), status);
}

#[test]
fn retry_policy_tolerates_transient_query_errors() {
    let dir = tempdir().expect("tempdir");
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    let mut scheduler = FakeScheduler::new(ledger);
    scheduler.query_errors = 2;
    let mut backend = cluster(scheduler, PollRetry::Retry { attempts: 2 });
    let handle = backend.submit(&cluster_slot(dir.path(), 0, 2)).expect("submit");
    assert_eq!(backend.poll(&handle), PollStatus::Pending);
    assert_eq!(backend.poll(&handle), PollStatus::Pending);
    assert!(matches!(backend.poll(&handle), PollStatus::Succeeded(_)));
}

#[test]
fn retry_policy_gives_up_after_attempts() {
    let dir = tempdir().expect("tempdir");
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    let mut scheduler = FakeScheduler::new(ledger);
    scheduler.query_errors = 3;
    let mut backend = cluster(scheduler, PollRetry::Retry { attempts: 2 });
    let handle = backend.submit(&cluster_slot(dir.path(), 0, 2)).expect("submit");
    assert_eq!(backend.poll(&handle), PollStatus::Pending);
    assert_eq!(backend.poll(&handle), PollStatus::Pending);
    let status = backend.poll(&handle);
    assert!(matches!(status, PollStatus::Failed(RunFailure::PollError(_))));
    assert_eq!(backend.poll(&handle), status);
}

#[test]
fn fail_fast_policy_fails_on_first_query_error() {
    let dir = tempdir().expect("tempdir");
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    let mut scheduler = FakeScheduler::new(ledger);
    scheduler.query_errors = 1;
    let mut backend = cluster(scheduler, PollRetry::FailFast);
    let handle = backend.submit(&cluster_slot(dir.path(), 0, 2)).expect("submit");
    assert!(matches!(
        backend.poll(&handle),
        PollStatus::Failed(RunFailure::PollError(_))
    ));
}

#[test]
fn cluster_cancel_of_pending_job_records_cause() {
    let dir = tempdir().expect("tempdir");
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    let mut scheduler = FakeScheduler::new(ledger.clone());
    scheduler.polls_to_finish = 100;
    let mut backend = cluster(scheduler, PollRetry::default());
    let handle = backend.submit(&cluster_slot(dir.path(), 0, 2)).expect("submit");
    assert_eq!(backend.poll(&handle), PollStatus::Pending);
    backend.cancel(&handle, CancelCause::Stopped);
    assert_eq!(backend.poll(&handle), PollStatus::Failed(RunFailure::Cancelled));
    assert_eq!(ledger.lock().expect("ledger").cancelled, vec![handle.id.clone()]);
}

#[test]
fn cluster_preflight_detects_unreachable_scheduler() {
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    let mut scheduler = FakeScheduler::new(ledger);
    scheduler.reachable = false;
    let mut backend = cluster(scheduler, PollRetry::default());
    let err = backend.preflight().expect_err("unreachable");
    assert_eq!(err.info().code, "backend.scheduler_unreachable");
}

#[test]
fn process_backends_need_a_run_dir() {
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    let mut backend = cluster(FakeScheduler::new(ledger), PollRetry::default());
    let err = backend.submit(&slot_at(0, 1)).expect_err("no run dir");
    assert_eq!(err.info().code, "backend.no_run_dir");
}

#[test]
fn job_script_carries_directives() {
    let mut options = ClusterOptions::new("./model --fast");
    options.job_name = "study".to_string();
    options.queue = Some("short".to_string());
    options.cpus = Some(4);
    options.options.insert("time".to_string(), "00:10:00".to_string());
    options.prefix = Some("srun".to_string());
    options.openmp = true;
    let script = render_job_script(&options, 12, std::path::Path::new("/scratch/run/run_012"));
    for line in [
        "#SBATCH --job-name=study-012",
        "#SBATCH --chdir=/scratch/run/run_012",
        "#SBATCH --output=/scratch/run/run_012/stdout",
        "#SBATCH --error=/scratch/run/run_012/stderr",
        "#SBATCH --partition=short",
        "#SBATCH --cpus-per-task=4",
        "#SBATCH --time=00:10:00",
        "export UQRUN_RUN_ID=12",
        "export OMP_NUM_THREADS=${SLURM_CPUS_PER_TASK:-1}",
        "srun ./model --fast",
    ] {
        assert!(script.lines().any(|l| l == line), "missing `{line}` in\n{script}");
    }
}

#[test]
fn slurm_states_map_to_job_states() {
    assert_eq!(parse_slurm_state("PENDING"), JobState::Queued);
    assert_eq!(parse_slurm_state("RUNNING"), JobState::Running);
    assert_eq!(parse_slurm_state("COMPLETED"), JobState::Completed);
    assert_eq!(
        parse_slurm_state("CANCELLED by 1234"),
        JobState::Failed("CANCELLED".to_string())
    );
    assert_eq!(parse_slurm_state("TIMEOUT"), JobState::Failed("TIMEOUT".to_string()));
    assert_eq!(parse_slurm_state("FAILED+"), JobState::Failed("FAILED".to_string()));
}

#[cfg(unix)]
mod local_pool {
    use super::*;
    use uqrun_run::LocalPoolBackend;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn local_slot(root: &std::path::Path, index: usize) -> RunSlot {
        let dir = root.join(format!("run_{index:03}"));
        fs::create_dir_all(&dir).expect("run dir");
        let mut slot = slot_at(index, index as i64);
        slot.set_run_dir(dir).expect("run dir");
        slot
    }

    #[test]
    fn exit_codes_map_to_terminal_states() {
        let dir = tempdir().expect("tempdir");
        let mut backend = Backend::LocalPool(LocalPoolBackend::new(
            sh("echo \"run $UQRUN_RUN_ID\"; exit $UQRUN_RUN_ID"),
            2,
        ));
        let ok = backend.submit(&local_slot(dir.path(), 0)).expect("submit 0");
        let bad = backend.submit(&local_slot(dir.path(), 3)).expect("submit 3");

        let ok_status = poll_until_terminal(&mut backend, &ok);
        assert_eq!(
            ok_status,
            PollStatus::Succeeded(RunPayload::Directory(dir.path().join("run_000")))
        );
        let bad_status = poll_until_terminal(&mut backend, &bad);
        assert_eq!(bad_status, PollStatus::Failed(RunFailure::NonZeroExit(3)));
        for _ in 0..3 {
            assert_eq!(backend.poll(&ok), ok_status);
            assert_eq!(backend.poll(&bad), bad_status);
        }
        let stdout = fs::read_to_string(dir.path().join("run_000").join("stdout")).expect("stdout");
        assert_eq!(stdout, "run 0\n");
    }

    #[test]
    fn pool_refuses_submissions_past_its_ceiling() {
        let dir = tempdir().expect("tempdir");
        let mut backend = Backend::LocalPool(LocalPoolBackend::new(sh("sleep 5"), 1));
        assert_eq!(backend.capacity(), Some(1));
        let first = backend.submit(&local_slot(dir.path(), 0)).expect("submit");
        let err = backend
            .submit(&local_slot(dir.path(), 1))
            .expect_err("saturated");
        assert_eq!(err.info().code, "backend.pool_saturated");
        backend.cancel(&first, CancelCause::Timeout);
        assert_eq!(backend.poll(&first), PollStatus::Failed(RunFailure::Timeout));
        let second = backend.submit(&local_slot(dir.path(), 1)).expect("slot freed");
        backend.cancel(&second, CancelCause::Stopped);
        assert_eq!(backend.poll(&second), PollStatus::Failed(RunFailure::Cancelled));
    }

    #[test]
    fn killed_process_reports_signal() {
        let dir = tempdir().expect("tempdir");
        let mut backend = Backend::LocalPool(LocalPoolBackend::new(sh("kill -9 $$"), 1));
        let handle = backend.submit(&local_slot(dir.path(), 0)).expect("submit");
        assert_eq!(
            poll_until_terminal(&mut backend, &handle),
            PollStatus::Failed(RunFailure::Signal(9))
        );
    }

    #[test]
    fn spawn_failure_is_a_backend_error() {
        let dir = tempdir().expect("tempdir");
        let mut backend = Backend::LocalPool(LocalPoolBackend::new(
            vec!["/nonexistent/uqrun-model".to_string()],
            1,
        ));
        let err = backend
            .submit(&local_slot(dir.path(), 0))
            .expect_err("spawn");
        assert_eq!(err.info().code, "backend.spawn");
    }
}
