mod common;

use std::sync::Arc;

use uqrun_core::{OutputMap, Scalar, UqError};
use uqrun_run::{CancelCause, Failure, RunFailure, RunPayload, RunSlot, SlotState};
use uqrun_store::FailureKind;

use common::point;

fn slot() -> RunSlot {
    RunSlot::new(Arc::new(point(3, &[("x", Scalar::Int(1))])))
}

fn states(slot: &RunSlot) -> Vec<SlotState> {
    slot.history().iter().map(|t| t.state).collect()
}

#[test]
fn successful_lifecycle_is_timestamped() {
    let mut slot = slot();
    assert_eq!(slot.state(), SlotState::Created);
    slot.mark_submitted().expect("submit");
    slot.succeed(RunPayload::InProcess(OutputMap::new())).expect("succeed");
    assert_eq!(
        states(&slot),
        vec![SlotState::Created, SlotState::Submitted, SlotState::Succeeded]
    );
    let times: Vec<_> = slot.history().iter().map(|t| t.at).collect();
    assert!(times.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(slot.payload().is_some());
    assert!(slot.failure().is_none());
}

#[test]
fn terminal_states_are_final() {
    let mut slot = slot();
    slot.mark_submitted().expect("submit");
    slot.fail(Failure::Run(RunFailure::NonZeroExit(2))).expect("fail");
    for err in [
        slot.mark_submitted().expect_err("resubmit"),
        slot.succeed(RunPayload::InProcess(OutputMap::new()))
            .expect_err("succeed after fail"),
        slot.cancel(CancelCause::Stopped).expect_err("cancel after fail"),
    ] {
        assert!(matches!(err, UqError::Run(ref info) if info.code == "slot.invalid_transition"));
    }
    assert_eq!(slot.state(), SlotState::Failed);
    assert_eq!(slot.failure().map(Failure::kind), Some(FailureKind::Run));
}

#[test]
fn created_slot_can_fail_but_not_succeed() {
    let mut slot = slot();
    slot.succeed(RunPayload::InProcess(OutputMap::new()))
        .expect_err("created cannot succeed");
    slot.cancel(CancelCause::Timeout).expect_err("created cannot be cancelled");
    let setup = UqError::Backend(uqrun_core::ErrorInfo::new("backend.spawn", "no such file"));
    slot.fail(Failure::Submit(setup)).expect("fail");
    assert_eq!(states(&slot), vec![SlotState::Created, SlotState::Failed]);
    assert_eq!(slot.failure().map(Failure::kind), Some(FailureKind::Backend));
}

#[test]
fn cancel_records_cause() {
    let mut slot = slot();
    slot.mark_submitted().expect("submit");
    slot.cancel(CancelCause::Timeout).expect("cancel");
    assert_eq!(slot.failure(), Some(&Failure::Run(RunFailure::Timeout)));
    assert_eq!(slot.failure().map(Failure::detail).as_deref(), Some("timeout"));
}

#[test]
fn run_dir_is_fixed_once_submitted() {
    let mut slot = slot();
    slot.set_run_dir("run/run_003".into()).expect("set");
    slot.mark_submitted().expect("submit");
    slot.set_run_dir("elsewhere".into()).expect_err("locked");
    assert_eq!(slot.run_dir(), Some(std::path::Path::new("run/run_003")));
}

#[test]
fn setup_failure_kind_follows_the_stage() {
    let config = UqError::Config(uqrun_core::ErrorInfo::new(
        "template.delimiters",
        "placeholder delimiters must be non-empty",
    ));
    let mut materialize = slot();
    materialize
        .fail(Failure::Materialize(config.clone()))
        .expect("fail");
    assert_eq!(materialize.failure().map(Failure::kind), Some(FailureKind::Template));

    let mut submit = slot();
    submit.fail(Failure::Submit(config)).expect("fail");
    assert_eq!(submit.failure().map(Failure::kind), Some(FailureKind::Backend));
}
