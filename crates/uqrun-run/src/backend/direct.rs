use std::collections::HashMap;

use tracing::debug;
use uqrun_core::UqError;

use super::{PollStatus, RunHandle};
use crate::hooks::ModelFn;
use crate::slot::{CancelCause, RunFailure, RunPayload, RunSlot};

/// Calls an in-process model synchronously inside `submit`.
pub struct DirectBackend {
    model: ModelFn,
    outcomes: HashMap<usize, PollStatus>,
}

impl DirectBackend {
    pub fn new(model: ModelFn) -> Self {
        Self {
            model,
            outcomes: HashMap::new(),
        }
    }

    pub(crate) fn submit(&mut self, slot: &RunSlot) -> Result<RunHandle, UqError> {
        let index = slot.index();
        let status = match (self.model)(slot.point()) {
            Ok(outputs) => PollStatus::Succeeded(RunPayload::InProcess(outputs)),
            Err(message) => PollStatus::Failed(RunFailure::Model(message)),
        };
        debug!(index, terminal = ?status, "direct call finished");
        self.outcomes.insert(index, status);
        Ok(RunHandle {
            index,
            id: index.to_string(),
        })
    }

    pub(crate) fn poll(&mut self, handle: &RunHandle) -> PollStatus {
        self.outcomes
            .get(&handle.index)
            .cloned()
            .unwrap_or_else(|| PollStatus::Failed(RunFailure::LostJob(handle.id.clone())))
    }

    pub(crate) fn cancel(&mut self, handle: &RunHandle, cause: CancelCause) {
        self.outcomes
            .entry(handle.index)
            .or_insert_with(|| PollStatus::Failed(cause.into()));
    }

    pub(crate) fn forget(&mut self, handle: &RunHandle) {
        self.outcomes.remove(&handle.index);
    }
}
