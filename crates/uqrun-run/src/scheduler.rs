//! Bounded, cooperative dispatch loop.
//!
//! The dispatcher submits points in point-set order, keeps at most the
//! effective cap of slots in flight, polls the backend for terminal states and
//! yields each terminal slot as a [`Completion`]. It is single threaded; it
//! sleeps only when a whole round made no progress.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uqrun_core::{ParameterPoint, PointSet};
use uqrun_store::{FailureKind, Tally};

use crate::backend::{Backend, PollStatus, RunHandle};
use crate::slot::{CancelCause, Failure, RunSlot};
use crate::template::TemplateMaterializer;

/// Shared flag requesting a study-level stop.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub max_in_flight: usize,
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    /// Indices that already have a terminal row and are never dispatched.
    pub skip: BTreeSet<usize>,
    pub stop: Option<StopToken>,
    /// Required by backends that run inside a directory.
    pub materializer: Option<TemplateMaterializer>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            poll_interval: Duration::from_millis(100),
            timeout: None,
            skip: BTreeSet::new(),
            stop: None,
            materializer: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Succeeded,
    Failed(FailureKind),
}

/// A slot that reached a terminal state.
#[derive(Debug, Clone)]
pub struct Completion {
    pub index: usize,
    pub status: TerminalStatus,
    pub slot: RunSlot,
}

impl Completion {
    fn from_slot(slot: RunSlot) -> Self {
        let status = match slot.failure() {
            Some(failure) => TerminalStatus::Failed(failure.kind()),
            None => TerminalStatus::Succeeded,
        };
        Self {
            index: slot.index(),
            status,
            slot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    pub submitted: usize,
    pub peak_in_flight: usize,
    /// Points never submitted because the dispatch was stopped or timed out.
    pub unsubmitted: usize,
}

struct InFlight {
    slot: RunSlot,
    handle: RunHandle,
}

/// Iterator over terminal slots of one dispatch.
pub struct Dispatcher<'a> {
    backend: &'a mut Backend,
    pending: VecDeque<Arc<ParameterPoint>>,
    in_flight: Vec<InFlight>,
    ready: VecDeque<Completion>,
    cap: usize,
    poll_interval: Duration,
    deadline: Option<Instant>,
    stop: Option<StopToken>,
    materializer: Option<TemplateMaterializer>,
    tally: Tally,
    stats: DispatchStats,
    unsubmitted: Vec<usize>,
    halted: bool,
}

impl<'a> Dispatcher<'a> {
    pub fn new(points: &PointSet, backend: &'a mut Backend, options: DispatchOptions) -> Self {
        let cap = options
            .max_in_flight
            .min(backend.capacity().unwrap_or(usize::MAX))
            .max(1);
        let pending: VecDeque<_> = points
            .points()
            .iter()
            .filter(|point| !options.skip.contains(&point.index))
            .cloned()
            .map(Arc::new)
            .collect();
        info!(
            backend = %backend.kind(),
            points = points.len(),
            skipped = points.len() - pending.len(),
            cap,
            "dispatch started"
        );
        Self {
            backend,
            pending,
            in_flight: Vec::new(),
            ready: VecDeque::new(),
            cap,
            poll_interval: options.poll_interval,
            deadline: options.timeout.map(|limit| Instant::now() + limit),
            stop: options.stop,
            materializer: options.materializer,
            tally: Tally::default(),
            stats: DispatchStats::default(),
            unsubmitted: Vec::new(),
            halted: false,
        }
    }

    /// Effective in-flight cap.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Terminal outcomes yielded so far.
    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Indices left un-submitted by a stop or timeout.
    pub fn unsubmitted(&self) -> &[usize] {
        &self.unsubmitted
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn fill(&mut self) -> bool {
        let mut progressed = false;
        while self.in_flight.len() < self.cap {
            let Some(point) = self.pending.pop_front() else {
                break;
            };
            progressed = true;
            let mut slot = RunSlot::new(point);
            if self.backend.needs_run_dir() {
                if let Some(materializer) = &self.materializer {
                    let outcome = materializer
                        .materialize(slot.point())
                        .and_then(|dir| slot.set_run_dir(dir));
                    if let Err(err) = outcome {
                        self.settle_failed(slot, Failure::Materialize(err));
                        continue;
                    }
                }
            }
            match self.backend.submit(&slot) {
                Ok(handle) => {
                    if let Err(err) = slot.mark_submitted() {
                        warn!(index = slot.index(), %err, "slot transition rejected");
                    }
                    self.stats.submitted += 1;
                    self.in_flight.push(InFlight { slot, handle });
                    self.stats.peak_in_flight = self.stats.peak_in_flight.max(self.in_flight.len());
                }
                Err(err) => self.settle_failed(slot, Failure::Submit(err)),
            }
        }
        progressed
    }

    fn sweep(&mut self) -> bool {
        let mut finished = false;
        let mut position = 0;
        while position < self.in_flight.len() {
            let status = self.backend.poll(&self.in_flight[position].handle);
            if !status.is_terminal() {
                position += 1;
                continue;
            }
            let InFlight { mut slot, handle } = self.in_flight.remove(position);
            self.backend.forget(&handle);
            let outcome = match status {
                PollStatus::Succeeded(payload) => slot.succeed(payload),
                PollStatus::Failed(failure) => slot.fail(Failure::Run(failure)),
                PollStatus::Pending => Ok(()),
            };
            if let Err(err) = outcome {
                warn!(index = slot.index(), %err, "slot transition rejected");
            }
            debug!(index = slot.index(), state = %slot.state(), "run finished");
            self.ready.push_back(Completion::from_slot(slot));
            finished = true;
        }
        finished
    }

    fn settle_failed(&mut self, mut slot: RunSlot, failure: Failure) {
        warn!(index = slot.index(), kind = %failure.kind(), detail = %failure.detail(), "point failed before submission");
        if let Err(err) = slot.fail(failure) {
            warn!(index = slot.index(), %err, "slot transition rejected");
        }
        self.ready.push_back(Completion::from_slot(slot));
    }

    fn halt(&mut self, cause: CancelCause) {
        warn!(
            ?cause,
            in_flight = self.in_flight.len(),
            unsubmitted = self.pending.len(),
            "dispatch halted"
        );
        for InFlight { mut slot, handle } in self.in_flight.drain(..) {
            self.backend.cancel(&handle, cause);
            self.backend.forget(&handle);
            if let Err(err) = slot.cancel(cause) {
                warn!(index = slot.index(), %err, "slot transition rejected");
            }
            self.ready.push_back(Completion::from_slot(slot));
        }
        self.unsubmitted = self.pending.drain(..).map(|point| point.index).collect();
        self.stats.unsubmitted = self.unsubmitted.len();
        self.halted = true;
    }

    fn halt_cause(&self) -> Option<CancelCause> {
        if self.stop.as_ref().is_some_and(StopToken::is_stopped) {
            return Some(CancelCause::Stopped);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelCause::Timeout),
            _ => None,
        }
    }

    fn pause(&self) {
        let wait = match self.deadline {
            Some(deadline) => self
                .poll_interval
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.poll_interval,
        };
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }
}

/// Dropping a dispatcher before it is drained cancels the runs still in flight.
impl Drop for Dispatcher<'_> {
    fn drop(&mut self) {
        if !self.in_flight.is_empty() {
            self.halt(CancelCause::Stopped);
        }
    }
}

impl Iterator for Dispatcher<'_> {
    type Item = Completion;

    fn next(&mut self) -> Option<Completion> {
        loop {
            if let Some(completion) = self.ready.pop_front() {
                let failure = match completion.status {
                    TerminalStatus::Succeeded => None,
                    TerminalStatus::Failed(kind) => Some(kind),
                };
                self.tally.record(completion.index, failure);
                return Some(completion);
            }
            if self.halted || (self.pending.is_empty() && self.in_flight.is_empty()) {
                return None;
            }
            if let Some(cause) = self.halt_cause() {
                self.halt(cause);
                continue;
            }
            let submitted = self.fill();
            let finished = self.sweep();
            if !submitted && !finished {
                self.pause();
            }
        }
    }
}
