//! Run orchestration for uqrun studies.
//!
//! A study turns a point set into run slots, materializes one run directory
//! per point from a template, dispatches the runs through a [`Backend`],
//! collects their outputs and appends one row per point to the result store.

pub mod backend;
pub mod collector;
pub mod config;
pub mod hooks;
pub mod scheduler;
pub mod slot;
pub mod study;
pub mod template;

pub use backend::{
    parse_slurm_state, render_job_script, Backend, BackendKind, BatchScheduler, ClusterBackend,
    ClusterOptions, DirectBackend, JobState, LocalPoolBackend, PollRetry, PollStatus, RunHandle,
    SlurmScheduler,
};
pub use collector::{Collector, ExtractorConfig, JsonExtractor, OutputExtractor, TextExtractor};
pub use config::{BackendConfig, FilesConfig, StudyConfig, TemplateConfig};
pub use hooks::{mockup, mockup_model, rosenbrock, HookRegistry, ModelFn};
pub use scheduler::{Completion, DispatchOptions, DispatchStats, Dispatcher, StopToken, TerminalStatus};
pub use slot::{CancelCause, Failure, RunFailure, RunPayload, RunSlot, SlotState, Transition};
pub use study::{Study, StudyReport};
pub use template::{run_dir_for, TemplateMaterializer, TemplateOptions};
