use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use uqrun_core::{
    stable_hash_string, to_canonical_json_bytes, ErrorInfo, ParameterSpec, PointSet, UqError,
};
use uqrun_design::{generate, read_input, write_input};
use uqrun_store::{load_table, ResultStore, Tally};

use crate::backend::{Backend, ClusterBackend, DirectBackend, LocalPoolBackend, SlurmScheduler};
use crate::collector::Collector;
use crate::config::{BackendConfig, StudyConfig};
use crate::hooks::HookRegistry;
use crate::scheduler::{DispatchOptions, DispatchStats, Dispatcher, StopToken};
use crate::slot::{RunPayload, RunSlot};
use crate::template::{run_dir_for, TemplateMaterializer};

/// Outcome of a `run`, `collect` or `status` pass over a study.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyReport {
    pub study_hash: String,
    pub points: usize,
    /// Points skipped because the result store already had a row for them.
    pub resumed: usize,
    /// Tally over every row in the result store.
    pub tally: Tally,
    pub dispatch: DispatchStats,
    pub unsubmitted: Vec<usize>,
    /// Points without a row (and, for `collect`, without a run directory).
    pub missing: Vec<usize>,
    pub output: PathBuf,
}

impl StudyReport {
    /// True when every point has a succeeded row.
    pub fn is_complete(&self) -> bool {
        self.tally.failed == 0 && self.unsubmitted.is_empty() && self.missing.is_empty()
    }
}

#[derive(Serialize)]
struct StudyManifest<'a> {
    study_hash: &'a str,
    config: &'a StudyConfig,
}

/// Drives one study: design, dispatch, collection and persistence.
#[derive(Debug, Clone)]
pub struct Study {
    config: StudyConfig,
    hooks: HookRegistry,
}

impl Study {
    pub fn new(config: StudyConfig, hooks: HookRegistry) -> Result<Self, UqError> {
        config.validate()?;
        Ok(Self { config, hooks })
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    pub fn study_hash(&self) -> Result<String, UqError> {
        stable_hash_string(&self.config)
    }

    /// Generates the design and writes it to the input file.
    pub fn generate(&self) -> Result<PointSet, UqError> {
        let points = generate(&self.config.design_plan())?;
        let path = self.config.input_path();
        ensure_parent(&path)?;
        write_input(&points, &path)?;
        info!(points = points.len(), path = %path.display(), "design written");
        Ok(points)
    }

    /// Design from the input file when present, generated otherwise.
    pub fn design(&self) -> Result<PointSet, UqError> {
        let path = self.config.input_path();
        if path.exists() {
            let points = read_input(&path, &self.config.parameter_schema()?)?;
            debug!(points = points.len(), path = %path.display(), "design loaded");
            return Ok(points);
        }
        self.generate()
    }

    /// Backend described by the configuration, with Slurm as the batch scheduler.
    pub fn backend(&self) -> Result<Backend, UqError> {
        Ok(match &self.config.backend {
            BackendConfig::Direct { model } => {
                Backend::Direct(DirectBackend::new(self.hooks.model(model)?))
            }
            BackendConfig::Local {
                command,
                max_processes,
            } => Backend::LocalPool(LocalPoolBackend::new(command.clone(), *max_processes)),
            BackendConfig::Cluster(options) => Backend::Cluster(ClusterBackend::new(
                options.clone(),
                Box::new(SlurmScheduler::new()),
            )),
        })
    }

    pub fn materializer(&self, schema: &[ParameterSpec]) -> Result<TemplateMaterializer, UqError> {
        let template = self.config.template.as_ref().ok_or_else(|| {
            UqError::Config(ErrorInfo::new(
                "config.template_required",
                "process backends need a template",
            ))
        })?;
        // Dispatched points never have a row, so their existing directories are stale.
        Ok(TemplateMaterializer::new(
            self.config.resolve(&template.path),
            self.config.run_root(),
            schema.to_vec(),
            template.options.clone(),
        )?
        .set_aside_stale(true))
    }

    pub fn collector(&self) -> Result<Collector, UqError> {
        let extractor = self.config.extractor.build(&self.hooks)?;
        Ok(Collector::new(self.config.output_schema(), Some(extractor)))
    }

    pub fn run(&self, stop: Option<StopToken>) -> Result<StudyReport, UqError> {
        let backend = self.backend()?;
        self.run_with_backend(backend, stop)
    }

    /// Runs the study on `backend`, resuming from the existing result store.
    pub fn run_with_backend(
        &self,
        mut backend: Backend,
        stop: Option<StopToken>,
    ) -> Result<StudyReport, UqError> {
        let started = Instant::now();
        let study_hash = self.study_hash()?;
        info!(study = %study_hash, backend = %backend.kind(), "study starting");
        backend.preflight()?;

        let schema = self.config.parameter_schema()?;
        let materializer = if backend.needs_run_dir() {
            Some(self.materializer(&schema)?)
        } else {
            None
        };
        let points = self.design()?;
        let collector = self.collector()?;
        let output = self.config.output_path();
        let mut store = ResultStore::open(&output, schema, self.config.output_schema())?;
        let skip = store.table().terminal_indices();
        let resumed = points
            .points()
            .iter()
            .filter(|point| skip.contains(&point.index))
            .count();
        if resumed > 0 {
            info!(resumed, "resuming from existing results");
        }
        self.write_manifest(&study_hash)?;

        let options = DispatchOptions {
            max_in_flight: self.config.max_in_flight,
            poll_interval: self.config.poll_interval(),
            timeout: self.config.timeout(),
            skip,
            stop,
            materializer,
        };
        let mut dispatcher = Dispatcher::new(&points, &mut backend, options);
        for completion in dispatcher.by_ref() {
            let row = collector.fold(&completion.slot);
            match row.failure_kind() {
                Some(kind) => warn!(index = row.index, %kind, "point failed"),
                None => debug!(index = row.index, "point succeeded"),
            }
            store.append(row)?;
        }
        let dispatch = dispatcher.stats();
        let unsubmitted = dispatcher.unsubmitted().to_vec();
        drop(dispatcher);

        let table = store.close()?;
        let tally = table.tally();
        let recorded = table.terminal_indices();
        let missing = missing_rows(&points, &recorded, &unsubmitted);
        info!(
            succeeded = tally.succeeded,
            failed = tally.failed,
            submitted = dispatch.submitted,
            peak_in_flight = dispatch.peak_in_flight,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "study finished"
        );
        Ok(StudyReport {
            study_hash,
            points: points.len(),
            resumed,
            tally,
            dispatch,
            unsubmitted,
            missing,
            output,
        })
    }

    /// Collects outputs from existing run directories of points without a row.
    pub fn collect(&self) -> Result<StudyReport, UqError> {
        let study_hash = self.study_hash()?;
        let schema = self.config.parameter_schema()?;
        let points = self.design()?;
        let collector = self.collector()?;
        let run_root = self.config.run_root();
        let output = self.config.output_path();
        let mut store = ResultStore::open(&output, schema, self.config.output_schema())?;
        let skip = store.table().terminal_indices();
        let mut missing = Vec::new();
        let mut collected = 0usize;
        for point in points.points() {
            if skip.contains(&point.index) {
                continue;
            }
            let dir = run_dir_for(&run_root, point.index);
            if !dir.is_dir() {
                missing.push(point.index);
                continue;
            }
            let mut slot = RunSlot::new(Arc::new(point.clone()));
            slot.set_run_dir(dir.clone())?;
            slot.mark_submitted()?;
            slot.succeed(RunPayload::Directory(dir))?;
            let row = collector.fold(&slot);
            if let Some(kind) = row.failure_kind() {
                warn!(index = row.index, %kind, "point failed");
            }
            store.append(row)?;
            collected += 1;
        }
        let table = store.close()?;
        info!(collected, missing = missing.len(), "collection finished");
        Ok(StudyReport {
            study_hash,
            points: points.len(),
            resumed: skip.len(),
            tally: table.tally(),
            dispatch: DispatchStats::default(),
            unsubmitted: Vec::new(),
            missing,
            output,
        })
    }

    /// Summarises the result store against the design without dispatching.
    pub fn status(&self) -> Result<StudyReport, UqError> {
        let study_hash = self.study_hash()?;
        let points = self.design()?;
        let output = self.config.output_path();
        let table = load_table(
            &output,
            self.config.parameter_schema()?,
            self.config.output_schema(),
        )?;
        let recorded = table.terminal_indices();
        Ok(StudyReport {
            study_hash,
            points: points.len(),
            resumed: recorded.len(),
            tally: table.tally(),
            dispatch: DispatchStats::default(),
            unsubmitted: Vec::new(),
            missing: missing_rows(&points, &recorded, &[]),
            output,
        })
    }

    /// Removes run directories, the input file and the result store.
    pub fn clean(&self) -> Result<Vec<PathBuf>, UqError> {
        let mut removed = Vec::new();
        let run_root = self.config.run_root();
        if run_root.is_dir() {
            fs::remove_dir_all(&run_root)
                .map_err(|err| UqError::io("study.clean", &run_root, err))?;
            removed.push(run_root);
        }
        for path in [self.config.input_path(), self.config.output_path()] {
            if path.is_file() {
                fs::remove_file(&path).map_err(|err| UqError::io("study.clean", &path, err))?;
                removed.push(path);
            }
        }
        for path in &removed {
            info!(path = %path.display(), "removed");
        }
        Ok(removed)
    }

    fn write_manifest(&self, study_hash: &str) -> Result<(), UqError> {
        let run_root = self.config.run_root();
        fs::create_dir_all(&run_root)
            .map_err(|err| UqError::io("study.run_root", &run_root, err))?;
        let bytes = to_canonical_json_bytes(&StudyManifest {
            study_hash,
            config: &self.config,
        })?;
        let path = run_root.join("study.json");
        fs::write(&path, bytes).map_err(|err| UqError::io("study.manifest", &path, err))
    }
}

fn missing_rows(points: &PointSet, recorded: &BTreeSet<usize>, unsubmitted: &[usize]) -> Vec<usize> {
    points
        .points()
        .iter()
        .map(|point| point.index)
        .filter(|index| !recorded.contains(index) && !unsubmitted.contains(index))
        .collect()
}

fn ensure_parent(path: &Path) -> Result<(), UqError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|err| UqError::io("study.create_dir", parent, err)),
        _ => Ok(()),
    }
}
