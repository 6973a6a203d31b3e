use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uqrun_core::{ErrorInfo, OutputMap, OutputSchema, OutputValue, UqError};
use uqrun_store::{FailureKind, ResultRow};

use crate::hooks::HookRegistry;
use crate::slot::{RunPayload, RunSlot, SlotState};

/// User extraction hook: reads a finished run directory into outputs.
pub trait OutputExtractor: Send + Sync {
    fn extract(&self, run_dir: &Path, schema: &OutputSchema) -> Result<OutputMap, UqError>;
}

/// Extractor selection from the study configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// `json`, `text`, or a name registered in the [`HookRegistry`].
    #[serde(default = "default_extractor")]
    pub name: String,
    /// File read relative to the run directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Column names of a `text` table.
    #[serde(default)]
    pub names: Vec<String>,
}

fn default_extractor() -> String {
    "json".to_string()
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            name: default_extractor(),
            path: None,
            names: Vec::new(),
        }
    }
}

impl ExtractorConfig {
    pub fn build(&self, hooks: &HookRegistry) -> Result<Arc<dyn OutputExtractor>, UqError> {
        let path = self.path.clone().unwrap_or_else(|| PathBuf::from("stdout"));
        match self.name.as_str() {
            "json" => Ok(Arc::new(JsonExtractor::new(path))),
            "text" => Ok(Arc::new(TextExtractor::new(path, self.names.clone()))),
            other => hooks.extractor(other).ok_or_else(|| {
                UqError::Config(
                    ErrorInfo::new("hooks.unknown_extractor", "no extractor registered under this name")
                        .with_context("extractor", other),
                )
            }),
        }
    }
}

/// Reads a JSON object; numbers become scalars, numeric arrays are flattened.
#[derive(Debug, Clone)]
pub struct JsonExtractor {
    path: PathBuf,
}

impl JsonExtractor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OutputExtractor for JsonExtractor {
    fn extract(&self, run_dir: &Path, schema: &OutputSchema) -> Result<OutputMap, UqError> {
        let path = run_dir.join(&self.path);
        let text = read_output(&path)?;
        let value: Value = serde_json::from_str(&text).map_err(|err| {
            UqError::Collection(
                ErrorInfo::new("collector.json_parse", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        let Value::Object(object) = value else {
            return Err(UqError::Collection(
                ErrorInfo::new("collector.json_shape", "expected a JSON object")
                    .with_context("path", path.display().to_string()),
            ));
        };
        let mut outputs = OutputMap::new();
        for name in schema.names() {
            let Some(raw) = object.get(name) else {
                continue;
            };
            let value = match raw {
                Value::Array(_) => {
                    let mut flat = Vec::new();
                    flatten_json(raw, &mut flat).map_err(|info| {
                        UqError::Collection(info.with_context("output", name))
                    })?;
                    OutputValue::Array(flat)
                }
                other => OutputValue::Scalar(json_number(other).map_err(|info| {
                    UqError::Collection(info.with_context("output", name))
                })?),
            };
            outputs.insert(name.to_string(), value);
        }
        Ok(outputs)
    }
}

fn json_number(value: &Value) -> Result<f64, ErrorInfo> {
    value.as_f64().ok_or_else(|| {
        ErrorInfo::new("collector.json_value", "output value is not numeric")
            .with_context("value", value.to_string())
    })
}

fn flatten_json(value: &Value, out: &mut Vec<f64>) -> Result<(), ErrorInfo> {
    match value {
        Value::Array(items) => items.iter().try_for_each(|item| flatten_json(item, out)),
        other => {
            out.push(json_number(other)?);
            Ok(())
        }
    }
}

/// Reads a whitespace-separated numeric table; `#` lines are comments.
///
/// Columns map to `names` (schema order when empty). One data row yields
/// scalars, several rows yield one array per column.
#[derive(Debug, Clone)]
pub struct TextExtractor {
    path: PathBuf,
    names: Vec<String>,
}

impl TextExtractor {
    pub fn new(path: impl Into<PathBuf>, names: Vec<String>) -> Self {
        Self {
            path: path.into(),
            names,
        }
    }
}

impl OutputExtractor for TextExtractor {
    fn extract(&self, run_dir: &Path, schema: &OutputSchema) -> Result<OutputMap, UqError> {
        let path = run_dir.join(&self.path);
        let text = read_output(&path)?;
        let names: Vec<String> = if self.names.is_empty() {
            schema.names().map(str::to_string).collect()
        } else {
            self.names.clone()
        };
        let mut rows: Vec<Vec<f64>> = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(|cell| cell.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| {
                    UqError::Collection(
                        ErrorInfo::new("collector.text_value", err.to_string())
                            .with_context("path", path.display().to_string())
                            .with_context("line", (line_no + 1).to_string()),
                    )
                })?;
            if row.len() != names.len() {
                return Err(UqError::Collection(
                    ErrorInfo::new("collector.text_columns", "row width differs from column names")
                        .with_context("path", path.display().to_string())
                        .with_context("line", (line_no + 1).to_string())
                        .with_context("expected", names.len().to_string())
                        .with_context("actual", row.len().to_string()),
                ));
            }
            rows.push(row);
        }
        if rows.is_empty() {
            return Err(UqError::Collection(
                ErrorInfo::new("collector.text_empty", "output table has no data rows")
                    .with_context("path", path.display().to_string()),
            ));
        }
        let mut outputs = OutputMap::new();
        for (col, name) in names.iter().enumerate() {
            if schema.spec(name).is_none() {
                continue;
            }
            let value = if rows.len() == 1 {
                OutputValue::Scalar(rows[0][col])
            } else {
                OutputValue::Array(rows.iter().map(|row| row[col]).collect())
            };
            outputs.insert(name.clone(), value);
        }
        Ok(outputs)
    }
}

fn read_output(path: &Path) -> Result<String, UqError> {
    fs::read_to_string(path).map_err(|err| {
        UqError::Collection(
            ErrorInfo::new("collector.missing_output", err.to_string())
                .with_context("path", path.display().to_string()),
        )
    })
}

/// Turns terminal run slots into result rows.
#[derive(Clone)]
pub struct Collector {
    schema: OutputSchema,
    extractor: Option<Arc<dyn OutputExtractor>>,
}

impl Collector {
    pub fn new(schema: OutputSchema, extractor: Option<Arc<dyn OutputExtractor>>) -> Self {
        Self { schema, extractor }
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    /// Extracts and validates the outputs of a succeeded slot.
    pub fn collect(&self, slot: &RunSlot) -> Result<ResultRow, UqError> {
        let outputs = match (slot.state(), slot.payload()) {
            (SlotState::Succeeded, Some(RunPayload::InProcess(outputs))) => outputs.clone(),
            (SlotState::Succeeded, Some(RunPayload::Directory(dir))) => {
                let extractor = self.extractor.as_ref().ok_or_else(|| {
                    UqError::Collection(
                        ErrorInfo::new("collector.no_extractor", "no extractor configured")
                            .with_context("index", slot.index().to_string()),
                    )
                })?;
                extractor.extract(dir, &self.schema)?
            }
            (state, _) => {
                return Err(UqError::Collection(
                    ErrorInfo::new("collector.not_succeeded", "slot has no successful payload")
                        .with_context("index", slot.index().to_string())
                        .with_context("state", state.as_str()),
                ))
            }
        };
        let outputs = self.schema.conform(outputs).map_err(|err| {
            UqError::Collection(err.info().clone().with_context("index", slot.index().to_string()))
        })?;
        Ok(ResultRow::succeeded(slot.point(), outputs))
    }

    /// Result row for any terminal slot. Failures become failed rows that
    /// keep the inputs and carry no outputs.
    pub fn fold(&self, slot: &RunSlot) -> ResultRow {
        if let Some(failure) = slot.failure() {
            return ResultRow::failed(slot.point(), failure.kind(), failure.detail());
        }
        match self.collect(slot) {
            Ok(row) => row,
            Err(err) => {
                warn!(index = slot.index(), %err, "output collection failed");
                ResultRow::failed(slot.point(), FailureKind::Collection, err.to_string())
            }
        }
    }
}
