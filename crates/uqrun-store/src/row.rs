use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uqrun_core::{ErrorInfo, OutputMap, ParameterPoint, Scalar, UqError};

/// Category of a per-point failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Run directory could not be materialized.
    Template,
    /// Submission could not be initiated.
    Backend,
    /// The run terminated unsuccessfully (exit status, lost job, cancel, timeout).
    Run,
    /// Output was missing, malformed or shape-mismatched.
    Collection,
}

impl FailureKind {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Template => "template",
            FailureKind::Backend => "backend",
            FailureKind::Run => "run",
            FailureKind::Collection => "collection",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = UqError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "template" => Ok(FailureKind::Template),
            "backend" => Ok(FailureKind::Backend),
            "run" => Ok(FailureKind::Run),
            "collection" => Ok(FailureKind::Collection),
            other => Err(UqError::Store(
                ErrorInfo::new("store.failure_kind", "unknown failure kind")
                    .with_context("value", other),
            )),
        }
    }
}

/// Terminal status recorded for a point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RowStatus {
    Succeeded,
    Failed { kind: FailureKind, detail: String },
}

impl RowStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RowStatus::Succeeded)
    }
}

/// One write-once row of the result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub index: usize,
    pub inputs: IndexMap<String, Scalar>,
    #[serde(flatten)]
    pub status: RowStatus,
    /// Present exactly when the row succeeded.
    #[serde(default)]
    pub outputs: Option<OutputMap>,
    pub completed_at: String,
}

impl ResultRow {
    /// Row for a point whose outputs were collected and validated.
    pub fn succeeded(point: &ParameterPoint, outputs: OutputMap) -> Self {
        Self {
            index: point.index,
            inputs: point.values.clone(),
            status: RowStatus::Succeeded,
            outputs: Some(outputs),
            completed_at: now(),
        }
    }

    /// Row for a failed point. Inputs are preserved, outputs are absent.
    pub fn failed(point: &ParameterPoint, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            index: point.index,
            inputs: point.values.clone(),
            status: RowStatus::Failed {
                kind,
                detail: detail.into(),
            },
            outputs: None,
            completed_at: now(),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.status {
            RowStatus::Succeeded => None,
            RowStatus::Failed { kind, .. } => Some(*kind),
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
