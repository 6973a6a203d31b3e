use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uqrun_core::{ErrorInfo, OutputSchema, ParameterSpec, UqError};

use crate::row::{FailureKind, ResultRow, RowStatus};

/// Counts of terminal outcomes plus the index and kind of every failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<(usize, FailureKind)>,
}

impl Tally {
    pub fn record(&mut self, index: usize, failure: Option<FailureKind>) {
        match failure {
            None => self.succeeded += 1,
            Some(kind) => {
                self.failed += 1;
                self.failures.push((index, kind));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Input matrix and output matrix of the succeeded rows, in index order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainingData {
    pub indices: Vec<usize>,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<Vec<f64>>,
}

/// Append-only table of results keyed by point index.
///
/// Rows are write-once: a second row for the same index is rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    parameters: Vec<ParameterSpec>,
    outputs: OutputSchema,
    rows: BTreeMap<usize, ResultRow>,
}

impl ResultTable {
    pub fn new(parameters: Vec<ParameterSpec>, outputs: OutputSchema) -> Self {
        Self {
            parameters,
            outputs,
            rows: BTreeMap::new(),
        }
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn outputs(&self) -> &OutputSchema {
        &self.outputs
    }

    /// Validates and inserts a row.
    pub fn insert(&mut self, mut row: ResultRow) -> Result<(), UqError> {
        if self.rows.contains_key(&row.index) {
            return Err(UqError::Store(
                ErrorInfo::new("store.duplicate_row", "row already recorded for point")
                    .with_context("index", row.index.to_string()),
            ));
        }
        let names_match = row.inputs.len() == self.parameters.len()
            && self
                .parameters
                .iter()
                .zip(row.inputs.iter())
                .all(|(spec, (name, value))| spec.name == *name && spec.kind == value.kind());
        if !names_match {
            return Err(UqError::Store(
                ErrorInfo::new("store.input_columns", "row inputs differ from table schema")
                    .with_context("index", row.index.to_string()),
            ));
        }
        match (&row.status, row.outputs.take()) {
            (RowStatus::Succeeded, Some(outputs)) => {
                row.outputs = Some(self.outputs.conform(outputs).map_err(|err| {
                    UqError::Store(err.info().clone().with_context("index", row.index.to_string()))
                })?);
            }
            (RowStatus::Succeeded, None) => {
                return Err(UqError::Store(
                    ErrorInfo::new("store.missing_outputs", "succeeded row carries no outputs")
                        .with_context("index", row.index.to_string()),
                ));
            }
            (RowStatus::Failed { .. }, Some(_)) => {
                return Err(UqError::Store(
                    ErrorInfo::new("store.failed_outputs", "failed row must not carry outputs")
                        .with_context("index", row.index.to_string()),
                ));
            }
            (RowStatus::Failed { .. }, None) => {}
        }
        self.rows.insert(row.index, row);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&ResultRow> {
        self.rows.get(&index)
    }

    /// Rows in index order.
    pub fn rows(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Indices that already carry a terminal row and must not be dispatched again.
    pub fn terminal_indices(&self) -> BTreeSet<usize> {
        self.rows.keys().copied().collect()
    }

    pub fn tally(&self) -> Tally {
        let mut tally = Tally::default();
        for row in self.rows.values() {
            tally.record(row.index, row.failure_kind());
        }
        tally
    }

    /// Numeric `(X, Y)` view of the succeeded rows for surrogate fitting.
    ///
    /// Array outputs are flattened into consecutive columns. Categorical
    /// parameters cannot be represented and are rejected.
    pub fn training_data(&self) -> Result<TrainingData, UqError> {
        let mut data = TrainingData::default();
        for row in self.rows.values() {
            let Some(outputs) = row.outputs.as_ref() else {
                continue;
            };
            let x = row
                .inputs
                .iter()
                .map(|(name, value)| {
                    value.as_f64().ok_or_else(|| {
                        UqError::Store(
                            ErrorInfo::new(
                                "store.training_text",
                                "categorical parameter has no numeric encoding",
                            )
                            .with_context("parameter", name.clone()),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let y = outputs.values().flat_map(|value| value.to_vec()).collect();
            data.indices.push(row.index);
            data.x.push(x);
            data.y.push(y);
        }
        Ok(data)
    }
}
