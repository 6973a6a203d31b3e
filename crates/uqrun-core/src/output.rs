//! Output schema and validation of extracted model outputs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, UqError};

/// Named outputs extracted from one run.
pub type OutputMap = IndexMap<String, OutputValue>;

/// A single output quantity. Arrays are stored flattened in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    /// Scalar quantity.
    Scalar(f64),
    /// Flattened array quantity.
    Array(Vec<f64>),
}

impl OutputValue {
    /// Number of scalar elements carried by the value.
    pub fn len(&self) -> usize {
        match self {
            OutputValue::Scalar(_) => 1,
            OutputValue::Array(values) => values.len(),
        }
    }

    /// Whether the value carries no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements of the value in row-major order.
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            OutputValue::Scalar(value) => vec![*value],
            OutputValue::Array(values) => values.clone(),
        }
    }
}

/// Declaration of one output quantity and its expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Output name, used as a result column.
    pub name: String,
    /// Expected shape; empty for scalars.
    #[serde(default)]
    pub shape: Vec<usize>,
}

impl OutputSpec {
    /// Scalar output.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: Vec::new(),
        }
    }

    /// Output with an explicit shape.
    pub fn shaped(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    /// Number of elements implied by the shape.
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Ordered output declarations fixed for a study.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct OutputSchema {
    outputs: Vec<OutputSpec>,
}

impl OutputSchema {
    /// Creates a schema from ordered declarations.
    pub fn new(outputs: Vec<OutputSpec>) -> Self {
        Self { outputs }
    }

    /// Declared outputs in order.
    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    /// Output names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|spec| spec.name.as_str())
    }

    /// Looks up the declaration for `name`.
    pub fn spec(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|spec| spec.name == name)
    }

    /// Checks `values` against the declared names and shapes and returns them
    /// reordered to schema order.
    pub fn conform(&self, mut values: OutputMap) -> Result<OutputMap, UqError> {
        let mut ordered = OutputMap::with_capacity(self.outputs.len());
        for spec in &self.outputs {
            let value = values.shift_remove(&spec.name).ok_or_else(|| {
                UqError::Collection(
                    ErrorInfo::new("output.missing", "declared output not present")
                        .with_context("output", spec.name.clone()),
                )
            })?;
            let expected = spec.element_count();
            if value.len() != expected {
                return Err(UqError::Collection(
                    ErrorInfo::new("output.shape", "output does not match declared shape")
                        .with_context("output", spec.name.clone())
                        .with_context("expected", expected.to_string())
                        .with_context("actual", value.len().to_string()),
                ));
            }
            ordered.insert(spec.name.clone(), value);
        }
        if let Some((name, _)) = values.first() {
            return Err(UqError::Collection(
                ErrorInfo::new("output.undeclared", "output not declared in schema")
                    .with_context("output", name.clone()),
            ));
        }
        Ok(ordered)
    }
}
