use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, UqError};

/// A single parameter value. Numeric or categorical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Integer valued parameter.
    Int(i64),
    /// Real valued parameter.
    Float(f64),
    /// Categorical parameter.
    Text(String),
}

impl Scalar {
    /// Returns the declared kind matching this value.
    pub fn kind(&self) -> ParameterKind {
        match self {
            Scalar::Int(_) => ParameterKind::Int,
            Scalar::Float(_) => ParameterKind::Float,
            Scalar::Text(_) => ParameterKind::Text,
        }
    }

    /// Numeric view of the value, `None` for categorical values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(value) => Some(*value as f64),
            Scalar::Float(value) => Some(*value),
            Scalar::Text(_) => None,
        }
    }

    /// Parses a textual cell according to the declared kind.
    pub fn parse(kind: ParameterKind, text: &str) -> Result<Self, UqError> {
        let trimmed = text.trim();
        let invalid = || {
            UqError::Serde(
                ErrorInfo::new("scalar.parse", "value does not match declared kind")
                    .with_context("kind", kind.to_string())
                    .with_context("value", trimmed),
            )
        };
        match kind {
            ParameterKind::Int => trimmed.parse().map(Scalar::Int).map_err(|_| invalid()),
            ParameterKind::Float => trimmed.parse().map(Scalar::Float).map_err(|_| invalid()),
            ParameterKind::Text => Ok(Scalar::Text(trimmed.to_string())),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Text(value) => f.write_str(value),
        }
    }
}

/// Declared type of a parameter column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    /// Real valued.
    Float,
    /// Integer valued.
    Int,
    /// Categorical.
    Text,
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ParameterKind::Float => "float",
            ParameterKind::Int => "int",
            ParameterKind::Text => "text",
        };
        f.write_str(label)
    }
}

/// Schema entry describing one parameter and its textual representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name, also used as the template placeholder.
    pub name: String,
    /// Declared value kind.
    pub kind: ParameterKind,
    /// Digits after the decimal point when a float is rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<usize>,
    /// Render floats in scientific notation.
    #[serde(default)]
    pub scientific: bool,
}

impl ParameterSpec {
    /// Creates a spec with the default representation for `kind`.
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            precision: None,
            scientific: false,
        }
    }

    /// Real valued parameter.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::Float)
    }

    /// Integer valued parameter.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::Int)
    }

    /// Categorical parameter.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::Text)
    }

    /// Sets a fixed number of decimals for float rendering.
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Switches float rendering to scientific notation.
    pub fn scientific(mut self) -> Self {
        self.scientific = true;
        self
    }

    /// Renders `value` using the declared representation.
    pub fn format(&self, value: &Scalar) -> String {
        match (value, self.precision, self.scientific) {
            (Scalar::Float(v), Some(p), true) => format!("{v:.p$e}"),
            (Scalar::Float(v), Some(p), false) => format!("{v:.p$}"),
            (Scalar::Float(v), None, true) => format!("{v:e}"),
            (other, _, _) => other.to_string(),
        }
    }
}

/// One row of the design of experiments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterPoint {
    /// Position of the point inside its [`PointSet`].
    pub index: usize,
    /// Ordered parameter values keyed by name.
    pub values: IndexMap<String, Scalar>,
}

impl ParameterPoint {
    /// Creates a point from its index and ordered values.
    pub fn new(index: usize, values: IndexMap<String, Scalar>) -> Self {
        Self { index, values }
    }

    /// Looks up a value by parameter name.
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.values.get(name)
    }
}

#[derive(Deserialize)]
struct RawPointSet {
    schema: Vec<ParameterSpec>,
    points: Vec<ParameterPoint>,
}

impl TryFrom<RawPointSet> for PointSet {
    type Error = UqError;

    fn try_from(raw: RawPointSet) -> Result<Self, Self::Error> {
        PointSet::new(raw.schema, raw.points)
    }
}

/// Immutable, schema-checked table of parameter points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPointSet")]
pub struct PointSet {
    schema: Vec<ParameterSpec>,
    points: Vec<ParameterPoint>,
}

impl PointSet {
    /// Validates and assembles a point set.
    ///
    /// Every point must carry exactly the schema's names, in schema order, with
    /// values of the declared kinds; indices must equal positions.
    pub fn new(schema: Vec<ParameterSpec>, points: Vec<ParameterPoint>) -> Result<Self, UqError> {
        let mut seen = std::collections::BTreeSet::new();
        for spec in &schema {
            if !seen.insert(spec.name.as_str()) {
                return Err(UqError::Config(
                    ErrorInfo::new("pointset.duplicate_name", "parameter declared twice")
                        .with_context("name", spec.name.clone()),
                ));
            }
        }
        for (position, point) in points.iter().enumerate() {
            if point.index != position {
                return Err(UqError::Config(
                    ErrorInfo::new("pointset.index", "point index does not match its position")
                        .with_context("position", position.to_string())
                        .with_context("index", point.index.to_string()),
                ));
            }
            if point.values.len() != schema.len() {
                return Err(UqError::Config(schema_mismatch(
                    position,
                    "wrong number of parameters",
                )));
            }
            for (spec, (name, value)) in schema.iter().zip(point.values.iter()) {
                if &spec.name != name {
                    return Err(UqError::Config(
                        schema_mismatch(position, "parameter names differ from schema")
                            .with_context("name", name.clone()),
                    ));
                }
                if spec.kind != value.kind() {
                    return Err(UqError::Config(
                        schema_mismatch(position, "parameter kind differs from schema")
                            .with_context("name", name.clone())
                            .with_context("expected", spec.kind.to_string()),
                    ));
                }
            }
        }
        Ok(Self { schema, points })
    }

    /// Builds a point set from positional rows aligned with `schema`.
    pub fn from_rows(schema: Vec<ParameterSpec>, rows: Vec<Vec<Scalar>>) -> Result<Self, UqError> {
        let points = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                let values = schema
                    .iter()
                    .map(|spec| spec.name.clone())
                    .zip(row)
                    .collect::<IndexMap<_, _>>();
                ParameterPoint::new(index, values)
            })
            .collect();
        Self::new(schema, points)
    }

    /// Parameter schema shared by every point.
    pub fn schema(&self) -> &[ParameterSpec] {
        &self.schema
    }

    /// Looks up the schema entry for `name`.
    pub fn spec(&self, name: &str) -> Option<&ParameterSpec> {
        self.schema.iter().find(|spec| spec.name == name)
    }

    /// Points in design order.
    pub fn points(&self) -> &[ParameterPoint] {
        &self.points
    }

    /// Returns the point at `index`.
    pub fn get(&self, index: usize) -> Option<&ParameterPoint> {
        self.points.get(index)
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the design is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn schema_mismatch(position: usize, message: &str) -> ErrorInfo {
    ErrorInfo::new("pointset.schema", message).with_context("index", position.to_string())
}
