use indexmap::IndexMap;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use uqrun_core::{ErrorInfo, ParameterPoint, ParameterSpec, PointSet, Scalar, UqError};

use crate::variable::{VariableDef, VariableKind};

/// Strategy used to turn variable definitions into points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sampling {
    /// Independent draws per variable.
    #[default]
    Random,
    /// Latin hypercube over the variables' quantiles.
    Lhs,
    /// Full-factorial grid over each variable's level set.
    Grid,
}

/// Design plan: variables, point count, strategy and seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignPlan {
    pub variables: IndexMap<String, VariableDef>,
    /// Number of points for `random` and `lhs`; levels per range variable for `grid`.
    pub ntrain: usize,
    #[serde(default)]
    pub sampling: Sampling,
    #[serde(default)]
    pub seed: u64,
    /// Decimals used when float parameters are written into templates.
    #[serde(default)]
    pub precision: Option<usize>,
}

impl DesignPlan {
    /// Resolves every variable definition, in declaration order.
    pub fn resolved(&self) -> Result<Vec<(String, VariableKind)>, UqError> {
        if self.variables.is_empty() {
            return Err(UqError::Config(ErrorInfo::new(
                "design.no_variables",
                "design declares no input variables",
            )));
        }
        self.variables
            .iter()
            .map(|(name, def)| {
                let kind = def.resolve().map_err(|err| {
                    UqError::Config(err.info().clone().with_context("variable", name.clone()))
                })?;
                kind.validate()?;
                Ok((name.clone(), kind))
            })
            .collect()
    }

    /// Parameter schema implied by the plan.
    pub fn schema(&self) -> Result<Vec<ParameterSpec>, UqError> {
        self.resolved()?
            .into_iter()
            .map(|(name, kind)| {
                let mut spec = ParameterSpec::new(name, kind.parameter_kind()?);
                spec.precision = self.precision;
                Ok(spec)
            })
            .collect()
    }
}

/// Generates the point set described by `plan`.
pub fn generate(plan: &DesignPlan) -> Result<PointSet, UqError> {
    let variables = plan.resolved()?;
    let schema = plan.schema()?;
    if plan.ntrain == 0 && plan.sampling != Sampling::Grid {
        return Err(UqError::Config(ErrorInfo::new(
            "design.empty",
            "ntrain must be positive",
        )));
    }
    let rows = match plan.sampling {
        Sampling::Random => expand_random(&variables, plan.ntrain, plan.seed),
        Sampling::Lhs => expand_lhs(&variables, plan.ntrain, plan.seed),
        Sampling::Grid => {
            let levels: Vec<(String, Vec<Scalar>)> = variables
                .iter()
                .map(|(name, kind)| (name.clone(), kind.levels(plan.ntrain.max(1))))
                .collect();
            let mut outputs = Vec::new();
            expand_grid(&levels, 0, IndexMap::new(), &mut outputs);
            outputs
        }
    };
    let points = rows
        .into_iter()
        .enumerate()
        .map(|(index, values)| ParameterPoint::new(index, values))
        .collect();
    PointSet::new(schema, points)
}

fn expand_random(
    variables: &[(String, VariableKind)],
    samples: usize,
    seed: u64,
) -> Vec<IndexMap<String, Scalar>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..samples)
        .map(|pos| {
            variables
                .iter()
                .map(|(name, kind)| (name.clone(), kind.sample(&mut rng, pos, samples)))
                .collect()
        })
        .collect()
}

fn expand_lhs(
    variables: &[(String, VariableKind)],
    samples: usize,
    seed: u64,
) -> Vec<IndexMap<String, Scalar>> {
    let mut outputs = vec![IndexMap::new(); samples];
    let mut rng = StdRng::seed_from_u64(seed);
    let base_slots: Vec<f64> = (0..samples)
        .map(|i| (i as f64 + 0.5) / samples as f64)
        .collect();
    for (name, kind) in variables {
        let mut slots = base_slots.clone();
        slots.shuffle(&mut rng);
        for (idx, frac) in slots.iter().enumerate() {
            outputs[idx].insert(name.clone(), kind.quantile(*frac, idx, samples));
        }
    }
    outputs
}

fn expand_grid(
    params: &[(String, Vec<Scalar>)],
    idx: usize,
    current: IndexMap<String, Scalar>,
    outputs: &mut Vec<IndexMap<String, Scalar>>,
) {
    if idx == params.len() {
        outputs.push(current);
        return;
    }
    let (name, values) = &params[idx];
    for value in values {
        let mut next = current.clone();
        next.insert(name.clone(), value.clone());
        expand_grid(params, idx + 1, next, outputs);
    }
}
