use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use uqrun_core::{ErrorInfo, OutputMap, OutputValue, ParameterPoint, UqError};

use crate::collector::OutputExtractor;

/// In-process model: maps a point to its outputs or an error message.
pub type ModelFn = Arc<dyn Fn(&ParameterPoint) -> Result<OutputMap, String> + Send + Sync>;

/// Named user hooks resolved from the study configuration.
///
/// The default registry carries the `mockup` model.
#[derive(Clone)]
pub struct HookRegistry {
    models: BTreeMap<String, ModelFn>,
    extractors: BTreeMap<String, Arc<dyn OutputExtractor>>,
}

impl HookRegistry {
    /// Registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
            extractors: BTreeMap::new(),
        }
    }

    pub fn register_model<F>(&mut self, name: impl Into<String>, model: F) -> &mut Self
    where
        F: Fn(&ParameterPoint) -> Result<OutputMap, String> + Send + Sync + 'static,
    {
        self.models.insert(name.into(), Arc::new(model));
        self
    }

    pub fn register_extractor<E>(&mut self, name: impl Into<String>, extractor: E) -> &mut Self
    where
        E: OutputExtractor + 'static,
    {
        self.extractors.insert(name.into(), Arc::new(extractor));
        self
    }

    pub fn model(&self, name: &str) -> Result<ModelFn, UqError> {
        self.models.get(name).cloned().ok_or_else(|| {
            UqError::Config(
                ErrorInfo::new("hooks.unknown_model", "no model registered under this name")
                    .with_context("model", name)
                    .with_context("registered", self.model_names().join(",")),
            )
        })
    }

    pub fn extractor(&self, name: &str) -> Option<Arc<dyn OutputExtractor>> {
        self.extractors.get(name).cloned()
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_model("mockup", mockup_model);
        registry
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .field("extractors", &self.extractors.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub fn rosenbrock(x: f64, y: f64, a: f64, b: f64) -> f64 {
    (a - x).powi(2) + b * (y - x * x).powi(2)
}

/// Shifted Rosenbrock surface used for smoke-testing studies.
pub fn mockup(r: f64, u: f64, v: f64, a: f64, b: f64) -> f64 {
    rosenbrock((r - 0.5) + u - 5.0, 1.0 + 3.0 * (v - 0.6), a, b)
}

/// Model wrapper around [`mockup`]. Missing inputs take the defaults
/// `r = 0.25`, `u = 0.5`, `v = 0.5`, `a = 1`, `b = 3`; the output is `f`.
pub fn mockup_model(point: &ParameterPoint) -> Result<OutputMap, String> {
    let input = |name: &str, default: f64| -> Result<f64, String> {
        match point.get(name) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| format!("mockup input `{name}` is not numeric")),
        }
    };
    let f = mockup(
        input("r", 0.25)?,
        input("u", 0.5)?,
        input("v", 0.5)?,
        input("a", 1.0)?,
        input("b", 3.0)?,
    );
    let mut outputs = OutputMap::new();
    outputs.insert("f".to_string(), OutputValue::Scalar(f));
    Ok(outputs)
}
