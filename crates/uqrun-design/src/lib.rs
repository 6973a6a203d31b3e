//! Design-of-experiments generation for uqrun studies.

mod input;
mod plan;
mod variable;

pub use input::{read_input, write_input};
pub use plan::{generate, DesignPlan, Sampling};
pub use variable::{standard_normal_quantile, VariableDef, VariableKind};
