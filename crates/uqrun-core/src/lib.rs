#![deny(missing_docs)]
#![doc = "Core data model and error types shared by the uqrun crates."]

pub mod errors;
mod hash;
pub mod output;
mod serde;
mod types;

pub use errors::{ErrorInfo, UqError};
pub use hash::stable_hash_string;
pub use output::{OutputMap, OutputSchema, OutputSpec, OutputValue};
pub use serde::to_canonical_json_bytes;
pub use types::{ParameterKind, ParameterPoint, ParameterSpec, PointSet, Scalar};
