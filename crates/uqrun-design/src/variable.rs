use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uqrun_core::{ErrorInfo, ParameterKind, Scalar, UqError};

/// Distribution or level set a design variable is drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VariableKind {
    /// Fixed value shared by every point.
    Constant { value: Scalar },
    /// Uniform on `[min, max)`.
    Uniform { min: f64, max: f64 },
    /// Log-uniform on `[min, max)`, both bounds positive.
    LogUniform { min: f64, max: f64 },
    /// Gaussian with the given mean and standard deviation.
    Normal { mean: f64, std: f64 },
    /// Evenly spaced values from `min` to `max` inclusive.
    Linear { min: f64, max: f64 },
    /// Uniform integers on `[min, max]`.
    RandInt { min: i64, max: i64 },
    /// Explicit level set, sampled uniformly.
    Choice { values: Vec<Scalar> },
}

/// Variable definition as written in a study file: either the structured form,
/// a bare number (constant) or a short form such as `Uniform(0, 1)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableDef {
    Number(f64),
    Short(String),
    Full(VariableKind),
}

impl VariableDef {
    /// Resolves the definition to a concrete kind.
    pub fn resolve(&self) -> Result<VariableKind, UqError> {
        match self {
            VariableDef::Number(value) => Ok(VariableKind::Constant {
                value: Scalar::Float(*value),
            }),
            VariableDef::Short(text) => text.parse(),
            VariableDef::Full(kind) => Ok(kind.clone()),
        }
    }
}

impl From<VariableKind> for VariableDef {
    fn from(kind: VariableKind) -> Self {
        VariableDef::Full(kind)
    }
}

impl VariableKind {
    /// Declared parameter kind produced by this variable.
    pub fn parameter_kind(&self) -> Result<ParameterKind, UqError> {
        match self {
            VariableKind::Constant { value } => Ok(value.kind()),
            VariableKind::RandInt { .. } => Ok(ParameterKind::Int),
            VariableKind::Choice { values } => {
                let first = values.first().ok_or_else(|| {
                    UqError::Config(ErrorInfo::new(
                        "variable.empty_choice",
                        "choice requires at least one value",
                    ))
                })?;
                let kind = first.kind();
                if values.iter().any(|value| value.kind() != kind) {
                    return Err(UqError::Config(ErrorInfo::new(
                        "variable.mixed_choice",
                        "choice values must share one kind",
                    )));
                }
                Ok(kind)
            }
            _ => Ok(ParameterKind::Float),
        }
    }

    /// Checks bounds and level sets.
    pub fn validate(&self) -> Result<(), UqError> {
        let bad = |message: &str| {
            Err(UqError::Config(
                ErrorInfo::new("variable.bounds", message).with_context("variable", self.to_string()),
            ))
        };
        match self {
            VariableKind::Uniform { min, max } | VariableKind::Linear { min, max }
                if !(min <= max) =>
            {
                bad("min must not exceed max")
            }
            VariableKind::LogUniform { min, max } if !(*min > 0.0 && min <= max) => {
                bad("log-uniform bounds must be positive and ordered")
            }
            VariableKind::Normal { std, .. } if !(*std >= 0.0) => {
                bad("standard deviation must be non-negative")
            }
            VariableKind::RandInt { min, max } if min > max => bad("min must not exceed max"),
            _ => self.parameter_kind().map(|_| ()),
        }
    }

    /// Draws one value independently at random.
    pub fn sample<R: Rng>(&self, rng: &mut R, position: usize, count: usize) -> Scalar {
        match self {
            VariableKind::Normal { mean, std } => Scalar::Float(mean + std * box_muller(rng)),
            _ => self.quantile(rng.gen::<f64>(), position, count),
        }
    }

    /// Maps a probability `frac` in `[0, 1)` through the inverse distribution.
    ///
    /// `Linear` ignores `frac` and uses `position` out of `count` instead.
    pub fn quantile(&self, frac: f64, position: usize, count: usize) -> Scalar {
        match self {
            VariableKind::Constant { value } => value.clone(),
            VariableKind::Uniform { min, max } => Scalar::Float(min + frac * (max - min)),
            VariableKind::LogUniform { min, max } => {
                let (lo, hi) = (min.ln(), max.ln());
                Scalar::Float((lo + frac * (hi - lo)).exp())
            }
            VariableKind::Normal { mean, std } => {
                Scalar::Float(mean + std * standard_normal_quantile(frac))
            }
            VariableKind::Linear { min, max } => Scalar::Float(linspace_at(*min, *max, position, count)),
            VariableKind::RandInt { min, max } => {
                let width = int_width(*min, *max);
                let offset = ((frac * (width + 1) as f64).floor() as i128).clamp(0, width);
                Scalar::Int((*min as i128 + offset) as i64)
            }
            VariableKind::Choice { values } => {
                let idx = ((frac * values.len() as f64).floor() as usize).min(values.len() - 1);
                values[idx].clone()
            }
        }
    }

    /// Level set used when the variable takes part in a full-factorial grid.
    ///
    /// `randint` contributes every integer unless the range is wider than
    /// `MAX_INT_LEVELS`; wider ranges take `count` evenly spaced integers.
    pub fn levels(&self, count: usize) -> Vec<Scalar> {
        match self {
            VariableKind::Constant { value } => vec![value.clone()],
            VariableKind::Choice { values } => values.clone(),
            VariableKind::RandInt { min, max } => {
                let width = int_width(*min, *max);
                if width < MAX_INT_LEVELS {
                    return (*min..=*max).map(Scalar::Int).collect();
                }
                let mut levels: Vec<Scalar> = (0..count)
                    .map(|pos| {
                        let at = linspace_at(0.0, width as f64, pos, count).round() as i128;
                        Scalar::Int((*min as i128 + at.clamp(0, width)) as i64)
                    })
                    .collect();
                levels.dedup();
                levels
            }
            VariableKind::Uniform { min, max } | VariableKind::Linear { min, max } => (0..count)
                .map(|pos| Scalar::Float(linspace_at(*min, *max, pos, count)))
                .collect(),
            VariableKind::LogUniform { min, max } => (0..count)
                .map(|pos| Scalar::Float(linspace_at(min.ln(), max.ln(), pos, count).exp()))
                .collect(),
            VariableKind::Normal { .. } => (0..count)
                .map(|pos| self.quantile((pos as f64 + 0.5) / count as f64, pos, count))
                .collect(),
        }
    }
}

/// Integer ranges wider than this take `count` evenly spaced grid levels
/// instead of every integer.
const MAX_INT_LEVELS: i128 = 1024;

/// `max - min` without overflow.
fn int_width(min: i64, max: i64) -> i128 {
    (max as i128 - min as i128).max(0)
}

fn linspace_at(min: f64, max: f64, position: usize, count: usize) -> f64 {
    if count <= 1 {
        return min;
    }
    if position + 1 == count {
        return max;
    }
    min + (max - min) * position as f64 / (count - 1) as f64
}

/// Inverse CDF of the standard normal distribution (Acklam's rational
/// approximation, relative error below 1.2e-9).
pub fn standard_normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -standard_normal_quantile(1.0 - p)
    }
}

fn box_muller<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKind::Constant { value } => write!(f, "Constant({value})"),
            VariableKind::Uniform { min, max } => write!(f, "Uniform({min}, {max})"),
            VariableKind::LogUniform { min, max } => write!(f, "LogUniform({min}, {max})"),
            VariableKind::Normal { mean, std } => write!(f, "Normal({mean}, {std})"),
            VariableKind::Linear { min, max } => write!(f, "Linear({min}, {max})"),
            VariableKind::RandInt { min, max } => write!(f, "RandInt({min}, {max})"),
            VariableKind::Choice { values } => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "Choice({})", rendered.join(", "))
            }
        }
    }
}

impl FromStr for VariableKind {
    type Err = UqError;

    /// Parses the short form `Name(arg, ...)`, e.g. `Uniform(4.7, 5.3)`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let malformed = |message: &str| {
            UqError::Config(
                ErrorInfo::new("variable.parse", message)
                    .with_context("text", text)
                    .with_hint("expected e.g. Uniform(0, 1) or Choice(a, b)"),
            )
        };
        let trimmed = text.trim();
        let open = trimmed.find('(').ok_or_else(|| malformed("missing '('"))?;
        if !trimmed.ends_with(')') {
            return Err(malformed("missing ')'"));
        }
        let name = trimmed[..open].trim().to_ascii_lowercase();
        let args: Vec<&str> = trimmed[open + 1..trimmed.len() - 1]
            .split(',')
            .map(str::trim)
            .filter(|arg| !arg.is_empty())
            .collect();
        let float = |idx: usize| -> Result<f64, UqError> {
            args.get(idx)
                .ok_or_else(|| malformed("missing argument"))?
                .parse::<f64>()
                .map_err(|_| malformed("argument is not a number"))
        };
        let int = |idx: usize| -> Result<i64, UqError> {
            args.get(idx)
                .ok_or_else(|| malformed("missing argument"))?
                .parse::<i64>()
                .map_err(|_| malformed("argument is not an integer"))
        };
        let kind = match name.as_str() {
            "constant" => VariableKind::Constant {
                value: parse_literal(args.first().ok_or_else(|| malformed("missing argument"))?),
            },
            "uniform" => VariableKind::Uniform {
                min: float(0)?,
                max: float(1)?,
            },
            "loguniform" => VariableKind::LogUniform {
                min: float(0)?,
                max: float(1)?,
            },
            "normal" => VariableKind::Normal {
                mean: float(0)?,
                std: float(1)?,
            },
            "linear" => VariableKind::Linear {
                min: float(0)?,
                max: float(1)?,
            },
            "randint" => VariableKind::RandInt {
                min: int(0)?,
                max: int(1)?,
            },
            "choice" => VariableKind::Choice {
                values: args.iter().map(|arg| parse_literal(arg)).collect(),
            },
            _ => return Err(malformed("unknown variable kind")),
        };
        kind.validate()?;
        Ok(kind)
    }
}

fn parse_literal(text: &str) -> Scalar {
    if let Ok(value) = text.parse::<i64>() {
        Scalar::Int(value)
    } else if let Ok(value) = text.parse::<f64>() {
        Scalar::Float(value)
    } else {
        Scalar::Text(text.trim_matches(|c| c == '"' || c == '\'').to_string())
    }
}
