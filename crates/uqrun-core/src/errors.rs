//! Structured error types shared across uqrun crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`UqError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (paths, indices, job identifiers, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for uqrun studies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum UqError {
    /// Placeholder or schema mismatch while materializing a template.
    #[error("template error: {0}")]
    Template(ErrorInfo),
    /// Filesystem failures outside of template rewriting.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// A backend could not initiate a submission.
    #[error("backend error: {0}")]
    Backend(ErrorInfo),
    /// A submitted run terminated unsuccessfully.
    #[error("run failure: {0}")]
    Run(ErrorInfo),
    /// Output extraction or validation failed.
    #[error("collection error: {0}")]
    Collection(ErrorInfo),
    /// Result store failures (schema mismatch, duplicate rows, I/O).
    #[error("store error: {0}")]
    Store(ErrorInfo),
    /// Invalid or inconsistent study configuration.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl UqError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            UqError::Template(info)
            | UqError::Io(info)
            | UqError::Backend(info)
            | UqError::Run(info)
            | UqError::Collection(info)
            | UqError::Store(info)
            | UqError::Config(info)
            | UqError::Serde(info) => info,
        }
    }

    /// Wraps an I/O error raised while touching `path`.
    pub fn io(code: &str, path: &std::path::Path, err: std::io::Error) -> Self {
        UqError::Io(
            ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
        )
    }
}
