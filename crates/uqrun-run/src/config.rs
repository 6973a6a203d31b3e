use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uqrun_core::{ErrorInfo, OutputSchema, OutputSpec, ParameterSpec, UqError};
use uqrun_design::{DesignPlan, Sampling, VariableDef};

use crate::backend::ClusterOptions;
use crate::collector::ExtractorConfig;
use crate::template::TemplateOptions;

/// YAML study configuration consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Directory that relative paths resolve against. Defaults to the
    /// directory holding the configuration file.
    #[serde(default)]
    pub base_dir: PathBuf,
    /// Root of the `run_<index>` directories.
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,
    #[serde(default)]
    pub ntrain: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub sampling: Sampling,
    /// Decimals used for float parameters in templates.
    #[serde(default)]
    pub precision: Option<usize>,
    pub variables: IndexMap<String, VariableDef>,
    /// Output name to shape; `[]` declares a scalar.
    pub outputs: IndexMap<String, Vec<usize>>,
    #[serde(default)]
    pub template: Option<TemplateConfig>,
    pub backend: BackendConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub files: FilesConfig,
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("run")
}

fn default_max_in_flight() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub path: PathBuf,
    #[serde(flatten)]
    pub options: TemplateOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Direct {
        #[serde(default = "default_model")]
        model: String,
    },
    Local {
        command: Vec<String>,
        #[serde(default = "default_max_processes")]
        max_processes: usize,
    },
    Cluster(ClusterOptions),
}

fn default_model() -> String {
    "mockup".to_string()
}

fn default_max_processes() -> usize {
    1
}

/// Input design and result store locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_input_file")]
    pub input: PathBuf,
    #[serde(default = "default_output_file")]
    pub output: PathBuf,
}

fn default_input_file() -> PathBuf {
    PathBuf::from("input.csv")
}

fn default_output_file() -> PathBuf {
    PathBuf::from("output.csv")
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            input: default_input_file(),
            output: default_output_file(),
        }
    }
}

impl StudyConfig {
    /// Reads and validates a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, UqError> {
        let text = fs::read_to_string(path).map_err(|err| {
            UqError::Config(
                ErrorInfo::new("config.read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        let mut config = Self::from_yaml(&text).map_err(|err| {
            UqError::Config(err.info().clone().with_context("path", path.display().to_string()))
        })?;
        let parent = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.base_dir = if config.base_dir.as_os_str().is_empty() {
            parent
        } else if config.base_dir.is_relative() {
            parent.join(&config.base_dir)
        } else {
            config.base_dir
        };
        Ok(config)
    }

    /// Parses and validates YAML text. `base_dir` is kept as written.
    pub fn from_yaml(text: &str) -> Result<Self, UqError> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|err| UqError::Config(ErrorInfo::new("config.parse", err.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), UqError> {
        self.design_plan().schema()?;
        if self.outputs.is_empty() {
            return Err(invalid("config.no_outputs", "study declares no outputs"));
        }
        if self.max_in_flight == 0 {
            return Err(invalid("config.max_in_flight", "max_in_flight must be at least 1"));
        }
        if self.ntrain == 0 && self.sampling != Sampling::Grid {
            return Err(invalid("config.ntrain", "ntrain must be at least 1"));
        }
        match &self.backend {
            BackendConfig::Direct { model } if model.is_empty() => {
                return Err(invalid("config.backend", "direct backend needs a model name"));
            }
            BackendConfig::Local {
                command,
                max_processes,
            } => {
                if command.is_empty() {
                    return Err(invalid("config.backend", "local backend needs a command"));
                }
                if *max_processes == 0 {
                    return Err(invalid("config.backend", "max_processes must be at least 1"));
                }
            }
            BackendConfig::Cluster(options) if options.command.trim().is_empty() => {
                return Err(invalid("config.backend", "cluster backend needs a command"));
            }
            _ => {}
        }
        let needs_template = !matches!(self.backend, BackendConfig::Direct { .. });
        if needs_template && self.template.is_none() {
            return Err(UqError::Config(
                ErrorInfo::new("config.template_required", "process backends need a template")
                    .with_hint("add a `template.path` entry"),
            ));
        }
        Ok(())
    }

    pub fn design_plan(&self) -> DesignPlan {
        DesignPlan {
            variables: self.variables.clone(),
            ntrain: self.ntrain,
            sampling: self.sampling,
            seed: self.seed,
            precision: self.precision,
        }
    }

    pub fn parameter_schema(&self) -> Result<Vec<ParameterSpec>, UqError> {
        self.design_plan().schema()
    }

    pub fn output_schema(&self) -> OutputSchema {
        OutputSchema::new(
            self.outputs
                .iter()
                .map(|(name, shape)| OutputSpec::shaped(name.clone(), shape.clone()))
                .collect(),
        )
    }

    /// Resolves `path` against `base_dir` unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn run_root(&self) -> PathBuf {
        self.resolve(&self.run_dir)
    }

    pub fn input_path(&self) -> PathBuf {
        self.resolve(&self.files.input)
    }

    pub fn output_path(&self) -> PathBuf {
        self.resolve(&self.files.output)
    }

    pub fn template_dir(&self) -> Option<PathBuf> {
        self.template.as_ref().map(|template| self.resolve(&template.path))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn invalid(code: &str, message: &str) -> UqError {
    UqError::Config(ErrorInfo::new(code, message))
}
