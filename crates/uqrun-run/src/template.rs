use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uqrun_core::{ErrorInfo, ParameterPoint, ParameterSpec, UqError};
use walkdir::WalkDir;

/// Template handling options taken from the study configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateOptions {
    /// File names (or relative paths) to rewrite. All text files when `None`.
    #[serde(default)]
    pub param_files: Option<Vec<String>>,
    /// Glob patterns of template entries that are not copied.
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_delimiters")]
    pub delimiters: (String, String),
}

fn default_delimiters() -> (String, String) {
    ("{".to_string(), "}".to_string())
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            param_files: None,
            ignore: Vec::new(),
            overwrite: false,
            delimiters: default_delimiters(),
        }
    }
}

/// Produces one run directory per point from a template tree.
#[derive(Debug, Clone)]
pub struct TemplateMaterializer {
    template_dir: PathBuf,
    run_root: PathBuf,
    schema: Vec<ParameterSpec>,
    options: TemplateOptions,
    ignore: GlobSet,
    set_aside_stale: bool,
}

impl TemplateMaterializer {
    pub fn new(
        template_dir: impl Into<PathBuf>,
        run_root: impl Into<PathBuf>,
        schema: Vec<ParameterSpec>,
        options: TemplateOptions,
    ) -> Result<Self, UqError> {
        let template_dir = template_dir.into();
        if !template_dir.is_dir() {
            return Err(UqError::Template(
                ErrorInfo::new("template.missing_dir", "template directory not found")
                    .with_context("path", template_dir.display().to_string()),
            ));
        }
        let (open, close) = &options.delimiters;
        if open.is_empty() || close.is_empty() {
            return Err(UqError::Config(ErrorInfo::new(
                "template.delimiters",
                "placeholder delimiters must be non-empty",
            )));
        }
        let ignore = build_globset(&options.ignore)?;
        Ok(Self {
            template_dir,
            run_root: run_root.into(),
            schema,
            options,
            ignore,
            set_aside_stale: false,
        })
    }

    /// Moves an existing run directory to `run_<index>.stale` instead of
    /// failing. Used when every dispatched point is known to have no result,
    /// so a leftover directory belongs to an interrupted run.
    pub fn set_aside_stale(mut self, enabled: bool) -> Self {
        self.set_aside_stale = enabled;
        self
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    pub fn run_root(&self) -> &Path {
        &self.run_root
    }

    /// Run directory of the point with `index`.
    pub fn run_dir(&self, index: usize) -> PathBuf {
        run_dir_for(&self.run_root, index)
    }

    /// Copies the template into the point's run directory and fills placeholders.
    pub fn materialize(&self, point: &ParameterPoint) -> Result<PathBuf, UqError> {
        let run_dir = self.run_dir(point.index);
        if run_dir.exists() {
            if self.options.overwrite {
                fs::remove_dir_all(&run_dir)
                    .map_err(|err| UqError::io("template.run_dir_remove", &run_dir, err))?;
            } else if self.set_aside_stale {
                let stale = stale_dir_for(&run_dir);
                if stale.exists() {
                    fs::remove_dir_all(&stale)
                        .map_err(|err| UqError::io("template.run_dir_remove", &stale, err))?;
                }
                fs::rename(&run_dir, &stale)
                    .map_err(|err| UqError::io("template.run_dir_stale", &run_dir, err))?;
                warn!(index = point.index, stale = %stale.display(), "stale run directory set aside");
            } else {
                return Err(UqError::Io(
                    ErrorInfo::new("template.run_dir_exists", "run directory already exists")
                        .with_context("path", run_dir.display().to_string())
                        .with_hint("enable template.overwrite or run `uqrun clean`"),
                ));
            }
        }
        fs::create_dir_all(&run_dir)
            .map_err(|err| UqError::io("template.run_dir_create", &run_dir, err))?;

        let root = &self.template_dir;
        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
                !self.ignore.is_match(rel) && !self.ignore.is_match(entry.file_name())
            });
        for entry in walker {
            let entry = entry.map_err(|err| {
                UqError::Template(
                    ErrorInfo::new("template.walk", err.to_string())
                        .with_context("path", root.display().to_string()),
                )
            })?;
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let target = run_dir.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)
                    .map_err(|err| UqError::io("template.mkdir", &target, err))?;
            } else {
                self.copy_file(entry.path(), rel, &target, point)?;
            }
        }
        debug!(index = point.index, run_dir = %run_dir.display(), "run directory materialized");
        Ok(run_dir)
    }

    fn copy_file(
        &self,
        source: &Path,
        rel: &Path,
        target: &Path,
        point: &ParameterPoint,
    ) -> Result<(), UqError> {
        if !self.is_param_file(rel) {
            fs::copy(source, target).map_err(|err| UqError::io("template.copy", source, err))?;
            return Ok(());
        }
        let bytes = fs::read(source).map_err(|err| UqError::io("template.read", source, err))?;
        match String::from_utf8(bytes) {
            Ok(text) => {
                let filled = self.fill(&text, point).map_err(|info| {
                    UqError::Template(info.with_context("file", rel.display().to_string()))
                })?;
                fs::write(target, filled).map_err(|err| UqError::io("template.write", target, err))?;
                let permissions = fs::metadata(source)
                    .map_err(|err| UqError::io("template.read", source, err))?
                    .permissions();
                fs::set_permissions(target, permissions)
                    .map_err(|err| UqError::io("template.write", target, err))?;
            }
            Err(_) => {
                fs::copy(source, target).map_err(|err| UqError::io("template.copy", source, err))?;
            }
        }
        Ok(())
    }

    fn is_param_file(&self, rel: &Path) -> bool {
        let Some(files) = &self.options.param_files else {
            return true;
        };
        let rel_text = normalise(rel);
        let name = rel
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        files.iter().any(|file| *file == rel_text || *file == name)
    }

    /// Replaces every `<open>identifier<close>` in `text` with the point's
    /// formatted value. Delimited text that is not an identifier is kept.
    pub fn fill(&self, text: &str, point: &ParameterPoint) -> Result<String, ErrorInfo> {
        let (open, close) = &self.options.delimiters;
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(open.as_str()) {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + open.len()..];
            let candidate = after_open
                .find(close.as_str())
                .map(|end| &after_open[..end])
                .filter(|name| is_identifier(name));
            match candidate {
                Some(name) => {
                    let value = point.get(name).ok_or_else(|| {
                        ErrorInfo::new("template.unknown_placeholder", "placeholder has no matching parameter")
                            .with_context("placeholder", name)
                            .with_context("index", point.index.to_string())
                    })?;
                    match self.schema.iter().find(|spec| spec.name == name) {
                        Some(spec) => out.push_str(&spec.format(value)),
                        None => out.push_str(&value.to_string()),
                    }
                    rest = &after_open[name.len() + close.len()..];
                }
                None => {
                    out.push_str(open);
                    rest = after_open;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// `<run_root>/run_<index:03>`.
pub fn run_dir_for(run_root: &Path, index: usize) -> PathBuf {
    run_root.join(format!("run_{index:03}"))
}

fn stale_dir_for(run_dir: &Path) -> PathBuf {
    let mut name = run_dir.file_name().unwrap_or_default().to_os_string();
    name.push(".stale");
    run_dir.with_file_name(name)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, UqError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| {
            UqError::Config(
                ErrorInfo::new("template.ignore_pattern", err.to_string())
                    .with_context("pattern", pattern.clone()),
            )
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| {
        UqError::Config(ErrorInfo::new("template.ignore_pattern", err.to_string()))
    })
}

fn normalise(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
