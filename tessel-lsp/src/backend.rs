//! Evaluation backends
//!
//! A backend turns a document path into a configured [`Evaluator`]. The server picks one
//! implementation at startup:
//!
//! - [`StaticBackend`] uses the configured import paths plus the document's directory.
//! - [`ProjectBackend`] derives the import paths from the project layout around the document
//!   and falls back to the configured paths when the layout cannot be resolved.
//!
//! Both share [`EvaluationBackend::evaluator`], so external variables are injected the same way
//! regardless of the strategy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessel_config::ServerConfig;
use tessel_lang::Evaluator;
use thiserror::Error;
use tracing::debug;

/// External variables, by name.
pub type ExtVars = BTreeMap<String, String>;

/// Marks the root of a project.
pub const PROJECT_FILE: &str = "tesselfile.json";
/// Marks the directory of an entrypoint inside a project.
pub const ENTRYPOINT_FILE: &str = "main.tsl";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cannot evaluate {}: not a path to a file", .0.display())]
    InvalidPath(PathBuf),
}

pub trait EvaluationBackend: Send + Sync + 'static {
    /// Import search paths for `path`, lowest priority first.
    fn import_paths(&self, path: &Path) -> Vec<PathBuf>;

    fn max_stack(&self) -> usize {
        tessel_lang::evaluator::DEFAULT_MAX_STACK
    }

    /// Build the evaluator for the document at `path`.
    fn evaluator(&self, path: &Path, ext_vars: &ExtVars) -> Result<Evaluator, BackendError> {
        if file_dir(path).is_none() {
            return Err(BackendError::InvalidPath(path.to_path_buf()));
        }
        let evaluator = Evaluator::new()
            .with_import_paths(self.import_paths(path))
            .with_max_stack(self.max_stack());
        Ok(inject_ext_vars(evaluator, ext_vars))
    }

    /// The file an `import` in `from` resolves to, if any.
    fn resolve_import(&self, from: &Path, import: &str) -> Option<PathBuf> {
        Evaluator::new()
            .with_import_paths(self.import_paths(from))
            .resolve_import(from, import)
            .ok()
    }
}

fn inject_ext_vars(mut evaluator: Evaluator, ext_vars: &ExtVars) -> Evaluator {
    for (name, value) in ext_vars {
        evaluator.set_ext_var(name, value);
    }
    evaluator
}

fn file_dir(path: &Path) -> Option<&Path> {
    path.file_name()?;
    path.parent().filter(|dir| !dir.as_os_str().is_empty())
}

/// Configured paths plus the directory of the evaluated file.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    paths: Vec<PathBuf>,
    max_stack: usize,
}

impl StaticBackend {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            max_stack: tessel_lang::evaluator::DEFAULT_MAX_STACK,
        }
    }

    pub fn with_max_stack(mut self, max_stack: usize) -> Self {
        self.max_stack = max_stack;
        self
    }
}

impl EvaluationBackend for StaticBackend {
    fn import_paths(&self, path: &Path) -> Vec<PathBuf> {
        with_file_dir(self.paths.clone(), path)
    }

    fn max_stack(&self) -> usize {
        self.max_stack
    }
}

fn with_file_dir(mut paths: Vec<PathBuf>, path: &Path) -> Vec<PathBuf> {
    if let Some(dir) = file_dir(path) {
        paths.push(dir.to_path_buf());
    }
    paths
}

/// Why a project layout could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no {PROJECT_FILE} found above {}", .0.display())]
    NoProjectRoot(PathBuf),
    #[error("no {ENTRYPOINT_FILE} found between {} and the project root", .0.display())]
    NoEntrypoint(PathBuf),
}

/// The project root and the entrypoint directory of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub base: PathBuf,
}

impl ProjectPaths {
    /// Walk up from `path`: the root holds `tesselfile.json`, the base is the nearest directory
    /// holding `main.tsl`, and must lie inside the root.
    pub fn resolve(path: &Path) -> Result<Self, ResolveError> {
        let dir = file_dir(path).unwrap_or(path);
        let root = dir
            .ancestors()
            .find(|candidate| candidate.join(PROJECT_FILE).is_file())
            .ok_or_else(|| ResolveError::NoProjectRoot(dir.to_path_buf()))?;
        let base = dir
            .ancestors()
            .take_while(|candidate| candidate.starts_with(root))
            .find(|candidate| candidate.join(ENTRYPOINT_FILE).is_file())
            .ok_or_else(|| ResolveError::NoEntrypoint(dir.to_path_buf()))?;
        Ok(Self {
            root: root.to_path_buf(),
            base: base.to_path_buf(),
        })
    }

    /// Import paths, lowest priority first.
    pub fn import_paths(&self) -> Vec<PathBuf> {
        vec![
            self.root.join("vendor"),
            self.base.join("vendor"),
            self.root.join("lib"),
            self.base.clone(),
        ]
    }
}

/// Import paths from the project layout, or the fallback paths when there is none.
#[derive(Debug, Clone)]
pub struct ProjectBackend {
    fallback: Vec<PathBuf>,
    max_stack: usize,
}

impl ProjectBackend {
    pub fn new(fallback: Vec<PathBuf>) -> Self {
        Self {
            fallback,
            max_stack: tessel_lang::evaluator::DEFAULT_MAX_STACK,
        }
    }

    pub fn with_max_stack(mut self, max_stack: usize) -> Self {
        self.max_stack = max_stack;
        self
    }
}

impl EvaluationBackend for ProjectBackend {
    fn import_paths(&self, path: &Path) -> Vec<PathBuf> {
        match ProjectPaths::resolve(path) {
            Ok(project) => project.import_paths(),
            Err(err) => {
                debug!(path = %path.display(), "falling back to default import paths: {err}");
                with_file_dir(self.fallback.clone(), path)
            }
        }
    }

    fn max_stack(&self) -> usize {
        self.max_stack
    }
}

/// The backend selected by the server configuration.
pub fn from_config(config: &ServerConfig) -> Arc<dyn EvaluationBackend> {
    if config.resolve_paths_with_project {
        Arc::new(ProjectBackend::new(config.jpath.clone()).with_max_stack(config.max_stack))
    } else {
        Arc::new(StaticBackend::new(config.jpath.clone()).with_max_stack(config.max_stack))
    }
}
