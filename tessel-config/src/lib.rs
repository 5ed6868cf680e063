//! Shared configuration loader for the Tessel toolchain.
//!
//! `defaults/tessel.default.toml` is embedded into every binary so that docs and
//! runtime behavior stay in sync. Applications layer a user file, `TESSEL__*`
//! environment variables and command line overrides on top of those defaults via
//! [`Loader`] before deserializing into [`TesselConfig`].

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, ValueKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TOML: &str = include_str!("../defaults/tessel.default.toml");

/// Top-level configuration consumed by Tessel applications.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TesselConfig {
    pub server: ServerConfig,
    pub diagnostics: DiagnosticsConfig,
    pub completion: CompletionConfig,
    pub formatting: FormattingConfig,
    pub logging: LoggingConfig,
}

/// How evaluators are built.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub jpath: Vec<PathBuf>,
    pub resolve_paths_with_project: bool,
    #[serde(default)]
    pub ext_vars: BTreeMap<String, String>,
    pub max_stack: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiagnosticsConfig {
    pub eval: bool,
    pub lint: bool,
    pub debounce_ms: u64,
    pub eval_timeout_ms: u64,
}

impl DiagnosticsConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// `None` when evaluations may run for as long as they need.
    pub fn eval_timeout(&self) -> Option<Duration> {
        (self.eval_timeout_ms > 0).then(|| Duration::from_millis(self.eval_timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletionConfig {
    pub trigger_characters: Vec<String>,
}

/// Mirrors the knobs exposed by the Tessel formatter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FormattingConfig {
    pub indent: usize,
    pub max_blank_lines: usize,
    pub string_style: StringStyleConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StringStyleConfig {
    Double,
    Single,
    Leave,
}

impl From<StringStyleConfig> for tessel_lang::StringStyle {
    fn from(style: StringStyleConfig) -> Self {
        match style {
            StringStyleConfig::Double => tessel_lang::StringStyle::Double,
            StringStyleConfig::Single => tessel_lang::StringStyle::Single,
            StringStyleConfig::Leave => tessel_lang::StringStyle::Leave,
        }
    }
}

impl From<&FormattingConfig> for tessel_lang::FormatOptions {
    fn from(config: &FormattingConfig) -> Self {
        Self {
            indent: config.indent,
            max_blank_lines: config.max_blank_lines,
            string_style: config.string_style.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Helper for layering user overrides over the built-in defaults.
#[derive(Debug, Clone)]
pub struct Loader {
    builder: ConfigBuilder<DefaultState>,
}

impl Loader {
    /// Start a loader seeded with the embedded defaults.
    pub fn new() -> Self {
        let builder = Config::builder().add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml));
        Self { builder }
    }

    /// Layer a configuration file. Missing files trigger an error.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(true);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Layer an optional configuration file (ignored if the file is absent).
    pub fn with_optional_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(false);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Layer `TESSEL__SECTION__KEY` variables from the process environment.
    pub fn with_env(self) -> Self {
        self.with_environment(environment())
    }

    /// Layer an explicit environment source, e.g. one backed by a fixed map.
    pub fn with_environment(mut self, env: Environment) -> Self {
        self.builder = self.builder.add_source(env);
        self
    }

    /// Apply a single key/value override (useful for CLI settings).
    pub fn set_override<I>(mut self, key: &str, value: I) -> Result<Self, ConfigError>
    where
        I: Into<ValueKind>,
    {
        self.builder = self.builder.set_override(key, value)?;
        Ok(self)
    }

    /// Finalize the builder and deserialize the resulting configuration.
    pub fn build(self) -> Result<TesselConfig, ConfigError> {
        self.builder.build()?.try_deserialize()
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// The environment source used by [`Loader::with_env`].
pub fn environment() -> Environment {
    Environment::with_prefix("TESSEL")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

/// Convenience helper for callers that only need the defaults.
pub fn load_defaults() -> Result<TesselConfig, ConfigError> {
    Loader::new().build()
}
