//! Runtime settings
//!
//! Seeded from [`TesselConfig`] at startup, then updated from the editor through
//! `initializationOptions` and `workspace/didChangeConfiguration`. Editors send either the
//! settings object itself or one nested under a `tessel` key; both are accepted. Keys that are
//! absent leave the current value alone.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tessel_config::{StringStyleConfig, TesselConfig};
use tessel_lang::FormatOptions;
use thiserror::Error;

use crate::backend::ExtVars;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub ext_vars: ExtVars,
    pub enable_eval_diagnostics: bool,
    pub enable_lint_diagnostics: bool,
    pub formatting: FormatOptions,
    pub debounce: Duration,
    pub eval_timeout: Option<Duration>,
    pub trigger_characters: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ext_vars: ExtVars::new(),
            enable_eval_diagnostics: true,
            enable_lint_diagnostics: false,
            formatting: FormatOptions::default(),
            debounce: Duration::from_millis(100),
            eval_timeout: Some(Duration::from_secs(10)),
            trigger_characters: vec![".".to_string()],
        }
    }
}

impl From<&TesselConfig> for Settings {
    fn from(config: &TesselConfig) -> Self {
        Self {
            ext_vars: config.server.ext_vars.clone(),
            enable_eval_diagnostics: config.diagnostics.eval,
            enable_lint_diagnostics: config.diagnostics.lint,
            formatting: FormatOptions::from(&config.formatting),
            debounce: config.diagnostics.debounce(),
            eval_timeout: config.diagnostics.eval_timeout(),
            trigger_characters: config.completion.trigger_characters.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// The editor-facing subset of [`Settings`]; `None` leaves a value unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsPatch {
    /// Non-string values are passed on as their JSON text.
    ext_vars: Option<BTreeMap<String, Value>>,
    enable_eval_diagnostics: Option<bool>,
    enable_lint_diagnostics: Option<bool>,
    formatting: Option<FormattingPatch>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FormattingPatch {
    indent: Option<usize>,
    max_blank_lines: Option<usize>,
    string_style: Option<StringStyleConfig>,
}

impl Settings {
    /// Apply the settings found in `value`. Nothing is changed when an error is returned.
    pub fn apply_json(&mut self, value: &Value) -> Result<(), SettingsError> {
        if value.is_null() {
            return Ok(());
        }
        let root = value.get("tessel").unwrap_or(value);
        let patch = SettingsPatch::deserialize(root)?;

        if let Some(vars) = patch.ext_vars {
            self.ext_vars = vars
                .into_iter()
                .map(|(name, value)| match value {
                    Value::String(text) => (name, text),
                    other => (name, other.to_string()),
                })
                .collect();
        }
        if let Some(flag) = patch.enable_eval_diagnostics {
            self.enable_eval_diagnostics = flag;
        }
        if let Some(flag) = patch.enable_lint_diagnostics {
            self.enable_lint_diagnostics = flag;
        }
        if let Some(formatting) = patch.formatting {
            if let Some(indent) = formatting.indent {
                self.formatting.indent = indent;
            }
            if let Some(blank) = formatting.max_blank_lines {
                self.formatting.max_blank_lines = blank;
            }
            if let Some(style) = formatting.string_style {
                self.formatting.string_style = style.into();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessel_lang::StringStyle;

    #[test]
    fn seeded_from_configuration() {
        let config = tessel_config::load_defaults().unwrap();
        let settings = Settings::from(&config);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn nested_and_flat_payloads_are_equivalent() {
        let mut flat = Settings::default();
        flat.apply_json(&json!({ "enable_lint_diagnostics": true })).unwrap();
        let mut nested = Settings::default();
        nested
            .apply_json(&json!({ "tessel": { "enable_lint_diagnostics": true } }))
            .unwrap();
        assert_eq!(flat, nested);
        assert!(flat.enable_lint_diagnostics);
    }

    #[test]
    fn ext_vars_are_replaced_and_stringified() {
        let mut settings = Settings::default();
        settings.ext_vars.insert("old".into(), "x".into());
        settings
            .apply_json(&json!({ "ext_vars": { "env": "prod", "replicas": 3 } }))
            .unwrap();
        assert_eq!(
            settings.ext_vars.into_iter().collect::<Vec<_>>(),
            vec![
                ("env".to_string(), "prod".to_string()),
                ("replicas".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn formatting_fields_update_individually() {
        let mut settings = Settings::default();
        settings
            .apply_json(&json!({ "formatting": { "indent": 4, "string_style": "single" } }))
            .unwrap();
        assert_eq!(settings.formatting.indent, 4);
        assert_eq!(settings.formatting.string_style, StringStyle::Single);
        assert_eq!(settings.formatting.max_blank_lines, 1);
    }

    #[test]
    fn invalid_payload_changes_nothing() {
        let mut settings = Settings::default();
        let err = settings
            .apply_json(&json!({ "enable_lint_diagnostics": true, "formatting": { "indent": -1 } }))
            .unwrap_err();
        assert!(err.to_string().contains("-1"), "{err}");
        assert_eq!(settings, Settings::default());

        for payload in [json!([1]), json!({ "formatting": { "string_style": "fancy" } })] {
            assert!(matches!(
                settings.apply_json(&payload),
                Err(SettingsError::Invalid(_))
            ));
        }
        assert_eq!(settings, Settings::default());
        assert!(settings.apply_json(&Value::Null).is_ok());
    }

    #[test]
    fn unknown_and_null_keys_are_ignored() {
        let mut settings = Settings::default();
        settings
            .apply_json(&json!({ "colour": "blue", "formatting": null, "ext_vars": null }))
            .unwrap();
        assert_eq!(settings, Settings::default());
    }
}
