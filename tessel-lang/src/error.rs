//! Error types produced by the Tessel toolchain
//!
//! Parse and evaluation errors are data, not failures of the host: they carry a
//! [`LocationRange`] whenever the offending source is known so that tooling can point at it.

use std::path::PathBuf;

use thiserror::Error;

use crate::location::LocationRange;

/// A lexing or parsing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render(.message, .range.as_ref()))]
pub struct ParseError {
    pub message: String,
    pub range: Option<LocationRange>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, range: LocationRange) -> Self {
        Self {
            message: message.into(),
            range: Some(range),
        }
    }
}

/// A failure raised while evaluating a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render(.message, .range.as_ref()))]
pub struct EvalError {
    pub message: String,
    pub range: Option<LocationRange>,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            range: None,
        }
    }

    pub fn at(message: impl Into<String>, range: &LocationRange) -> Self {
        Self {
            message: message.into(),
            range: Some(range.clone()),
        }
    }

    /// Attach a range unless one is already known; the innermost location wins.
    pub fn or_at(mut self, range: &LocationRange) -> Self {
        if self.range.is_none() {
            self.range = Some(range.clone());
        }
        self
    }
}

impl From<ParseError> for EvalError {
    fn from(err: ParseError) -> Self {
        Self {
            message: err.message,
            range: err.range,
        }
    }
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("cannot format source: {0}")]
    Lex(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("couldn't open import {import:?}: no match locally or in the import paths")]
    NotFound { import: String },
    #[error("couldn't read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn render(message: &str, range: Option<&LocationRange>) -> String {
    match range {
        Some(range) => format!("{range}: {message}"),
        None => message.to_string(),
    }
}
